//! Scope channels, trigger settings and the setup snapshot sent to the device

use crate::types::Representation;
use crate::variable::Variable;

/// One sampled variable; its insertion order fixes its place in a sample row
#[derive(Debug, Clone)]
pub struct ScopeChannel {
    variable: Variable,
}

impl ScopeChannel {
    pub(crate) fn new(variable: Variable) -> Self {
        Self { variable }
    }

    pub fn name(&self) -> &str {
        &self.variable.info().name
    }

    pub fn address(&self) -> u64 {
        self.variable.info().address
    }

    /// Bytes this channel contributes to each sample row
    pub fn width(&self) -> usize {
        self.variable.representation().width()
    }

    pub fn representation(&self) -> Representation {
        self.variable.representation()
    }

    pub fn is_signed(&self) -> bool {
        self.representation().is_signed()
    }

    pub fn is_float(&self) -> bool {
        self.representation().is_float()
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    fn setup(&self) -> ChannelSetup {
        ChannelSetup {
            name: self.name().to_string(),
            address: self.address(),
            width: self.width(),
            signed: self.is_signed(),
            float: self.is_float(),
        }
    }
}

/// Whether the scope waits for the trigger condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Capture immediately
    Auto,
    /// Capture when the trigger condition is met
    #[default]
    Triggered,
}

impl TriggerMode {
    /// Device encoding (0 auto, 1 triggered)
    pub fn code(self) -> u8 {
        match self {
            TriggerMode::Auto => 0,
            TriggerMode::Triggered => 1,
        }
    }
}

/// Edge of the trigger channel that fires the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerEdge {
    #[default]
    Rising,
    Falling,
}

impl TriggerEdge {
    /// Device encoding (0 rising, 1 falling)
    pub fn code(self) -> u8 {
        match self {
            TriggerEdge::Rising => 0,
            TriggerEdge::Falling => 1,
        }
    }
}

/// Trigger settings, referencing a channel by name
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    pub channel: String,
    pub level: f64,
    pub mode: TriggerMode,
    /// Samples between the trigger event and time zero; negative skips realignment
    pub delay: i32,
    pub edge: TriggerEdge,
}

impl TriggerConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            level: 0.0,
            mode: TriggerMode::default(),
            delay: 0,
            edge: TriggerEdge::default(),
        }
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    pub fn with_mode(mut self, mode: TriggerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_delay(mut self, delay: i32) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_edge(mut self, edge: TriggerEdge) -> Self {
        self.edge = edge;
        self
    }
}

/// A channel as the device sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSetup {
    pub name: String,
    pub address: u64,
    pub width: usize,
    pub signed: bool,
    pub float: bool,
}

/// The trigger as the device sees it
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSetup {
    /// Index into [`ScopeSetup::channels`]
    pub channel_index: usize,
    pub channel: ChannelSetup,
    pub level: f64,
    pub mode: TriggerMode,
    pub delay: i32,
    pub edge: TriggerEdge,
}

/// Everything a link needs to arm the device scope
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeSetup {
    pub channels: Vec<ChannelSetup>,
    pub trigger: Option<TriggerSetup>,
    /// Prescaler: 0 keeps every sample, 1 every second, ...
    pub sample_time_factor: u32,
    pub scope_state: u8,
}

impl ScopeSetup {
    pub(crate) fn build(
        channels: &[ScopeChannel],
        trigger: Option<&TriggerConfig>,
        sample_time_factor: u32,
        scope_state: u8,
    ) -> Self {
        let trigger = trigger.and_then(|t| {
            let index = channels.iter().position(|c| c.name() == t.channel)?;
            Some(TriggerSetup {
                channel_index: index,
                channel: channels[index].setup(),
                level: t.level,
                mode: t.mode,
                delay: t.delay,
                edge: t.edge,
            })
        });
        Self {
            channels: channels.iter().map(ScopeChannel::setup).collect(),
            trigger,
            sample_time_factor,
            scope_state,
        }
    }

    /// Bytes per sample row
    pub fn dataset_size(&self) -> usize {
        self.channels.iter().map(|c| c.width).sum()
    }
}
