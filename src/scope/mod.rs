//! Scope acquisition engine
//!
//! The device samples every configured channel into a ring buffer. One
//! acquisition cycle runs:
//!
//! 1. [`ScopeEngine::request_scope_data`] arms the device with the current setup
//! 2. [`ScopeEngine::is_scope_data_ready`] is polled by the caller until true
//! 3. [`ScopeEngine::get_scope_channel_data`] reads the buffer in bounded
//!    chunks, splits it into per-channel sequences and rotates them so the
//!    trigger lands at the configured delay
//!
//! The engine never waits or retries on its own; poll cadence and retry
//! policy belong to the caller.

mod channel;
pub mod reconstruct;

pub use channel::{
    ChannelSetup, ScopeChannel, ScopeSetup, TriggerConfig, TriggerEdge, TriggerMode, TriggerSetup,
};

use crate::config::ScopeConfig;
use crate::error::{Result, X2cError};
use crate::link::{LinkHandle, ScopeParameters};
use crate::types::{Representation, Value};
use crate::variable::{Variable, ARRAY_DATA_TYPE};
use reconstruct::Chunk;

/// Scope state sent with a request when none was configured
pub const DEFAULT_SCOPE_STATE: u8 = 0x02;

/// Result of one buffer read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeData {
    /// Sequences in channel order
    pub channels: Vec<(String, Vec<Value>)>,
    /// Chunks that could not be read; their bytes are missing from the sequences
    pub failed_chunks: Vec<Chunk>,
    /// Samples per channel
    pub rows: usize,
    /// Sequences were rotated around the trigger event
    pub realigned: bool,
}

impl ScopeData {
    pub fn get(&self, name: &str) -> Option<&[Value]> {
        self.channels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Samples of one channel converted for plotting
    pub fn as_f64(&self, name: &str) -> Option<Vec<f64>> {
        self.get(name)
            .map(|values| values.iter().map(Value::as_f64).collect())
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|(name, _)| name.as_str())
    }

    /// Every chunk was read
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Channel set, trigger and acquisition state for one device scope
#[derive(Debug)]
pub struct ScopeEngine {
    link: LinkHandle,
    channels: Vec<ScopeChannel>,
    trigger: Option<TriggerConfig>,
    sample_time_factor: u32,
    scope_state: u8,
    max_channels: usize,
    max_chunk: usize,
    /// Last buffer status seen from the device
    parameters: Option<ScopeParameters>,
}

impl ScopeEngine {
    pub fn new(link: LinkHandle, config: &ScopeConfig) -> Self {
        Self {
            link,
            channels: Vec::new(),
            trigger: None,
            sample_time_factor: 0,
            scope_state: DEFAULT_SCOPE_STATE,
            max_channels: config.max_channels,
            max_chunk: config.max_chunk_size,
            parameters: None,
        }
    }

    /// Append `variable` as the last channel of each sample row
    pub fn add_channel(&mut self, variable: Variable) -> Result<()> {
        if self.channel_index(variable.name()).is_some() {
            return Err(X2cError::ChannelExists(variable.name().to_string()));
        }
        if self.channels.len() >= self.max_channels {
            return Err(X2cError::TooManyChannels {
                limit: self.max_channels,
            });
        }
        if variable.is_array() {
            tracing::debug!(
                "Scope channel '{}' is an array; only its first element is sampled",
                variable.name()
            );
        }

        self.channels.push(ScopeChannel::new(variable));
        self.layout_changed();
        Ok(())
    }

    /// Remove a channel by name; removing the trigger channel resets the trigger
    pub fn remove_channel(&mut self, name: &str) -> Result<()> {
        let index = self
            .channel_index(name)
            .ok_or_else(|| X2cError::ChannelNotFound(name.to_string()))?;
        self.channels.remove(index);

        if self.trigger.as_ref().is_some_and(|t| t.channel == name) {
            tracing::debug!("Trigger channel '{}' removed, trigger reset", name);
            self.trigger = None;
        }
        self.layout_changed();
        Ok(())
    }

    /// Remove every channel and the trigger
    pub fn clear_all(&mut self) {
        self.channels.clear();
        self.trigger = None;
        self.layout_changed();
    }

    pub fn channels(&self) -> &[ScopeChannel] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&ScopeChannel> {
        self.channels.iter().find(|c| c.name() == name)
    }

    /// Bytes per sample row
    pub fn dataset_size(&self) -> usize {
        self.channels.iter().map(ScopeChannel::width).sum()
    }

    /// Set the trigger; its channel must already be present
    pub fn set_trigger(&mut self, config: TriggerConfig) -> Result<()> {
        if self.channel_index(&config.channel).is_none() {
            return Err(X2cError::ChannelNotFound(config.channel));
        }
        if let Some(rows) = self.buffer_rows() {
            check_delay(config.delay, rows)?;
        }
        self.trigger = Some(config);
        Ok(())
    }

    pub fn reset_trigger(&mut self) {
        self.trigger = None;
    }

    pub fn trigger(&self) -> Option<&TriggerConfig> {
        self.trigger.as_ref()
    }

    /// Sample prescaler: 0 keeps every sample, 1 every second, ...
    pub fn set_sample_time(&mut self, factor: u32) {
        self.sample_time_factor = factor;
    }

    pub fn sample_time_factor(&self) -> u32 {
        self.sample_time_factor
    }

    pub fn set_scope_state(&mut self, state: u8) {
        self.scope_state = state;
    }

    pub fn scope_state(&self) -> u8 {
        self.scope_state
    }

    /// Snapshot of what [`request_scope_data`](Self::request_scope_data) sends
    pub fn setup(&self) -> ScopeSetup {
        ScopeSetup::build(
            &self.channels,
            self.trigger.as_ref(),
            self.sample_time_factor,
            self.scope_state,
        )
    }

    /// Arm the device; sending the same setup twice is harmless
    pub fn request_scope_data(&mut self) -> Result<()> {
        let setup = self.setup();
        tracing::debug!(
            "Requesting scope data: {} channel(s), {} bytes per row",
            setup.channels.len(),
            setup.dataset_size()
        );
        self.link.request_scope_data(&setup)?;
        self.parameters = None;
        Ok(())
    }

    /// Poll the buffer status once
    pub fn is_scope_data_ready(&mut self) -> Result<bool> {
        let params = self.link.load_parameters()?;
        tracing::trace!("Scope parameters: {:?}", params);
        self.parameters = Some(params);
        Ok(params.is_complete())
    }

    /// Last buffer status, polling the device if none is known
    pub fn parameters(&mut self) -> Result<ScopeParameters> {
        match self.parameters {
            Some(params) => Ok(params),
            None => {
                let params = self.link.load_parameters()?;
                self.parameters = Some(params);
                Ok(params)
            }
        }
    }

    /// Row index of the trigger event
    pub fn get_trigger_position(&mut self) -> Result<i64> {
        let dataset_size = self.dataset_size();
        if dataset_size == 0 {
            return Err(X2cError::InvalidTrigger("no scope channels".to_string()));
        }
        let params = self.parameters()?;
        Ok(i64::from(params.trigger_event_position) / dataset_size as i64)
    }

    /// Row index that becomes the first sample after realignment
    pub fn get_delay_trigger_position(&mut self) -> Result<i64> {
        Ok(self.get_trigger_position()? - i64::from(self.trigger_delay()))
    }

    /// Read the scope buffer and split it into channel sequences.
    ///
    /// With `valid_data` false the sequences keep the buffer's write order;
    /// otherwise they are rotated around the trigger unless the delay is
    /// negative. Chunks that fail to read are logged and listed in
    /// [`ScopeData::failed_chunks`]; rows touching them are left out, and the
    /// read is not rotated since the trigger index no longer fits the rows.
    pub fn get_scope_channel_data(&mut self, valid_data: bool) -> Result<ScopeData> {
        if self.channels.is_empty() {
            return Ok(ScopeData::default());
        }

        let params = self.parameters()?;
        let dataset_size = self.dataset_size();
        let usable = reconstruct::usable_length(params.data_array_size as usize, dataset_size);
        let max_chunk = self.max_chunk.min(self.link.max_payload()?);
        let chunks = reconstruct::plan_chunks(params.data_array_address, usable, max_chunk);

        let mut data = Vec::with_capacity(usable);
        let mut failed_chunks = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            match self
                .link
                .get_ram_array(chunk.address, chunk.size, ARRAY_DATA_TYPE)
            {
                Ok(bytes) if bytes.len() == chunk.size => {
                    data.extend_from_slice(&bytes);
                    continue;
                }
                Ok(bytes) => tracing::warn!(
                    "Scope chunk {} at 0x{:X}: expected {} bytes, got {}",
                    i,
                    chunk.address,
                    chunk.size,
                    bytes.len()
                ),
                Err(e) => {
                    tracing::warn!("Error reading scope chunk {} at 0x{:X}: {}", i, chunk.address, e)
                }
            }
            // Keep later chunks at their buffer offsets
            data.resize(data.len() + chunk.size, 0);
            failed_chunks.push(*chunk);
        }

        let complete = reconstruct::complete_rows(
            &data,
            params.data_array_address,
            &failed_chunks,
            dataset_size,
        );
        let layout: Vec<Representation> =
            self.channels.iter().map(ScopeChannel::representation).collect();
        let mut sequences = reconstruct::decode_rows(&complete, &layout)?;
        let rows = sequences.first().map_or(0, Vec::len);

        let delay = self.trigger_delay();
        let mut realigned = false;
        if valid_data && delay >= 0 && rows > 0 {
            check_delay(delay, usable / dataset_size)?;
            if failed_chunks.is_empty() {
                let delayed = i64::from(params.trigger_event_position) / dataset_size as i64
                    - i64::from(delay);
                reconstruct::realign(&mut sequences, delayed);
                realigned = true;
            } else {
                tracing::warn!(
                    "Trigger realignment skipped: {} scope chunk(s) missing",
                    failed_chunks.len()
                );
            }
        }

        tracing::debug!(
            "Read {} rows from scope buffer ({} of {} chunks failed)",
            rows,
            failed_chunks.len(),
            chunks.len()
        );

        Ok(ScopeData {
            channels: self
                .channels
                .iter()
                .map(|c| c.name().to_string())
                .zip(sequences)
                .collect(),
            failed_chunks,
            rows,
            realigned,
        })
    }

    /// Realized capture window in milliseconds for a sample period in microseconds
    pub fn scope_sample_time(&mut self, period_us: f64) -> Result<f64> {
        let params = self.parameters()?;
        let window = reconstruct::sample_time_ms(
            period_us,
            params.data_array_size as usize,
            self.dataset_size(),
            self.sample_time_factor,
        );
        tracing::info!("Total time for the scope capture: {} ms", window);
        Ok(window)
    }

    fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name() == name)
    }

    fn trigger_delay(&self) -> i32 {
        self.trigger.as_ref().map_or(0, |t| t.delay)
    }

    /// Buffer depth in rows, once the device has reported its buffer size
    fn buffer_rows(&self) -> Option<usize> {
        let dataset_size = self.dataset_size();
        let params = self.parameters.as_ref()?;
        (dataset_size > 0).then(|| params.data_array_size as usize / dataset_size)
    }

    fn layout_changed(&mut self) {
        tracing::debug!(
            "Scope layout: {} channel(s), {} bytes per row",
            self.channels.len(),
            self.dataset_size()
        );
        self.parameters = None;
    }
}

fn check_delay(delay: i32, rows: usize) -> Result<()> {
    if delay.unsigned_abs() as usize >= rows {
        return Err(X2cError::InvalidTrigger(format!(
            "delay {} exceeds buffer depth of {} samples",
            delay, rows
        )));
    }
    Ok(())
}
