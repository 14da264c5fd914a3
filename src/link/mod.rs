//! Device link abstraction
//!
//! The serial protocol itself lives outside this crate. A transport plugs in
//! by implementing [`Link`]; everything else talks to it through a
//! [`LinkHandle`], which owns the only path to the device.
//!
//! # Serialization
//!
//! The link is half-duplex: one request, one response. [`LinkHandle`] holds
//! the transport behind a single mutex and every round trip runs with that
//! mutex held, so threads sharing a handle never interleave frames. A chunked
//! scope read is many round trips, each taking the lock in turn.

#[cfg(feature = "mock-link")]
pub mod mock;
pub mod stats;

pub use stats::LinkStats;

use crate::error::{LinkError, Result, X2cError};
use crate::scope::ScopeSetup;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Default and historical payload limit of one frame
pub const DEFAULT_MAX_PAYLOAD: usize = 253;

/// Result type returned by transports
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Scope buffer status reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeParameters {
    pub scope_state: u8,
    /// Current write position in the buffer
    pub data_array_pointer: u32,
    /// Write position at which the buffer counts as full
    pub data_array_used_length: u32,
    /// Base address of the buffer
    pub data_array_address: u64,
    /// Buffer capacity in bytes
    pub data_array_size: u32,
    /// Byte position of the trigger event within the buffer
    pub trigger_event_position: u32,
}

impl ScopeParameters {
    /// Sampling finished: the scope stopped or the buffer filled up
    pub fn is_complete(&self) -> bool {
        self.scope_state == 0 || self.data_array_pointer == self.data_array_used_length
    }
}

/// Identity returned by the device handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Address width in bytes (2 on 16-bit parts, 4 on 32-bit parts)
    pub address_width: usize,
    pub processor_id: u16,
    pub app_version: u16,
    /// Firmware build date as reported by the device
    pub build_date: String,
    pub build_time: String,
}

/// Primitives a transport offers to the core
pub trait Link: Send {
    /// Read `size` bytes at `address`
    fn get_ram(&mut self, address: u64, size: usize) -> LinkResult<Vec<u8>>;

    /// Write `data` at `address`
    fn put_ram(&mut self, address: u64, data: &[u8]) -> LinkResult<()>;

    /// Read up to one frame of an array; `data_type` is the element code
    fn get_ram_array(&mut self, address: u64, size: usize, data_type: u8) -> LinkResult<Vec<u8>>;

    /// Send the scope setup and arm sampling
    fn request_scope_data(&mut self, setup: &ScopeSetup) -> LinkResult<()>;

    /// Read the scope buffer status
    fn load_parameters(&mut self) -> LinkResult<ScopeParameters>;

    fn device_handshake(&mut self) -> LinkResult<DeviceInfo>;

    /// Largest payload a single frame carries
    fn max_payload(&self) -> usize {
        DEFAULT_MAX_PAYLOAD
    }
}

struct LinkState {
    link: Box<dyn Link>,
    stats: LinkStats,
}

/// Shared, serialized access to one transport
#[derive(Clone)]
pub struct LinkHandle {
    inner: Arc<Mutex<LinkState>>,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle").finish_non_exhaustive()
    }
}

impl LinkHandle {
    pub fn new(link: impl Link + 'static) -> Self {
        Self::from_boxed(Box::new(link))
    }

    pub fn from_boxed(link: Box<dyn Link>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LinkState {
                link,
                stats: LinkStats::default(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LinkState>> {
        self.inner
            .lock()
            .map_err(|_| X2cError::Link(LinkError::msg("link lock poisoned")))
    }

    /// Run one round trip with the lock held and record its statistics
    fn round_trip<T>(
        &self,
        op: &'static str,
        payload: impl Fn(&T) -> usize,
        f: impl FnOnce(&mut dyn Link) -> LinkResult<T>,
    ) -> Result<T> {
        let mut state = self.lock()?;
        let start = Instant::now();
        let result = f(state.link.as_mut());
        let elapsed = start.elapsed().as_micros() as u64;

        match result {
            Ok(value) => {
                state.stats.record_success(elapsed, payload(&value) as u64);
                tracing::trace!("{} completed in {}us", op, elapsed);
                Ok(value)
            }
            Err(e) => {
                state.stats.record_failure();
                tracing::debug!("{} failed: {}", op, e);
                Err(X2cError::Link(e))
            }
        }
    }

    pub fn get_ram(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.round_trip("get_ram", Vec::len, |link| link.get_ram(address, size))
    }

    pub fn put_ram(&self, address: u64, data: &[u8]) -> Result<()> {
        let len = data.len();
        self.round_trip("put_ram", |_| len, |link| link.put_ram(address, data))
    }

    pub fn get_ram_array(&self, address: u64, size: usize, data_type: u8) -> Result<Vec<u8>> {
        self.round_trip("get_ram_array", Vec::len, |link| {
            link.get_ram_array(address, size, data_type)
        })
    }

    pub fn request_scope_data(&self, setup: &ScopeSetup) -> Result<()> {
        self.round_trip("request_scope_data", |_| 0, |link| link.request_scope_data(setup))
    }

    pub fn load_parameters(&self) -> Result<ScopeParameters> {
        self.round_trip("load_parameters", |_| 0, |link| link.load_parameters())
    }

    pub fn device_handshake(&self) -> Result<DeviceInfo> {
        self.round_trip("device_handshake", |_| 0, |link| link.device_handshake())
    }

    pub fn max_payload(&self) -> Result<usize> {
        Ok(self.lock()?.link.max_payload())
    }

    /// Hold the link lock while `f` runs; no round trip can start meanwhile
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.lock()?;
        Ok(f())
    }

    pub fn stats(&self) -> Result<LinkStats> {
        Ok(self.lock()?.stats.clone())
    }

    pub fn reset_stats(&self) -> Result<()> {
        self.lock()?.stats.reset();
        Ok(())
    }
}
