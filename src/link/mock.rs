//! Simulated device for testing without hardware
//!
//! [`MockLink`] behaves like a firmware image answering the link protocol:
//!
//! - **RAM regions**: reads and writes outside a mapped region fail
//! - **Scope buffer**: an armed scope reports "running" for a configurable
//!   number of polls, then "complete" with the buffer parameters
//! - **Fault injection**: chosen chunk addresses or parameter polls fail
//! - **Latency**: an injected delay per round trip
//! - **Event log**: start/end markers around every operation, for checking
//!   that callers serialize their round trips
//!
//! Clones share one device, so a test keeps a clone to inspect and steer the
//! device after handing another clone to a [`LinkHandle`](super::LinkHandle).
//!
//! # Example
//!
//! ```ignore
//! use x2cscope::link::mock::MockLink;
//!
//! let device = MockLink::new().with_address_width(2);
//! device.add_region(0x1000, 256);
//! device.write_memory(0x1000, &42u16.to_le_bytes());
//! ```

use super::{DeviceInfo, Link, LinkResult, ScopeParameters, DEFAULT_MAX_PAYLOAD};
use crate::error::LinkError;
use crate::scope::ScopeSetup;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mock memory that can be read/written
#[derive(Debug, Default, Clone)]
pub struct MockMemory {
    /// Memory regions mapped by base address
    regions: HashMap<u64, Vec<u8>>,
}

impl MockMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a zero-filled region
    pub fn add_region(&mut self, base_address: u64, size: usize) {
        self.regions.insert(base_address, vec![0u8; size]);
    }

    /// Write data that lies entirely inside one region
    pub fn write(&mut self, address: u64, data: &[u8]) -> bool {
        for (&base, region) in &mut self.regions {
            let end = base + region.len() as u64;
            if address >= base && address + data.len() as u64 <= end {
                let offset = (address - base) as usize;
                region[offset..offset + data.len()].copy_from_slice(data);
                return true;
            }
        }
        false
    }

    /// Read data that lies entirely inside one region
    pub fn read(&self, address: u64, size: usize) -> Option<Vec<u8>> {
        for (&base, region) in &self.regions {
            let end = base + region.len() as u64;
            if address >= base && address + size as u64 <= end {
                let offset = (address - base) as usize;
                return Some(region[offset..offset + size].to_vec());
            }
        }
        None
    }
}

/// Marker recorded around each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Start(&'static str),
    End(&'static str),
}

/// Number of calls per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_ram: usize,
    pub put_ram: usize,
    pub get_ram_array: usize,
    pub request_scope_data: usize,
    pub load_parameters: usize,
    pub device_handshake: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.get_ram
            + self.put_ram
            + self.get_ram_array
            + self.request_scope_data
            + self.load_parameters
            + self.device_handshake
    }
}

#[derive(Debug, Default)]
struct ScopeSim {
    buffer_address: u64,
    buffer_size: u32,
    trigger_event_position: u32,
    polls_until_ready: u32,
    remaining_polls: u32,
    armed: bool,
    last_setup: Option<ScopeSetup>,
}

#[derive(Debug, Default)]
struct Faults {
    chunk_addresses: HashSet<u64>,
    load_parameters: u32,
    handshake: bool,
}

#[derive(Debug)]
struct MockState {
    memory: MockMemory,
    scope: ScopeSim,
    faults: Faults,
    device: DeviceInfo,
    calls: CallCounts,
    events: Vec<LinkEvent>,
    delay: Duration,
    max_payload: usize,
}

/// Simulated device; see the module docs
#[derive(Debug, Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// A 32-bit device with no mapped memory
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                memory: MockMemory::new(),
                scope: ScopeSim::default(),
                faults: Faults::default(),
                device: DeviceInfo {
                    address_width: 4,
                    processor_id: 0x8230,
                    app_version: 1,
                    build_date: "Jan 01 2024".to_string(),
                    build_time: "12:00:00".to_string(),
                },
                calls: CallCounts::default(),
                events: Vec::new(),
                delay: Duration::ZERO,
                max_payload: DEFAULT_MAX_PAYLOAD,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the device from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_address_width(self, width: usize) -> Self {
        self.state().device.address_width = width;
        self
    }

    pub fn with_device_info(self, info: DeviceInfo) -> Self {
        self.state().device = info;
        self
    }

    /// Sleep this long inside every operation
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state().delay = delay;
        self
    }

    pub fn with_max_payload(self, max_payload: usize) -> Self {
        self.state().max_payload = max_payload;
        self
    }

    pub fn add_region(&self, base_address: u64, size: usize) {
        self.state().memory.add_region(base_address, size);
    }

    pub fn write_memory(&self, address: u64, data: &[u8]) -> bool {
        self.state().memory.write(address, data)
    }

    pub fn read_memory(&self, address: u64, size: usize) -> Option<Vec<u8>> {
        self.state().memory.read(address, size)
    }

    /// Map the scope buffer at `address` and fill it with `contents`
    pub fn load_scope_buffer(&self, address: u64, contents: &[u8]) {
        let mut state = self.state();
        state.memory.add_region(address, contents.len());
        state.memory.write(address, contents);
        state.scope.buffer_address = address;
        state.scope.buffer_size = contents.len() as u32;
    }

    /// Byte position of the trigger event the device will report
    pub fn set_trigger_event_position(&self, position: u32) {
        self.state().scope.trigger_event_position = position;
    }

    /// Polls answered with "running" after each request
    pub fn set_polls_until_ready(&self, polls: u32) {
        self.state().scope.polls_until_ready = polls;
    }

    /// Fail any array read starting at `address`
    pub fn fail_chunk_at(&self, address: u64) {
        self.state().faults.chunk_addresses.insert(address);
    }

    /// Fail the next `count` parameter polls
    pub fn fail_load_parameters(&self, count: u32) {
        self.state().faults.load_parameters = count;
    }

    pub fn fail_handshake(&self, fail: bool) {
        self.state().faults.handshake = fail;
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        self.state().events.clone()
    }

    pub fn last_setup(&self) -> Option<ScopeSetup> {
        self.state().scope.last_setup.clone()
    }

    /// Record start, wait, run `f` on the state, record end.
    ///
    /// The state lock is released during the wait so that unserialized
    /// callers show up as overlapping start events.
    fn operate<T>(&self, op: &'static str, f: impl FnOnce(&mut MockState) -> T) -> T {
        let delay = {
            let mut state = self.state();
            state.events.push(LinkEvent::Start(op));
            state.delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.state();
        let result = f(&mut state);
        state.events.push(LinkEvent::End(op));
        result
    }

    fn parameters(scope: &ScopeSim) -> ScopeParameters {
        let used = scope.buffer_size;
        let running = scope.armed && scope.remaining_polls > 0;
        ScopeParameters {
            scope_state: if running { 1 } else { 2 },
            data_array_pointer: if running { used / 2 } else { used },
            data_array_used_length: used,
            data_array_address: scope.buffer_address,
            data_array_size: scope.buffer_size,
            trigger_event_position: scope.trigger_event_position,
        }
    }
}

impl Link for MockLink {
    fn get_ram(&mut self, address: u64, size: usize) -> LinkResult<Vec<u8>> {
        self.operate("get_ram", |state| {
            state.calls.get_ram += 1;
            state.memory.read(address, size).ok_or_else(|| {
                LinkError::msg(format!("read of {} bytes at 0x{:X} outside RAM", size, address))
            })
        })
    }

    fn put_ram(&mut self, address: u64, data: &[u8]) -> LinkResult<()> {
        self.operate("put_ram", |state| {
            state.calls.put_ram += 1;
            if state.memory.write(address, data) {
                Ok(())
            } else {
                Err(LinkError::msg(format!(
                    "write of {} bytes at 0x{:X} outside RAM",
                    data.len(),
                    address
                )))
            }
        })
    }

    fn get_ram_array(&mut self, address: u64, size: usize, _data_type: u8) -> LinkResult<Vec<u8>> {
        self.operate("get_ram_array", |state| {
            state.calls.get_ram_array += 1;
            if size > state.max_payload {
                return Err(LinkError::msg(format!(
                    "chunk of {} bytes exceeds payload limit {}",
                    size, state.max_payload
                )));
            }
            if state.faults.chunk_addresses.contains(&address) {
                return Err(LinkError::msg(format!("CRC error at 0x{:X}", address)));
            }
            state
                .memory
                .read(address, size)
                .ok_or_else(|| LinkError::msg(format!("array read at 0x{:X} outside RAM", address)))
        })
    }

    fn request_scope_data(&mut self, setup: &ScopeSetup) -> LinkResult<()> {
        self.operate("request_scope_data", |state| {
            state.calls.request_scope_data += 1;
            state.scope.armed = true;
            state.scope.remaining_polls = state.scope.polls_until_ready;
            state.scope.last_setup = Some(setup.clone());
            Ok(())
        })
    }

    fn load_parameters(&mut self) -> LinkResult<ScopeParameters> {
        self.operate("load_parameters", |state| {
            state.calls.load_parameters += 1;
            if state.faults.load_parameters > 0 {
                state.faults.load_parameters -= 1;
                return Err(LinkError::msg("no response from device"));
            }
            let params = Self::parameters(&state.scope);
            if state.scope.armed && state.scope.remaining_polls > 0 {
                state.scope.remaining_polls -= 1;
            }
            Ok(params)
        })
    }

    fn device_handshake(&mut self) -> LinkResult<DeviceInfo> {
        self.operate("device_handshake", |state| {
            state.calls.device_handshake += 1;
            if state.faults.handshake {
                return Err(LinkError::msg("handshake timed out"));
            }
            Ok(state.device.clone())
        })
    }

    fn max_payload(&self) -> usize {
        self.state().max_payload
    }
}
