//! Mock construction helpers

use mockall::mock;
#[cfg(feature = "mock-link")]
use x2cscope::link::mock::MockLink;
#[cfg(feature = "mock-link")]
use x2cscope::link::LinkHandle;
use x2cscope::link::{DeviceInfo, Link, LinkResult, ScopeParameters};
use x2cscope::scope::ScopeSetup;

// Strict transport double: any call without an expectation panics
mock! {
    pub Transport {}

    impl Link for Transport {
        fn get_ram(&mut self, address: u64, size: usize) -> LinkResult<Vec<u8>>;
        fn put_ram(&mut self, address: u64, data: &[u8]) -> LinkResult<()>;
        fn get_ram_array(&mut self, address: u64, size: usize, data_type: u8) -> LinkResult<Vec<u8>>;
        fn request_scope_data(&mut self, setup: &ScopeSetup) -> LinkResult<()>;
        fn load_parameters(&mut self) -> LinkResult<ScopeParameters>;
        fn device_handshake(&mut self) -> LinkResult<DeviceInfo>;
        fn max_payload(&self) -> usize;
    }
}

pub fn device_info(address_width: usize) -> DeviceInfo {
    DeviceInfo {
        address_width,
        processor_id: 0x8230,
        app_version: 3,
        build_date: "Mar 04 2024".to_string(),
        build_time: "09:30:00".to_string(),
    }
}

/// A transport that answers exactly one handshake and nothing else
pub fn handshake_only(address_width: usize) -> MockTransport {
    let mut transport = MockTransport::new();
    transport
        .expect_device_handshake()
        .times(1)
        .returning(move || Ok(device_info(address_width)));
    transport
}

/// Simulated 16-bit device with the scope buffer loaded
#[cfg(feature = "mock-link")]
pub fn scope_device(buffer: &[u8], trigger_event_position: u32) -> (MockLink, LinkHandle) {
    let device = MockLink::new().with_address_width(2);
    device.add_region(0x1000, 64);
    device.load_scope_buffer(0x4000, buffer);
    device.set_trigger_event_position(trigger_event_position);
    let handle = LinkHandle::new(device.clone());
    (device, handle)
}
