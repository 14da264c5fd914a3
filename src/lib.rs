//! # x2cscope: live variable access and scope capture for X2C firmware
//!
//! Attach to running firmware over a serial link, resolve variable names from
//! the firmware's own debug information, read and write them, and capture
//! triggered multi-channel traces from the on-device scope buffer.
//!
//! ## Architecture
//!
//! - **Resolver**: turns an ELF image's DWARF graph into a flat map of
//!   addressable variables, through the native gimli backend or the legacy
//!   text-dump backend used for 16-bit targets
//! - **Variable**: binds one resolved entry to the link and marshals values
//! - **Scope**: manages channels and the trigger, and rebuilds per-channel
//!   time series from a chunk-read ring buffer
//! - **Link**: the transport seam; every round trip is serialized through a
//!   [`LinkHandle`]
//!
//! ## Configuration
//!
//! Settings are read from `x2cscope.toml` in the platform config directory:
//!
//! - **Linux**: `~/.config/x2cscope/x2cscope.toml`
//! - **macOS**: `~/Library/Application Support/x2cscope/x2cscope.toml`
//! - **Windows**: `%APPDATA%\x2cscope\x2cscope.toml`
//!
//! ## Example
//!
//! ```ignore
//! use x2cscope::{config::Config, scope::TriggerConfig, Session};
//!
//! fn main() -> x2cscope::Result<()> {
//!     let config = Config::load_or_default();
//!     let _guard = x2cscope::logging::init(&config.logging)?;
//!
//!     let mut session = Session::connect(open_serial_link()?, config)?;
//!     session.load_elf("build/firmware.elf")?;
//!
//!     let speed = session.variable("motor.speed")?;
//!     let current = session.variable("motor.current")?;
//!     let scope = session.scope_mut();
//!     scope.add_channel(speed)?;
//!     scope.add_channel(current)?;
//!     scope.set_trigger(TriggerConfig::new("motor.speed").with_level(500.0).with_delay(-10))?;
//!
//!     scope.request_scope_data()?;
//!     while !scope.is_scope_data_ready()? {
//!         std::thread::sleep(std::time::Duration::from_millis(50));
//!     }
//!     let data = scope.get_scope_channel_data(true)?;
//!     println!("{} samples", data.rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod logging;
pub mod resolver;
pub mod scope;
pub mod session;
pub mod types;
pub mod variable;

// Re-export commonly used types
pub use error::{LinkError, Result, X2cError};
pub use link::{DeviceInfo, Link, LinkHandle, ScopeParameters};
pub use resolver::{resolve, VariableMap, VariableResolver};
pub use scope::{ScopeData, ScopeEngine, TriggerConfig, TriggerEdge, TriggerMode};
pub use session::Session;
pub use types::{Representation, Value, VariableInfo};
pub use variable::Variable;
