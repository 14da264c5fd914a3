//! One connected device: its link, identity, variable map and scope
//!
//! A [`Session`] is an explicit context object; several can exist side by
//! side, one per device connection.
//!
//! # Example
//!
//! ```ignore
//! use x2cscope::{config::Config, link::mock::MockLink, Session};
//!
//! let mut session = Session::connect(MockLink::new(), Config::default())?;
//! session.load_elf("firmware.elf")?;
//! let speed = session.variable("motor.speed")?;
//! println!("speed = {}", speed.get_value()?);
//! ```

use crate::config::Config;
use crate::error::{Result, ResultExt, X2cError};
use crate::link::{DeviceInfo, Link, LinkHandle};
use crate::resolver::{VariableMap, VariableResolver};
use crate::scope::ScopeEngine;
use crate::types::VariableInfo;
use crate::variable::Variable;
use std::path::Path;
use std::sync::Arc;

/// Connection to one device
#[derive(Debug)]
pub struct Session {
    link: LinkHandle,
    config: Config,
    device: DeviceInfo,
    resolver: VariableResolver,
    variables: Arc<VariableMap>,
    scope: ScopeEngine,
}

impl Session {
    /// Take ownership of `link` and perform the device handshake
    pub fn connect(link: impl Link + 'static, config: Config) -> Result<Self> {
        Self::with_handle(LinkHandle::new(link), config)
    }

    /// Like [`connect`](Self::connect), for a handle that is already shared
    pub fn with_handle(link: LinkHandle, config: Config) -> Result<Self> {
        config.validate()?;
        let device = link.device_handshake().context("Device handshake failed")?;
        tracing::info!(
            "Connected to device 0x{:04X} (app v{}, built {} {}), {}-bit addresses",
            device.processor_id,
            device.app_version,
            device.build_date,
            device.build_time,
            device.address_width * 8
        );

        let scope = ScopeEngine::new(link.clone(), &config.scope);
        Ok(Self {
            resolver: VariableResolver::new(config.resolver.clone()),
            link,
            config,
            device,
            variables: Arc::new(VariableMap::default()),
            scope,
        })
    }

    /// Resolve `path` for this device and replace the variable map.
    ///
    /// The swap happens with the link locked, so no round trip observes a
    /// half-replaced map. Scope channels bound to the old image are cleared.
    /// Returns the number of resolved entries.
    pub fn load_elf(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let map = self
            .resolver
            .resolve(path, self.device.address_width)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let count = map.len();

        let map = Arc::new(map);
        let variables = &mut self.variables;
        self.link.exclusive(|| *variables = map)?;

        if !self.scope.channels().is_empty() {
            tracing::debug!("New firmware image loaded, clearing scope channels");
            self.scope.clear_all();
        }
        tracing::info!("Loaded {} variables from {}", count, path.display());
        Ok(count)
    }

    /// Bind a resolved variable by its dotted name
    pub fn variable(&self, name: &str) -> Result<Variable> {
        let info = self
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| X2cError::UnknownVariable(name.to_string()))?;
        self.variable_from_info(info)
    }

    /// Bind an entry that did not come from the current map
    pub fn variable_from_info(&self, info: VariableInfo) -> Result<Variable> {
        Ok(Variable::new(info, self.link.clone(), self.device.address_width)?
            .with_max_chunk(self.config.scope.max_chunk_size))
    }

    /// Names in the current map, sorted case-insensitively
    pub fn list_variables(&self) -> Vec<&str> {
        self.variables.list()
    }

    /// Shared view of the current map for concurrent readers
    pub fn variables(&self) -> Arc<VariableMap> {
        Arc::clone(&self.variables)
    }

    pub fn scope(&self) -> &ScopeEngine {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ScopeEngine {
        &mut self.scope
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
