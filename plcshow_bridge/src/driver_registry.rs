//! Driver registry for PLC connectors.
//!
//! Constructed at startup, populated via `register()`, and consulted once
//! when the session is built. No global state.

use plcshow_common::link::{ConnectorFactory, PlcConnector};
use std::collections::HashMap;
use thiserror::Error;

/// Registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No driver with this name is registered.
    #[error("Driver not found: {0}")]
    DriverNotFound(String),
}

/// Registry of available PLC drivers.
pub struct DriverRegistry {
    factories: HashMap<&'static str, ConnectorFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry holding every built-in driver.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all_drivers(&mut registry);
        registry
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if a driver with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: ConnectorFactory) {
        if self.factories.contains_key(name) {
            panic!("Driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a driver factory by name.
    pub fn get_factory(&self, name: &str) -> Option<ConnectorFactory> {
        self.factories.get(name).copied()
    }

    /// Create a connector by name.
    ///
    /// # Errors
    /// Returns `RegistryError::DriverNotFound` if no driver with the given name is registered.
    pub fn create_connector(&self, name: &str) -> Result<Box<dyn PlcConnector>, RegistryError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| RegistryError::DriverNotFound(name.to_string()))?;
        Ok(factory())
    }

    /// List all registered driver names, sorted.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedPlc;

    fn create_test_connector() -> Box<dyn PlcConnector> {
        Box::new(SimulatedPlc::new())
    }

    #[test]
    fn registry_register_and_create() {
        let mut reg = DriverRegistry::new();
        reg.register("test_driver", create_test_connector);

        let connector = reg.create_connector("test_driver").expect("should create");
        assert_eq!(connector.driver_name(), "simulation");
    }

    #[test]
    fn registry_driver_not_found() {
        let reg = DriverRegistry::new();
        let result = reg.create_connector("profinet");
        assert!(matches!(result, Err(RegistryError::DriverNotFound(name)) if name == "profinet"));
    }

    #[test]
    fn registry_builtin_drivers() {
        let reg = DriverRegistry::with_builtin_drivers();
        assert_eq!(reg.list_drivers(), vec!["s7", "simulation"]);
        assert_eq!(reg.create_connector("s7").unwrap().driver_name(), "s7");
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = DriverRegistry::new();
        reg.register("dup", create_test_connector);
        reg.register("dup", create_test_connector);
    }
}
