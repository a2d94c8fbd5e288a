//! PLC driver implementations.
//!
//! - [`s7`] - Siemens S7 over ISO-on-TCP
//! - [`simulation`] - In-memory controller for commissioning and tests
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `PlcConnector` and `PlcLink` from `plcshow_common::link`
//! 3. Register the factory in [`register_all_drivers`]

pub mod s7;
pub mod simulation;

use crate::driver_registry::DriverRegistry;
use plcshow_common::link::PlcConnector;

/// Factory for the registry: a controller with fresh, zeroed blocks.
fn create_simulation_connector() -> Box<dyn PlcConnector> {
    Box::new(simulation::SimulatedPlc::new())
}

/// Register all built-in drivers.
pub fn register_all_drivers(registry: &mut DriverRegistry) {
    registry.register("s7", s7::create_connector);
    registry.register("simulation", create_simulation_connector);
}
