//! Standard fault actuators
//!
//! An [`ActuatorRegistry`] is a `Playground` that dispatches each fault to
//! the actuator registered for its kind.

mod command;
mod log;
mod registry;
mod sleep;

pub use command::CommandActuator;
pub use log::LogActuator;
pub use registry::{Actuator, ActuatorMetadata, ActuatorRegistry};
pub use sleep::SleepActuator;

use std::sync::Arc;

/// Register all built-in actuators with a registry
pub fn register_all(registry: &mut ActuatorRegistry) {
    registry.register(Arc::new(LogActuator));
    registry.register(Arc::new(CommandActuator));
    registry.register(Arc::new(SleepActuator));
}
