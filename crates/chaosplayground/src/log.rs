use crate::{Actuator, ActuatorMetadata};
use async_trait::async_trait;
use chaoscore::{FaultSpec, FaultTarget, PlaygroundError};
use tracing::info;

/// Fault that only logs; useful for dry runs
pub struct LogActuator;

impl LogActuator {
    fn message(fault: &FaultSpec) -> &str {
        fault
            .spec
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
    }
}

#[async_trait]
impl Actuator for LogActuator {
    fn kind(&self) -> &str {
        "log"
    }

    fn metadata(&self) -> ActuatorMetadata {
        ActuatorMetadata {
            description: "Logs inject and revert without touching anything".to_string(),
            category: "debug".to_string(),
        }
    }

    async fn inject(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        info!(
            workflow = %target.workflow,
            node = %target.node,
            "INJECT: {}",
            Self::message(fault)
        );
        Ok(())
    }

    async fn revert(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        info!(
            workflow = %target.workflow,
            node = %target.node,
            "REVERT: {}",
            Self::message(fault)
        );
        Ok(())
    }
}
