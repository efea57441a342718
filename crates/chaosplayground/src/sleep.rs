use crate::{Actuator, ActuatorMetadata};
use async_trait::async_trait;
use chaoscore::{FaultSpec, FaultTarget, PlaygroundError};
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Simulated actuation latency
///
/// Spec fields: `inject_ms`, `revert_ms` (default 0) and `fail_inject`
/// (default false) to rehearse a failing fault.
pub struct SleepActuator;

fn millis(fault: &FaultSpec, key: &str) -> Duration {
    Duration::from_millis(fault.spec.get(key).and_then(|v| v.as_u64()).unwrap_or(0))
}

#[async_trait]
impl Actuator for SleepActuator {
    fn kind(&self) -> &str {
        "sleep"
    }

    fn metadata(&self) -> ActuatorMetadata {
        ActuatorMetadata {
            description: "Waits for the configured milliseconds on inject and revert".to_string(),
            category: "time".to_string(),
        }
    }

    async fn inject(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        let delay = millis(fault, "inject_ms");
        debug!(node = %target.node, delay_ms = delay.as_millis() as u64, "simulating inject");
        sleep(delay).await;

        if fault.spec.get("fail_inject").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(PlaygroundError::InjectFailed(format!(
                "simulated failure for {}",
                target.node
            )));
        }
        Ok(())
    }

    async fn revert(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        let delay = millis(fault, "revert_ms");
        debug!(node = %target.node, delay_ms = delay.as_millis() as u64, "simulating revert");
        sleep(delay).await;
        Ok(())
    }
}
