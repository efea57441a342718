use crate::{Actuator, ActuatorMetadata};
use async_trait::async_trait;
use chaoscore::{FaultSpec, FaultTarget, PlaygroundError};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Runs shell commands to inject and revert a fault
///
/// Spec fields: `inject` (required), `revert` (optional) and `env`, an
/// object of extra environment variables. The target is exposed to the
/// commands as `CHAOS_WORKFLOW` and `CHAOS_NODE`.
pub struct CommandActuator;

enum Phase {
    Inject,
    Revert,
}

impl Phase {
    fn key(&self) -> &'static str {
        match self {
            Phase::Inject => "inject",
            Phase::Revert => "revert",
        }
    }

    fn failed(&self, message: String) -> PlaygroundError {
        match self {
            Phase::Inject => PlaygroundError::InjectFailed(message),
            Phase::Revert => PlaygroundError::RevertFailed(message),
        }
    }
}

impl CommandActuator {
    async fn run(
        &self,
        phase: Phase,
        script: &str,
        target: &FaultTarget,
        fault: &FaultSpec,
    ) -> Result<(), PlaygroundError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .env("CHAOS_WORKFLOW", &target.workflow)
            .env("CHAOS_NODE", &target.node)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(Value::Object(env)) = fault.spec.get("env") {
            for (key, value) in env {
                match value {
                    Value::String(s) => cmd.env(key, s),
                    other => cmd.env(key, other.to_string()),
                };
            }
        }

        info!(node = %target.node, phase = phase.key(), command = script, "running fault command");
        let output = cmd
            .output()
            .await
            .map_err(|e| phase.failed(format!("Failed to spawn command: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(phase.failed(format!(
                "Command exited with status: {}. stderr: {}",
                output.status, stderr
            )));
        }
        if !stderr.is_empty() {
            warn!(node = %target.node, phase = phase.key(), stderr = %stderr, "fault command wrote to stderr");
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for CommandActuator {
    fn kind(&self) -> &str {
        "command"
    }

    fn metadata(&self) -> ActuatorMetadata {
        ActuatorMetadata {
            description: "Runs configured shell commands on inject and revert".to_string(),
            category: "process".to_string(),
        }
    }

    async fn inject(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        let script = fault
            .spec
            .get("inject")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlaygroundError::InvalidFault {
                kind: fault.kind.clone(),
                message: "missing 'inject' command".to_string(),
            })?;
        self.run(Phase::Inject, script, target, fault).await
    }

    async fn revert(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        match fault.spec.get("revert").and_then(|v| v.as_str()) {
            Some(script) => self.run(Phase::Revert, script, target, fault).await,
            None => Ok(()),
        }
    }
}
