#![allow(dead_code)]

use async_trait::async_trait;
use chaoscore::{
    FaultSpec, FaultTarget, Playground, PlaygroundError, RevertTarget, WorkflowNotification,
};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::broadcast;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Inject { node: String, fault: String },
    Revert { node: String, target: RevertTarget },
}

/// Playground that records every call
///
/// Faults of kind "fail" can not be injected, faults of kind "stuck" can not be reverted.
#[derive(Default)]
pub struct RecordingPlayground {
    calls: Mutex<Vec<(Call, Instant)>>,
}

impl RecordingPlayground {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn injects_for(&self, node: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Inject { node: n, .. } if n == node))
            .count()
    }

    pub fn reverts_for(&self, node: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Revert { node: n, .. } if n == node))
            .count()
    }
}

#[async_trait]
impl Playground for RecordingPlayground {
    async fn inject(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<String, PlaygroundError> {
        self.calls.lock().unwrap().push((
            Call::Inject {
                node: target.node.clone(),
                fault: fault.kind.clone(),
            },
            Instant::now(),
        ));
        if fault.kind == "fail" {
            return Err(PlaygroundError::InjectFailed(format!("{} refused", target.node)));
        }
        Ok(format!("{}-ref", target.node))
    }

    async fn revert(&self, target: &RevertTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        let node = match target {
            RevertTarget::Injection(id) => id.trim_end_matches("-ref").to_string(),
            RevertTarget::Node(t) => t.node.clone(),
        };
        self.calls.lock().unwrap().push((
            Call::Revert {
                node,
                target: target.clone(),
            },
            Instant::now(),
        ));
        if fault.kind == "stuck" {
            return Err(PlaygroundError::RevertFailed("fault is stuck".to_string()));
        }
        Ok(())
    }
}

/// Drain everything currently buffered on a bus receiver
pub fn drain(rx: &mut broadcast::Receiver<WorkflowNotification>) -> Vec<WorkflowNotification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}
