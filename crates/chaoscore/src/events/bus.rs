use crate::{NodePhase, TemplateKind, WorkflowPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Observable changes to persisted workflow state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowNotification {
    WorkflowRegistered {
        workflow: String,
        phase: WorkflowPhase,
        timestamp: DateTime<Utc>,
    },
    WorkflowPhaseChanged {
        workflow: String,
        from: WorkflowPhase,
        to: WorkflowPhase,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    NodeCreated {
        workflow: String,
        node: String,
        template: String,
        kind: TemplateKind,
        parent: Option<String>,
        timestamp: DateTime<Utc>,
    },
    NodePhaseChanged {
        workflow: String,
        node: String,
        from: NodePhase,
        to: NodePhase,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowNotification {
    pub fn workflow(&self) -> &str {
        match self {
            WorkflowNotification::WorkflowRegistered { workflow, .. }
            | WorkflowNotification::WorkflowPhaseChanged { workflow, .. }
            | WorkflowNotification::NodeCreated { workflow, .. }
            | WorkflowNotification::NodePhaseChanged { workflow, .. } => workflow,
        }
    }
}

/// Broadcast bus for workflow notifications
///
/// Publishing never blocks; with no subscribers the notification is dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowNotification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowNotification> {
        self.sender.subscribe()
    }

    pub fn emit(&self, notification: WorkflowNotification) {
        let _ = self.sender.send(notification);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
