use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of events that drive the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    WorkflowCreated,
    WorkflowFinished,
    WorkflowAborted,
    NodeCreated,
    NodePickChildToSchedule,
    NodeChaosInjectSucceed,
    NodeChaosInjectFailed,
    NodeHoldingAwake,
    ChildNodeSucceed,
    ChildNodeFailed,
    NodeFinished,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An immutable engine event.
///
/// An empty `node_name` addresses the workflow itself: the `Workflow*`
/// events and the `ChildNode*` events the entry node sends to its (absent)
/// parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub workflow_name: String,
    pub node_name: String,
    pub event_type: EventType,

    /// Optional detail, e.g. the reason an injection failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// How many times this event has been re-delivered after a failed consumption
    #[serde(default)]
    pub attempt: u32,
}

impl Event {
    pub fn new(
        workflow_name: impl Into<String>,
        node_name: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            node_name: node_name.into(),
            event_type,
            payload: None,
            attempt: 0,
        }
    }

    /// Event addressed to the workflow rather than one of its nodes
    pub fn for_workflow(workflow_name: impl Into<String>, event_type: EventType) -> Self {
        Self::new(workflow_name, "", event_type)
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_workflow_level(&self) -> bool {
        self.node_name.is_empty()
    }

    /// Copy of this event for the next re-delivery
    pub fn redelivered(&self) -> Self {
        let mut next = self.clone();
        next.attempt += 1;
        next
    }

    /// Reason carried in the payload, if any
    pub fn reason(&self) -> Option<String> {
        self.payload.as_ref().and_then(|p| match p {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("reason")
                .and_then(|r| r.as_str())
                .map(|r| r.to_string()),
            _ => None,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.node_name.is_empty() {
            write!(f, "{}({})", self.event_type, self.workflow_name)
        } else {
            write!(f, "{}({}/{})", self.event_type, self.workflow_name, self.node_name)
        }
    }
}
