//! Declarative intents emitted by state machines and applied by the resolver.

mod backends;
mod resolver;

pub use backends::{ActorBackend, RepositoryBackend, TriggerBackend};
pub use resolver::{SideEffectBackend, SideEffectResolver};

use chaoscore::{ChaosActor, Event, NodePhase, TemplateKind, WorkflowPhase};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Compare-and-swap of a node phase
    UpdateNodePhase {
        workflow: String,
        node: String,
        expected: NodePhase,
        target: NodePhase,
        reason: Option<String>,
    },
    /// Append a node to its parent's children
    CreateNewNode {
        workflow: String,
        parent: Option<String>,
        node: String,
        template: String,
        kind: TemplateKind,
        phase: NodePhase,
    },
    RecordTaskBranches {
        workflow: String,
        node: String,
        branches: Vec<String>,
    },
    UpdateWorkflowPhase {
        workflow: String,
        expected: WorkflowPhase,
        target: WorkflowPhase,
        reason: Option<String>,
    },
    /// Hand a descriptor to the playground
    CreateActor(ChaosActor),
    /// Enqueue an event, optionally after a delay
    NotifyNewEvent { event: Event, delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideEffectKind {
    UpdateNodePhase,
    CreateNewNode,
    RecordTaskBranches,
    UpdateWorkflowPhase,
    CreateActor,
    NotifyNewEvent,
}

impl fmt::Display for SideEffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl SideEffect {
    pub fn kind(&self) -> SideEffectKind {
        match self {
            SideEffect::UpdateNodePhase { .. } => SideEffectKind::UpdateNodePhase,
            SideEffect::CreateNewNode { .. } => SideEffectKind::CreateNewNode,
            SideEffect::RecordTaskBranches { .. } => SideEffectKind::RecordTaskBranches,
            SideEffect::UpdateWorkflowPhase { .. } => SideEffectKind::UpdateWorkflowPhase,
            SideEffect::CreateActor(_) => SideEffectKind::CreateActor,
            SideEffect::NotifyNewEvent { .. } => SideEffectKind::NotifyNewEvent,
        }
    }

    pub fn update_phase(
        workflow: impl Into<String>,
        node: impl Into<String>,
        expected: NodePhase,
        target: NodePhase,
    ) -> Self {
        SideEffect::UpdateNodePhase {
            workflow: workflow.into(),
            node: node.into(),
            expected,
            target,
            reason: None,
        }
    }

    pub fn fail_node(
        workflow: impl Into<String>,
        node: impl Into<String>,
        expected: NodePhase,
        reason: impl Into<String>,
    ) -> Self {
        SideEffect::UpdateNodePhase {
            workflow: workflow.into(),
            node: node.into(),
            expected,
            target: NodePhase::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn notify(event: Event) -> Self {
        SideEffect::NotifyNewEvent {
            event,
            delay: Duration::ZERO,
        }
    }

    pub fn notify_delay(event: Event, delay: Duration) -> Self {
        SideEffect::NotifyNewEvent { event, delay }
    }
}
