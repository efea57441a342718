use crate::{NodePhase, TemplateKind, WorkflowPhase};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("No need to schedule for workflow {0}")]
    NoNeedSchedule(String),

    #[error("State machine {machine} can not handle event {event} at phase {phase} (node {node})")]
    InvalidStateTransition {
        machine: &'static str,
        node: String,
        phase: NodePhase,
        event: String,
    },

    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("Playground error: {0}")]
    Playground(#[from] PlaygroundError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Side effect {0} has no resolver")]
    UnresolvedSideEffect(String),

    #[error("Side effect {0} is resolved by more than one backend")]
    DuplicateResolver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Canceled")]
    Canceled,
}

/// What the manager should do with an event whose consumption failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not a failure at all.
    Ignore,
    /// Re-deliver the event later, up to the redelivery bound.
    Retry,
    /// Log and forget the event.
    Drop,
    /// Mark the whole workflow as failed.
    FailWorkflow,
    /// Unwind the event loop.
    Stop,
}

impl EngineError {
    pub fn disposition(&self) -> Disposition {
        match self {
            EngineError::NoNeedSchedule(_) => Disposition::Ignore,
            EngineError::Workflow(e) if e.is_spec_error() => Disposition::FailWorkflow,
            // graph errors usually mean a stale snapshot, give the repo a chance to catch up
            EngineError::Workflow(_) => Disposition::Retry,
            EngineError::InvalidStateTransition { .. } => Disposition::FailWorkflow,
            EngineError::Repo(RepoError::WorkflowNotFound(_)) => Disposition::Drop,
            EngineError::Repo(_) => Disposition::Retry,
            // the inject failure has already been turned into a follow-on event
            EngineError::Playground(_) => Disposition::Drop,
            EngineError::Trigger(TriggerError::Canceled) | EngineError::Canceled => Disposition::Stop,
            EngineError::Trigger(TriggerError::Shutdown) => Disposition::Stop,
            EngineError::UnresolvedSideEffect(_)
            | EngineError::DuplicateResolver(_)
            | EngineError::Configuration(_) => Disposition::FailWorkflow,
            EngineError::Timeout(_) => Disposition::Drop,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("No templates in workflow {0}")]
    NoTemplates(String),

    #[error("No such template {template} in workflow {workflow}")]
    NoSuchTemplate { workflow: String, template: String },

    #[error("Template {template} in workflow {workflow} is not of kind {expected}")]
    UnsupportedTemplateKind {
        workflow: String,
        template: String,
        expected: TemplateKind,
    },

    #[error("Cyclic template reference in workflow {workflow} through {template}")]
    CyclicTemplate { workflow: String, template: String },

    #[error("Invalid workflow {workflow}: {message}")]
    Invalid { workflow: String, message: String },

    #[error("No such node {node} in workflow {workflow}")]
    NoSuchNode { workflow: String, node: String },

    #[error("Tree node is required for {node} in workflow {workflow}")]
    TreeNodeIsRequired { workflow: String, node: String },

    #[error("No more template in serial node {node} of workflow {workflow}")]
    NoMoreTemplateInSerial { workflow: String, node: String },

    #[error("Node {node} of kind {kind} in workflow {workflow} can not schedule children")]
    UnsupportedNodeType {
        workflow: String,
        node: String,
        kind: TemplateKind,
    },

    #[error("Branches of task node {node} in workflow {workflow} are not evaluated yet")]
    BranchesNotEvaluated { workflow: String, node: String },
}

impl WorkflowError {
    /// Spec errors can not be fixed by retrying, the workflow definition itself is wrong.
    pub fn is_spec_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::NotFound(_)
                | WorkflowError::NoTemplates(_)
                | WorkflowError::NoSuchTemplate { .. }
                | WorkflowError::UnsupportedTemplateKind { .. }
                | WorkflowError::CyclicTemplate { .. }
                | WorkflowError::Invalid { .. }
        )
    }

    pub fn is_graph_error(&self) -> bool {
        !self.is_spec_error()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow already exists: {0}")]
    WorkflowExists(String),

    #[error("Node not found: {node} in workflow {workflow}")]
    NodeNotFound { workflow: String, node: String },

    #[error("Phase conflict on node {node}: expected {expected}, observed {observed}")]
    PhaseConflict {
        node: String,
        expected: NodePhase,
        observed: NodePhase,
    },

    #[error("Phase conflict on workflow {workflow}: expected {expected}, observed {observed}")]
    WorkflowPhaseConflict {
        workflow: String,
        expected: WorkflowPhase,
        observed: WorkflowPhase,
    },

    #[error("Node {node} already exists in workflow {workflow} with different attributes")]
    NodeConflict { workflow: String, node: String },

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaygroundError {
    #[error("Unknown fault kind: {0}")]
    UnknownFault(String),

    #[error("Invalid fault spec for '{kind}': {message}")]
    InvalidFault { kind: String, message: String },

    #[error("Inject failed: {0}")]
    InjectFailed(String),

    #[error("Revert failed: {0}")]
    RevertFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Trigger is shut down")]
    Shutdown,

    #[error("Canceled")]
    Canceled,
}
