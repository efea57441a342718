use crate::{NodePhase, RepoError, TemplateKind, WorkflowPhase, WorkflowSpec, WorkflowStatus};
use async_trait::async_trait;

/// Persistent store of workflow specs and their execution status
///
/// Implementations provide read-your-writes and optimistic concurrency: every
/// phase update is a compare-and-swap on the expected phase.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Load a consistent snapshot of the spec and the current status
    async fn fetch_workflow(&self, workflow: &str) -> Result<(WorkflowSpec, WorkflowStatus), RepoError>;

    /// Names and phases of all known workflows
    async fn list_workflows(&self) -> Result<Vec<(String, WorkflowPhase)>, RepoError>;

    /// Append a node under `parent`. Repeating an identical call is a no-op.
    async fn create_node(
        &self,
        workflow: &str,
        parent: Option<&str>,
        node: &str,
        template: &str,
        kind: TemplateKind,
        phase: NodePhase,
    ) -> Result<(), RepoError>;

    async fn update_node_phase(
        &self,
        workflow: &str,
        node: &str,
        expected: NodePhase,
        target: NodePhase,
        reason: Option<String>,
    ) -> Result<(), RepoError>;

    async fn update_workflow_phase(
        &self,
        workflow: &str,
        expected: WorkflowPhase,
        target: WorkflowPhase,
        reason: Option<String>,
    ) -> Result<(), RepoError>;

    /// Persist the children a task node decided to run
    async fn record_task_branches(
        &self,
        workflow: &str,
        node: &str,
        branches: Vec<String>,
    ) -> Result<(), RepoError>;

    /// Persist the playground reference of an injected fault
    async fn record_injection(
        &self,
        workflow: &str,
        node: &str,
        injection: Option<String>,
    ) -> Result<(), RepoError>;
}
