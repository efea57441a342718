use chaoscore::{EngineError, Node, Template, TemplateKind, WorkflowError, WorkflowSpec};

/// Decides which children of a task node run
///
/// Called once, when the task node is created. The answer is persisted on
/// the node before any child is created, so replays see the same branches.
pub trait TaskDecider: Send + Sync {
    fn decide(
        &self,
        spec: &WorkflowSpec,
        node: &Node,
        template: &Template,
    ) -> Result<Vec<String>, EngineError>;
}

impl<F> TaskDecider for F
where
    F: Fn(&WorkflowSpec, &Node, &Template) -> Result<Vec<String>, EngineError> + Send + Sync,
{
    fn decide(
        &self,
        spec: &WorkflowSpec,
        node: &Node,
        template: &Template,
    ) -> Result<Vec<String>, EngineError> {
        self(spec, node, template)
    }
}

/// Evaluates the template's conditional branches against the workflow params
///
/// A task without branches runs all of its children.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchDecider;

impl TaskDecider for BranchDecider {
    fn decide(
        &self,
        spec: &WorkflowSpec,
        _node: &Node,
        template: &Template,
    ) -> Result<Vec<String>, EngineError> {
        let (children, branches) =
            template
                .task_branches()
                .ok_or_else(|| WorkflowError::UnsupportedTemplateKind {
                    workflow: spec.name.clone(),
                    template: template.name.clone(),
                    expected: TemplateKind::Task,
                })?;

        if branches.is_empty() {
            return Ok(children.to_vec());
        }

        Ok(branches
            .iter()
            .filter(|branch| branch.when.evaluate(&spec.params))
            .map(|branch| branch.target.clone())
            .collect())
    }
}
