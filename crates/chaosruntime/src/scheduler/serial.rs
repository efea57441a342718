use super::{Schedule, Scheduler};
use chaoscore::{EngineError, Node, Template, TemplateKind, WorkflowError, WorkflowSpec, WorkflowStatus};

/// Picks the next child of a serial node
///
/// Children are appended in scheduling order, so the number of existing
/// children is the index of the next template. Repeated template names are
/// told apart by position.
pub struct SerialScheduler<'a> {
    spec: &'a WorkflowSpec,
    status: &'a WorkflowStatus,
    node: &'a Node,
}

impl<'a> SerialScheduler<'a> {
    pub fn new(spec: &'a WorkflowSpec, status: &'a WorkflowStatus, node: &'a Node) -> Self {
        Self { spec, status, node }
    }

    pub fn next_template(&self) -> Result<&'a Template, EngineError> {
        let template = self.spec.template(&self.node.template_name)?;
        let children = template
            .serial_children()
            .ok_or_else(|| WorkflowError::UnsupportedTemplateKind {
                workflow: self.spec.name.clone(),
                template: template.name.clone(),
                expected: TemplateKind::Serial,
            })?;
        let tree_node = self
            .status
            .tree_node(&self.node.name)
            .ok_or_else(|| WorkflowError::TreeNodeIsRequired {
                workflow: self.spec.name.clone(),
                node: self.node.name.clone(),
            })?;

        let scheduled = tree_node.len();
        if scheduled >= children.len() {
            return Err(WorkflowError::NoMoreTemplateInSerial {
                workflow: self.spec.name.clone(),
                node: self.node.name.clone(),
            }
            .into());
        }
        Ok(self.spec.template(&children[scheduled])?)
    }
}

impl Scheduler for SerialScheduler<'_> {
    fn schedule_next(&self) -> Result<Schedule, EngineError> {
        Ok(Schedule {
            templates: vec![self.next_template()?.clone()],
            parent: Some(self.node.name.clone()),
        })
    }
}

pub fn is_no_more_template(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::Workflow(WorkflowError::NoMoreTemplateInSerial { .. })
    )
}
