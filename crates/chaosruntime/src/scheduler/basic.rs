use super::{Schedule, Scheduler, SerialScheduler};
use chaoscore::{EngineError, Template, TemplateKind, WorkflowError, WorkflowSpec, WorkflowStatus};
use tracing::trace;

/// Entry point resolver and dispatcher over composite nodes
pub struct BasicScheduler<'a> {
    spec: &'a WorkflowSpec,
    status: &'a WorkflowStatus,
}

impl<'a> BasicScheduler<'a> {
    pub fn new(spec: &'a WorkflowSpec, status: &'a WorkflowStatus) -> Self {
        Self { spec, status }
    }

    /// Templates the composite node `parent_name` should instantiate next
    pub fn children_for(&self, parent_name: &str) -> Result<Vec<Template>, EngineError> {
        let parent = self
            .status
            .node_by_name(parent_name)
            .ok_or_else(|| WorkflowError::NoSuchNode {
                workflow: self.spec.name.clone(),
                node: parent_name.to_string(),
            })?;
        if self.status.tree_node(parent_name).is_none() {
            return Err(WorkflowError::TreeNodeIsRequired {
                workflow: self.spec.name.clone(),
                node: parent_name.to_string(),
            }
            .into());
        }
        let template = self.spec.template(&parent.template_name)?;

        match template.kind() {
            TemplateKind::Serial => {
                let next = SerialScheduler::new(self.spec, self.status, parent).next_template()?;
                Ok(vec![next.clone()])
            }
            TemplateKind::Parallel => self.resolve(template.children()),
            TemplateKind::Task => {
                let branches = parent.task_branches().ok_or_else(|| {
                    WorkflowError::BranchesNotEvaluated {
                        workflow: self.spec.name.clone(),
                        node: parent.name.clone(),
                    }
                })?;
                self.resolve(branches)
            }
            kind => Err(WorkflowError::UnsupportedNodeType {
                workflow: self.spec.name.clone(),
                node: parent.name.clone(),
                kind,
            }
            .into()),
        }
    }

    fn resolve(&self, names: &[String]) -> Result<Vec<Template>, EngineError> {
        names
            .iter()
            .map(|name| self.spec.template(name).cloned().map_err(EngineError::from))
            .collect()
    }
}

impl Scheduler for BasicScheduler<'_> {
    fn schedule_next(&self) -> Result<Schedule, EngineError> {
        if self.status.nodes.is_empty() {
            let entry = self.spec.entry_template()?;
            trace!(workflow = %self.spec.name, entry = %entry.name, "first schedule");
            return Ok(Schedule {
                templates: vec![entry.clone()],
                parent: None,
            });
        }

        let waiting = self
            .status
            .first_waiting_for_schedule()
            .ok_or_else(|| EngineError::NoNeedSchedule(self.spec.name.clone()))?;

        Ok(Schedule {
            templates: self.children_for(&waiting.name)?,
            parent: Some(waiting.name.clone()),
        })
    }
}
