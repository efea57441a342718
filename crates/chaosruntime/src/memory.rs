use async_trait::async_trait;
use chaoscore::{
    EngineError, EventBus, Node, NodePhase, NodeState, RepoError, Repository, TemplateKind,
    WorkflowNotification, WorkflowPhase, WorkflowSpec, WorkflowStatus,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct Record {
    spec: WorkflowSpec,
    status: WorkflowStatus,
    /// Bumped on every write
    revision: u64,
}

/// Process-local repository
///
/// Every write happens under one lock, so compare-and-swap conflicts only
/// arise from stale snapshots, never from torn writes. All changes are
/// published on the bus.
pub struct InMemoryRepository {
    workflows: RwLock<HashMap<String, Record>>,
    bus: EventBus,
}

impl InMemoryRepository {
    pub fn new(bus: EventBus) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Validate and store a workflow in phase `Init`
    pub async fn register_workflow(&self, spec: WorkflowSpec) -> Result<(), EngineError> {
        spec.validate()?;

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&spec.name) {
            return Err(RepoError::WorkflowExists(spec.name).into());
        }

        let name = spec.name.clone();
        info!(workflow = %name, templates = spec.templates.len(), "workflow registered");
        workflows.insert(
            name.clone(),
            Record {
                spec,
                status: WorkflowStatus::new(),
                revision: 0,
            },
        );
        drop(workflows);

        self.bus.emit(WorkflowNotification::WorkflowRegistered {
            workflow: name,
            phase: WorkflowPhase::Init,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn status(&self, workflow: &str) -> Result<WorkflowStatus, RepoError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow)
            .map(|r| r.status.clone())
            .ok_or_else(|| RepoError::WorkflowNotFound(workflow.to_string()))
    }

    pub async fn revision(&self, workflow: &str) -> Result<u64, RepoError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow)
            .map(|r| r.revision)
            .ok_or_else(|| RepoError::WorkflowNotFound(workflow.to_string()))
    }
}

fn record_mut<'a>(
    workflows: &'a mut HashMap<String, Record>,
    workflow: &str,
) -> Result<&'a mut Record, RepoError> {
    workflows
        .get_mut(workflow)
        .ok_or_else(|| RepoError::WorkflowNotFound(workflow.to_string()))
}

fn node_mut<'a>(record: &'a mut Record, workflow: &str, node: &str) -> Result<&'a mut Node, RepoError> {
    record
        .status
        .nodes
        .get_mut(node)
        .ok_or_else(|| RepoError::NodeNotFound {
            workflow: workflow.to_string(),
            node: node.to_string(),
        })
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn fetch_workflow(&self, workflow: &str) -> Result<(WorkflowSpec, WorkflowStatus), RepoError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow)
            .map(|r| (r.spec.clone(), r.status.clone()))
            .ok_or_else(|| RepoError::WorkflowNotFound(workflow.to_string()))
    }

    async fn list_workflows(&self) -> Result<Vec<(String, WorkflowPhase)>, RepoError> {
        let workflows = self.workflows.read().await;
        let mut listed: Vec<_> = workflows
            .iter()
            .map(|(name, r)| (name.clone(), r.status.phase))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(listed)
    }

    async fn create_node(
        &self,
        workflow: &str,
        parent: Option<&str>,
        node: &str,
        template: &str,
        kind: TemplateKind,
        phase: NodePhase,
    ) -> Result<(), RepoError> {
        let mut workflows = self.workflows.write().await;
        let record = record_mut(&mut workflows, workflow)?;

        if let Some(existing) = record.status.node_by_name(node) {
            if existing.parent.as_deref() == parent
                && existing.template_name == template
                && existing.kind == kind
            {
                debug!(workflow, node, "node already exists, nothing to do");
                return Ok(());
            }
            return Err(RepoError::NodeConflict {
                workflow: workflow.to_string(),
                node: node.to_string(),
            });
        }

        match parent {
            Some(parent) if record.status.node_by_name(parent).is_none() => {
                return Err(RepoError::NodeNotFound {
                    workflow: workflow.to_string(),
                    node: parent.to_string(),
                });
            }
            None if record.status.entry_node.is_some() => {
                return Err(RepoError::NodeConflict {
                    workflow: workflow.to_string(),
                    node: node.to_string(),
                });
            }
            _ => {}
        }

        record.status.add_node(Node::new(
            node,
            template,
            parent.map(str::to_string),
            kind,
            phase,
        ));
        record.revision += 1;
        drop(workflows);

        self.bus.emit(WorkflowNotification::NodeCreated {
            workflow: workflow.to_string(),
            node: node.to_string(),
            template: template.to_string(),
            kind,
            parent: parent.map(str::to_string),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn update_node_phase(
        &self,
        workflow: &str,
        node: &str,
        expected: NodePhase,
        target: NodePhase,
        reason: Option<String>,
    ) -> Result<(), RepoError> {
        let mut workflows = self.workflows.write().await;
        let record = record_mut(&mut workflows, workflow)?;
        let entry = node_mut(record, workflow, node)?;

        if entry.phase != expected {
            return Err(RepoError::PhaseConflict {
                node: node.to_string(),
                expected,
                observed: entry.phase,
            });
        }
        entry.phase = target;
        entry.updated_at = Utc::now();
        if reason.is_some() {
            entry.reason = reason.clone();
        }
        record.revision += 1;
        drop(workflows);

        debug!(workflow, node, from = %expected, to = %target, "node phase changed");
        self.bus.emit(WorkflowNotification::NodePhaseChanged {
            workflow: workflow.to_string(),
            node: node.to_string(),
            from: expected,
            to: target,
            reason,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn update_workflow_phase(
        &self,
        workflow: &str,
        expected: WorkflowPhase,
        target: WorkflowPhase,
        reason: Option<String>,
    ) -> Result<(), RepoError> {
        let mut workflows = self.workflows.write().await;
        let record = record_mut(&mut workflows, workflow)?;
        let status = &mut record.status;

        if status.phase != expected {
            return Err(RepoError::WorkflowPhaseConflict {
                workflow: workflow.to_string(),
                expected,
                observed: status.phase,
            });
        }
        let now = Utc::now();
        status.phase = target;
        if target == WorkflowPhase::Running {
            status.started_at = Some(now);
        }
        if target.is_terminal() {
            status.finished_at = Some(now);
        }
        if reason.is_some() {
            status.reason = reason.clone();
        }
        record.revision += 1;
        drop(workflows);

        info!(workflow, from = %expected, to = %target, "workflow phase changed");
        self.bus.emit(WorkflowNotification::WorkflowPhaseChanged {
            workflow: workflow.to_string(),
            from: expected,
            to: target,
            reason,
            timestamp: now,
        });
        Ok(())
    }

    async fn record_task_branches(
        &self,
        workflow: &str,
        node: &str,
        branches: Vec<String>,
    ) -> Result<(), RepoError> {
        let mut workflows = self.workflows.write().await;
        let record = record_mut(&mut workflows, workflow)?;
        let entry = node_mut(record, workflow, node)?;

        match &mut entry.state {
            NodeState::Task { branches: recorded } => *recorded = Some(branches),
            _ => {
                return Err(RepoError::NodeConflict {
                    workflow: workflow.to_string(),
                    node: node.to_string(),
                })
            }
        }
        entry.updated_at = Utc::now();
        record.revision += 1;
        Ok(())
    }

    async fn record_injection(
        &self,
        workflow: &str,
        node: &str,
        injection: Option<String>,
    ) -> Result<(), RepoError> {
        let mut workflows = self.workflows.write().await;
        let record = record_mut(&mut workflows, workflow)?;
        let entry = node_mut(record, workflow, node)?;

        match &mut entry.state {
            NodeState::Chaos { injection: recorded } => *recorded = injection,
            _ => {
                return Err(RepoError::NodeConflict {
                    workflow: workflow.to_string(),
                    node: node.to_string(),
                })
            }
        }
        record.revision += 1;
        Ok(())
    }
}
