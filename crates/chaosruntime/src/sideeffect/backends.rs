use super::{SideEffect, SideEffectBackend, SideEffectKind};
use crate::trigger::OperableTrigger;
use async_trait::async_trait;
use chaoscore::{
    ChaosActor, EngineError, Event, EventType, Playground, Repository, RevertTarget,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Writes node and workflow state through the repository
pub struct RepositoryBackend {
    repo: Arc<dyn Repository>,
}

impl RepositoryBackend {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl SideEffectBackend for RepositoryBackend {
    fn name(&self) -> &str {
        "repository"
    }

    fn kinds(&self) -> &'static [SideEffectKind] {
        &[
            SideEffectKind::UpdateNodePhase,
            SideEffectKind::CreateNewNode,
            SideEffectKind::RecordTaskBranches,
            SideEffectKind::UpdateWorkflowPhase,
        ]
    }

    async fn apply(&self, effect: SideEffect) -> Result<(), EngineError> {
        match effect {
            SideEffect::UpdateNodePhase {
                workflow,
                node,
                expected,
                target,
                reason,
            } => {
                self.repo
                    .update_node_phase(&workflow, &node, expected, target, reason)
                    .await?
            }
            SideEffect::CreateNewNode {
                workflow,
                parent,
                node,
                template,
                kind,
                phase,
            } => {
                self.repo
                    .create_node(&workflow, parent.as_deref(), &node, &template, kind, phase)
                    .await?
            }
            SideEffect::RecordTaskBranches {
                workflow,
                node,
                branches,
            } => self.repo.record_task_branches(&workflow, &node, branches).await?,
            SideEffect::UpdateWorkflowPhase {
                workflow,
                expected,
                target,
                reason,
            } => {
                self.repo
                    .update_workflow_phase(&workflow, expected, target, reason)
                    .await?
            }
            other => return Err(EngineError::UnresolvedSideEffect(other.kind().to_string())),
        }
        Ok(())
    }
}

/// Enqueues follow-up events
pub struct TriggerBackend {
    trigger: OperableTrigger,
}

impl TriggerBackend {
    pub fn new(trigger: OperableTrigger) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl SideEffectBackend for TriggerBackend {
    fn name(&self) -> &str {
        "trigger"
    }

    fn kinds(&self) -> &'static [SideEffectKind] {
        &[SideEffectKind::NotifyNewEvent]
    }

    async fn apply(&self, effect: SideEffect) -> Result<(), EngineError> {
        match effect {
            SideEffect::NotifyNewEvent { event, delay } => {
                self.trigger.notify_delay(event, delay)?;
                Ok(())
            }
            other => Err(EngineError::UnresolvedSideEffect(other.kind().to_string())),
        }
    }
}

/// Hands chaos actors to the playground
///
/// A failed inject is turned into a `NodeChaosInjectFailed` event and still
/// reported as an error so the remaining effects of the batch are skipped.
/// A failed revert is only logged: the node keeps its injection reference,
/// which marks the fault as leaked.
pub struct ActorBackend {
    playground: Arc<dyn Playground>,
    repo: Arc<dyn Repository>,
    trigger: OperableTrigger,
}

impl ActorBackend {
    pub fn new(
        playground: Arc<dyn Playground>,
        repo: Arc<dyn Repository>,
        trigger: OperableTrigger,
    ) -> Self {
        Self {
            playground,
            repo,
            trigger,
        }
    }

    async fn inject(&self, actor: &ChaosActor) -> Result<(), EngineError> {
        let target = actor.target();
        match self.playground.inject(target, actor.fault()).await {
            Ok(injection) => {
                info!(
                    workflow = %target.workflow,
                    node = %target.node,
                    fault = %actor.fault().kind,
                    injection = %injection,
                    "fault injected"
                );
                self.repo
                    .record_injection(&target.workflow, &target.node, Some(injection))
                    .await?;
                Ok(())
            }
            Err(e) => {
                warn!(
                    workflow = %target.workflow,
                    node = %target.node,
                    fault = %actor.fault().kind,
                    error = %e,
                    "fault injection failed"
                );
                let failed = Event::new(&target.workflow, &target.node, EventType::NodeChaosInjectFailed)
                    .with_payload(serde_json::json!({ "reason": e.to_string() }));
                self.trigger.notify(failed)?;
                Err(e.into())
            }
        }
    }

    async fn revert(&self, actor: &ChaosActor) -> Result<(), EngineError> {
        let target = actor.target();
        let (_, status) = self.repo.fetch_workflow(&target.workflow).await?;
        let revert_target = match status.node_by_name(&target.node).and_then(|n| n.injection()) {
            Some(injection) => RevertTarget::Injection(injection.to_string()),
            None => RevertTarget::Node(target.clone()),
        };

        match self.playground.revert(&revert_target, actor.fault()).await {
            Ok(()) => {
                info!(workflow = %target.workflow, node = %target.node, "fault reverted");
                self.repo
                    .record_injection(&target.workflow, &target.node, None)
                    .await?;
            }
            Err(e) => {
                warn!(
                    workflow = %target.workflow,
                    node = %target.node,
                    error = %e,
                    "fault revert failed, leaving it to garbage collection"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SideEffectBackend for ActorBackend {
    fn name(&self) -> &str {
        "playground"
    }

    fn kinds(&self) -> &'static [SideEffectKind] {
        &[SideEffectKind::CreateActor]
    }

    async fn apply(&self, effect: SideEffect) -> Result<(), EngineError> {
        match effect {
            SideEffect::CreateActor(actor @ ChaosActor::Inject { .. }) => self.inject(&actor).await,
            SideEffect::CreateActor(actor @ ChaosActor::Revert { .. }) => self.revert(&actor).await,
            other => Err(EngineError::UnresolvedSideEffect(other.kind().to_string())),
        }
    }
}
