use crate::config::RuntimeConfig;
use crate::decider::{BranchDecider, TaskDecider};
use crate::naming::{NodeNameGenerator, RandomSuffixGenerator};
use crate::scheduler::{BasicScheduler, Scheduler};
use crate::sideeffect::{
    ActorBackend, RepositoryBackend, SideEffect, SideEffectBackend, SideEffectResolver,
    TriggerBackend,
};
use crate::statemachine::{self, StateMachineContext};
use crate::trigger::{CompositeTrigger, OperableTrigger, Trigger};
use chaoscore::{
    ChaosActor, Disposition, EngineError, Event, EventType, FaultTarget, Node, NodePhase,
    Playground, Repository, TemplateKind, TriggerError, WorkflowError, WorkflowPhase,
    WorkflowSpec, WorkflowStatus,
};
use chrono::Utc;
use futures::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Builder for [`WorkflowManager`]
pub struct ManagerBuilder {
    repo: Arc<dyn Repository>,
    playground: Arc<dyn Playground>,
    config: RuntimeConfig,
    names: Option<Arc<dyn NodeNameGenerator>>,
    decider: Arc<dyn TaskDecider>,
    triggers: Vec<Arc<dyn Trigger>>,
}

impl ManagerBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name_generator(mut self, names: Arc<dyn NodeNameGenerator>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn TaskDecider>) -> Self {
        self.decider = decider;
        self
    }

    /// Additional event source, acquired alongside the manager's own trigger
    pub fn trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn build(self) -> Result<WorkflowManager, EngineError> {
        self.config.validate()?;

        let trigger = OperableTrigger::new();
        let backends: Vec<Arc<dyn SideEffectBackend>> = vec![
            Arc::new(RepositoryBackend::new(self.repo.clone())),
            Arc::new(TriggerBackend::new(trigger.clone())),
            Arc::new(ActorBackend::new(
                self.playground,
                self.repo.clone(),
                trigger.clone(),
            )),
        ];
        let resolver = SideEffectResolver::new(backends)?;

        let mut sources: Vec<Arc<dyn Trigger>> = vec![Arc::new(trigger.clone())];
        sources.extend(self.triggers);

        let names = self.names.unwrap_or_else(|| {
            Arc::new(RandomSuffixGenerator::new(self.config.node_name_suffix_length))
        });

        Ok(WorkflowManager {
            inner: Arc::new(Inner {
                repo: self.repo,
                trigger,
                source: CompositeTrigger::new(sources),
                resolver,
                names,
                decider: self.decider,
                config: self.config,
            }),
        })
    }
}

struct Inner {
    repo: Arc<dyn Repository>,
    trigger: OperableTrigger,
    source: CompositeTrigger,
    resolver: SideEffectResolver,
    names: Arc<dyn NodeNameGenerator>,
    decider: Arc<dyn TaskDecider>,
    config: RuntimeConfig,
}

/// The engine's event loop
///
/// Events are routed to shards by workflow name. A shard consumes its
/// events one at a time, so a workflow never sees two handlers at once.
#[derive(Clone)]
pub struct WorkflowManager {
    inner: Arc<Inner>,
}

impl WorkflowManager {
    pub fn builder(repo: Arc<dyn Repository>, playground: Arc<dyn Playground>) -> ManagerBuilder {
        ManagerBuilder {
            repo,
            playground,
            config: RuntimeConfig::default(),
            names: None,
            decider: Arc::new(BranchDecider),
            triggers: Vec::new(),
        }
    }

    /// Handle for submitting events to this manager
    pub fn trigger(&self) -> OperableTrigger {
        self.inner.trigger.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Stop accepting events; `run` returns once the other sources are closed too
    pub fn shutdown(&self) {
        self.inner.trigger.shutdown();
    }

    /// Run until cancelled or every trigger is shut down
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        let width = self.inner.config.max_concurrent_workflows;
        info!(shards = width, "workflow manager started");

        let mut shards = Vec::with_capacity(width);
        let mut handles = Vec::with_capacity(width);
        for shard in 0..width {
            let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
            let inner = self.inner.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    inner.process(event).await;
                }
                trace!(shard, "shard drained");
            }));
            shards.push(tx);
        }

        let outcome = loop {
            match self.inner.source.acquire(&cancel).await {
                Ok(event) => {
                    let shard = shard_for(&event.workflow_name, width);
                    trace!(event = %event, shard, "dispatching event");
                    if shards[shard].send(event).is_err() {
                        break Err(EngineError::Trigger(TriggerError::Shutdown));
                    }
                }
                Err(TriggerError::Canceled) => {
                    debug!("workflow manager cancelled");
                    break Ok(());
                }
                Err(TriggerError::Shutdown) => {
                    debug!("all triggers shut down");
                    break Ok(());
                }
            }
        };

        drop(shards);
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!(error = %e, "manager shard panicked");
            }
        }
        info!("workflow manager stopped");
        outcome
    }

    /// Consume one event: fetch, decide, resolve
    ///
    /// Errors are returned as is; `run` classifies them and decides
    /// between retry, drop and failing the workflow.
    pub async fn consume(&self, event: &Event) -> Result<(), EngineError> {
        self.inner.consume(event).await
    }
}

/// Event a finished node sends to its parent
fn finished_event(phase: NodePhase) -> EventType {
    match phase {
        NodePhase::Failed => EventType::ChildNodeFailed,
        _ => EventType::ChildNodeSucceed,
    }
}

/// Report a waiting parent should have received from an already finished child
///
/// A serial node only listens to its last child. The other kinds re-aggregate
/// all children, so any finished one will do.
fn unreported_child(status: &WorkflowStatus, parent: &Node) -> Option<EventType> {
    let tree_node = status.tree_node(&parent.name)?;
    let children = tree_node.children();
    let finished = match parent.kind {
        TemplateKind::Serial => children.last().filter(|c| c.phase.is_terminal()),
        _ => children
            .iter()
            .find(|c| c.phase == NodePhase::Failed)
            .or_else(|| children.iter().find(|c| c.phase.is_terminal())),
    };
    finished.map(|child| finished_event(child.phase))
}

fn shard_for(workflow: &str, width: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    workflow.hash(&mut hasher);
    (hasher.finish() % width as u64) as usize
}

impl Inner {
    async fn process(&self, event: Event) {
        if let Err(e) = self.consume(&event).await {
            self.handle_failure(&event, e).await;
        }
    }

    async fn consume(&self, event: &Event) -> Result<(), EngineError> {
        let (spec, status) = self.repo.fetch_workflow(&event.workflow_name).await?;
        debug!(event = %event, attempt = event.attempt, phase = %status.phase, "consuming event");

        let effects = match event.event_type {
            EventType::WorkflowCreated => self.on_workflow_created(&spec, &status)?,
            EventType::WorkflowFinished => self.on_workflow_finished(&spec, &status),
            EventType::WorkflowAborted => self.on_workflow_aborted(&spec, &status),
            _ if event.is_workflow_level() => self.on_entry_finished(&spec, &status, event),
            _ => self.on_node_event(&spec, &status, event)?,
        };

        trace!(event = %event, effects = effects.len(), "resolving effects");
        self.resolver.resolve_all(effects).await
    }

    fn on_workflow_created(
        &self,
        spec: &WorkflowSpec,
        status: &WorkflowStatus,
    ) -> Result<Vec<SideEffect>, EngineError> {
        if status.phase.is_terminal() {
            debug!(workflow = %spec.name, phase = %status.phase, "workflow already finished");
            return Ok(vec![]);
        }
        if status.nodes.is_empty() {
            return self.start_workflow(spec, status);
        }
        self.recover_workflow(spec, status)
    }

    fn start_workflow(
        &self,
        spec: &WorkflowSpec,
        status: &WorkflowStatus,
    ) -> Result<Vec<SideEffect>, EngineError> {
        let schedule = BasicScheduler::new(spec, status).schedule_next()?;
        let mut effects = Vec::new();

        if status.phase == WorkflowPhase::Init {
            info!(workflow = %spec.name, entry = %spec.entry, "starting workflow");
            effects.push(SideEffect::UpdateWorkflowPhase {
                workflow: spec.name.clone(),
                expected: WorkflowPhase::Init,
                target: WorkflowPhase::Running,
                reason: None,
            });
            if let Some(deadline) = spec.deadline() {
                effects.push(SideEffect::notify_delay(
                    Event::for_workflow(&spec.name, EventType::WorkflowFinished),
                    deadline,
                ));
            }
        }

        for template in &schedule.templates {
            let name = self.names.generate_node_name(&template.name);
            effects.push(SideEffect::CreateNewNode {
                workflow: spec.name.clone(),
                parent: schedule.parent.clone(),
                node: name.clone(),
                template: template.name.clone(),
                kind: template.kind(),
                phase: NodePhase::Init,
            });
            effects.push(SideEffect::notify(Event::new(
                &spec.name,
                name,
                EventType::NodeCreated,
            )));
        }
        Ok(effects)
    }

    /// Re-drive a workflow that already has nodes, e.g. after a restart
    ///
    /// Nodes stuck in `Init` get their `NodeCreated` again and holding nodes
    /// get a wake-up for the remainder of their duration. A parent still
    /// waiting on a child that already finished hears from it again. A node
    /// waiting for schedule is asked to pick its next child.
    fn recover_workflow(
        &self,
        spec: &WorkflowSpec,
        status: &WorkflowStatus,
    ) -> Result<Vec<SideEffect>, EngineError> {
        let mut effects = Vec::new();

        for node in status.nodes.values() {
            match node.phase {
                NodePhase::Init => effects.push(SideEffect::notify(Event::new(
                    &spec.name,
                    &node.name,
                    EventType::NodeCreated,
                ))),
                NodePhase::Holding => {
                    let duration = spec
                        .template(&node.template_name)?
                        .duration()
                        .unwrap_or(Duration::ZERO);
                    let elapsed = (Utc::now() - node.updated_at).to_std().unwrap_or(Duration::ZERO);
                    effects.push(SideEffect::notify_delay(
                        Event::new(&spec.name, &node.name, EventType::NodeHoldingAwake),
                        duration.saturating_sub(elapsed),
                    ));
                }
                NodePhase::Running if node.kind == TemplateKind::Chaos && node.injection().is_some() => {
                    effects.push(SideEffect::notify(Event::new(
                        &spec.name,
                        &node.name,
                        EventType::NodeChaosInjectSucceed,
                    )))
                }
                NodePhase::WaitingForChild => {
                    if let Some(event_type) = unreported_child(status, node) {
                        effects.push(SideEffect::notify(Event::new(&spec.name, &node.name, event_type)));
                    }
                }
                _ => {}
            }
        }

        // the entry finished but the workflow never heard about it
        if status.phase == WorkflowPhase::Running {
            if let Some(entry) = status.entry().filter(|n| n.phase.is_terminal()) {
                effects.push(SideEffect::notify(Event::for_workflow(
                    &spec.name,
                    finished_event(entry.phase),
                )));
            }
        }

        match BasicScheduler::new(spec, status).schedule_next() {
            Ok(schedule) => {
                if let Some(parent) = schedule.parent {
                    effects.push(SideEffect::notify(Event::new(
                        &spec.name,
                        parent,
                        EventType::NodePickChildToSchedule,
                    )));
                }
            }
            Err(EngineError::NoNeedSchedule(_)) if !effects.is_empty() => {}
            Err(e) => return Err(e),
        }

        if !effects.is_empty() {
            info!(workflow = %spec.name, events = effects.len(), "recovering workflow");
        }
        Ok(effects)
    }

    fn on_workflow_finished(&self, spec: &WorkflowSpec, status: &WorkflowStatus) -> Vec<SideEffect> {
        if status.phase != WorkflowPhase::Running {
            debug!(workflow = %spec.name, phase = %status.phase, "workflow finished");
            return vec![];
        }
        warn!(workflow = %spec.name, "workflow deadline exceeded");
        self.cancel_workflow(spec, status, "deadline exceeded")
    }

    fn on_workflow_aborted(&self, spec: &WorkflowSpec, status: &WorkflowStatus) -> Vec<SideEffect> {
        match status.phase {
            WorkflowPhase::Init => {
                info!(workflow = %spec.name, "aborting workflow before start");
                vec![SideEffect::UpdateWorkflowPhase {
                    workflow: spec.name.clone(),
                    expected: WorkflowPhase::Init,
                    target: WorkflowPhase::Failed,
                    reason: Some("aborted".to_string()),
                }]
            }
            WorkflowPhase::Running => {
                info!(workflow = %spec.name, "aborting workflow");
                self.cancel_workflow(spec, status, "aborted")
            }
            _ => {
                debug!(workflow = %spec.name, phase = %status.phase, "workflow already finished");
                vec![]
            }
        }
    }

    /// Fail every unfinished node, revert the faults they hold, then fail the workflow
    ///
    /// Nodes go first so a re-delivery after a partial batch still finds the
    /// workflow running. Each revert follows its node's phase update.
    fn cancel_workflow(&self, spec: &WorkflowSpec, status: &WorkflowStatus, reason: &str) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        for node in status.nodes.values().filter(|n| !n.phase.is_terminal()) {
            effects.push(SideEffect::fail_node(&spec.name, &node.name, node.phase, reason));
            if node.injection().is_none() {
                continue;
            }
            match spec.template(&node.template_name).ok().and_then(|t| t.fault()) {
                Some(fault) => effects.push(SideEffect::CreateActor(ChaosActor::Revert {
                    target: FaultTarget {
                        workflow: spec.name.clone(),
                        node: node.name.clone(),
                    },
                    fault: fault.clone(),
                })),
                None => warn!(workflow = %spec.name, node = %node.name, "no fault to revert"),
            }
        }

        effects.push(SideEffect::UpdateWorkflowPhase {
            workflow: spec.name.clone(),
            expected: WorkflowPhase::Running,
            target: WorkflowPhase::Failed,
            reason: Some(reason.to_string()),
        });
        effects
    }

    /// The entry node reported to its absent parent
    fn on_entry_finished(
        &self,
        spec: &WorkflowSpec,
        status: &WorkflowStatus,
        event: &Event,
    ) -> Vec<SideEffect> {
        if status.phase != WorkflowPhase::Running {
            debug!(workflow = %spec.name, event = %event, "workflow not running, ignoring");
            return vec![];
        }

        let (target, reason) = match event.event_type {
            EventType::ChildNodeSucceed => (WorkflowPhase::Succeed, None),
            EventType::ChildNodeFailed => (
                WorkflowPhase::Failed,
                status
                    .entry()
                    .and_then(|n| n.reason.clone())
                    .or_else(|| Some("entry node failed".to_string())),
            ),
            _ => {
                warn!(workflow = %spec.name, event = %event, "unexpected workflow level event");
                return vec![];
            }
        };

        vec![
            SideEffect::UpdateWorkflowPhase {
                workflow: spec.name.clone(),
                expected: WorkflowPhase::Running,
                target,
                reason,
            },
            SideEffect::notify(Event::for_workflow(&spec.name, EventType::WorkflowFinished)),
        ]
    }

    fn on_node_event(
        &self,
        spec: &WorkflowSpec,
        status: &WorkflowStatus,
        event: &Event,
    ) -> Result<Vec<SideEffect>, EngineError> {
        // a finished workflow still lets injected faults reach their revert
        let reverting = matches!(
            event.event_type,
            EventType::NodeChaosInjectSucceed | EventType::NodeHoldingAwake
        );
        if status.phase.is_terminal() && !reverting {
            debug!(event = %event, phase = %status.phase, "workflow finished, dropping node event");
            return Ok(vec![]);
        }

        let node = status
            .node_by_name(&event.node_name)
            .ok_or_else(|| WorkflowError::NoSuchNode {
                workflow: spec.name.clone(),
                node: event.node_name.clone(),
            })?;
        let template = spec.template(&node.template_name)?;

        let ctx = StateMachineContext {
            spec,
            status,
            node,
            template,
            names: self.names.as_ref(),
            decider: self.decider.as_ref(),
            failure_policy: self.config.failure_policy,
        };
        statemachine::handle_event(&ctx, event)
    }

    async fn handle_failure(&self, event: &Event, err: EngineError) {
        match err.disposition() {
            Disposition::Ignore => {
                debug!(event = %event, reason = %err, "nothing to do");
            }
            Disposition::Drop => {
                warn!(event = %event, error = %err, "dropping event");
            }
            Disposition::Retry if event.attempt < self.config.max_redeliveries => {
                let delay = self.config.redelivery_backoff(event.attempt);
                warn!(
                    event = %event,
                    attempt = event.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "event consumption failed, re-delivering"
                );
                if let Err(e) = self.trigger.notify_delay(event.redelivered(), delay) {
                    debug!(event = %event, error = %e, "re-delivery not possible");
                }
            }
            Disposition::Retry => {
                error!(
                    event = %event,
                    attempts = event.attempt + 1,
                    error = %err,
                    "giving up on event"
                );
            }
            Disposition::FailWorkflow => {
                error!(event = %event, error = %err, "failing workflow");
                self.fail_workflow(&event.workflow_name, err.to_string()).await;
            }
            Disposition::Stop => {
                debug!(event = %event, "manager stopping, event abandoned");
            }
        }
    }

    async fn fail_workflow(&self, workflow: &str, reason: String) {
        let phase = match self.repo.fetch_workflow(workflow).await {
            Ok((_, status)) => status.phase,
            Err(e) => {
                error!(workflow, error = %e, "can not load workflow to fail it");
                return;
            }
        };
        if phase.is_terminal() {
            return;
        }
        if let Err(e) = self
            .repo
            .update_workflow_phase(workflow, phase, WorkflowPhase::Failed, Some(reason))
            .await
        {
            error!(workflow, error = %e, "failed to mark workflow as failed");
        }
    }
}
