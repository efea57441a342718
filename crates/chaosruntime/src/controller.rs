use crate::trigger::OperableTrigger;
use chaoscore::{
    EngineError, Event, EventBus, EventType, Repository, WorkflowNotification, WorkflowPhase,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches for new workflows and hands each one to the engine exactly once
///
/// Registrations are picked up from the bus; a periodic resync lists the
/// repository in case a notification was missed.
pub struct WorkflowController {
    repo: Arc<dyn Repository>,
    bus: EventBus,
    trigger: OperableTrigger,
    resync_interval: Duration,
    submitted: Mutex<HashSet<String>>,
}

impl WorkflowController {
    pub fn new(
        repo: Arc<dyn Repository>,
        bus: EventBus,
        trigger: OperableTrigger,
        resync_interval: Duration,
    ) -> Self {
        Self {
            repo,
            bus,
            trigger,
            resync_interval,
            submitted: Mutex::new(HashSet::new()),
        }
    }

    /// Submit `WorkflowCreated` unless it was already submitted; returns whether it was sent
    ///
    /// A finished workflow is forgotten.
    pub async fn observe(&self, workflow: &str, phase: WorkflowPhase) -> Result<bool, EngineError> {
        if phase.is_terminal() {
            self.forget(workflow).await;
            return Ok(false);
        }
        if phase != WorkflowPhase::Init {
            return Ok(false);
        }
        let mut submitted = self.submitted.lock().await;
        if submitted.contains(workflow) {
            return Ok(false);
        }
        self.trigger
            .notify(Event::for_workflow(workflow, EventType::WorkflowCreated))?;
        submitted.insert(workflow.to_string());
        info!(workflow, "workflow submitted");
        Ok(true)
    }

    async fn forget(&self, workflow: &str) {
        if self.submitted.lock().await.remove(workflow) {
            debug!(workflow, "workflow finished, no longer tracked");
        }
    }

    /// Whether `WorkflowCreated` was sent for a workflow not yet seen finished
    pub async fn is_tracked(&self, workflow: &str) -> bool {
        self.submitted.lock().await.contains(workflow)
    }

    /// List every workflow and submit the new ones; returns how many were submitted
    pub async fn resync(&self) -> Result<usize, EngineError> {
        let mut count = 0;
        for (workflow, phase) in self.repo.list_workflows().await? {
            if self.observe(&workflow, phase).await? {
                count += 1;
            }
        }
        debug!(submitted = count, "resync done");
        Ok(count)
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        let mut notifications = self.bus.subscribe();
        let mut ticker = tokio::time::interval(self.resync_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.resync().await {
                        warn!(error = %e, "resync failed");
                    }
                }
                received = notifications.recv() => match received {
                    Ok(WorkflowNotification::WorkflowRegistered { workflow, phase, .. }) => {
                        self.observe(&workflow, phase).await?;
                    }
                    Ok(WorkflowNotification::WorkflowPhaseChanged { workflow, to, .. }) if to.is_terminal() => {
                        self.forget(&workflow).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "controller lagged behind the bus, resyncing");
                        self.resync().await?;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}
