use crate::config::RuntimeConfig;
use crate::controller::WorkflowController;
use crate::decider::TaskDecider;
use crate::manager::WorkflowManager;
use crate::memory::InMemoryRepository;
use crate::naming::NodeNameGenerator;
use crate::trigger::OperableTrigger;
use chaoscore::{
    EngineError, Event, EventBus, EventType, Playground, Repository, WorkflowNotification,
    WorkflowSpec, WorkflowStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Builder for [`ChaosRuntime`]
pub struct RuntimeBuilder {
    playground: Arc<dyn Playground>,
    config: RuntimeConfig,
    names: Option<Arc<dyn NodeNameGenerator>>,
    decider: Option<Arc<dyn TaskDecider>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name_generator(mut self, names: Arc<dyn NodeNameGenerator>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn TaskDecider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn build(self) -> Result<ChaosRuntime, EngineError> {
        let bus = EventBus::new(self.config.event_buffer_size);
        let repo = Arc::new(InMemoryRepository::new(bus.clone()));

        let mut builder = WorkflowManager::builder(repo.clone(), self.playground)
            .config(self.config.clone());
        if let Some(names) = self.names {
            builder = builder.name_generator(names);
        }
        if let Some(decider) = self.decider {
            builder = builder.decider(decider);
        }
        let manager = builder.build()?;

        let controller = Arc::new(WorkflowController::new(
            repo.clone(),
            bus.clone(),
            manager.trigger(),
            self.config.resync_interval(),
        ));

        Ok(ChaosRuntime {
            repo,
            bus,
            manager,
            controller,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// In-process engine: repository, manager and controller wired together
pub struct ChaosRuntime {
    repo: Arc<InMemoryRepository>,
    bus: EventBus,
    manager: WorkflowManager,
    controller: Arc<WorkflowController>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChaosRuntime {
    pub fn builder(playground: Arc<dyn Playground>) -> RuntimeBuilder {
        RuntimeBuilder {
            playground,
            config: RuntimeConfig::default(),
            names: None,
            decider: None,
        }
    }

    /// Create a runtime with default settings
    pub fn new(playground: Arc<dyn Playground>) -> Result<Self, EngineError> {
        Self::builder(playground).build()
    }

    /// Spawn the manager and the controller
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let manager = self.manager.clone();
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = manager.run(cancel).await {
                error!(error = %e, "workflow manager exited with error");
            }
        }));

        let controller = self.controller.clone();
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = controller.run(cancel).await {
                error!(error = %e, "workflow controller exited with error");
            }
        }));
    }

    /// Register a workflow; the controller submits it to the manager
    pub async fn submit(&self, spec: WorkflowSpec) -> Result<(), EngineError> {
        self.repo.register_workflow(spec).await
    }

    /// Wait until the workflow reaches a terminal phase
    pub async fn wait_for(&self, workflow: &str, timeout: Duration) -> Result<WorkflowStatus, EngineError> {
        let notifications = self.bus.subscribe();
        tokio::time::timeout(timeout, self.wait_terminal(workflow, notifications))
            .await
            .map_err(|_| EngineError::Timeout(format!("workflow {} did not finish", workflow)))?
    }

    async fn wait_terminal(
        &self,
        workflow: &str,
        mut notifications: broadcast::Receiver<WorkflowNotification>,
    ) -> Result<WorkflowStatus, EngineError> {
        loop {
            let status = self.repo.status(workflow).await?;
            if status.phase.is_terminal() {
                return Ok(status);
            }
            match notifications.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(EngineError::Canceled),
            }
        }
    }

    /// Cancel a workflow: unfinished nodes fail and held faults are reverted
    pub fn abort(&self, workflow: &str) -> Result<(), EngineError> {
        info!(workflow, "abort requested");
        self.manager
            .trigger()
            .notify(Event::for_workflow(workflow, EventType::WorkflowAborted))?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowNotification> {
        self.bus.subscribe()
    }

    pub fn repository(&self) -> &Arc<InMemoryRepository> {
        &self.repo
    }

    pub fn manager(&self) -> &WorkflowManager {
        &self.manager
    }

    pub fn trigger(&self) -> OperableTrigger {
        self.manager.trigger()
    }

    pub async fn status(&self, workflow: &str) -> Result<WorkflowStatus, EngineError> {
        Ok(self.repo.fetch_workflow(workflow).await?.1)
    }

    /// Cancel both loops and wait for them; pending delayed events are dropped
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.manager.shutdown();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "runtime task panicked");
            }
        }
        debug!("runtime shut down");
    }
}
