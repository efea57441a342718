use async_trait::async_trait;
use chaoscore::{FaultSpec, FaultTarget, Playground, PlaygroundError, RevertTarget};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Performs one kind of fault
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Fault kind this actuator handles, matched against `FaultSpec::kind`
    fn kind(&self) -> &str;

    fn metadata(&self) -> ActuatorMetadata {
        ActuatorMetadata::default()
    }

    async fn inject(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError>;

    async fn revert(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<(), PlaygroundError>;
}

/// Metadata about an actuator
#[derive(Debug, Clone)]
pub struct ActuatorMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ActuatorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available actuators, usable as a playground
///
/// Injection references are `<kind>-<uuid>` and map back to the node that
/// owns the fault until it is reverted.
pub struct ActuatorRegistry {
    actuators: HashMap<String, Arc<dyn Actuator>>,
    injections: Mutex<HashMap<String, FaultTarget>>,
}

impl ActuatorRegistry {
    pub fn new() -> Self {
        Self {
            actuators: HashMap::new(),
            injections: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with every built-in actuator
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, actuator: Arc<dyn Actuator>) {
        let kind = actuator.kind().to_string();
        tracing::info!("Registering actuator: {}", kind);
        self.actuators.insert(kind, actuator);
    }

    pub fn list_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.actuators.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn get_metadata(&self, kind: &str) -> Option<ActuatorMetadata> {
        self.actuators.get(kind).map(|a| a.metadata())
    }

    /// Injections that have not been reverted yet
    pub async fn active_injections(&self) -> Vec<(String, FaultTarget)> {
        let injections = self.injections.lock().await;
        let mut active: Vec<_> = injections
            .iter()
            .map(|(id, target)| (id.clone(), target.clone()))
            .collect();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        active
    }

    fn actuator(&self, kind: &str) -> Result<&Arc<dyn Actuator>, PlaygroundError> {
        self.actuators
            .get(kind)
            .ok_or_else(|| PlaygroundError::UnknownFault(kind.to_string()))
    }
}

impl Default for ActuatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Playground for ActuatorRegistry {
    async fn inject(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<String, PlaygroundError> {
        let actuator = self.actuator(&fault.kind)?;
        actuator.inject(target, fault).await?;

        let id = format!("{}-{}", fault.kind, Uuid::new_v4().simple());
        self.injections.lock().await.insert(id.clone(), target.clone());
        info!(workflow = %target.workflow, node = %target.node, injection = %id, "injection recorded");
        Ok(id)
    }

    async fn revert(&self, target: &RevertTarget, fault: &FaultSpec) -> Result<(), PlaygroundError> {
        let actuator = self.actuator(&fault.kind)?;

        let owner = match target {
            RevertTarget::Injection(id) => self
                .injections
                .lock()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| PlaygroundError::RevertFailed(format!("unknown injection {}", id)))?,
            RevertTarget::Node(owner) => owner.clone(),
        };

        actuator.revert(&owner, fault).await?;

        let mut injections = self.injections.lock().await;
        injections.retain(|_, t| *t != owner);
        debug!(workflow = %owner.workflow, node = %owner.node, "injections released");
        Ok(())
    }
}
