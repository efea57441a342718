use crate::{FaultSpec, PlaygroundError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which node a fault belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultTarget {
    pub workflow: String,
    pub node: String,
}

/// Descriptor handed to the playground by a `CreateActor` side effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ChaosActor {
    Inject {
        target: FaultTarget,
        fault: FaultSpec,
    },
    Revert {
        target: FaultTarget,
        fault: FaultSpec,
    },
}

impl ChaosActor {
    pub fn target(&self) -> &FaultTarget {
        match self {
            ChaosActor::Inject { target, .. } | ChaosActor::Revert { target, .. } => target,
        }
    }

    pub fn fault(&self) -> &FaultSpec {
        match self {
            ChaosActor::Inject { fault, .. } | ChaosActor::Revert { fault, .. } => fault,
        }
    }
}

/// What to revert: a reference returned by `inject`, or everything owned by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertTarget {
    Injection(String),
    Node(FaultTarget),
}

/// External actuator that performs or reverts a fault
#[async_trait]
pub trait Playground: Send + Sync {
    /// Actuate the fault and return a reference needed to revert it
    async fn inject(&self, target: &FaultTarget, fault: &FaultSpec) -> Result<String, PlaygroundError>;

    async fn revert(&self, target: &RevertTarget, fault: &FaultSpec) -> Result<(), PlaygroundError>;
}
