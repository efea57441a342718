//! Core abstractions for the chaos workflow engine
//!
//! This crate provides the data model (templates, nodes, the execution tree),
//! engine events, the error taxonomy, and the traits of the two external
//! collaborators: the repository and the playground.

mod error;
pub mod events;
mod node;
mod playground;
mod repository;
mod workflow;

pub use error::{
    Disposition, EngineError, PlaygroundError, RepoError, TriggerError, WorkflowError,
};
pub use events::*;
pub use node::{Node, NodePhase, NodeState, NodeTree, TreeNode, WorkflowPhase, WorkflowStatus};
pub use playground::{ChaosActor, FaultTarget, Playground, RevertTarget};
pub use repository::Repository;
pub use workflow::{
    BranchCondition, ConditionalBranch, FaultSpec, Template, TemplateKind, TemplateSpec,
    WorkflowSpec,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
