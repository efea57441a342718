use crate::TemplateKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Phase of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodePhase {
    Init,
    WaitingForSchedule,
    Running,
    Holding,
    WaitingForChild,
    Succeed,
    Failed,
}

impl NodePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodePhase::Succeed | NodePhase::Failed)
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Phase of a whole workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WorkflowPhase {
    #[default]
    Init,
    Running,
    Succeed,
    Failed,
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowPhase::Succeed | WorkflowPhase::Failed)
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind-specific runtime state of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum NodeState {
    #[default]
    Plain,
    Task {
        /// Children selected by the branch decision, `None` until decided
        branches: Option<Vec<String>>,
    },
    Chaos {
        /// Reference returned by the playground, needed to revert the fault
        injection: Option<String>,
    },
}

impl NodeState {
    pub fn for_kind(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::Task => NodeState::Task { branches: None },
            TemplateKind::Chaos => NodeState::Chaos { injection: None },
            _ => NodeState::Plain,
        }
    }
}

/// Runtime instance of a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub template_name: String,
    /// `None` for the entry node
    pub parent: Option<String>,
    pub kind: TemplateKind,
    pub phase: NodePhase,
    /// Set when the node transitions to `Failed`
    pub reason: Option<String>,
    #[serde(default)]
    pub state: NodeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        template_name: impl Into<String>,
        parent: Option<String>,
        kind: TemplateKind,
        phase: NodePhase,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            template_name: template_name.into(),
            parent,
            kind,
            phase,
            reason: None,
            state: NodeState::for_kind(kind),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parent name, empty for the entry node
    pub fn parent_name(&self) -> &str {
        self.parent.as_deref().unwrap_or("")
    }

    pub fn task_branches(&self) -> Option<&[String]> {
        match &self.state {
            NodeState::Task { branches } => branches.as_deref(),
            _ => None,
        }
    }

    pub fn injection(&self) -> Option<&str> {
        match &self.state {
            NodeState::Chaos { injection } => injection.as_deref(),
            _ => None,
        }
    }
}

/// Parent to ordered children relation for all nodes of a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTree {
    root: Option<String>,
    children: BTreeMap<String, Vec<String>>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; children are appended in insertion order
    pub fn insert(&mut self, parent: Option<&str>, name: &str) {
        self.children.entry(name.to_string()).or_default();
        match parent {
            Some(parent) => self.children.entry(parent.to_string()).or_default().push(name.to_string()),
            None => self.root = Some(name.to_string()),
        }
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn children(&self, name: &str) -> Option<&[String]> {
        self.children.get(name).map(Vec::as_slice)
    }
}

/// View of one tree position with its children resolved
#[derive(Debug, Clone)]
pub struct TreeNode<'a> {
    pub name: &'a str,
    children: Vec<&'a Node>,
}

impl<'a> TreeNode<'a> {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[&'a Node] {
        &self.children
    }

    pub fn contains_template(&self, template_name: &str) -> bool {
        self.children.iter().any(|n| n.template_name == template_name)
    }

    pub fn all_in_phase(&self, phase: NodePhase) -> bool {
        self.children.iter().all(|n| n.phase == phase)
    }

    pub fn all_terminal(&self) -> bool {
        self.children.iter().all(|n| n.phase.is_terminal())
    }

    pub fn any_failed(&self) -> bool {
        self.children.iter().any(|n| n.phase == NodePhase::Failed)
    }
}

/// Runtime status of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub phase: WorkflowPhase,
    pub reason: Option<String>,
    pub nodes: BTreeMap<String, Node>,
    pub tree: NodeTree,
    pub entry_node: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Insert a node and link it under its parent
    pub fn add_node(&mut self, node: Node) {
        self.tree.insert(node.parent.as_deref(), &node.name);
        if node.parent.is_none() {
            self.entry_node = Some(node.name.clone());
        }
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn tree_node(&self, name: &str) -> Option<TreeNode<'_>> {
        let names = self.tree.children(name)?;
        let (name, _) = self.nodes.get_key_value(name)?;
        Some(TreeNode {
            name,
            children: names.iter().filter_map(|n| self.nodes.get(n)).collect(),
        })
    }

    pub fn entry(&self) -> Option<&Node> {
        self.entry_node.as_deref().and_then(|n| self.nodes.get(n))
    }

    /// First node (by name) waiting for its children to be scheduled
    pub fn first_waiting_for_schedule(&self) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| n.phase == NodePhase::WaitingForSchedule)
    }

    /// Chaos nodes still holding an injected fault although the node or the
    /// workflow already finished; candidates for garbage collection
    pub fn leaked_injections(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.injection().is_some())
            .filter(|n| n.phase.is_terminal() || self.phase.is_terminal())
            .collect()
    }
}
