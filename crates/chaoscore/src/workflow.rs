use crate::WorkflowError;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSpec {
    pub name: String,
    pub description: Option<String>,

    /// Name of the template instantiated as the root node
    pub entry: String,

    #[serde(with = "template_list")]
    pub templates: BTreeMap<String, Template>,

    /// Whole-workflow deadline; the workflow fails if still running when it expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,

    /// Values consulted by task branch conditions
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            entry: entry.into(),
            templates: BTreeMap::new(),
            deadline_ms: None,
            params: serde_json::Map::new(),
        }
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.add_template(template);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(millis(deadline));
        self
    }

    pub fn add_template(&mut self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn template(&self, name: &str) -> Result<&Template, WorkflowError> {
        self.templates
            .get(name)
            .ok_or_else(|| WorkflowError::NoSuchTemplate {
                workflow: self.name.clone(),
                template: name.to_string(),
            })
    }

    pub fn entry_template(&self) -> Result<&Template, WorkflowError> {
        if self.templates.is_empty() {
            return Err(WorkflowError::NoTemplates(self.name.clone()));
        }
        self.template(&self.entry)
    }

    /// Check that every reference resolves and templates do not nest into themselves
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.entry_template()?;

        let mut graph = DiGraph::<&str, ()>::new();
        let mut index = HashMap::new();
        for name in self.templates.keys() {
            index.insert(name.as_str(), graph.add_node(name.as_str()));
        }

        for template in self.templates.values() {
            for child in template.children() {
                let to = index.get(child.as_str()).ok_or_else(|| WorkflowError::NoSuchTemplate {
                    workflow: self.name.clone(),
                    template: child.clone(),
                })?;
                graph.add_edge(index[template.name.as_str()], *to, ());
            }

            if let TemplateSpec::Task { children, branches } = &template.spec {
                if let Some(branch) = branches.iter().find(|b| !children.contains(&b.target)) {
                    return Err(WorkflowError::Invalid {
                        workflow: self.name.clone(),
                        message: format!(
                            "branch target '{}' is not a child of task '{}'",
                            branch.target, template.name
                        ),
                    });
                }
            }
        }

        toposort(&graph, None).map_err(|cycle| WorkflowError::CyclicTemplate {
            workflow: self.name.clone(),
            template: graph[cycle.node_id()].to_string(),
        })?;

        Ok(())
    }
}

/// Kind tag of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    Serial,
    Parallel,
    Task,
    Suspend,
    Chaos,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A user-authored step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub name: String,
    #[serde(flatten)]
    pub spec: TemplateSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TemplateSpec {
    /// Children run one after another; the same name may appear more than once
    Serial { children: Vec<String> },
    /// Children all start together
    Parallel { children: Vec<String> },
    /// Children filtered by branch conditions decided when the node is created
    Task {
        children: Vec<String>,
        #[serde(default)]
        branches: Vec<ConditionalBranch>,
    },
    Suspend { duration_ms: u64 },
    Chaos { fault: FaultSpec, duration_ms: u64 },
}

impl Template {
    pub fn serial<I, S>(name: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            spec: TemplateSpec::Serial {
                children: children.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn parallel<I, S>(name: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            spec: TemplateSpec::Parallel {
                children: children.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn task<I, S>(name: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            spec: TemplateSpec::Task {
                children: children.into_iter().map(Into::into).collect(),
                branches: Vec::new(),
            },
        }
    }

    pub fn suspend(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            spec: TemplateSpec::Suspend {
                duration_ms: millis(duration),
            },
        }
    }

    pub fn chaos(name: impl Into<String>, fault: FaultSpec, duration: Duration) -> Self {
        Self {
            name: name.into(),
            spec: TemplateSpec::Chaos {
                fault,
                duration_ms: millis(duration),
            },
        }
    }

    /// Add a branch to a task template; no-op for other kinds
    pub fn with_branch(mut self, branch: ConditionalBranch) -> Self {
        if let TemplateSpec::Task { branches, .. } = &mut self.spec {
            branches.push(branch);
        }
        self
    }

    pub fn kind(&self) -> TemplateKind {
        match self.spec {
            TemplateSpec::Serial { .. } => TemplateKind::Serial,
            TemplateSpec::Parallel { .. } => TemplateKind::Parallel,
            TemplateSpec::Task { .. } => TemplateKind::Task,
            TemplateSpec::Suspend { .. } => TemplateKind::Suspend,
            TemplateSpec::Chaos { .. } => TemplateKind::Chaos,
        }
    }

    /// Referenced child template names, in declaration order
    pub fn children(&self) -> &[String] {
        match &self.spec {
            TemplateSpec::Serial { children }
            | TemplateSpec::Parallel { children }
            | TemplateSpec::Task { children, .. } => children,
            TemplateSpec::Suspend { .. } | TemplateSpec::Chaos { .. } => &[],
        }
    }

    pub fn serial_children(&self) -> Option<&[String]> {
        match &self.spec {
            TemplateSpec::Serial { children } => Some(children),
            _ => None,
        }
    }

    pub fn parallel_children(&self) -> Option<&[String]> {
        match &self.spec {
            TemplateSpec::Parallel { children } => Some(children),
            _ => None,
        }
    }

    pub fn task_branches(&self) -> Option<(&[String], &[ConditionalBranch])> {
        match &self.spec {
            TemplateSpec::Task { children, branches } => Some((children, branches)),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&FaultSpec> {
        match &self.spec {
            TemplateSpec::Chaos { fault, .. } => Some(fault),
            _ => None,
        }
    }

    /// How long a suspend or chaos node holds
    pub fn duration(&self) -> Option<Duration> {
        match self.spec {
            TemplateSpec::Suspend { duration_ms } | TemplateSpec::Chaos { duration_ms, .. } => {
                Some(Duration::from_millis(duration_ms))
            }
            _ => None,
        }
    }
}

/// Opaque fault descriptor handed to the playground
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaultSpec {
    /// Selects the actuator, e.g. "log" or "command"
    pub kind: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl FaultSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            spec: serde_json::Value::Null,
        }
    }

    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalBranch {
    pub target: String,
    #[serde(default)]
    pub when: BranchCondition,
}

impl ConditionalBranch {
    pub fn new(target: impl Into<String>, when: BranchCondition) -> Self {
        Self {
            target: target.into(),
            when,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BranchCondition {
    #[default]
    Always,
    Never,
    Equals {
        param: String,
        value: serde_json::Value,
    },
    Exists {
        param: String,
    },
}

impl BranchCondition {
    pub fn evaluate(&self, params: &serde_json::Map<String, serde_json::Value>) -> bool {
        match self {
            BranchCondition::Always => true,
            BranchCondition::Never => false,
            BranchCondition::Equals { param, value } => params.get(param) == Some(value),
            BranchCondition::Exists { param } => params.contains_key(param),
        }
    }
}

mod template_list {
    use super::Template;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(templates: &BTreeMap<String, Template>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(templates.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Template>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<Template>::deserialize(deserializer)?;
        let mut templates = BTreeMap::new();
        for template in list {
            let name = template.name.clone();
            if templates.insert(name.clone(), template).is_some() {
                return Err(serde::de::Error::custom(format!("duplicate template '{}'", name)));
            }
        }
        Ok(templates)
    }
}

/// Whole milliseconds, saturating for durations beyond `u64::MAX` ms
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
