//! Per-template-kind state machines.
//!
//! A state machine maps (node phase, event) to an ordered list of side
//! effects. Handlers never touch the clock, the repository or the
//! playground; waiting is expressed as a delayed notification.
//!
//! Events that arrive after their transition already happened (re-delivery,
//! replay) produce no effects. Only an event that could never apply to the
//! node's current phase is an `InvalidStateTransition`.

mod chaos;
mod parallel;
mod serial;
mod suspend;
mod task;

pub use chaos::ChaosStateMachine;
pub use parallel::ParallelStateMachine;
pub use serial::SerialStateMachine;
pub use suspend::SuspendStateMachine;
pub use task::TaskStateMachine;

use crate::config::FailurePolicy;
use crate::decider::TaskDecider;
use crate::naming::NodeNameGenerator;
use crate::sideeffect::SideEffect;
use chaoscore::{
    EngineError, Event, EventType, Node, NodePhase, Template, TemplateKind, WorkflowError,
    WorkflowSpec, WorkflowStatus,
};
use std::collections::VecDeque;
use tracing::debug;

use NodePhase::*;

pub trait StateMachine {
    fn name(&self) -> &'static str;

    fn handle_event(&self, event: &Event) -> Result<Vec<SideEffect>, EngineError>;
}

/// Everything a handler may look at
pub struct StateMachineContext<'a> {
    pub spec: &'a WorkflowSpec,
    pub status: &'a WorkflowStatus,
    pub node: &'a Node,
    pub template: &'a Template,
    pub names: &'a dyn NodeNameGenerator,
    pub decider: &'a dyn TaskDecider,
    pub failure_policy: FailurePolicy,
}

/// Route an event to the state machine of the node's template kind
pub fn handle_event(ctx: &StateMachineContext<'_>, event: &Event) -> Result<Vec<SideEffect>, EngineError> {
    match ctx.template.kind() {
        TemplateKind::Serial => SerialStateMachine::new(ctx).handle_event(event),
        TemplateKind::Parallel => ParallelStateMachine::new(ctx).handle_event(event),
        TemplateKind::Task => TaskStateMachine::new(ctx).handle_event(event),
        TemplateKind::Suspend => SuspendStateMachine::new(ctx).handle_event(event),
        TemplateKind::Chaos => ChaosStateMachine::new(ctx).handle_event(event),
    }
}

/// Phase transitions each kind may take
///
/// Besides the machines' own moves, every unfinished phase may go straight
/// to `Failed` when the workflow is cancelled by its deadline or an abort.
pub fn allowed_transitions(kind: TemplateKind) -> &'static [(NodePhase, NodePhase)] {
    match kind {
        TemplateKind::Serial => &[
            (Init, WaitingForSchedule),
            (Init, Failed),
            (WaitingForSchedule, WaitingForChild),
            (WaitingForSchedule, Succeed),
            (WaitingForSchedule, Failed),
            (WaitingForChild, WaitingForSchedule),
            (WaitingForChild, Succeed),
            (WaitingForChild, Failed),
        ],
        TemplateKind::Parallel => &[
            (Init, WaitingForChild),
            (Init, Succeed),
            (Init, Failed),
            (WaitingForChild, Succeed),
            (WaitingForChild, Failed),
        ],
        TemplateKind::Task => &[
            (Init, WaitingForSchedule),
            (Init, Failed),
            (WaitingForSchedule, WaitingForChild),
            (WaitingForSchedule, Succeed),
            (WaitingForSchedule, Failed),
            (WaitingForChild, Succeed),
            (WaitingForChild, Failed),
        ],
        TemplateKind::Suspend => &[
            (Init, Holding),
            (Init, Failed),
            (Holding, Succeed),
            (Holding, Failed),
        ],
        TemplateKind::Chaos => &[
            (Init, Running),
            (Init, Failed),
            (Running, Holding),
            (Running, Failed),
            (Holding, Succeed),
            (Holding, Failed),
        ],
    }
}

/// Whether `to` can be reached from `from` in one or more steps
fn reachable(kind: TemplateKind, from: NodePhase, to: NodePhase) -> bool {
    let transitions = allowed_transitions(kind);
    let mut seen = vec![from];
    let mut queue = VecDeque::from([from]);
    while let Some(phase) = queue.pop_front() {
        for (src, dst) in transitions {
            if *src != phase {
                continue;
            }
            if *dst == to {
                return true;
            }
            if !seen.contains(dst) {
                seen.push(*dst);
                queue.push_back(*dst);
            }
        }
    }
    false
}

impl<'a> StateMachineContext<'a> {
    pub fn workflow(&self) -> &str {
        &self.spec.name
    }

    pub(crate) fn set_phase(&self, target: NodePhase) -> SideEffect {
        SideEffect::update_phase(self.workflow(), &self.node.name, self.node.phase, target)
    }

    pub(crate) fn fail(&self, reason: impl Into<String>) -> SideEffect {
        SideEffect::fail_node(self.workflow(), &self.node.name, self.node.phase, reason)
    }

    pub(crate) fn notify_self(&self, event_type: EventType) -> SideEffect {
        SideEffect::notify(Event::new(self.workflow(), &self.node.name, event_type))
    }

    /// Report to the parent; the entry node reports to the workflow itself
    pub(crate) fn notify_parent(&self, event_type: EventType) -> SideEffect {
        SideEffect::notify(Event::new(self.workflow(), self.node.parent_name(), event_type))
    }

    /// Create every child first, then announce them, so no child runs before all exist
    pub(crate) fn spawn_children(&self, templates: &[Template]) -> Vec<SideEffect> {
        let children: Vec<(String, &Template)> = templates
            .iter()
            .map(|t| (self.names.generate_node_name(&t.name), t))
            .collect();

        let mut effects = Vec::with_capacity(children.len() * 2);
        for (name, template) in &children {
            effects.push(SideEffect::CreateNewNode {
                workflow: self.workflow().to_string(),
                parent: Some(self.node.name.clone()),
                node: name.clone(),
                template: template.name.clone(),
                kind: template.kind(),
                phase: Init,
            });
        }
        for (name, _) in &children {
            effects.push(SideEffect::notify(Event::new(
                self.workflow(),
                name,
                EventType::NodeCreated,
            )));
        }
        effects
    }

    /// Succeed, fail, or keep waiting depending on the children's phases
    pub(crate) fn aggregate_children(&self) -> Result<Vec<SideEffect>, EngineError> {
        let tree_node = self
            .status
            .tree_node(&self.node.name)
            .ok_or_else(|| WorkflowError::TreeNodeIsRequired {
                workflow: self.spec.name.clone(),
                node: self.node.name.clone(),
            })?;

        let failed = tree_node
            .children()
            .iter()
            .find(|child| child.phase == Failed)
            .map(|child| child.name.clone());

        let settled = match self.failure_policy {
            FailurePolicy::FailFast => failed.is_some() || tree_node.all_in_phase(Succeed),
            FailurePolicy::WaitForAll => tree_node.all_terminal(),
        };
        if !settled {
            return Ok(vec![]);
        }

        Ok(match failed {
            Some(child) => vec![
                self.fail(format!("child node {} failed", child)),
                self.notify_parent(EventType::ChildNodeFailed),
            ],
            None => vec![
                self.set_phase(Succeed),
                self.notify_parent(EventType::ChildNodeSucceed),
            ],
        })
    }

    /// Fallback for (phase, event) pairs outside a machine's table
    ///
    /// `accepted` lists the phases in which the machine handles this event.
    pub(crate) fn unhandled(
        &self,
        machine: &'static str,
        event: &Event,
        accepted: &[NodePhase],
    ) -> Result<Vec<SideEffect>, EngineError> {
        let phase = self.node.phase;
        let kind = self.template.kind();
        if phase.is_terminal() || accepted.iter().any(|p| reachable(kind, *p, phase)) {
            debug!(
                machine,
                node = %self.node.name,
                phase = %phase,
                event = %event,
                "event already handled, ignoring"
            );
            return Ok(vec![]);
        }
        Err(EngineError::InvalidStateTransition {
            machine,
            node: self.node.name.clone(),
            phase,
            event: event.event_type.to_string(),
        })
    }
}
