use super::{StateMachine, StateMachineContext};
use crate::scheduler::BasicScheduler;
use crate::sideeffect::SideEffect;
use chaoscore::{EngineError, Event, EventType, NodePhase};
use tracing::debug;

/// Runs the subset of children picked by the task decider
///
/// The decision is recorded on the node when it is created; scheduling
/// then reads it back, so a replayed event never re-evaluates it.
pub struct TaskStateMachine<'a> {
    ctx: &'a StateMachineContext<'a>,
}

impl<'a> TaskStateMachine<'a> {
    pub fn new(ctx: &'a StateMachineContext<'a>) -> Self {
        Self { ctx }
    }

    fn decide(&self) -> Result<Vec<SideEffect>, EngineError> {
        let branches = self
            .ctx
            .decider
            .decide(self.ctx.spec, self.ctx.node, self.ctx.template)?;
        debug!(node = %self.ctx.node.name, branches = ?branches, "task branches decided");

        // recording is repeatable, so it goes before the phase swap
        Ok(vec![
            SideEffect::RecordTaskBranches {
                workflow: self.ctx.workflow().to_string(),
                node: self.ctx.node.name.clone(),
                branches,
            },
            self.ctx.set_phase(NodePhase::WaitingForSchedule),
            self.ctx.notify_self(EventType::NodePickChildToSchedule),
        ])
    }

    fn schedule(&self) -> Result<Vec<SideEffect>, EngineError> {
        let templates =
            BasicScheduler::new(self.ctx.spec, self.ctx.status).children_for(&self.ctx.node.name)?;
        if templates.is_empty() {
            return Ok(vec![
                self.ctx.set_phase(NodePhase::Succeed),
                self.ctx.notify_parent(EventType::ChildNodeSucceed),
            ]);
        }
        let mut effects = vec![self.ctx.set_phase(NodePhase::WaitingForChild)];
        effects.extend(self.ctx.spawn_children(&templates));
        Ok(effects)
    }
}

impl StateMachine for TaskStateMachine<'_> {
    fn name(&self) -> &'static str {
        "task"
    }

    fn handle_event(&self, event: &Event) -> Result<Vec<SideEffect>, EngineError> {
        use EventType::*;
        use NodePhase::*;

        match (self.ctx.node.phase, event.event_type) {
            (Init, NodeCreated) => self.decide(),
            (WaitingForSchedule, NodePickChildToSchedule) => self.schedule(),
            (WaitingForChild, ChildNodeSucceed) | (WaitingForChild, ChildNodeFailed) => {
                self.ctx.aggregate_children()
            }
            (_, NodeCreated) => self.ctx.unhandled(self.name(), event, &[Init]),
            (_, NodePickChildToSchedule) => {
                self.ctx.unhandled(self.name(), event, &[WaitingForSchedule])
            }
            (_, ChildNodeSucceed) | (_, ChildNodeFailed) => {
                self.ctx.unhandled(self.name(), event, &[WaitingForChild])
            }
            _ => self.ctx.unhandled(self.name(), event, &[]),
        }
    }
}
