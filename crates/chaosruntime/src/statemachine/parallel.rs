use super::{StateMachine, StateMachineContext};
use crate::scheduler::BasicScheduler;
use crate::sideeffect::SideEffect;
use chaoscore::{EngineError, Event, EventType, NodePhase};

/// Starts every child at once and aggregates their outcome
pub struct ParallelStateMachine<'a> {
    ctx: &'a StateMachineContext<'a>,
}

impl<'a> ParallelStateMachine<'a> {
    pub fn new(ctx: &'a StateMachineContext<'a>) -> Self {
        Self { ctx }
    }

    fn start(&self) -> Result<Vec<SideEffect>, EngineError> {
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

impl StateMachine for ParallelStateMachine<'_> {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn handle_event(&self, event: &Event) -> Result<Vec<SideEffect>, EngineError> {
        use EventType::*;
        use NodePhase::*;

        match (self.ctx.node.phase, event.event_type) {
            (Init, NodeCreated) => self.start(),
            (WaitingForChild, ChildNodeSucceed) | (WaitingForChild, ChildNodeFailed) => {
                self.ctx.aggregate_children()
            }
            (_, NodeCreated) => self.ctx.unhandled(self.name(), event, &[Init]),
            (_, ChildNodeSucceed) | (_, ChildNodeFailed) => {
                self.ctx.unhandled(self.name(), event, &[WaitingForChild])
            }
            _ => self.ctx.unhandled(self.name(), event, &[]),
        }
    }
}
