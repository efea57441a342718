use super::{StateMachine, StateMachineContext};
use crate::sideeffect::SideEffect;
use chaoscore::{EngineError, Event, EventType, NodePhase};
use std::time::Duration;

pub struct SuspendStateMachine<'a> {
    ctx: &'a StateMachineContext<'a>,
}

impl<'a> SuspendStateMachine<'a> {
    pub fn new(ctx: &'a StateMachineContext<'a>) -> Self {
        Self { ctx }
    }
}

impl StateMachine for SuspendStateMachine<'_> {
    fn name(&self) -> &'static str {
        "suspend"
    }

    fn handle_event(&self, event: &Event) -> Result<Vec<SideEffect>, EngineError> {
        use EventType::*;
        use NodePhase::*;

        match (self.ctx.node.phase, event.event_type) {
            (Init, NodeCreated) => {
                let duration = self.ctx.template.duration().unwrap_or(Duration::ZERO);
                Ok(vec![
                    self.ctx.set_phase(Holding),
                    SideEffect::notify_delay(
                        Event::new(self.ctx.workflow(), &self.ctx.node.name, NodeHoldingAwake),
                        duration,
                    ),
                ])
            }
            (Holding, NodeHoldingAwake) => Ok(vec![
                self.ctx.set_phase(Succeed),
                self.ctx.notify_parent(ChildNodeSucceed),
            ]),
            (_, NodeCreated) => self.ctx.unhandled(self.name(), event, &[Init]),
            (_, NodeHoldingAwake) => self.ctx.unhandled(self.name(), event, &[Holding]),
            _ => self.ctx.unhandled(self.name(), event, &[]),
        }
    }
}
