use super::{StateMachine, StateMachineContext};
use crate::sideeffect::SideEffect;
use chaoscore::{
    ChaosActor, EngineError, Event, EventType, FaultSpec, FaultTarget, NodePhase, TemplateKind,
    WorkflowError,
};
use std::time::Duration;

/// Injects a fault, holds it for the template duration, then reverts it
///
/// The phase update always comes first. If it loses the compare-and-swap
/// the batch stops there, so the playground sees each actor at most once.
pub struct ChaosStateMachine<'a> {
    ctx: &'a StateMachineContext<'a>,
}

impl<'a> ChaosStateMachine<'a> {
    pub fn new(ctx: &'a StateMachineContext<'a>) -> Self {
        Self { ctx }
    }

    fn fault(&self) -> Result<FaultSpec, EngineError> {
        self.ctx.template.fault().cloned().ok_or_else(|| {
            WorkflowError::UnsupportedTemplateKind {
                workflow: self.ctx.spec.name.clone(),
                template: self.ctx.template.name.clone(),
                expected: TemplateKind::Chaos,
            }
            .into()
        })
    }

    fn target(&self) -> FaultTarget {
        FaultTarget {
            workflow: self.ctx.workflow().to_string(),
            node: self.ctx.node.name.clone(),
        }
    }
}

impl StateMachine for ChaosStateMachine<'_> {
    fn name(&self) -> &'static str {
        "chaos"
    }

    fn handle_event(&self, event: &Event) -> Result<Vec<SideEffect>, EngineError> {
        use EventType::*;
        use NodePhase::*;

        match (self.ctx.node.phase, event.event_type) {
            (Init, NodeCreated) => Ok(vec![
                self.ctx.set_phase(Running),
                SideEffect::CreateActor(ChaosActor::Inject {
                    target: self.target(),
                    fault: self.fault()?,
                }),
                self.ctx.notify_self(NodeChaosInjectSucceed),
            ]),
            (Running, NodeChaosInjectSucceed) => {
                let duration = self.ctx.template.duration().unwrap_or(Duration::ZERO);
                Ok(vec![
                    self.ctx.set_phase(Holding),
                    SideEffect::notify_delay(
                        Event::new(self.ctx.workflow(), &self.ctx.node.name, NodeHoldingAwake),
                        duration,
                    ),
                ])
            }
            (Running, NodeChaosInjectFailed) => {
                let reason = event
                    .reason()
                    .unwrap_or_else(|| "fault injection failed".to_string());
                Ok(vec![
                    self.ctx.fail(reason),
                    self.ctx.notify_parent(ChildNodeFailed),
                ])
            }
            (Holding, NodeHoldingAwake) => Ok(vec![
                self.ctx.set_phase(Succeed),
                SideEffect::CreateActor(ChaosActor::Revert {
                    target: self.target(),
                    fault: self.fault()?,
                }),
                self.ctx.notify_parent(ChildNodeSucceed),
            ]),
            (_, NodeCreated) => self.ctx.unhandled(self.name(), event, &[Init]),
            (_, NodeChaosInjectSucceed) | (_, NodeChaosInjectFailed) => {
                self.ctx.unhandled(self.name(), event, &[Running])
            }
            (_, NodeHoldingAwake) => self.ctx.unhandled(self.name(), event, &[Holding]),
            _ => self.ctx.unhandled(self.name(), event, &[]),
        }
    }
}
