use super::{StateMachine, StateMachineContext};
use crate::scheduler::{is_no_more_template, Scheduler, SerialScheduler};
use crate::sideeffect::SideEffect;
use chaoscore::{EngineError, Event, EventType, NodePhase};

/// Runs children one after another; the first failure fails the node
pub struct SerialStateMachine<'a> {
    ctx: &'a StateMachineContext<'a>,
}

impl<'a> SerialStateMachine<'a> {
    pub fn new(ctx: &'a StateMachineContext<'a>) -> Self {
        Self { ctx }
    }

    /// Phase of the most recently scheduled child
    fn last_child_phase(&self) -> Option<NodePhase> {
        self.ctx
            .status
            .tree_node(&self.ctx.node.name)
            .and_then(|t| t.children().last().map(|c| c.phase))
    }

    fn succeed(&self) -> Vec<SideEffect> {
        vec![
            self.ctx.set_phase(NodePhase::Succeed),
            self.ctx.notify_parent(EventType::ChildNodeSucceed),
        ]
    }

    fn schedule_child(&self) -> Result<Vec<SideEffect>, EngineError> {
        let scheduler = SerialScheduler::new(self.ctx.spec, self.ctx.status, self.ctx.node);
        match scheduler.schedule_next() {
            Ok(schedule) => {
                let mut effects = vec![self.ctx.set_phase(NodePhase::WaitingForChild)];
                effects.extend(self.ctx.spawn_children(&schedule.templates));
                Ok(effects)
            }
            // empty serial template
            Err(e) if is_no_more_template(&e) => Ok(self.succeed()),
            Err(e) => Err(e),
        }
    }

    fn child_succeeded(&self) -> Result<Vec<SideEffect>, EngineError> {
        if self.last_child_phase() != Some(NodePhase::Succeed) {
            // report from an earlier child, already consumed
            return Ok(vec![]);
        }
        let scheduler = SerialScheduler::new(self.ctx.spec, self.ctx.status, self.ctx.node);
        match scheduler.next_template() {
            Ok(_) => Ok(vec![
                self.ctx.set_phase(NodePhase::WaitingForSchedule),
                self.ctx.notify_self(EventType::NodePickChildToSchedule),
            ]),
            Err(e) if is_no_more_template(&e) => Ok(self.succeed()),
            Err(e) => Err(e),
        }
    }

    fn child_failed(&self) -> Vec<SideEffect> {
        if self.last_child_phase() != Some(NodePhase::Failed) {
            return vec![];
        }
        let child = self
            .ctx
            .status
            .tree_node(&self.ctx.node.name)
            .and_then(|t| t.children().last().map(|c| c.name.clone()))
            .unwrap_or_default();
        vec![
            self.ctx.fail(format!("child node {} failed", child)),
            self.ctx.notify_parent(EventType::ChildNodeFailed),
        ]
    }
}

impl StateMachine for SerialStateMachine<'_> {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn handle_event(&self, event: &Event) -> Result<Vec<SideEffect>, EngineError> {
        use EventType::*;
        use NodePhase::*;

        match (self.ctx.node.phase, event.event_type) {
            (Init, NodeCreated) => Ok(vec![
                self.ctx.set_phase(WaitingForSchedule),
                self.ctx.notify_self(NodePickChildToSchedule),
            ]),
            (WaitingForSchedule, NodePickChildToSchedule) => self.schedule_child(),
            (WaitingForChild, ChildNodeSucceed) => self.child_succeeded(),
            (WaitingForChild, ChildNodeFailed) => Ok(self.child_failed()),
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
