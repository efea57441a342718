//! Pure decisions about which templates to instantiate next.
//!
//! Schedulers never mutate anything; calling one twice on the same snapshot
//! yields the same answer.

mod basic;
mod serial;

pub use basic::BasicScheduler;
pub use serial::{is_no_more_template, SerialScheduler};

use chaoscore::{EngineError, Template};

/// Templates to instantiate and the node they go under
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub templates: Vec<Template>,
    /// `None` when scheduling the entry template
    pub parent: Option<String>,
}

pub trait Scheduler {
    fn schedule_next(&self) -> Result<Schedule, EngineError>;
}

pub fn is_no_need_schedule(err: &EngineError) -> bool {
    matches!(err, EngineError::NoNeedSchedule(_))
}
