mod bus;
mod event;

pub use bus::{EventBus, WorkflowNotification};
pub use event::{Event, EventType};
