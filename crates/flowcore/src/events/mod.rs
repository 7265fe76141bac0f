mod base;
mod observer;

pub use base::{follow_events, EventBus, EventEmitter, ExecutionEvent, ExecutionId, NodeEvent};
pub use observer::{ChannelObserver, ExecutionObserver, NoopObserver, ObserverEvent};
