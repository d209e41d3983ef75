mod base;

pub use base::{BuildEvent, BuildId, EventBus, EventEmitter, NodeMessage};
