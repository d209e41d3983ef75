//! Standard node library
//!
//! A few reusable nodes, mostly useful from pipeline files.

mod command;
mod echo;
mod json;

pub use command::{Command, CommandFactory};
pub use echo::{Echo, EchoFactory};
pub use json::{JsonRead, JsonReadFactory, JsonWrite, JsonWriteFactory};
use graphruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(EchoFactory));
    registry.register(Arc::new(JsonReadFactory));
    registry.register(Arc::new(JsonWriteFactory));
    registry.register(Arc::new(CommandFactory));
}
