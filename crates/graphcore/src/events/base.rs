use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type BuildId = Uuid;

/// Events emitted during a build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    BuildStarted {
        build_id: BuildId,
        node_count: usize,
        timestamp: DateTime<Utc>,
    },
    BuildCompleted {
        build_id: BuildId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        build_id: BuildId,
        node_id: NodeId,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        build_id: BuildId,
        node_id: NodeId,
        definition: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    NodeSucceeded {
        build_id: BuildId,
        node_id: NodeId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        build_id: BuildId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeBlocked {
        build_id: BuildId,
        node_id: NodeId,
        blocked_by: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeMessage {
        build_id: BuildId,
        node_id: NodeId,
        message: NodeMessage,
        timestamp: DateTime<Utc>,
    },
}

/// Messages a node sends from inside `run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "level")]
pub enum NodeMessage {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to a running node
#[derive(Clone)]
pub struct EventEmitter {
    build_id: BuildId,
    node_id: NodeId,
    sender: broadcast::Sender<BuildEvent>,
}

impl EventEmitter {
    pub fn new(build_id: BuildId, node_id: NodeId, sender: broadcast::Sender<BuildEvent>) -> Self {
        Self {
            build_id,
            node_id,
            sender,
        }
    }

    /// Emitter with no listeners, for running a node outside a build.
    pub fn detached(node_id: NodeId) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(Uuid::nil(), node_id, sender)
    }

    pub fn emit(&self, message: NodeMessage) {
        let _ = self.sender.send(BuildEvent::NodeMessage {
            build_id: self.build_id,
            node_id: self.node_id.clone(),
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeMessage::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeMessage::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(NodeMessage::Progress { percent, message });
    }
}

/// Broadcast bus shared by the scheduler and its subscribers
pub struct EventBus {
    sender: broadcast::Sender<BuildEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: BuildEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for build event");
        }
    }

    pub fn create_emitter(&self, build_id: BuildId, node_id: NodeId) -> EventEmitter {
        EventEmitter::new(build_id, node_id, self.sender.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_messages_reach_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let build_id = Uuid::new_v4();
        bus.create_emitter(build_id, NodeId::from("train")).info("fitting");

        match rx.recv().await.unwrap() {
            BuildEvent::NodeMessage { node_id, message: NodeMessage::Info { message }, build_id: id, .. } => {
                assert_eq!(node_id.as_str(), "train");
                assert_eq!(message, "fitting");
                assert_eq!(id, build_id);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn detached_emitter_does_not_fail() {
        EventEmitter::detached(NodeId::from("x")).progress(50.0, None);
    }
}
