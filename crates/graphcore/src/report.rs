use crate::events::BuildId;
use crate::{ExecutionError, NodeId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// State of a node during one build.
///
/// Valid transitions:
/// - `Pending` -> `Skipped` | `Running` | `Blocked`
/// - `Running` -> `Succeeded` | `Failed`
///
/// `Skipped`, `Succeeded`, `Failed` and `Blocked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Skipped,
    Succeeded,
    Failed,
    Blocked,
}

impl NodeState {
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, Skipped) | (Pending, Running) | (Pending, Blocked) | (Running, Succeeded) | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeState::Pending | NodeState::Running)
    }

    /// Outputs are available to downstream nodes.
    pub fn is_ok(self) -> bool {
        matches!(self, NodeState::Skipped | NodeState::Succeeded)
    }
}

/// What happened to one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    pub node_id: NodeId,
    pub state: NodeState,
    pub reason: String,
    pub fingerprint: Option<String>,
    pub duration_ms: u64,
}

/// Result of a whole build, nodes listed in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub build_id: BuildId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<NodeOutcome>,
    #[serde(skip)]
    pub errors: Vec<ExecutionError>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.state.is_ok())
    }

    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.node_id.as_str() == node_id)
    }

    pub fn state_of(&self, node_id: &str) -> Option<NodeState> {
        self.outcome(node_id).map(|o| o.state)
    }

    fn in_state(&self, state: NodeState) -> Vec<&NodeId> {
        self.outcomes
            .iter()
            .filter(|o| o.state == state)
            .map(|o| &o.node_id)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&NodeId> {
        self.in_state(NodeState::Succeeded)
    }

    pub fn skipped(&self) -> Vec<&NodeId> {
        self.in_state(NodeState::Skipped)
    }

    pub fn failed(&self) -> Vec<&NodeId> {
        self.in_state(NodeState::Failed)
    }

    pub fn blocked(&self) -> Vec<&NodeId> {
        self.in_state(NodeState::Blocked)
    }

    /// First failure in execution order.
    pub fn first_failed(&self) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.state == NodeState::Failed)
    }

    pub fn summary(&self) -> String {
        match self.first_failed() {
            Some(first) => format!(
                "node '{}' failed ({}); blocked: [{}]",
                first.node_id,
                first.reason,
                self.blocked()
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            None => format!(
                "{} succeeded, {} skipped",
                self.succeeded().len(),
                self.skipped().len()
            ),
        }
    }
}
