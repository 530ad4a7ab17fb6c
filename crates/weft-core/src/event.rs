use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RunStatus;

/// Run progress event, delivered in order while a pipeline executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    NodeStarted {
        run_id: String,
        pipeline_id: String,
        node_id: String,
        node_type: String,
        timestamp: i64,
    },
    NodeCompleted {
        run_id: String,
        pipeline_id: String,
        node_id: String,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
    },
    NodeFailed {
        run_id: String,
        pipeline_id: String,
        node_id: String,
        timestamp: i64,
        error: String,
        duration_ms: u64,
    },
    NodeSkipped {
        run_id: String,
        pipeline_id: String,
        node_id: String,
        timestamp: i64,
        reason: String,
    },
    /// Reserved for streamed agent output; the DAG walk does not emit it.
    AgentOutput {
        run_id: String,
        pipeline_id: String,
        node_id: String,
        timestamp: i64,
        text: String,
    },
    RunCompleted {
        run_id: String,
        pipeline_id: String,
        timestamp: i64,
        status: RunStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl PipelineEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeStarted { .. } => "node_started",
            Self::NodeCompleted { .. } => "node_completed",
            Self::NodeFailed { .. } => "node_failed",
            Self::NodeSkipped { .. } => "node_skipped",
            Self::AgentOutput { .. } => "agent_output",
            Self::RunCompleted { .. } => "run_completed",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::NodeSkipped { run_id, .. }
            | Self::AgentOutput { run_id, .. }
            | Self::RunCompleted { run_id, .. } => run_id,
        }
    }

    /// Node the event refers to; `None` for run-level events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id, .. }
            | Self::AgentOutput { node_id, .. } => Some(node_id),
            Self::RunCompleted { .. } => None,
        }
    }
}

/// Receiver of run progress events. Called synchronously, in order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

impl<F> EventSink for F
where
    F: Fn(PipelineEvent) + Send + Sync,
{
    fn emit(&self, event: PipelineEvent) {
        self(event)
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: PipelineEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: PipelineEvent) {
        self.publish(event);
    }
}
