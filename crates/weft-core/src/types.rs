use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Node type tag.
///
/// The set is open: any string that is not one of the built-in types is kept
/// verbatim as `Other`, so pipelines authored against newer node types still
/// load (and are skipped at run time when no executor is registered).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Cron,
    Webhook,
    TaskEvent,
    Manual,
    Condition,
    Agent,
    Approval,
    Loop,
    Code,
    Notify,
    Output,
    App,
    Other(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cron => "cron",
            Self::Webhook => "webhook",
            Self::TaskEvent => "task_event",
            Self::Manual => "manual",
            Self::Condition => "condition",
            Self::Agent => "agent",
            Self::Approval => "approval",
            Self::Loop => "loop",
            Self::Code => "code",
            Self::Notify => "notify",
            Self::Output => "output",
            Self::App => "app",
            Self::Other(s) => s,
        }
    }

    /// Trigger types define when a run starts; the engine never executes them.
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            Self::Cron | Self::Webhook | Self::TaskEvent | Self::Manual
        )
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        match s {
            "cron" => Self::Cron,
            "webhook" => Self::Webhook,
            "task_event" => Self::TaskEvent,
            "manual" => Self::Manual,
            "condition" => Self::Condition,
            "agent" => Self::Agent,
            "approval" => Self::Approval,
            "loop" => Self::Loop,
            "code" => Self::Code,
            "notify" => Self::Notify,
            "output" => Self::Output,
            "app" => Self::App,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        match t {
            NodeType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UI-facing status of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub retry_count: u32,
}

/// A node in a pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub label: String,
    /// Raw config payload; its shape depends on `node_type` and is checked
    /// when the node executes.
    #[serde(default)]
    pub config: Value,
    /// Opaque UI coordinate.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub position: Value,
    #[serde(default)]
    pub state: NodeState,
}

impl PipelineNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<NodeType>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            node_type: node_type.into(),
            config: Value::Null,
            position: Value::Null,
            state: NodeState::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Which logical output of a branching node this edge follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl PipelineEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            source_handle: None,
            target_handle: None,
            condition: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        self.id = format!("{}:{}->{}", self.source, handle, self.target);
        self.source_handle = Some(handle);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    Draft,
    Active,
    Paused,
}

/// A pipeline definition. The engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<PipelineNode>,
    #[serde(default)]
    pub edges: Vec<PipelineEdge>,
    #[serde(default)]
    pub status: PipelineStatus,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    /// Opaque UI viewport state.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub viewport: Value,
}

fn default_enabled() -> bool {
    true
}

impl Pipeline {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            status: PipelineStatus::Draft,
            enabled: true,
            run_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
            viewport: Value::Null,
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<PipelineNode>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_edges(mut self, edges: Vec<PipelineEdge>) -> Self {
        self.edges = edges;
        self
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

/// Recorded outcome of one node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunNodeResult {
    pub node_id: String,
    pub status: NodeRunStatus,
    pub started_at_ms: i64,
    pub completed_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure message for failed nodes; for skipped nodes, the skip reason
    /// (`upstream failure`, `branch not taken`, or a missing executor).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One execution instance of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: String,
    pub pipeline_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub node_results: Vec<PipelineRunNodeResult>,
    pub started_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineRun {
    /// Create a fresh run record, started now.
    pub fn start(pipeline_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.into(),
            status: RunStatus::Running,
            node_results: Vec::new(),
            started_at_ms: now_ms(),
            completed_at_ms: None,
            error: None,
        }
    }

    pub fn result_for(&self, node_id: &str) -> Option<&PipelineRunNodeResult> {
        self.node_results.iter().find(|r| r.node_id == node_id)
    }

    /// Duration of a finished run, in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at_ms
            .map(|done| done.saturating_sub(self.started_at_ms).max(0) as u64)
    }
}

/// Executor-level outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Skipped,
}

/// The uniform result every node executor returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Branch the orchestrator must follow, for branching node types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_handle: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

impl NodeExecutionResult {
    pub fn success(output: Option<Value>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output,
            error: None,
            output_handle: None,
            duration_ms: 0,
            session_key: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            output: None,
            error: Some(error.into()),
            output_handle: None,
            duration_ms: 0,
            session_key: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Skipped,
            output: None,
            error: Some(reason.into()),
            output_handle: None,
            duration_ms: 0,
            session_key: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.output_handle = Some(handle.into());
        self
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_type_parsing_is_exact() {
        assert_eq!(NodeType::from("cron"), NodeType::Cron);
        assert_eq!(NodeType::from("task_event"), NodeType::TaskEvent);
        assert!(NodeType::from("manual").is_trigger());
        // No prefix or case folding against custom names.
        assert_eq!(NodeType::from("Cron"), NodeType::Other("Cron".into()));
        assert!(!NodeType::from("cron_like").is_trigger());
        assert!(!NodeType::from("agent").is_trigger());
    }

    #[test]
    fn node_deserializes_from_ui_shape() {
        let node: PipelineNode = serde_json::from_value(json!({
            "id": "b",
            "type": "agent",
            "label": "Summarize",
            "config": { "prompt": "Summarize", "session": "isolated" },
            "position": { "x": 120, "y": 40 },
            "state": { "status": "idle", "retryCount": 0 }
        }))
        .unwrap();
        assert_eq!(node.node_type, NodeType::Agent);
        assert_eq!(node.label, "Summarize");
        assert_eq!(node.position["x"], 120);
    }

    #[test]
    fn custom_node_type_survives_serialization() {
        let node = PipelineNode::new("x", "vault_sync");
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "vault_sync");
        let back: PipelineNode = serde_json::from_value(value).unwrap();
        assert_eq!(back.node_type, NodeType::Other("vault_sync".into()));
    }

    #[test]
    fn edge_uses_camel_case_handles() {
        let edge = PipelineEdge::new("cond", "yes").with_handle("true");
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["sourceHandle"], "true");
        assert!(value.get("targetHandle").is_none());
    }

    #[test]
    fn pipeline_defaults_from_minimal_json() {
        let p: Pipeline = serde_json::from_value(json!({ "id": "p1" })).unwrap();
        assert!(p.enabled);
        assert_eq!(p.status, PipelineStatus::Draft);
        assert!(p.nodes.is_empty());
    }

    #[test]
    fn run_starts_running() {
        let run = PipelineRun::start("p1");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at_ms > 0);
        assert!(run.duration_ms().is_none());
    }

    #[test]
    fn execution_result_builders() {
        let r = NodeExecutionResult::success(Some(json!(1)))
            .with_handle("true")
            .with_session_key("s-1")
            .with_duration(12);
        assert!(r.is_success());
        assert_eq!(r.output_handle.as_deref(), Some("true"));
        assert_eq!(r.session_key.as_deref(), Some("s-1"));
        assert_eq!(r.duration_ms, 12);

        let f = NodeExecutionResult::failure("boom");
        assert_eq!(f.status, ExecutionStatus::Failure);
        assert_eq!(f.error.as_deref(), Some("boom"));
    }
}
