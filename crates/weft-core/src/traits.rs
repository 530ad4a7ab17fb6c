//! Capabilities injected into node executors.
//!
//! Every capability is optional at run time. Executors that need one that is
//! absent fail the node instead of the run.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::node_config::NotifyPriority;

/// Options for a system event enqueued into an agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEventOptions {
    pub session_key: String,
    /// Groups events from the same origin, e.g. `pipeline:<id>:<node>`.
    pub context_key: String,
}

/// Fire-and-forget queue into the main agent session.
pub trait SystemEventQueue: Send + Sync + 'static {
    fn enqueue_system_event(&self, text: &str, opts: SystemEventOptions);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub reason: String,
}

/// Wake signal asking the main session to process its queue now.
pub trait HeartbeatWaker: Send + Sync + 'static {
    fn request_heartbeat_now(&self, req: HeartbeatRequest);
}

/// Job description handed to the isolated agent runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolatedJobSpec {
    pub job_id: String,
    pub name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_output: Option<Value>,
    pub timeout_secs: u64,
}

/// Runs an agent job in its own session and resolves when it finishes.
///
/// The result is returned raw: implementations differ in where they report
/// errors, and the agent executor normalizes the shape in one place.
pub trait IsolatedAgentRunner: Send + Sync + 'static {
    fn run_isolated_job(&self, spec: IsolatedJobSpec) -> BoxFuture<'_, Result<Value>>;
}

/// Generic gateway RPC.
pub trait GatewayRpc: Send + Sync + 'static {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value>>;
}

/// A request for a human decision, raised by an approval node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub run_id: String,
    pub pipeline_id: String,
    pub node_id: String,
    pub message: String,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Decision on an approval request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
}

/// Resolves approval requests. The approval executor bounds the wait.
pub trait ApprovalGate: Send + Sync + 'static {
    fn request_approval(&self, req: ApprovalRequest) -> BoxFuture<'_, Result<ApprovalDecision>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub priority: NotifyPriority,
    pub pipeline_id: String,
    pub run_id: String,
    pub node_id: String,
}

/// Delivers notifications to users.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<()>>;
}
