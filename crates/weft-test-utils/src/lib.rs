//! Mocks of every capability trait, graph builders, and an event recorder.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use weft_core::error::{Result, WeftError};
use weft_core::event::{EventSink, PipelineEvent};
use weft_core::traits::{
    ApprovalDecision, ApprovalGate, ApprovalRequest, GatewayRpc, HeartbeatRequest, HeartbeatWaker,
    IsolatedAgentRunner, IsolatedJobSpec, Notification, Notifier, SystemEventOptions,
    SystemEventQueue,
};
use weft_core::types::{Pipeline, PipelineEdge, PipelineNode};

// ── Main session ──────────────────────────────────────────────

/// Records enqueued system events and heartbeat requests.
#[derive(Default)]
pub struct RecordingQueue {
    events: Mutex<Vec<(String, SystemEventOptions)>>,
    wakes: Mutex<Vec<HeartbeatRequest>>,
}

impl RecordingQueue {
    pub fn events(&self) -> Vec<(String, SystemEventOptions)> {
        self.events.lock().unwrap().clone()
    }

    pub fn wakes(&self) -> Vec<HeartbeatRequest> {
        self.wakes.lock().unwrap().clone()
    }
}

impl SystemEventQueue for RecordingQueue {
    fn enqueue_system_event(&self, text: &str, opts: SystemEventOptions) {
        self.events.lock().unwrap().push((text.to_string(), opts));
    }
}

impl HeartbeatWaker for RecordingQueue {
    fn request_heartbeat_now(&self, req: HeartbeatRequest) {
        self.wakes.lock().unwrap().push(req);
    }
}

// ── Isolated runner ───────────────────────────────────────────

enum RunnerBehavior {
    Return(Value),
    Fail(String),
    Hang,
}

/// Isolated agent runner with a fixed behavior.
pub struct MockIsolatedRunner {
    behavior: RunnerBehavior,
    delay: Option<Duration>,
    specs: Mutex<Vec<IsolatedJobSpec>>,
}

impl MockIsolatedRunner {
    fn with_behavior(behavior: RunnerBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            specs: Mutex::new(Vec::new()),
        }
    }

    /// Resolve every job with `result`.
    pub fn returning(result: Value) -> Self {
        Self::with_behavior(RunnerBehavior::Return(result))
    }

    /// Shorthand for an `ok` result with `outputText`.
    pub fn ok(text: &str) -> Self {
        Self::returning(json!({ "status": "ok", "outputText": text }))
    }

    /// Fail every job with a gateway error.
    pub fn failing(message: &str) -> Self {
        Self::with_behavior(RunnerBehavior::Fail(message.to_string()))
    }

    /// Never resolve.
    pub fn hanging() -> Self {
        Self::with_behavior(RunnerBehavior::Hang)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn specs(&self) -> Vec<IsolatedJobSpec> {
        self.specs.lock().unwrap().clone()
    }
}

impl IsolatedAgentRunner for MockIsolatedRunner {
    fn run_isolated_job(&self, spec: IsolatedJobSpec) -> BoxFuture<'_, Result<Value>> {
        self.specs.lock().unwrap().push(spec);
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.behavior {
                RunnerBehavior::Return(v) => Ok(v.clone()),
                RunnerBehavior::Fail(msg) => Err(WeftError::Gateway(msg.clone())),
                RunnerBehavior::Hang => futures::future::pending().await,
            }
        })
    }
}

// ── Gateway RPC ───────────────────────────────────────────────

/// Gateway answering per method; unknown methods are an error.
#[derive(Default)]
pub struct MockGateway {
    responses: HashMap<String, std::result::Result<Value, String>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, method: &str, result: Value) -> Self {
        self.responses.insert(method.to_string(), Ok(result));
        self
    }

    pub fn fail(mut self, method: &str, message: &str) -> Self {
        self.responses
            .insert(method.to_string(), Err(message.to_string()));
        self
    }

    /// Every call made, as `(method, params)`.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl GatewayRpc for MockGateway {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value>> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        Box::pin(async move {
            match self.responses.get(method) {
                Some(Ok(v)) => Ok(v.clone()),
                Some(Err(msg)) => Err(WeftError::Gateway(msg.clone())),
                None => Err(WeftError::Gateway(format!("unknown method {}", method))),
            }
        })
    }
}

// ── Approvals ─────────────────────────────────────────────────

/// Approval gate that answers every request the same way.
pub struct StaticApproval {
    decision: Option<ApprovalDecision>,
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl StaticApproval {
    pub fn approve() -> Self {
        Self::answering(Some(ApprovalDecision::Approved))
    }

    pub fn deny(reason: &str) -> Self {
        Self::answering(Some(ApprovalDecision::Denied {
            reason: reason.to_string(),
        }))
    }

    /// Never decides.
    pub fn never() -> Self {
        Self::answering(None)
    }

    fn answering(decision: Option<ApprovalDecision>) -> Self {
        Self {
            decision,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ApprovalGate for StaticApproval {
    fn request_approval(&self, req: ApprovalRequest) -> BoxFuture<'_, Result<ApprovalDecision>> {
        self.requests.lock().unwrap().push(req);
        Box::pin(async move {
            match &self.decision {
                Some(d) => Ok(d.clone()),
                None => futures::future::pending().await,
            }
        })
    }
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failure: Option<String>,
}

impl RecordingNotifier {
    pub fn failing(message: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(ref msg) = self.failure {
                return Err(WeftError::Capability {
                    capability: "notify",
                    message: msg.clone(),
                });
            }
            self.sent.lock().unwrap().push(notification);
            Ok(())
        })
    }
}

// ── Events ────────────────────────────────────────────────────

/// Event sink that keeps every event in order.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<PipelineEvent>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event kinds in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }

    /// Node ids of the events of one kind, in emission order.
    pub fn nodes_with(&self, kind: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .filter_map(|e| e.node_id().map(String::from))
            .collect()
    }
}

impl EventSink for EventRecorder {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ── Builders ──────────────────────────────────────────────────

pub fn node(id: &str, node_type: &str) -> PipelineNode {
    PipelineNode::new(id, node_type)
}

pub fn trigger(id: &str) -> PipelineNode {
    PipelineNode::new(id, "manual")
}

/// Main-session agent node.
pub fn agent(id: &str, prompt: &str) -> PipelineNode {
    PipelineNode::new(id, "agent").with_config(json!({ "prompt": prompt }))
}

pub fn isolated_agent(id: &str, prompt: &str) -> PipelineNode {
    PipelineNode::new(id, "agent").with_config(json!({ "prompt": prompt, "session": "isolated" }))
}

pub fn condition(id: &str, expression: &str) -> PipelineNode {
    PipelineNode::new(id, "condition").with_config(json!({ "expression": expression }))
}

pub fn output(id: &str) -> PipelineNode {
    PipelineNode::new(id, "output")
}

pub fn edge(source: &str, target: &str) -> PipelineEdge {
    PipelineEdge::new(source, target)
}

/// Edge leaving `source` through a named handle.
pub fn branch(source: &str, handle: &str, target: &str) -> PipelineEdge {
    PipelineEdge::new(source, target).with_handle(handle)
}

pub fn pipeline(nodes: Vec<PipelineNode>, edges: Vec<PipelineEdge>) -> Pipeline {
    Pipeline::new("test-pipeline", "Test pipeline")
        .with_nodes(nodes)
        .with_edges(edges)
}
