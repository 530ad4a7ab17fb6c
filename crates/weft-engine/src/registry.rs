use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use weft_core::error::Result;
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::executors;

/// Executes one node type.
///
/// Implementations may return `Err`; the registry converts it (and any panic)
/// into a failed `NodeExecutionResult`.
pub trait NodeExecutor: Send + Sync + 'static {
    fn node_type(&self) -> NodeType;

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>>;
}

/// Registry of node executors, keyed by node type.
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor, replacing any previous one for the same type.
    pub fn register(&mut self, executor: impl NodeExecutor) {
        self.executors
            .insert(executor.node_type(), Arc::new(executor));
    }

    pub fn unregister(&mut self, node_type: &NodeType) -> bool {
        self.executors.remove(node_type).is_some()
    }

    pub fn get(&self, node_type: &NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    /// Registered node types, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Run the executor for `node.node_type`, or `None` when none is registered.
    pub async fn execute(
        &self,
        node: &PipelineNode,
        input: Option<Value>,
        ctx: &ExecutorContext,
    ) -> Option<NodeExecutionResult> {
        let executor = self.get(&node.node_type)?;
        Some(execute_guarded(executor.as_ref(), node, input, ctx).await)
    }

    /// Create a registry with every built-in executor registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(executors::condition::ConditionExecutor);
        registry.register(executors::agent::AgentExecutor);
        registry.register(executors::approval::ApprovalExecutor);
        registry.register(executors::loop_node::LoopExecutor);
        registry.register(executors::code::CodeExecutor);
        registry.register(executors::notify::NotifyExecutor);
        registry.register(executors::output::OutputExecutor);
        registry.register(executors::app::AppExecutor);
        registry
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one executor. Always returns a result: errors and panics become
/// failures, and `duration_ms` is set.
pub async fn execute_guarded(
    executor: &dyn NodeExecutor,
    node: &PipelineNode,
    input: Option<Value>,
    ctx: &ExecutorContext,
) -> NodeExecutionResult {
    let start = Instant::now();

    let outcome = AssertUnwindSafe(async { executor.execute(node, input, ctx).await })
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(node_id = %node.id, node_type = %node.node_type, error = %e, "Node executor returned an error");
            NodeExecutionResult::failure(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(node_id = %node.id, node_type = %node.node_type, panic = %message, "Node executor panicked");
            NodeExecutionResult::failure(format!("Executor panicked: {}", message))
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    debug!(node_id = %node.id, status = ?result.status, elapsed_ms, "Node executor finished");
    result.with_duration(elapsed_ms)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
