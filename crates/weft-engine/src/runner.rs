use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use weft_core::event::{EventSink, PipelineEvent};
use weft_core::types::{
    now_ms, ExecutionStatus, NodeExecutionResult, NodeRunStatus, Pipeline, PipelineEdge,
    PipelineNode, PipelineRun, PipelineRunNodeResult, RunStatus,
};

use crate::context::ExecutorContext;
use crate::graph::{descendants, topological_sort, upstream_nodes};
use crate::registry::{execute_guarded, ExecutorRegistry};

pub const UPSTREAM_FAILURE: &str = "upstream failure";
pub const BRANCH_NOT_TAKEN: &str = "branch not taken";

/// Walks a pipeline in topological order, one node at a time.
///
/// All per-run state (outputs, skip set) lives inside a single `execute`
/// call, so one runner can drive any number of concurrent runs.
pub struct PipelineRunner {
    registry: Arc<ExecutorRegistry>,
}

impl PipelineRunner {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self { registry }
    }

    pub fn with_builtins() -> Self {
        Self::new(Arc::new(ExecutorRegistry::with_builtins()))
    }

    /// Execute a pipeline as a fresh run.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        ctx: &ExecutorContext,
        sink: &dyn EventSink,
    ) -> PipelineRun {
        self.execute_run(pipeline, PipelineRun::start(&pipeline.id), ctx, sink)
            .await
    }

    /// Execute a pipeline into a caller-created run record.
    pub async fn execute_run(
        &self,
        pipeline: &Pipeline,
        run: PipelineRun,
        ctx: &ExecutorContext,
        sink: &dyn EventSink,
    ) -> PipelineRun {
        let ctx = ctx.for_run(&run.id, &pipeline.id);
        let mut walk = RunWalk {
            run,
            edges: &pipeline.edges,
            sink,
            outputs: HashMap::new(),
            skipped: HashMap::new(),
        };

        info!(run_id = %walk.run.id, pipeline_id = %pipeline.id, nodes = pipeline.nodes.len(), "Pipeline run started");

        let order = match topological_sort(&pipeline.nodes, &pipeline.edges) {
            Ok(order) => order,
            Err(e) => {
                error!(run_id = %walk.run.id, pipeline_id = %pipeline.id, error = %e, "Pipeline cannot be ordered");
                walk.run.status = RunStatus::Failed;
                walk.run.error = Some(e.to_string());
                return walk.finish();
            }
        };

        for node in order {
            if node.node_type.is_trigger() {
                debug!(node_id = %node.id, node_type = %node.node_type, "Trigger node, not executed");
                continue;
            }

            if let Some(reason) = walk.skipped.get(node.id.as_str()).copied() {
                walk.record_skip(node, reason.to_string());
                continue;
            }

            let input = walk.gather_input(node);

            let Some(executor) = self.registry.get(&node.node_type) else {
                warn!(node_id = %node.id, node_type = %node.node_type, "No executor registered");
                walk.record_skip(
                    node,
                    format!("No executor registered for node type '{}'", node.node_type),
                );
                continue;
            };

            let started_at = now_ms();
            walk.emit(PipelineEvent::NodeStarted {
                run_id: walk.run.id.clone(),
                pipeline_id: walk.run.pipeline_id.clone(),
                node_id: node.id.clone(),
                node_type: node.node_type.to_string(),
                timestamp: started_at,
            });

            let result = execute_guarded(executor.as_ref(), node, input, &ctx).await;

            walk.record_result(node, started_at, result);
        }

        walk.finish()
    }
}

/// State of one run while it is being walked.
struct RunWalk<'a> {
    run: PipelineRun,
    edges: &'a [PipelineEdge],
    sink: &'a dyn EventSink,
    outputs: HashMap<&'a str, Value>,
    /// Nodes that must not execute, with the reason. First reason wins.
    skipped: HashMap<&'a str, &'static str>,
}

impl<'a> RunWalk<'a> {
    fn emit(&self, event: PipelineEvent) {
        self.sink.emit(event);
    }

    /// No upstream: no input. One upstream: its output as-is. Several: an
    /// object keyed by upstream id over those that produced output, or no
    /// input when none did.
    fn gather_input(&self, node: &PipelineNode) -> Option<Value> {
        let upstream = upstream_nodes(&node.id, self.edges);
        match upstream.as_slice() {
            [] => None,
            [single] => self.outputs.get(single).cloned(),
            many => {
                let merged: Map<String, Value> = many
                    .iter()
                    .filter_map(|id| self.outputs.get(id).map(|v| (id.to_string(), v.clone())))
                    .collect();
                (!merged.is_empty()).then_some(Value::Object(merged))
            }
        }
    }

    fn mark_skipped(&mut self, targets: impl IntoIterator<Item = &'a str>, reason: &'static str) {
        for target in targets {
            self.skipped.entry(target).or_insert(reason);
        }
    }

    fn record_skip(&mut self, node: &PipelineNode, reason: String) {
        let now = now_ms();
        debug!(node_id = %node.id, reason = %reason, "Node skipped");
        self.run.node_results.push(PipelineRunNodeResult {
            node_id: node.id.clone(),
            status: NodeRunStatus::Skipped,
            started_at_ms: now,
            completed_at_ms: now,
            output: None,
            error: Some(reason.clone()),
        });
        self.emit(PipelineEvent::NodeSkipped {
            run_id: self.run.id.clone(),
            pipeline_id: self.run.pipeline_id.clone(),
            node_id: node.id.clone(),
            timestamp: now,
            reason,
        });
    }

    fn record_result(&mut self, node: &'a PipelineNode, started_at: i64, result: NodeExecutionResult) {
        let completed_at = now_ms();
        let NodeExecutionResult {
            status,
            output,
            error,
            output_handle,
            duration_ms,
            session_key,
        } = result;

        match status {
            ExecutionStatus::Success => {
                info!(node_id = %node.id, duration_ms, "Node completed");
                self.emit(PipelineEvent::NodeCompleted {
                    run_id: self.run.id.clone(),
                    pipeline_id: self.run.pipeline_id.clone(),
                    node_id: node.id.clone(),
                    timestamp: completed_at,
                    output: output.clone(),
                    duration_ms,
                    session_key,
                });
                self.push_result(node, NodeRunStatus::Success, started_at, completed_at, output.clone(), None);
                if let Some(value) = output {
                    self.outputs.insert(node.id.as_str(), value);
                }
            }
            ExecutionStatus::Failure => {
                let message = error.unwrap_or_else(|| "Node failed".to_string());
                warn!(node_id = %node.id, duration_ms, error = %message, "Node failed");
                self.emit(PipelineEvent::NodeFailed {
                    run_id: self.run.id.clone(),
                    pipeline_id: self.run.pipeline_id.clone(),
                    node_id: node.id.clone(),
                    timestamp: completed_at,
                    error: message.clone(),
                    duration_ms,
                });
                self.push_result(node, NodeRunStatus::Failed, started_at, completed_at, None, Some(message));

                let downstream: Vec<&'a str> = descendants(node.id.as_str(), self.edges)
                    .into_iter()
                    .skip(1)
                    .collect();
                self.mark_skipped(downstream, UPSTREAM_FAILURE);
            }
            ExecutionStatus::Skipped => {
                let reason = error.unwrap_or_else(|| "skipped by executor".to_string());
                self.push_result(node, NodeRunStatus::Skipped, started_at, completed_at, None, Some(reason.clone()));
                self.emit(PipelineEvent::NodeSkipped {
                    run_id: self.run.id.clone(),
                    pipeline_id: self.run.pipeline_id.clone(),
                    node_id: node.id.clone(),
                    timestamp: completed_at,
                    reason,
                });
            }
        }

        if let (Some(handle), ExecutionStatus::Success) = (output_handle, status) {
            self.skip_untaken_branches(node, &handle);
        }
    }

    /// Skip the subtree behind every outgoing edge not labelled `handle`.
    fn skip_untaken_branches(&mut self, node: &PipelineNode, handle: &str) {
        let edges = self.edges;
        let untaken: Vec<&'a str> = edges
            .iter()
            .filter(|e| e.source == node.id && e.source_handle.as_deref() != Some(handle))
            .flat_map(|e| descendants(e.target.as_str(), edges))
            .collect();
        debug!(node_id = %node.id, handle, skipped = untaken.len(), "Branch selected");
        self.mark_skipped(untaken, BRANCH_NOT_TAKEN);
    }

    fn push_result(
        &mut self,
        node: &PipelineNode,
        status: NodeRunStatus,
        started_at_ms: i64,
        completed_at_ms: i64,
        output: Option<Value>,
        error: Option<String>,
    ) {
        self.run.node_results.push(PipelineRunNodeResult {
            node_id: node.id.clone(),
            status,
            started_at_ms,
            completed_at_ms,
            output,
            error,
        });
    }

    fn finish(mut self) -> PipelineRun {
        if self.run.status == RunStatus::Running {
            let first_failure = self
                .run
                .node_results
                .iter()
                .find(|r| r.status == NodeRunStatus::Failed);
            match first_failure {
                Some(failed) => {
                    self.run.error = failed.error.clone();
                    self.run.status = RunStatus::Failed;
                }
                None => self.run.status = RunStatus::Success,
            }
        }

        let completed_at = now_ms();
        self.run.completed_at_ms = Some(completed_at);
        let duration_ms = self.run.duration_ms().unwrap_or(0);

        info!(
            run_id = %self.run.id,
            pipeline_id = %self.run.pipeline_id,
            status = ?self.run.status,
            duration_ms,
            "Pipeline run completed"
        );

        self.emit(PipelineEvent::RunCompleted {
            run_id: self.run.id.clone(),
            pipeline_id: self.run.pipeline_id.clone(),
            timestamp: completed_at,
            status: self.run.status,
            duration_ms,
            error: self.run.error.clone(),
        });
        self.run
    }
}
