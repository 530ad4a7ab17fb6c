use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use weft_core::error::Result;
use weft_core::event::PipelineEvent;
use weft_core::types::{NodeExecutionResult, NodeRunStatus, NodeType, PipelineNode, RunStatus};
use weft_engine::{ExecutorContext, ExecutorRegistry, NodeExecutor, PipelineRunner};
use weft_test_utils::{
    agent, branch, condition, edge, isolated_agent, node, output, pipeline, trigger,
    EventRecorder, MockGateway, MockIsolatedRunner, RecordingQueue, StaticApproval,
};

fn context(queue: &Arc<RecordingQueue>) -> ExecutorContext {
    ExecutorContext::default()
        .with_system_events(queue.clone())
        .with_heartbeat(queue.clone())
}

fn status_of(run: &weft_core::types::PipelineRun, id: &str) -> Option<NodeRunStatus> {
    run.result_for(id).map(|r| r.status)
}

fn template(id: &str, text: &str) -> PipelineNode {
    node(id, "code").with_config(json!({ "template": text }))
}

#[tokio::test]
async fn cron_agent_output_runs_end_to_end() {
    let queue = Arc::new(RecordingQueue::default());
    let p = pipeline(
        vec![node("A", "cron"), agent("B", "Summarize today's issues"), output("C")],
        vec![edge("A", "B"), edge("B", "C")],
    );
    let recorder = EventRecorder::default();

    let run = PipelineRunner::with_builtins()
        .execute(&p, &context(&queue), &recorder)
        .await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.error.is_none());
    assert!(run.completed_at_ms.is_some());

    let ids: Vec<_> = run.node_results.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(ids, vec!["B", "C"]);
    assert!(run.node_results.iter().all(|r| r.status == NodeRunStatus::Success));

    assert_eq!(
        recorder.kinds(),
        vec!["node_started", "node_completed", "node_started", "node_completed", "run_completed"]
    );
    assert!(recorder.nodes_with("node_skipped").is_empty());

    // Single upstream: B's output reaches C unwrapped.
    assert_eq!(
        run.result_for("C").unwrap().output,
        Some(json!({ "mode": "main", "queued": true }))
    );

    // The trigger produced nothing, so the prompt carries no context block.
    let events = queue.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "Summarize today's issues");
    assert_eq!(events[0].1.context_key, "pipeline:test-pipeline:B");
}

#[tokio::test]
async fn node_events_carry_run_identity_and_session() {
    let queue = Arc::new(RecordingQueue::default());
    let p = pipeline(
        vec![trigger("t"), agent("a", "go")],
        vec![edge("t", "a")],
    );
    let recorder = EventRecorder::default();
    let run = PipelineRunner::with_builtins()
        .execute(&p, &context(&queue), &recorder)
        .await;

    for event in recorder.events() {
        assert_eq!(event.run_id(), run.id);
    }
    match &recorder.events()[1] {
        PipelineEvent::NodeCompleted { session_key, pipeline_id, .. } => {
            assert_eq!(session_key.as_deref(), Some("main"));
            assert_eq!(pipeline_id, "test-pipeline");
        }
        other => panic!("unexpected {:?}", other),
    }
    match recorder.events().last() {
        Some(PipelineEvent::RunCompleted { status, .. }) => assert_eq!(*status, RunStatus::Success),
        other => panic!("unexpected {:?}", other),
    }
}

fn branching_pipeline(expression: &str) -> weft_core::types::Pipeline {
    pipeline(
        vec![
            trigger("t"),
            condition("c", expression),
            output("y1"),
            output("y2"),
            output("y3"),
            output("n1"),
            output("n2"),
            output("n3"),
        ],
        vec![
            edge("t", "c"),
            branch("c", "true", "y1"),
            edge("y1", "y2"),
            edge("y2", "y3"),
            branch("c", "false", "n1"),
            edge("n1", "n2"),
            edge("n2", "n3"),
        ],
    )
}

#[tokio::test]
async fn true_branch_skips_false_subtree_at_every_depth() {
    let recorder = EventRecorder::default();
    let run = PipelineRunner::with_builtins()
        .execute(&branching_pipeline("true"), &ExecutorContext::default(), &recorder)
        .await;

    assert_eq!(run.status, RunStatus::Success);
    for id in ["y1", "y2", "y3"] {
        assert_eq!(status_of(&run, id), Some(NodeRunStatus::Success), "{}", id);
    }
    for id in ["n1", "n2", "n3"] {
        let result = run.result_for(id).unwrap();
        assert_eq!(result.status, NodeRunStatus::Skipped, "{}", id);
        assert_eq!(result.error.as_deref(), Some("branch not taken"));
    }
    assert_eq!(recorder.nodes_with("node_skipped"), vec!["n1", "n2", "n3"]);
}

#[tokio::test]
async fn false_branch_skips_true_subtree_at_every_depth() {
    let run = PipelineRunner::with_builtins()
        .execute(&branching_pipeline("false"), &ExecutorContext::default(), &EventRecorder::default())
        .await;

    for id in ["y1", "y2", "y3"] {
        assert_eq!(status_of(&run, id), Some(NodeRunStatus::Skipped), "{}", id);
    }
    for id in ["n1", "n2", "n3"] {
        assert_eq!(status_of(&run, id), Some(NodeRunStatus::Success), "{}", id);
    }
}

#[tokio::test]
async fn condition_reads_upstream_output() {
    let p = pipeline(
        vec![
            trigger("t"),
            node("data", "code").with_config(json!({ "expression": "42" })),
            condition("big", "input > 10"),
            output("yes"),
            output("no"),
        ],
        vec![
            edge("t", "data"),
            edge("data", "big"),
            branch("big", "true", "yes"),
            branch("big", "false", "no"),
        ],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &EventRecorder::default())
        .await;
    assert_eq!(status_of(&run, "yes"), Some(NodeRunStatus::Success));
    assert_eq!(status_of(&run, "no"), Some(NodeRunStatus::Skipped));
    assert_eq!(run.result_for("yes").unwrap().output, Some(json!(42)));
}

#[tokio::test]
async fn failure_in_chain_skips_the_rest() {
    // b has no usable config and fails.
    let p = pipeline(
        vec![trigger("t"), output("a"), node("b", "code"), output("c"), output("d")],
        vec![edge("t", "a"), edge("a", "b"), edge("b", "c"), edge("c", "d")],
    );
    let recorder = EventRecorder::default();
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &recorder)
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(status_of(&run, "a"), Some(NodeRunStatus::Success));
    assert_eq!(status_of(&run, "b"), Some(NodeRunStatus::Failed));
    for id in ["c", "d"] {
        let result = run.result_for(id).unwrap();
        assert_eq!(result.status, NodeRunStatus::Skipped);
        assert_eq!(result.error.as_deref(), Some("upstream failure"));
    }

    let b_error = run.result_for("b").unwrap().error.clone();
    assert!(b_error.as_deref().unwrap().contains("Invalid config for node 'b'"));
    assert_eq!(run.error, b_error);

    assert_eq!(recorder.nodes_with("node_failed"), vec!["b"]);
    assert_eq!(recorder.nodes_with("node_skipped"), vec!["c", "d"]);
    match recorder.events().last() {
        Some(PipelineEvent::RunCompleted { status, error, .. }) => {
            assert_eq!(*status, RunStatus::Failed);
            assert_eq!(*error, b_error);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn run_error_is_first_failure_only() {
    let p = pipeline(
        vec![trigger("t"), node("first", "code"), node("second", "app")],
        vec![edge("t", "first"), edge("t", "second")],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &EventRecorder::default())
        .await;

    assert_eq!(status_of(&run, "first"), Some(NodeRunStatus::Failed));
    assert_eq!(status_of(&run, "second"), Some(NodeRunStatus::Failed));
    assert!(run.error.unwrap().contains("'first'"));
}

#[tokio::test]
async fn failure_leaves_independent_branches_running() {
    let p = pipeline(
        vec![trigger("t"), node("bad", "code"), output("after_bad"), output("ok")],
        vec![edge("t", "bad"), edge("bad", "after_bad"), edge("t", "ok")],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &EventRecorder::default())
        .await;
    assert_eq!(status_of(&run, "after_bad"), Some(NodeRunStatus::Skipped));
    assert_eq!(status_of(&run, "ok"), Some(NodeRunStatus::Success));
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn cycle_fails_run_without_executing_nodes() {
    let p = pipeline(
        vec![trigger("t"), output("a"), output("b")],
        vec![edge("t", "a"), edge("a", "b"), edge("b", "a")],
    );
    let recorder = EventRecorder::default();
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &recorder)
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("cycle"));
    assert!(run.node_results.is_empty());
    assert_eq!(recorder.kinds(), vec!["run_completed"]);
}

#[tokio::test]
async fn fan_in_merges_defined_outputs_by_upstream_id() {
    let p = pipeline(
        vec![
            trigger("t"),
            template("x", "from x"),
            template("y", "from y"),
            // No input, json format: produces no output.
            output("z"),
            output("merge"),
        ],
        vec![
            edge("t", "x"),
            edge("t", "y"),
            edge("t", "z"),
            edge("x", "merge"),
            edge("y", "merge"),
            edge("z", "merge"),
        ],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &EventRecorder::default())
        .await;

    assert_eq!(run.result_for("z").unwrap().output, None);
    assert_eq!(
        run.result_for("merge").unwrap().output,
        Some(json!({ "x": "from x", "y": "from y" }))
    );
}

#[tokio::test]
async fn fan_in_with_no_outputs_is_no_input() {
    let p = pipeline(
        vec![
            trigger("t"),
            output("a"),
            output("b"),
            node("merge", "output").with_config(json!({ "key": "merged" })),
        ],
        vec![edge("t", "a"), edge("t", "b"), edge("a", "merge"), edge("b", "merge")],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &EventRecorder::default())
        .await;

    // Absent input, not an empty map.
    assert_eq!(
        run.result_for("merge").unwrap().output,
        Some(json!({ "merged": null }))
    );
}

#[tokio::test]
async fn unregistered_type_is_skipped_without_cascade() {
    let p = pipeline(
        vec![trigger("t"), node("u", "vault_sync"), output("o")],
        vec![edge("t", "u"), edge("u", "o")],
    );
    let recorder = EventRecorder::default();
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &recorder)
        .await;

    let skipped = run.result_for("u").unwrap();
    assert_eq!(skipped.status, NodeRunStatus::Skipped);
    assert!(skipped.error.as_deref().unwrap().contains("vault_sync"));
    assert_eq!(status_of(&run, "o"), Some(NodeRunStatus::Success));
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(recorder.nodes_with("node_started"), vec!["o"]);
}

#[tokio::test(start_paused = true)]
async fn isolated_agent_timeout_fails_node() {
    let runner = Arc::new(MockIsolatedRunner::hanging());
    let ctx = ExecutorContext::default().with_isolated_runner(runner);
    let slow = PipelineNode::new("slow", "agent")
        .with_config(json!({ "prompt": "p", "session": "isolated", "timeout": 2 }));
    let p = pipeline(
        vec![trigger("t"), slow, output("after")],
        vec![edge("t", "slow"), edge("slow", "after")],
    );

    let run = PipelineRunner::with_builtins()
        .execute(&p, &ctx, &EventRecorder::default())
        .await;

    let failed = run.result_for("slow").unwrap();
    assert_eq!(failed.status, NodeRunStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("timed out after 2s"));
    assert_eq!(status_of(&run, "after"), Some(NodeRunStatus::Skipped));
}

#[tokio::test]
async fn isolated_agent_output_flows_downstream() {
    let runner = Arc::new(MockIsolatedRunner::ok("3 findings"));
    let ctx = ExecutorContext::default().with_isolated_runner(runner.clone());
    let p = pipeline(
        vec![trigger("t"), template("seed", "look at repo"), isolated_agent("research", "Research"), output("o")],
        vec![edge("t", "seed"), edge("seed", "research"), edge("research", "o")],
    );

    let run = PipelineRunner::with_builtins()
        .execute(&p, &ctx, &EventRecorder::default())
        .await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.result_for("o").unwrap().output, Some(json!("3 findings")));
    let spec = &runner.specs()[0];
    assert_eq!(spec.prior_output, Some(json!("look at repo")));
    assert_eq!(spec.job_id, format!("pipeline-{}-research", run.id));
}

#[tokio::test]
async fn missing_capability_fails_only_that_node() {
    let p = pipeline(
        vec![trigger("t"), agent("a", "hello"), output("b")],
        vec![edge("t", "a"), edge("t", "b")],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &EventRecorder::default())
        .await;
    assert_eq!(status_of(&run, "a"), Some(NodeRunStatus::Failed));
    assert!(run.result_for("a").unwrap().error.as_deref().unwrap().contains("Capability not available"));
    assert_eq!(status_of(&run, "b"), Some(NodeRunStatus::Success));
}

#[tokio::test]
async fn classification_routes_by_option() {
    let gateway = Arc::new(MockGateway::new().on("llm.classify", json!({ "option": "feature" })));
    let ctx = ExecutorContext::default().with_gateway(gateway);
    let triage = PipelineNode::new("triage", "condition")
        .with_config(json!({ "question": "Bug or feature?", "options": ["bug", "feature"] }));
    let p = pipeline(
        vec![trigger("t"), triage, output("bugs"), output("features")],
        vec![
            edge("t", "triage"),
            branch("triage", "bug", "bugs"),
            branch("triage", "feature", "features"),
        ],
    );

    let run = PipelineRunner::with_builtins()
        .execute(&p, &ctx, &EventRecorder::default())
        .await;
    assert_eq!(status_of(&run, "bugs"), Some(NodeRunStatus::Skipped));
    assert_eq!(status_of(&run, "features"), Some(NodeRunStatus::Success));
}

#[tokio::test]
async fn rejected_approval_takes_rejected_branch() {
    let ctx = ExecutorContext::default().with_approvals(Arc::new(StaticApproval::deny("no")));
    let p = pipeline(
        vec![trigger("t"), node("gate", "approval"), output("ship"), output("report")],
        vec![
            edge("t", "gate"),
            branch("gate", "approved", "ship"),
            branch("gate", "rejected", "report"),
        ],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ctx, &EventRecorder::default())
        .await;

    assert_eq!(status_of(&run, "ship"), Some(NodeRunStatus::Skipped));
    assert_eq!(
        run.result_for("report").unwrap().output,
        Some(json!({ "approved": false, "reason": "no" }))
    );
}

#[tokio::test]
async fn unhandled_edge_from_branching_node_is_skipped() {
    let p = pipeline(
        vec![trigger("t"), condition("c", "true"), output("taken"), output("plain")],
        vec![edge("t", "c"), branch("c", "true", "taken"), edge("c", "plain")],
    );
    let run = PipelineRunner::with_builtins()
        .execute(&p, &ExecutorContext::default(), &EventRecorder::default())
        .await;
    assert_eq!(status_of(&run, "taken"), Some(NodeRunStatus::Success));
    assert_eq!(status_of(&run, "plain"), Some(NodeRunStatus::Skipped));
}

struct Exploding;

impl NodeExecutor for Exploding {
    fn node_type(&self) -> NodeType {
        NodeType::from("exploding")
    }

    fn execute<'a>(
        &'a self,
        _node: &'a PipelineNode,
        _input: Option<Value>,
        _ctx: &'a weft_engine::ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async { explode() })
    }
}

fn explode() -> Result<NodeExecutionResult> {
    panic!("executor bug")
}

#[tokio::test]
async fn panicking_executor_does_not_abort_run() {
    let mut registry = ExecutorRegistry::with_builtins();
    registry.register(Exploding);
    let runner = PipelineRunner::new(Arc::new(registry));

    let p = pipeline(
        vec![trigger("t"), node("boom", "exploding"), output("after"), output("other")],
        vec![edge("t", "boom"), edge("boom", "after"), edge("t", "other")],
    );
    let recorder = EventRecorder::default();
    let run = runner.execute(&p, &ExecutorContext::default(), &recorder).await;

    assert_eq!(status_of(&run, "boom"), Some(NodeRunStatus::Failed));
    assert!(run.result_for("boom").unwrap().error.as_deref().unwrap().contains("executor bug"));
    assert_eq!(status_of(&run, "after"), Some(NodeRunStatus::Skipped));
    assert_eq!(status_of(&run, "other"), Some(NodeRunStatus::Success));
    assert_eq!(recorder.kinds().last(), Some(&"run_completed"));
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let runner = PipelineRunner::with_builtins();
    let ok = pipeline(
        vec![trigger("t"), template("a", "fine"), output("b")],
        vec![edge("t", "a"), edge("a", "b")],
    );
    let broken = pipeline(
        vec![trigger("t"), node("a", "code"), output("b")],
        vec![edge("t", "a"), edge("a", "b")],
    );
    let ctx = ExecutorContext::default();
    let (first, second) = (EventRecorder::default(), EventRecorder::default());

    let (run_ok, run_broken) = tokio::join!(
        runner.execute(&ok, &ctx, &first),
        runner.execute(&broken, &ctx, &second)
    );

    assert_ne!(run_ok.id, run_broken.id);
    assert_eq!(run_ok.status, RunStatus::Success);
    assert_eq!(run_broken.status, RunStatus::Failed);
    assert_eq!(run_ok.result_for("b").unwrap().output, Some(json!("fine")));
    assert!(second.events().iter().all(|e| e.run_id() == run_broken.id));
}
