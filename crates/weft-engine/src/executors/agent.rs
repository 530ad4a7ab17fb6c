use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::node_config::{AgentConfig, NodeConfig, SessionMode};
use weft_core::traits::{HeartbeatRequest, IsolatedJobSpec, SystemEventOptions};
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::registry::NodeExecutor;

use super::{is_trivial, render_text};

/// Session key of the long-lived main agent session.
pub const MAIN_SESSION_KEY: &str = "main";

/// Hands a prompt to an agent, either queued into the main session
/// (returns at once) or as a blocking isolated job.
pub struct AgentExecutor;

impl NodeExecutor for AgentExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Agent
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::Agent(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };

            match config.session {
                SessionMode::Main => run_main(node, &config, input, ctx),
                SessionMode::Isolated => run_isolated(node, config, input, ctx).await,
            }
        })
    }
}

/// Prefix the prompt with prior output when there is any.
pub fn compose_prompt(prompt: &str, prior_output: Option<&Value>) -> String {
    match prior_output {
        Some(prior) if !is_trivial(Some(prior)) => format!(
            "## Pipeline Context\n\n{}\n\n---\n\n{}",
            render_text(prior),
            prompt
        ),
        _ => prompt.to_string(),
    }
}

fn run_main(
    node: &PipelineNode,
    config: &AgentConfig,
    input: Option<Value>,
    ctx: &ExecutorContext,
) -> Result<NodeExecutionResult> {
    let queue = ctx.system_events()?;
    let waker = ctx.heartbeat()?;

    let text = compose_prompt(&config.prompt, input.as_ref());
    queue.enqueue_system_event(
        &text,
        SystemEventOptions {
            session_key: MAIN_SESSION_KEY.to_string(),
            context_key: format!("pipeline:{}:{}", ctx.pipeline_id, node.id),
        },
    );
    waker.request_heartbeat_now(HeartbeatRequest {
        reason: format!("pipeline:{}", ctx.pipeline_id),
    });

    info!(node_id = %node.id, chars = text.len(), "Agent prompt queued to main session");
    Ok(
        NodeExecutionResult::success(Some(json!({ "mode": "main", "queued": true })))
            .with_session_key(MAIN_SESSION_KEY),
    )
}

async fn run_isolated(
    node: &PipelineNode,
    config: AgentConfig,
    input: Option<Value>,
    ctx: &ExecutorContext,
) -> Result<NodeExecutionResult> {
    let runner = ctx.isolated_runner()?;
    let timeout_secs = config
        .timeout
        .unwrap_or(ctx.settings.isolated_timeout_secs);

    let spec = IsolatedJobSpec {
        job_id: format!("pipeline-{}-{}", ctx.run_id, node.id),
        name: node.label.clone(),
        prompt: config.prompt,
        model: config.model,
        tools: config.tools,
        credentials: config.credentials,
        prior_output: input.filter(|v| !is_trivial(Some(v))),
        timeout_secs,
    };

    info!(node_id = %node.id, job_id = %spec.job_id, timeout_secs, "Starting isolated agent job");

    let raw = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        runner.run_isolated_job(spec),
    )
    .await
    .map_err(|_| WeftError::Timeout {
        what: format!("Isolated agent job for node '{}'", node.id),
        secs: timeout_secs,
    })??;

    let result = normalize_isolated_result(raw);
    if let Some(ref error) = result.error {
        warn!(node_id = %node.id, error = %error, "Isolated agent job failed");
    }
    Ok(result)
}

/// Map the runner's result to a node result.
///
/// `status == "ok"` is success; the output is read from `outputText`,
/// `output` or `summary`, else the whole result. Any other status fails with
/// `error`, `message`, or a message built from the status. A session id
/// under `sessionKey`, `session_key` or `sessionId` is kept.
pub fn normalize_isolated_result(raw: Value) -> NodeExecutionResult {
    let status = raw
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let session_key = ["sessionKey", "session_key", "sessionId"]
        .iter()
        .find_map(|k| raw.get(*k).and_then(Value::as_str))
        .map(String::from);

    let result = if status == "ok" {
        let output = ["outputText", "output", "summary"]
            .iter()
            .find_map(|k| raw.get(*k).filter(|v| !v.is_null()).cloned())
            .unwrap_or(raw);
        NodeExecutionResult::success(Some(output))
    } else {
        let error = ["error", "message"]
            .iter()
            .find_map(|k| error_text(raw.get(*k)?))
            .unwrap_or_else(|| format!("Isolated agent job finished with status '{}'", status));
        NodeExecutionResult::failure(error)
    };

    match session_key {
        Some(key) => result.with_session_key(key),
        None => result,
    }
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(String::from),
        _ => None,
    }
}
