use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::node_config::{ClassifyConfig, ConditionConfig, NodeConfig};
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::expression::evaluate_condition;
use crate::registry::NodeExecutor;

/// Branches on a restricted expression (`"true"`/`"false"` handles) or on an
/// externally classified option. The input passes through as output.
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Condition
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::Condition(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };

            match config {
                ConditionConfig::Expression(expr) => {
                    let passed = evaluate_condition(&expr, input.as_ref())
                        .map_err(|e| WeftError::node_config(&node.id, e.to_string()))?;
                    debug!(node_id = %node.id, expression = %expr, passed, "Condition evaluated");
                    let handle = if passed { "true" } else { "false" };
                    Ok(NodeExecutionResult::success(input).with_handle(handle))
                }
                ConditionConfig::Classify(cfg) => classify(node, cfg, input, ctx).await,
            }
        })
    }
}

async fn classify(
    node: &PipelineNode,
    cfg: ClassifyConfig,
    input: Option<Value>,
    ctx: &ExecutorContext,
) -> Result<NodeExecutionResult> {
    let gateway = ctx.gateway()?;
    let params = json!({
        "question": cfg.question,
        "options": cfg.options,
        "input": input,
        "model": cfg.model,
    });

    let response = gateway.call(&ctx.settings.classify_method, params).await?;
    let Some(option) = response.get("option").and_then(Value::as_str) else {
        return Ok(NodeExecutionResult::failure(
            "Classifier response did not contain an `option`",
        ));
    };

    if !cfg.options.iter().any(|o| o == option) {
        return Ok(NodeExecutionResult::failure(format!(
            "Classifier chose '{}', which is not one of: {}",
            option,
            cfg.options.join(", ")
        )));
    }

    debug!(node_id = %node.id, option, "Condition classified");
    Ok(NodeExecutionResult::success(input).with_handle(option))
}
