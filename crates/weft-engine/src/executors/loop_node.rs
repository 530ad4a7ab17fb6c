use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::node_config::NodeConfig;
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::expression::{qualify_path, resolve_path};
use crate::registry::NodeExecutor;

pub const ITEMS_HANDLE: &str = "items";
pub const EMPTY_HANDLE: &str = "empty";

/// Resolves a collection from the input and emits it (bounded) as one
/// output, branching on whether it is empty.
pub struct LoopExecutor;

impl NodeExecutor for LoopExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Loop
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::Loop(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };
            let path = qualify_path(config.items.as_deref().unwrap_or("input"));
            let max_items = config.max_items.unwrap_or(ctx.settings.max_loop_items);

            let mut items = match resolve_path(&path, input.as_ref()) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(other) => {
                    return Err(WeftError::node_config(
                        &node.id,
                        format!("'{}' is not an array (found {})", path, kind_of(other)),
                    ))
                }
            };

            let total = items.len();
            let truncated = total > max_items;
            items.truncate(max_items);
            debug!(node_id = %node.id, total, emitted = items.len(), "Loop items resolved");

            let handle = if items.is_empty() {
                EMPTY_HANDLE
            } else {
                ITEMS_HANDLE
            };
            Ok(NodeExecutionResult::success(Some(json!({
                "items": items,
                "count": items.len(),
                "total": total,
                "truncated": truncated,
            })))
            .with_handle(handle))
        })
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
