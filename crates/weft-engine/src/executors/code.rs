use futures::future::BoxFuture;
use serde_json::{Map, Value};

use weft_core::error::{Result, WeftError};
use weft_core::node_config::{CodeConfig, NodeConfig};
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::expression::{evaluate_value, qualify_path, render_template, resolve_path};
use crate::registry::NodeExecutor;

/// Data transforms over the input: template rendering, restricted
/// expressions and field projection. Never runs user code.
pub struct CodeExecutor;

impl NodeExecutor for CodeExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Code
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        _ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::Code(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };

            let output = match config {
                CodeConfig::Template(template) => {
                    Value::String(render_template(&template, input.as_ref()))
                }
                CodeConfig::Expression(expr) => evaluate_value(&expr, input.as_ref())
                    .map_err(|e| WeftError::node_config(&node.id, e.to_string()))?,
                CodeConfig::Fields(fields) => project(node, &fields, input.as_ref())?,
            };

            Ok(NodeExecutionResult::success(Some(output)))
        })
    }
}

/// Pick the named fields (dotted paths allowed) out of an object input.
/// Missing fields are omitted.
fn project(node: &PipelineNode, fields: &[String], input: Option<&Value>) -> Result<Value> {
    match input {
        Some(Value::Object(_)) => {}
        None | Some(Value::Null) => return Ok(Value::Object(Map::new())),
        Some(_) => {
            return Err(WeftError::node_config(
                &node.id,
                "`fields` needs an object input",
            ))
        }
    }

    let projected: Map<String, Value> = fields
        .iter()
        .filter_map(|field| {
            resolve_path(&qualify_path(field), input).map(|v| (field.clone(), v.clone()))
        })
        .collect();
    Ok(Value::Object(projected))
}
