use futures::future::BoxFuture;
use serde_json::{Map, Value};

use weft_core::error::Result;
use weft_core::node_config::{NodeConfig, OutputFormat};
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::registry::NodeExecutor;

use super::render_text;

/// Terminal sink: records the input as the node's output, as JSON or text.
pub struct OutputExecutor;

impl NodeExecutor for OutputExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Output
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        _ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::Output(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };

            let value = match config.format {
                OutputFormat::Json => input,
                OutputFormat::Text => Some(Value::String(
                    input.as_ref().map(render_text).unwrap_or_default(),
                )),
            };

            let output = match config.key {
                Some(key) => {
                    let mut wrapped = Map::new();
                    wrapped.insert(key, value.unwrap_or(Value::Null));
                    Some(Value::Object(wrapped))
                }
                None => value,
            };

            Ok(NodeExecutionResult::success(output))
        })
    }
}
