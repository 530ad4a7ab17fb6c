//! Built-in node executors, one module per node type.

pub mod agent;
pub mod app;
pub mod approval;
pub mod code;
pub mod condition;
pub mod loop_node;
pub mod notify;
pub mod output;

use serde_json::Value;

use weft_core::error::WeftError;
use weft_core::types::PipelineNode;

/// Error for an executor handed a node whose config parsed as another type.
pub(crate) fn unexpected_config(node: &PipelineNode) -> WeftError {
    WeftError::node_config(
        &node.id,
        format!("config does not describe a '{}' node", node.node_type),
    )
}

/// True when a value carries nothing worth passing on: absent, `null`, a
/// blank string, or an empty array/object.
pub(crate) fn is_trivial(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Text rendering for prompts and messages: strings verbatim, everything
/// else as pretty-printed JSON.
pub(crate) fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
