use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use weft_core::error::{Result, WeftError};
use weft_core::node_config::NodeConfig;
use weft_core::traits::{ApprovalDecision, ApprovalRequest};
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::expression::render_template;
use crate::registry::NodeExecutor;

pub const APPROVED_HANDLE: &str = "approved";
pub const REJECTED_HANDLE: &str = "rejected";

/// Waits for a human decision and branches on it.
pub struct ApprovalExecutor;

impl NodeExecutor for ApprovalExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Approval
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::Approval(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };
            let gate = ctx.approvals()?;
            let timeout_secs = config
                .timeout
                .unwrap_or(ctx.settings.approval_timeout_secs);

            let message = match config.message {
                Some(template) => render_template(&template, input.as_ref()),
                None => format!("Approve pipeline step '{}'?", node.label),
            };

            let request = ApprovalRequest {
                id: Uuid::new_v4().to_string(),
                run_id: ctx.run_id.clone(),
                pipeline_id: ctx.pipeline_id.clone(),
                node_id: node.id.clone(),
                message,
                approvers: config.approvers,
                payload: input.clone(),
                timestamp: Utc::now(),
            };
            info!(node_id = %node.id, request_id = %request.id, timeout_secs, "Waiting for approval");

            let decision = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                gate.request_approval(request),
            )
            .await
            .map_err(|_| WeftError::Timeout {
                what: format!("Approval for node '{}'", node.id),
                secs: timeout_secs,
            })??;

            Ok(match decision {
                ApprovalDecision::Approved => {
                    info!(node_id = %node.id, "Approved");
                    NodeExecutionResult::success(input).with_handle(APPROVED_HANDLE)
                }
                ApprovalDecision::Denied { reason } => {
                    info!(node_id = %node.id, reason = %reason, "Rejected");
                    NodeExecutionResult::success(Some(json!({ "approved": false, "reason": reason })))
                        .with_handle(REJECTED_HANDLE)
                }
            })
        })
    }
}
