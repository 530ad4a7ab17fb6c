use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::info;

use weft_core::error::Result;
use weft_core::node_config::NodeConfig;
use weft_core::traits::Notification;
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::expression::render_template;
use crate::registry::NodeExecutor;

use super::{is_trivial, render_text};

/// Sends a notification through the `Notifier` capability.
pub struct NotifyExecutor;

impl NodeExecutor for NotifyExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Notify
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::Notify(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };
            let notifier = ctx.notifier()?;

            let message = match (&config.message, input.as_ref()) {
                (Some(template), _) => render_template(template, input.as_ref()),
                (None, Some(value)) if !is_trivial(Some(value)) => render_text(value),
                (None, _) => format!("Pipeline step '{}' completed", node.label),
            };

            let notification = Notification {
                title: config.title.map(|t| render_template(&t, input.as_ref())),
                message: message.clone(),
                channel: config.channel.clone(),
                priority: config.priority,
                pipeline_id: ctx.pipeline_id.clone(),
                run_id: ctx.run_id.clone(),
                node_id: node.id.clone(),
            };
            notifier.notify(notification).await?;

            info!(node_id = %node.id, channel = ?config.channel, "Notification sent");
            Ok(NodeExecutionResult::success(Some(json!({
                "sent": true,
                "message": message,
                "channel": config.channel,
            }))))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_core::node_config::NotifyPriority;
    use weft_test_utils::RecordingNotifier;

    #[tokio::test]
    async fn renders_message_and_sends() {
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = ExecutorContext::default()
            .with_notifier(notifier.clone())
            .for_run("r1", "p1");
        let node = PipelineNode::new("n", "notify").with_config(json!({
            "title": "Build {{status}}",
            "message": "Build {{status}} on {{branch}}",
            "channel": "telegram",
            "priority": "high"
        }));

        let result = NotifyExecutor
            .execute(&node, Some(json!({ "status": "green", "branch": "main" })), &ctx)
            .await
            .unwrap();
        assert!(result.is_success());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title.as_deref(), Some("Build green"));
        assert_eq!(sent[0].message, "Build green on main");
        assert_eq!(sent[0].priority, NotifyPriority::High);
        assert_eq!(sent[0].run_id, "r1");
    }

    #[tokio::test]
    async fn defaults_to_input_text() {
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = ExecutorContext::default().with_notifier(notifier.clone());
        let node = PipelineNode::new("n", "notify").with_label("Ping");

        NotifyExecutor
            .execute(&node, Some(json!("all green")), &ctx)
            .await
            .unwrap();
        NotifyExecutor.execute(&node, None, &ctx).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent[0].message, "all green");
        assert_eq!(sent[1].message, "Pipeline step 'Ping' completed");
    }

    #[tokio::test]
    async fn notifier_failure_propagates() {
        let ctx = ExecutorContext::default().with_notifier(Arc::new(RecordingNotifier::failing("channel offline")));
        let node = PipelineNode::new("n", "notify");
        let err = NotifyExecutor.execute(&node, None, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("channel offline"));
    }
}
