use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::info;

use weft_core::error::Result;
use weft_core::node_config::NodeConfig;
use weft_core::types::{NodeExecutionResult, NodeType, PipelineNode};

use crate::context::ExecutorContext;
use crate::expression::render_template;
use crate::registry::NodeExecutor;

/// Invokes an action on a connected app through the gateway.
pub struct AppExecutor;

impl NodeExecutor for AppExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::App
    }

    fn execute<'a>(
        &'a self,
        node: &'a PipelineNode,
        input: Option<Value>,
        ctx: &'a ExecutorContext,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeConfig::App(config) = node.typed_config()? else {
                return Err(super::unexpected_config(node));
            };
            let gateway = ctx.gateway()?;

            let params = render_params(config.params, input.as_ref());
            info!(node_id = %node.id, app = %config.app, action = %config.action, "Calling app action");

            let result = gateway
                .call(
                    &ctx.settings.app_method,
                    json!({
                        "app": config.app,
                        "action": config.action,
                        "params": params,
                        "input": input,
                    }),
                )
                .await?;

            Ok(NodeExecutionResult::success(Some(result)))
        })
    }
}

/// Render `{{path}}` placeholders in every string inside `params`.
fn render_params(params: Value, input: Option<&Value>) -> Value {
    match params {
        Value::String(s) => Value::String(render_template(&s, input)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| render_params(v, input))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, render_params(v, input)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_test_utils::MockGateway;

    #[tokio::test]
    async fn calls_app_method_with_rendered_params() {
        let gateway = Arc::new(MockGateway::new().on("apps.execute", json!({ "issue": 88 })));
        let ctx = ExecutorContext::default().with_gateway(gateway.clone());
        let node = PipelineNode::new("gh", "app").with_config(json!({
            "app": "github",
            "action": "create_issue",
            "params": { "title": "Alert: {{summary}}", "labels": ["{{level}}"], "count": 2 }
        }));

        let result = AppExecutor
            .execute(&node, Some(json!({ "summary": "disk full", "level": "p1" })), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, Some(json!({ "issue": 88 })));

        let (method, params) = gateway.calls().remove(0);
        assert_eq!(method, "apps.execute");
        assert_eq!(params["app"], "github");
        assert_eq!(params["params"]["title"], "Alert: disk full");
        assert_eq!(params["params"]["labels"], json!(["p1"]));
        assert_eq!(params["params"]["count"], 2);
    }

    #[tokio::test]
    async fn gateway_error_propagates() {
        let gateway = Arc::new(MockGateway::new().fail("apps.execute", "app not connected"));
        let ctx = ExecutorContext::default().with_gateway(gateway);
        let node = PipelineNode::new("gh", "app")
            .with_config(json!({ "app": "github", "action": "create_issue" }));

        let err = AppExecutor.execute(&node, None, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("app not connected"));
    }
}
