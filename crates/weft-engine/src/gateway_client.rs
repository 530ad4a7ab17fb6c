use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use weft_core::config::{EngineConfig, GatewayConfig};
use weft_core::error::{Result, WeftError};
use weft_core::traits::{GatewayRpc, IsolatedAgentRunner, IsolatedJobSpec, Notification, Notifier};

/// Extra time allowed on the HTTP request beyond an isolated job's own
/// timeout, so the engine-side timeout fires first.
const ISOLATED_GRACE_SECS: u64 = 5;

/// A request frame sent to the gateway.
#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    id: String,
    method: &'a str,
    params: Value,
}

/// A response frame returned by the gateway.
#[derive(Debug, Deserialize)]
struct ResponseFrame {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: i32,
    message: String,
}

/// Gateway client over HTTP: every capability is one RPC posted to
/// `{url}/rpc`.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    settings: EngineConfig,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig, settings: EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WeftError::Gateway(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            settings,
        })
    }

    async fn rpc(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
        let url = format!("{}/rpc", self.base_url);
        let frame = RequestFrame {
            frame_type: "request",
            id: Uuid::new_v4().to_string(),
            method,
            params,
        };
        debug!(method, id = %frame.id, "Gateway RPC");

        let mut req = self.client.post(&url).json(&frame);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| WeftError::Gateway(format!("{} request failed: {}", method, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(WeftError::Gateway(format!(
                "{} returned HTTP {}: {}",
                method, status, body
            )));
        }

        let frame: ResponseFrame = resp
            .json()
            .await
            .map_err(|e| WeftError::Gateway(format!("Failed to parse {} response: {}", method, e)))?;

        match (frame.error, frame.result) {
            (Some(err), _) => Err(WeftError::Gateway(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            ))),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

impl GatewayRpc for HttpGateway {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.rpc(method, params, None))
    }
}

impl IsolatedAgentRunner for HttpGateway {
    fn run_isolated_job(&self, spec: IsolatedJobSpec) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let timeout = Duration::from_secs(spec.timeout_secs + ISOLATED_GRACE_SECS);
            let params = serde_json::to_value(&spec)?;
            self.rpc(&self.settings.isolated_method, params, Some(timeout))
                .await
        })
    }
}

impl Notifier for HttpGateway {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let params = serde_json::to_value(&notification)?;
            self.rpc(&self.settings.notify_method, params, None).await?;
            Ok(())
        })
    }
}
