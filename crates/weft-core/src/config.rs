use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration (`weft.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// Executor defaults and gateway method names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for isolated agent jobs when the node sets none.
    #[serde(default = "default_isolated_timeout")]
    pub isolated_timeout_secs: u64,
    /// How long an approval node waits for a decision.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Upper bound on the items a loop node emits.
    #[serde(default = "default_max_loop_items")]
    pub max_loop_items: usize,
    #[serde(default = "default_classify_method")]
    pub classify_method: String,
    #[serde(default = "default_app_method")]
    pub app_method: String,
    #[serde(default = "default_isolated_method")]
    pub isolated_method: String,
    #[serde(default = "default_notify_method")]
    pub notify_method: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            isolated_timeout_secs: default_isolated_timeout(),
            approval_timeout_secs: default_approval_timeout(),
            max_loop_items: default_max_loop_items(),
            classify_method: default_classify_method(),
            app_method: default_app_method(),
            isolated_method: default_isolated_method(),
            notify_method: default_notify_method(),
        }
    }
}

fn default_isolated_timeout() -> u64 { 300 }
fn default_approval_timeout() -> u64 { 3600 }
fn default_max_loop_items() -> usize { 100 }
fn default_classify_method() -> String { "llm.classify".to_string() }
fn default_app_method() -> String { "apps.execute".to_string() }
fn default_isolated_method() -> String { "agent.runIsolated".to_string() }
fn default_notify_method() -> String { "notifications.send".to_string() }

/// Remote gateway used for RPC, isolated agent jobs and notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

fn default_gateway_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

impl WeftConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references first.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Leave unset vars verbatim
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
