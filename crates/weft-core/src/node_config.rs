use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WeftError};
use crate::types::{NodeType, PipelineNode};

/// Typed node configuration, one variant per node type.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    /// Trigger payloads (cron expression, webhook path, ...) are opaque to the engine.
    Trigger(Value),
    Condition(ConditionConfig),
    Agent(AgentConfig),
    Approval(ApprovalConfig),
    Loop(LoopConfig),
    Code(CodeConfig),
    Notify(NotifyConfig),
    Output(OutputConfig),
    App(AppActionConfig),
    Other(Value),
}

impl NodeConfig {
    /// Parse a raw config payload according to the node type.
    ///
    /// A `null` payload is treated as an empty object so that node types whose
    /// fields all have defaults need no config at all.
    pub fn parse(node_type: &NodeType, raw: &Value) -> std::result::Result<Self, String> {
        let raw = if raw.is_null() {
            Value::Object(Default::default())
        } else {
            raw.clone()
        };

        match node_type {
            NodeType::Cron | NodeType::Webhook | NodeType::TaskEvent | NodeType::Manual => {
                Ok(Self::Trigger(raw))
            }
            NodeType::Condition => ConditionConfig::parse(&raw).map(Self::Condition),
            NodeType::Agent => {
                let cfg: AgentConfig = from_value(raw)?;
                if cfg.prompt.trim().is_empty() {
                    return Err("agent node requires a non-empty `prompt`".into());
                }
                Ok(Self::Agent(cfg))
            }
            NodeType::Approval => from_value(raw).map(Self::Approval),
            NodeType::Loop => from_value(raw).map(Self::Loop),
            NodeType::Code => CodeConfig::parse(raw).map(Self::Code),
            NodeType::Notify => from_value(raw).map(Self::Notify),
            NodeType::Output => from_value(raw).map(Self::Output),
            NodeType::App => {
                let cfg: AppActionConfig = from_value(raw)?;
                if cfg.app.trim().is_empty() || cfg.action.trim().is_empty() {
                    return Err("app node requires non-empty `app` and `action`".into());
                }
                Ok(Self::App(cfg))
            }
            NodeType::Other(_) => Ok(Self::Other(raw)),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(raw: Value) -> std::result::Result<T, String> {
    serde_json::from_value(raw).map_err(|e| e.to_string())
}

impl PipelineNode {
    /// Parse this node's config, mapping failures to a node-level config error.
    pub fn typed_config(&self) -> Result<NodeConfig> {
        NodeConfig::parse(&self.node_type, &self.config)
            .map_err(|message| WeftError::node_config(&self.id, message))
    }
}

/// A condition is either a restricted boolean expression or an external
/// classification over a fixed option set.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionConfig {
    Expression(String),
    Classify(ClassifyConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyConfig {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ConditionConfig {
    fn parse(raw: &Value) -> std::result::Result<Self, String> {
        if let Some(expr) = raw.as_str() {
            return Self::expression(expr);
        }
        let obj = raw
            .as_object()
            .ok_or_else(|| "condition config must be an object or expression string".to_string())?;

        if obj.contains_key("question") || obj.contains_key("options") {
            let cfg: ClassifyConfig = from_value(raw.clone())?;
            if cfg.question.trim().is_empty() {
                return Err("classification condition requires a `question`".into());
            }
            if cfg.options.is_empty() {
                return Err("classification condition requires at least one option".into());
            }
            return Ok(Self::Classify(cfg));
        }

        match obj.get("expression") {
            Some(Value::String(expr)) => Self::expression(expr),
            Some(_) => Err("condition `expression` must be a string".into()),
            None => Err("condition requires `expression` or `question` + `options`".into()),
        }
    }

    fn expression(expr: &str) -> std::result::Result<Self, String> {
        if expr.trim().is_empty() {
            return Err("condition expression is empty".into());
        }
        Ok(Self::Expression(expr.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Fire-and-forget into the main agent session.
    #[default]
    Main,
    /// Blocking run in a dedicated session with its own timeout.
    Isolated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub session: SessionMode,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub credentials: Vec<String>,
    /// Isolated-session timeout in seconds.
    #[serde(default, alias = "timeoutSecs")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalConfig {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub approvers: Vec<String>,
    /// Seconds to wait for a decision.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    /// Path to the collection, e.g. `input.results`. Defaults to `input`.
    #[serde(default)]
    pub items: Option<String>,
    #[serde(default)]
    pub max_items: Option<usize>,
}

/// Restricted transforms; no arbitrary code is ever executed.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeConfig {
    /// Render `{{input.path}}` placeholders into a string.
    Template(String),
    /// Evaluate a restricted expression to a value.
    Expression(String),
    /// Project the named fields out of an object input.
    Fields(Vec<String>),
}

impl CodeConfig {
    fn parse(raw: Value) -> std::result::Result<Self, String> {
        #[derive(Deserialize)]
        struct RawCode {
            #[serde(default)]
            template: Option<String>,
            #[serde(default)]
            expression: Option<String>,
            #[serde(default)]
            fields: Option<Vec<String>>,
        }

        let raw: RawCode = from_value(raw)?;
        if let Some(t) = raw.template {
            return Ok(Self::Template(t));
        }
        if let Some(e) = raw.expression.filter(|e| !e.trim().is_empty()) {
            return Ok(Self::Expression(e));
        }
        if let Some(f) = raw.fields {
            return Ok(Self::Fields(f));
        }
        Err("code node requires one of `template`, `expression` or `fields`".into())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyConfig {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub priority: NotifyPriority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppActionConfig {
    pub app: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(t: &str, raw: Value) -> std::result::Result<NodeConfig, String> {
        NodeConfig::parse(&NodeType::from(t), &raw)
    }

    #[test]
    fn condition_expression_forms() {
        assert_eq!(
            parse("condition", json!({ "expression": "input.ok === true" })).unwrap(),
            NodeConfig::Condition(ConditionConfig::Expression("input.ok === true".into()))
        );
        assert_eq!(
            parse("condition", json!("input")).unwrap(),
            NodeConfig::Condition(ConditionConfig::Expression("input".into()))
        );
    }

    #[test]
    fn condition_classification() {
        let cfg = parse(
            "condition",
            json!({ "question": "Is this urgent?", "options": ["urgent", "later"] }),
        )
        .unwrap();
        match cfg {
            NodeConfig::Condition(ConditionConfig::Classify(c)) => {
                assert_eq!(c.options, vec!["urgent", "later"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn condition_config_errors() {
        assert!(parse("condition", json!({})).is_err());
        assert!(parse("condition", json!({ "expression": "  " })).is_err());
        assert!(parse("condition", json!({ "question": "q", "options": [] })).is_err());
        assert!(parse("condition", Value::Null).is_err());
    }

    #[test]
    fn agent_defaults_to_main_session() {
        match parse("agent", json!({ "prompt": "Summarize" })).unwrap() {
            NodeConfig::Agent(a) => {
                assert_eq!(a.session, SessionMode::Main);
                assert!(a.timeout.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("agent", json!({ "session": "isolated" })).is_err());
    }

    #[test]
    fn agent_isolated_fields() {
        match parse(
            "agent",
            json!({ "prompt": "p", "session": "isolated", "model": "m", "tools": ["web"], "timeout": 60 }),
        )
        .unwrap()
        {
            NodeConfig::Agent(a) => {
                assert_eq!(a.session, SessionMode::Isolated);
                assert_eq!(a.model.as_deref(), Some("m"));
                assert_eq!(a.tools, vec!["web"]);
                assert_eq!(a.timeout, Some(60));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn code_config_priority() {
        assert_eq!(
            parse("code", json!({ "template": "hi {{input.name}}", "fields": ["a"] })).unwrap(),
            NodeConfig::Code(CodeConfig::Template("hi {{input.name}}".into()))
        );
        assert_eq!(
            parse("code", json!({ "fields": ["a", "b"] })).unwrap(),
            NodeConfig::Code(CodeConfig::Fields(vec!["a".into(), "b".into()]))
        );
        assert!(parse("code", json!({})).is_err());
    }

    #[test]
    fn null_config_uses_defaults() {
        assert_eq!(
            parse("output", Value::Null).unwrap(),
            NodeConfig::Output(OutputConfig::default())
        );
        assert_eq!(
            parse("loop", Value::Null).unwrap(),
            NodeConfig::Loop(LoopConfig::default())
        );
    }

    #[test]
    fn app_requires_app_and_action() {
        assert!(parse("app", json!({ "app": "github" })).is_err());
        assert!(parse("app", json!({ "app": "", "action": "x" })).is_err());
        assert!(parse("app", json!({ "app": "github", "action": "open_issue" })).is_ok());
    }

    #[test]
    fn typed_config_reports_node_id() {
        let node = PipelineNode::new("n7", "agent").with_config(json!({}));
        let err = node.typed_config().unwrap_err();
        assert!(err.to_string().contains("'n7'"));
    }
}
