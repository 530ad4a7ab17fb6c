use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Graph errors
    #[error("Pipeline contains a cycle ({} node(s) could not be ordered: {})", unordered.len(), unordered.join(", "))]
    Cycle { unordered: Vec<String> },

    // Node errors
    #[error("Invalid config for node '{node_id}': {message}")]
    NodeConfig { node_id: String, message: String },

    #[error("Unsupported condition expression: {0}")]
    Expression(String),

    // Capability errors
    #[error("Capability not available: {0}")]
    CapabilityMissing(&'static str),

    #[error("{capability} failed: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("Approval denied: {0}")]
    ApprovalDenied(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Shorthand for a configuration failure on a specific node.
    pub fn node_config(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeConfig {
            node_id: node_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_mentions_cycle_and_nodes() {
        let err = WeftError::Cycle {
            unordered: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("contains a cycle"));
        assert!(msg.contains("a, b"));
    }

    #[test]
    fn node_config_shorthand() {
        let err = WeftError::node_config("n1", "missing prompt");
        assert_eq!(err.to_string(), "Invalid config for node 'n1': missing prompt");
    }
}
