pub mod config;
pub mod error;
pub mod event;
pub mod node_config;
pub mod traits;
pub mod types;

pub use config::WeftConfig;
pub use error::{Result, WeftError};
pub use event::{EventBus, EventSink, PipelineEvent};
pub use node_config::NodeConfig;
pub use types::*;
