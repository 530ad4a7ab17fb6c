pub mod approval;
pub mod context;
pub mod executors;
pub mod expression;
pub mod gateway_client;
pub mod graph;
pub mod main_session;
pub mod registry;
pub mod runner;

pub use approval::ApprovalBroker;
pub use context::ExecutorContext;
pub use gateway_client::HttpGateway;
pub use graph::{topological_sort, validate, ValidationResult};
pub use main_session::MainSessionQueue;
pub use registry::{ExecutorRegistry, NodeExecutor};
pub use runner::PipelineRunner;
