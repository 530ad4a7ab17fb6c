use std::sync::Arc;

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{
    ApprovalGate, GatewayRpc, HeartbeatWaker, IsolatedAgentRunner, Notifier, SystemEventQueue,
};

/// Everything a node executor may reach outside the graph.
///
/// Capabilities are optional. The accessor for a missing one returns
/// `CapabilityMissing`, which the registry turns into a node failure.
#[derive(Clone, Default)]
pub struct ExecutorContext {
    pub run_id: String,
    pub pipeline_id: String,
    pub settings: EngineConfig,
    system_events: Option<Arc<dyn SystemEventQueue>>,
    heartbeat: Option<Arc<dyn HeartbeatWaker>>,
    isolated_runner: Option<Arc<dyn IsolatedAgentRunner>>,
    gateway: Option<Arc<dyn GatewayRpc>>,
    approvals: Option<Arc<dyn ApprovalGate>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ExecutorContext {
    pub fn new(settings: EngineConfig) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Copy of this context bound to a specific run.
    pub fn for_run(&self, run_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            ..self.clone()
        }
    }

    pub fn with_system_events(mut self, queue: Arc<dyn SystemEventQueue>) -> Self {
        self.system_events = Some(queue);
        self
    }

    pub fn with_heartbeat(mut self, waker: Arc<dyn HeartbeatWaker>) -> Self {
        self.heartbeat = Some(waker);
        self
    }

    pub fn with_isolated_runner(mut self, runner: Arc<dyn IsolatedAgentRunner>) -> Self {
        self.isolated_runner = Some(runner);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn GatewayRpc>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_approvals(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.approvals = Some(gate);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn system_events(&self) -> Result<&Arc<dyn SystemEventQueue>> {
        self.system_events
            .as_ref()
            .ok_or(WeftError::CapabilityMissing("enqueue_system_event"))
    }

    pub fn heartbeat(&self) -> Result<&Arc<dyn HeartbeatWaker>> {
        self.heartbeat
            .as_ref()
            .ok_or(WeftError::CapabilityMissing("request_heartbeat_now"))
    }

    pub fn isolated_runner(&self) -> Result<&Arc<dyn IsolatedAgentRunner>> {
        self.isolated_runner
            .as_ref()
            .ok_or(WeftError::CapabilityMissing("run_isolated_agent_job"))
    }

    pub fn gateway(&self) -> Result<&Arc<dyn GatewayRpc>> {
        self.gateway
            .as_ref()
            .ok_or(WeftError::CapabilityMissing("call_gateway_rpc"))
    }

    pub fn approvals(&self) -> Result<&Arc<dyn ApprovalGate>> {
        self.approvals
            .as_ref()
            .ok_or(WeftError::CapabilityMissing("request_approval"))
    }

    pub fn notifier(&self) -> Result<&Arc<dyn Notifier>> {
        self.notifier
            .as_ref()
            .ok_or(WeftError::CapabilityMissing("notify"))
    }
}
