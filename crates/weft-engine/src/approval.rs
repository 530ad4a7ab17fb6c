use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, oneshot};
use tracing::info;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{ApprovalDecision, ApprovalGate, ApprovalRequest};

/// Manages pending approval requests with oneshot channels.
///
/// Approval nodes block in `request_approval`; a UI (the CLI prompt, a
/// websocket client) learns of new requests via `subscribe` and answers
/// with `respond`. A request leaves the pending map when it is answered or
/// when its waiter is dropped, e.g. by a node timeout.
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, (ApprovalRequest, oneshot::Sender<ApprovalDecision>)>>,
    announce: broadcast::Sender<ApprovalRequest>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        let (announce, _) = broadcast::channel(64);
        Self {
            pending: Mutex::new(HashMap::new()),
            announce,
        }
    }

    /// Register a request, announce it, and return the receiver to await.
    pub async fn request(&self, req: ApprovalRequest) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        let id = req.id.clone();

        self.pending.lock().unwrap().insert(id, (req.clone(), tx));
        // Ignore error if no subscribers
        let _ = self.announce.send(req);
        rx
    }

    /// Resolve a pending request. Returns true if it was found.
    pub async fn respond(&self, request_id: &str, decision: ApprovalDecision) -> bool {
        let entry = self.pending.lock().unwrap().remove(request_id);
        if let Some((req, tx)) = entry {
            let approved = matches!(decision, ApprovalDecision::Approved);
            info!(request_id, node_id = %req.node_id, approved, "Approval resolved");
            // Receiver may be gone if the node timed out
            let _ = tx.send(decision);
            true
        } else {
            false
        }
    }

    /// Pending requests whose requester is still waiting.
    pub async fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|_, (_, tx)| !tx.is_closed());
        pending.values().map(|(req, _)| req.clone()).collect()
    }

    /// Find a pending request by prefix match on the ID.
    pub async fn find_by_prefix(&self, prefix: &str) -> Option<String> {
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|_, (_, tx)| !tx.is_closed());
        pending.keys().find(|k| k.starts_with(prefix)).cloned()
    }

    /// Whether a request is still waiting for an answer.
    pub async fn is_pending(&self, request_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap()
            .get(request_id)
            .is_some_and(|(_, tx)| !tx.is_closed())
    }

    fn withdraw(&self, request_id: &str) {
        if self.pending.lock().unwrap().remove(request_id).is_some() {
            info!(request_id, "Approval request withdrawn");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.announce.subscribe()
    }
}

impl Default for ApprovalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate for ApprovalBroker {
    fn request_approval(&self, req: ApprovalRequest) -> BoxFuture<'_, Result<ApprovalDecision>> {
        Box::pin(async move {
            let id = req.id.clone();
            let rx = self.request(req).await;
            let _guard = Withdraw {
                broker: self,
                id: id.clone(),
            };
            rx.await
                .map_err(|_| WeftError::ApprovalDenied(format!("request {} was withdrawn", id)))
        })
    }
}

/// Removes a request from the pending map when its waiter goes away.
struct Withdraw<'a> {
    broker: &'a ApprovalBroker,
    id: String,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        self.broker.withdraw(&self.id);
    }
}
