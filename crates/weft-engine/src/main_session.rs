use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, warn};

use weft_core::traits::{HeartbeatRequest, HeartbeatWaker, SystemEventOptions, SystemEventQueue};

/// A system event waiting for the main session to pick it up.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub text: String,
    pub context_key: String,
    pub enqueued_at: DateTime<Utc>,
}

/// In-process queue into agent sessions plus the wake signal that tells the
/// session loop to drain it.
///
/// Each session keeps at most `capacity` events; the oldest is dropped when
/// a new one arrives at a full queue.
pub struct MainSessionQueue {
    queues: Mutex<HashMap<String, VecDeque<QueuedEvent>>>,
    wake_reasons: Mutex<Vec<String>>,
    wake: Notify,
    capacity: usize,
}

impl MainSessionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            wake_reasons: Mutex::new(Vec::new()),
            wake: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Take every pending event for `session_key`, oldest first.
    pub fn drain(&self, session_key: &str) -> Vec<QueuedEvent> {
        self.queues
            .lock()
            .unwrap()
            .remove(session_key)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn pending(&self, session_key: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(session_key)
            .map_or(0, VecDeque::len)
    }

    /// Wait for a heartbeat request and return the reasons collected since
    /// the last wake. A request made before the call is not lost.
    pub async fn wait_for_wake(&self) -> Vec<String> {
        self.wake.notified().await;
        std::mem::take(&mut *self.wake_reasons.lock().unwrap())
    }
}

impl Default for MainSessionQueue {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SystemEventQueue for MainSessionQueue {
    fn enqueue_system_event(&self, text: &str, opts: SystemEventOptions) {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(opts.session_key.clone()).or_default();
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(session = %opts.session_key, context = %dropped.context_key, "Session queue full, dropping oldest event");
            }
        }
        queue.push_back(QueuedEvent {
            text: text.to_string(),
            context_key: opts.context_key,
            enqueued_at: Utc::now(),
        });
        debug!(session = %opts.session_key, pending = queue.len(), "System event queued");
    }
}

impl HeartbeatWaker for MainSessionQueue {
    fn request_heartbeat_now(&self, req: HeartbeatRequest) {
        self.wake_reasons.lock().unwrap().push(req.reason);
        self.wake.notify_one();
    }
}
