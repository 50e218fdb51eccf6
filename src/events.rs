use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the broadcast ring. Slow subscribers that fall more than
/// this many events behind see a Lagged error, never a blocked emitter.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Named notifications emitted by the core. Payloads are flat primitive
/// fields so a presentation layer can forward them without unpacking
/// nested structures.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    BackendStatusChanged {
        backend: String,
        old_status: String,
        new_status: String,
    },
    BackendRequestCompleted {
        backend: String,
        success: bool,
        tokens: u32,
        latency_ms: u64,
    },
    TaskStarted {
        task_id: String,
        task_type: String,
    },
    TaskCompleted {
        task_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: String,
        error: String,
        duration_ms: u64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BackendStatusChanged { .. } => "backend_status_changed",
            Event::BackendRequestCompleted { .. } => "backend_request_completed",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskCompleted { .. } => "task_completed",
            Event::TaskFailed { .. } => "task_failed",
        }
    }
}

/// Fan-out bus for core notifications. Cloning shares the same channel;
/// emitting with no subscribers is a no-op, not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emit an event. Never blocks the caller.
    pub fn emit(&self, event: Event) {
        tracing::debug!(event = event.name(), "emitting event");
        // send fails only when there are no receivers — fine either way
        let _ = self.sender.send(event);
    }
}
