use serde::Serialize;

/// Point-in-time view of a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    pub name: String,
    /// Messages in the ready queue.
    pub ready: u64,
    /// Workers parked waiting for a message.
    pub parked_workers: u64,
    pub pending_timeout_ms: u64,
}
