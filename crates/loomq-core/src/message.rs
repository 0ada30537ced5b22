use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed-width (16 byte) message identifier. UUIDv7, so IDs generated later
/// sort after earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a message. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Enqueued,
    Dequeued,
    Finished,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Enqueued => "enqueued",
            MessageState::Dequeued => "dequeued",
            MessageState::Finished => "finished",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The worker currently holding a `Dequeued` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker_id: String,
    pub assigned_at: u64,
}

/// Core message domain type, as stored in the `messages` column family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub state: MessageState,
    /// Creation time, unix nanoseconds.
    pub created_at: u64,
    pub assignment: Option<Assignment>,
    pub delivery_count: u32,
}

impl Message {
    /// Build a fresh message for `topic`. The state is `Enqueued` but nothing
    /// is persisted until the topic pushes it.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            payload,
            state: MessageState::Enqueued,
            created_at: now_ns(),
            assignment: None,
            delivery_count: 0,
        }
    }

    /// The pending-assignment record for this message, if it is held by a worker.
    pub fn pending_assignment(&self) -> Option<PendingAssignment> {
        self.assignment.as_ref().map(|a| PendingAssignment {
            worker_id: a.worker_id.clone(),
            topic: self.topic.clone(),
            message_id: self.id,
            assigned_at: a.assigned_at,
        })
    }
}

/// Durable record that `worker_id` holds `message_id` and has not acknowledged it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAssignment {
    pub worker_id: String,
    pub topic: String,
    pub message_id: MessageId,
    pub assigned_at: u64,
}

impl PendingAssignment {
    /// Whether this record describes the message's current assignment.
    pub fn is_current_for(&self, message: &Message) -> bool {
        message.state == MessageState::Dequeued
            && message.assignment.as_ref().is_some_and(|a| {
                a.worker_id == self.worker_id && a.assigned_at == self.assigned_at
            })
    }
}

/// Current wall-clock time in unix nanoseconds.
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
