use crate::error::StorageResult;
use crate::message::{Message, MessageId, PendingAssignment};
use crate::storage::keys;
use crate::topic_config::TopicConfig;

/// Represents a single operation in an atomic write batch.
#[derive(Debug)]
pub enum WriteBatchOp {
    PutMessage { key: Vec<u8>, value: Vec<u8> },
    PutAssignment { key: Vec<u8>, value: Vec<u8> },
    DeleteAssignment { key: Vec<u8> },
    PutAssignmentExpiry { key: Vec<u8>, worker_id: String },
    DeleteAssignmentExpiry { key: Vec<u8> },
}

impl WriteBatchOp {
    /// Serialize `message` into a put on the messages CF.
    pub fn put_message(message: &Message) -> StorageResult<Self> {
        Ok(WriteBatchOp::PutMessage {
            key: keys::message_key(&message.topic, &message.id),
            value: serde_json::to_vec(message)?,
        })
    }

    /// The two writes that record a pending assignment: the per-worker record
    /// and the per-topic expiry index entry.
    pub fn put_assignment(assignment: &PendingAssignment) -> StorageResult<[Self; 2]> {
        Ok([
            WriteBatchOp::PutAssignment {
                key: keys::assignment_key(
                    &assignment.worker_id,
                    &assignment.topic,
                    &assignment.message_id,
                ),
                value: serde_json::to_vec(assignment)?,
            },
            WriteBatchOp::PutAssignmentExpiry {
                key: keys::assignment_expiry_key(
                    &assignment.topic,
                    assignment.assigned_at,
                    &assignment.message_id,
                ),
                worker_id: assignment.worker_id.clone(),
            },
        ])
    }

    /// The two deletes that drop a pending assignment and its expiry index entry.
    pub fn delete_assignment(assignment: &PendingAssignment) -> [Self; 2] {
        [
            WriteBatchOp::DeleteAssignment {
                key: keys::assignment_key(
                    &assignment.worker_id,
                    &assignment.topic,
                    &assignment.message_id,
                ),
            },
            WriteBatchOp::DeleteAssignmentExpiry {
                key: keys::assignment_expiry_key(
                    &assignment.topic,
                    assignment.assigned_at,
                    &assignment.message_id,
                ),
            },
        ]
    }
}

/// Storage trait for all persistence operations. Implementations must be thread-safe
/// and provide at least per-key atomicity, plus atomic `write_batch`.
pub trait Storage: Send + Sync {
    // --- Message operations ---

    /// Store (insert or overwrite) a message.
    fn put_message(&self, message: &Message) -> StorageResult<()>;

    /// Retrieve a message by topic and ID.
    fn get_message(&self, topic: &str, id: &MessageId) -> StorageResult<Option<Message>>;

    /// Visit every stored message of a topic in ID order. Records that fail to
    /// decode are skipped. An error returned by `visit` stops the walk and is
    /// propagated.
    fn walk_messages(
        &self,
        topic: &str,
        visit: &mut dyn FnMut(Message) -> StorageResult<()>,
    ) -> StorageResult<()>;

    // --- Pending assignment operations ---

    /// All pending assignments held by a worker, across topics.
    fn get_pending_assignments(&self, worker_id: &str) -> StorageResult<Vec<PendingAssignment>>;

    /// Remove every pending assignment held by a worker, with their expiry entries.
    fn remove_pending_assignments(&self, worker_id: &str) -> StorageResult<()>;

    /// Pending assignments of a topic made at or before `up_to_ns`, oldest first.
    fn list_expired_assignments(
        &self,
        topic: &str,
        up_to_ns: u64,
    ) -> StorageResult<Vec<PendingAssignment>>;

    // --- Task result operations ---

    /// Store the results a worker reported for a message.
    fn save_task_results(
        &self,
        topic: &str,
        id: &MessageId,
        results: &serde_json::Value,
    ) -> StorageResult<()>;

    /// Retrieve the results recorded for a message, if any.
    fn load_task_results(
        &self,
        topic: &str,
        id: &MessageId,
    ) -> StorageResult<Option<serde_json::Value>>;

    // --- Topic operations ---

    /// Store a topic config.
    fn put_topic(&self, config: &TopicConfig) -> StorageResult<()>;

    /// Retrieve a topic config by name.
    fn get_topic(&self, name: &str) -> StorageResult<Option<TopicConfig>>;

    /// List all topic configs.
    fn list_topics(&self) -> StorageResult<Vec<TopicConfig>>;

    // --- Batch operations ---

    /// Atomically apply a batch of write operations across column families.
    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()>;

    /// Flush buffered writes to disk.
    fn flush(&self) -> StorageResult<()>;
}
