/// Low-level storage errors (RocksDB, serialization, corrupt records).
/// This is the error type for the `Storage` trait. Storage operations can only
/// fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// The ready queue reached its configured capacity.
#[derive(Debug, thiserror::Error)]
#[error("ready queue is full (capacity {capacity})")]
pub struct QueueFull {
    pub capacity: usize,
}

/// Errors from pushing a message into a topic.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("topic dispatcher overloaded: {0}")]
    Overloaded(String),

    #[error("topic closed: {0}")]
    TopicClosed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from a worker pulling the next message.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("topic closed: {0}")]
    TopicClosed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from acknowledging (finishing) a message.
#[derive(Debug, thiserror::Error)]
pub enum FinishError {
    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from inspecting a message or recording its results.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from reclaiming the pending assignments of a lost worker.
#[derive(Debug, thiserror::Error)]
pub enum ReclaimError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from creating or opening a topic.
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("topic already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid topic config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Broker lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
