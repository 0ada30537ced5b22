pub mod broker;
pub mod error;
pub mod message;
pub mod queue;
pub mod storage;
pub mod telemetry;
pub mod topic_config;

pub use broker::{Broker, BrokerConfig, Dispatcher, MessageView, Topic, TopicStats};
pub use error::{
    BrokerError, FinishError, InspectError, PullError, PushError, ReclaimError, StorageError,
    TopicError,
};
pub use message::{Message, MessageId, MessageState, PendingAssignment};
pub use queue::ReadyQueue;
pub use storage::{RocksDbStorage, Storage, WriteBatchOp};
pub use topic_config::TopicConfig;
