use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use super::*;

/// Long enough that no test races the automatic sweep.
const MANUAL_SWEEP_INTERVAL_MS: u64 = 3_600_000;

pub(super) const SHORT: Duration = Duration::from_millis(50);
pub(super) const LONG: Duration = Duration::from_secs(5);

pub(super) fn test_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.sweep.interval_ms = MANUAL_SWEEP_INTERVAL_MS;
    config
}

pub(super) fn open_storage(path: &Path) -> Arc<dyn Storage> {
    Arc::new(RocksDbStorage::open(path).unwrap())
}

pub(super) fn test_broker() -> (Arc<Broker>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let broker = Broker::start(test_config(), open_storage(dir.path())).unwrap();
    (broker, dir)
}

/// Helper: start a broker on an existing storage (for restart tests).
pub(super) fn broker_with_storage(storage: Arc<dyn Storage>) -> Arc<Broker> {
    Broker::start(test_config(), storage).unwrap()
}

/// Helper: create a topic with the default settings.
pub(super) fn create_topic(broker: &Broker, name: &str) {
    broker.create_topic(TopicConfig::new(name.to_string())).unwrap();
}

/// Helper: create a topic whose assignments expire after `timeout_ms`.
pub(super) fn create_topic_with_timeout(broker: &Broker, name: &str, timeout_ms: u64) {
    broker
        .create_topic(TopicConfig::new(name.to_string()).with_pending_timeout_ms(timeout_ms))
        .unwrap();
}

/// Pull with a long timeout and fail the test if nothing arrives.
pub(super) async fn pull_one(broker: &Broker, topic: &str, worker_id: &str) -> Message {
    broker
        .pull(topic, worker_id, Some(LONG))
        .await
        .unwrap()
        .expect("expected a message before the timeout")
}

/// Wait until `count` workers are parked on `topic`.
pub(super) async fn wait_for_parked(broker: &Broker, topic: &str, count: u64) {
    for _ in 0..400 {
        if broker.topic_stats(topic).map(|s| s.parked_workers) == Some(count) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} parked workers on {topic}");
}

pub(super) fn state_of(broker: &Broker, topic: &str, id: &MessageId) -> MessageState {
    broker.inspect(topic, id).unwrap().message.state
}

pub(super) fn held_by(storage: &dyn Storage, worker_id: &str) -> Vec<MessageId> {
    storage
        .get_pending_assignments(worker_id)
        .unwrap()
        .into_iter()
        .map(|pa: PendingAssignment| pa.message_id)
        .collect()
}

/// Storage double that forwards to RocksDB and fails every write while
/// `fail_writes` is set.
pub(super) struct FlakyStorage {
    inner: RocksDbStorage,
    fail_writes: AtomicBool,
}

impl FlakyStorage {
    pub(super) fn open(path: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: RocksDbStorage::open(path).unwrap(),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub(super) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::RocksDb("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl Storage for FlakyStorage {
    fn put_message(&self, message: &Message) -> StorageResult<()> {
        self.check_write()?;
        self.inner.put_message(message)
    }

    fn get_message(&self, topic: &str, id: &MessageId) -> StorageResult<Option<Message>> {
        self.inner.get_message(topic, id)
    }

    fn walk_messages(
        &self,
        topic: &str,
        visit: &mut dyn FnMut(Message) -> StorageResult<()>,
    ) -> StorageResult<()> {
        self.inner.walk_messages(topic, visit)
    }

    fn get_pending_assignments(&self, worker_id: &str) -> StorageResult<Vec<PendingAssignment>> {
        self.inner.get_pending_assignments(worker_id)
    }

    fn remove_pending_assignments(&self, worker_id: &str) -> StorageResult<()> {
        self.check_write()?;
        self.inner.remove_pending_assignments(worker_id)
    }

    fn list_expired_assignments(
        &self,
        topic: &str,
        up_to_ns: u64,
    ) -> StorageResult<Vec<PendingAssignment>> {
        self.inner.list_expired_assignments(topic, up_to_ns)
    }

    fn save_task_results(
        &self,
        topic: &str,
        id: &MessageId,
        results: &serde_json::Value,
    ) -> StorageResult<()> {
        self.check_write()?;
        self.inner.save_task_results(topic, id, results)
    }

    fn load_task_results(
        &self,
        topic: &str,
        id: &MessageId,
    ) -> StorageResult<Option<serde_json::Value>> {
        self.inner.load_task_results(topic, id)
    }

    fn put_topic(&self, config: &TopicConfig) -> StorageResult<()> {
        self.check_write()?;
        self.inner.put_topic(config)
    }

    fn get_topic(&self, name: &str) -> StorageResult<Option<TopicConfig>> {
        self.inner.get_topic(name)
    }

    fn list_topics(&self) -> StorageResult<Vec<TopicConfig>> {
        self.inner.list_topics()
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        self.check_write()?;
        self.inner.write_batch(ops)
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }
}
