use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::warn;

use crate::error::{StorageError, StorageResult};
use crate::message::{Message, MessageId, PendingAssignment};
use crate::storage::keys;
use crate::storage::traits::{Storage, WriteBatchOp};
use crate::topic_config::TopicConfig;

const CF_MESSAGES: &str = "messages";
const CF_ASSIGNMENTS: &str = "assignments";
const CF_ASSIGNMENT_EXPIRY: &str = "assignment_expiry";
const CF_RESULTS: &str = "results";
const CF_TOPICS: &str = "topics";

/// All column family names (excluding `default` which RocksDB creates automatically).
const COLUMN_FAMILIES: &[&str] = &[
    CF_MESSAGES,
    CF_ASSIGNMENTS,
    CF_ASSIGNMENT_EXPIRY,
    CF_RESULTS,
    CF_TOPICS,
];

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksDbStorage {
    db: DB,
}

impl RocksDbStorage {
    /// Open or create a RocksDB database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }

    /// Iterate `(key, value)` pairs of a column family whose keys start with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }
}

impl Storage for RocksDbStorage {
    fn put_message(&self, message: &Message) -> StorageResult<()> {
        let cf = self.cf(CF_MESSAGES)?;
        let key = keys::message_key(&message.topic, &message.id);
        let value = serde_json::to_vec(message)?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn get_message(&self, topic: &str, id: &MessageId) -> StorageResult<Option<Message>> {
        let cf = self.cf(CF_MESSAGES)?;
        match self.db.get_cf(&cf, keys::message_key(topic, id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn walk_messages(
        &self,
        topic: &str,
        visit: &mut dyn FnMut(Message) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let cf = self.cf(CF_MESSAGES)?;
        let prefix = keys::message_prefix(topic);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            match serde_json::from_slice::<Message>(&value) {
                Ok(msg) => visit(msg)?,
                Err(e) => {
                    warn!(%topic, error = %e, "skipping malformed message record");
                }
            }
        }
        Ok(())
    }

    fn get_pending_assignments(&self, worker_id: &str) -> StorageResult<Vec<PendingAssignment>> {
        let entries = self.scan_prefix(CF_ASSIGNMENTS, &keys::assignment_prefix(worker_id))?;
        let mut results = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            match serde_json::from_slice::<PendingAssignment>(&value) {
                Ok(pa) => results.push(pa),
                Err(e) => warn!(%worker_id, error = %e, "skipping malformed assignment record"),
            }
        }
        Ok(results)
    }

    fn remove_pending_assignments(&self, worker_id: &str) -> StorageResult<()> {
        let entries = self.scan_prefix(CF_ASSIGNMENTS, &keys::assignment_prefix(worker_id))?;
        let mut ops = Vec::with_capacity(entries.len() * 2);
        for (key, value) in entries {
            match serde_json::from_slice::<PendingAssignment>(&value) {
                Ok(pa) => ops.extend(WriteBatchOp::delete_assignment(&pa)),
                Err(e) => {
                    // Expiry entry is unrecoverable; the sweep drops it when it
                    // finds no matching message state.
                    warn!(%worker_id, error = %e, "removing malformed assignment record");
                    ops.push(WriteBatchOp::DeleteAssignment { key });
                }
            }
        }
        if ops.is_empty() {
            return Ok(());
        }
        self.write_batch(ops)
    }

    fn list_expired_assignments(
        &self,
        topic: &str,
        up_to_ns: u64,
    ) -> StorageResult<Vec<PendingAssignment>> {
        let cf = self.cf(CF_ASSIGNMENT_EXPIRY)?;
        let prefix = keys::assignment_expiry_prefix(topic);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some((_, assigned_at, message_id)) = keys::parse_assignment_expiry_key(&key)
            else {
                warn!(%topic, "skipping corrupt assignment_expiry key");
                continue;
            };
            if assigned_at > up_to_ns {
                break;
            }
            let worker_id = match String::from_utf8(value.to_vec()) {
                Ok(w) => w,
                Err(e) => {
                    warn!(%topic, %message_id, error = %e, "skipping non-UTF8 worker id");
                    continue;
                }
            };
            results.push(PendingAssignment {
                worker_id,
                topic: topic.to_string(),
                message_id,
                assigned_at,
            });
        }
        Ok(results)
    }

    fn save_task_results(
        &self,
        topic: &str,
        id: &MessageId,
        results: &serde_json::Value,
    ) -> StorageResult<()> {
        let cf = self.cf(CF_RESULTS)?;
        let value = serde_json::to_vec(results)?;
        self.db.put_cf(&cf, keys::results_key(topic, id), value)?;
        Ok(())
    }

    fn load_task_results(
        &self,
        topic: &str,
        id: &MessageId,
    ) -> StorageResult<Option<serde_json::Value>> {
        let cf = self.cf(CF_RESULTS)?;
        match self.db.get_cf(&cf, keys::results_key(topic, id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn put_topic(&self, config: &TopicConfig) -> StorageResult<()> {
        let cf = self.cf(CF_TOPICS)?;
        let value = serde_json::to_vec(config)?;
        self.db.put_cf(&cf, config.name.as_bytes(), value)?;
        Ok(())
    }

    fn get_topic(&self, name: &str) -> StorageResult<Option<TopicConfig>> {
        let cf = self.cf(CF_TOPICS)?;
        match self.db.get_cf(&cf, name.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_topics(&self) -> StorageResult<Vec<TopicConfig>> {
        let cf = self.cf(CF_TOPICS)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            match serde_json::from_slice::<TopicConfig>(&value) {
                Ok(config) => results.push(config),
                Err(e) => {
                    let name = String::from_utf8_lossy(&key);
                    warn!(topic = %name, error = %e, "skipping malformed topic config");
                }
            }
        }
        Ok(results)
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        let messages = self.cf(CF_MESSAGES)?;
        let assignments = self.cf(CF_ASSIGNMENTS)?;
        let expiry = self.cf(CF_ASSIGNMENT_EXPIRY)?;

        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                WriteBatchOp::PutMessage { key, value } => batch.put_cf(&messages, key, value),
                WriteBatchOp::PutAssignment { key, value } => {
                    batch.put_cf(&assignments, key, value)
                }
                WriteBatchOp::DeleteAssignment { key } => batch.delete_cf(&assignments, key),
                WriteBatchOp::PutAssignmentExpiry { key, worker_id } => {
                    batch.put_cf(&expiry, key, worker_id.as_bytes())
                }
                WriteBatchOp::DeleteAssignmentExpiry { key } => batch.delete_cf(&expiry, key),
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush_wal(true)?;
        Ok(())
    }
}
