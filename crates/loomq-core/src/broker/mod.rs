pub mod config;
mod dispatcher;
pub mod metrics;
pub mod stats;
mod sweep;
mod topic;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{
    BrokerResult, FinishError, InspectError, PullError, PushError, ReclaimError, StorageResult,
    TopicError,
};
use crate::message::{now_ns, Message, MessageId};
use crate::storage::Storage;
use crate::topic_config::TopicConfig;

pub use config::BrokerConfig;
pub use dispatcher::Dispatcher;
pub use metrics::Metrics;
pub use stats::TopicStats;
pub use topic::Topic;

/// A stored message together with the results a worker reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    pub results: Option<serde_json::Value>,
}

/// The broker owns every open topic, their dispatch loops and the recovery
/// sweep. Topics are created on first use and persisted, so a restart reopens
/// them and replays their `Enqueued` messages.
pub struct Broker {
    config: BrokerConfig,
    storage: Arc<dyn Storage>,
    metrics: Arc<Metrics>,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    /// Open every stored topic and start the recovery sweep. Must be called
    /// from within a Tokio runtime.
    #[tracing::instrument(skip_all, fields(listen_addr = %config.server.listen_addr))]
    pub fn start(config: BrokerConfig, storage: Arc<dyn Storage>) -> BrokerResult<Arc<Self>> {
        Self::start_with_metrics(config, storage, Metrics::new())
    }

    pub fn start_with_metrics(
        config: BrokerConfig,
        storage: Arc<dyn Storage>,
        metrics: Metrics,
    ) -> BrokerResult<Arc<Self>> {
        let (shutdown_tx, _) = watch::channel(false);
        let sweep_interval = Duration::from_millis(config.sweep.interval_ms.max(1));
        let broker = Arc::new(Self {
            config,
            storage,
            metrics: Arc::new(metrics),
            topics: RwLock::new(HashMap::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let stored = broker.storage.list_topics()?;
        {
            let mut topics = broker.write_topics();
            for topic_config in stored {
                broker.open_topic(&mut topics, topic_config)?;
            }
        }

        let sweeper = tokio::spawn(sweep::run_sweeper(
            Arc::downgrade(&broker),
            sweep_interval,
            broker.shutdown_tx.subscribe(),
        ));
        broker.lock_tasks().push(sweeper);

        info!(topics = broker.read_topics().len(), "broker started");
        Ok(broker)
    }

    fn read_topics(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Topic>>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topics(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Topic>>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build a topic, replay its stored messages and start its dispatch loop.
    fn open_topic(
        &self,
        topics: &mut HashMap<String, Arc<Topic>>,
        config: TopicConfig,
    ) -> StorageResult<Arc<Topic>> {
        let name = config.name.clone();
        let (topic, inbox) = Topic::new(
            config,
            Arc::clone(&self.storage),
            &self.config.topic,
            Arc::clone(&self.metrics),
        );
        topic.init()?;

        let handle = tokio::spawn(dispatcher::run_dispatch_loop(
            Arc::clone(&topic),
            inbox,
            self.shutdown_tx.subscribe(),
        ));
        self.lock_tasks().push(handle);

        topics.insert(name, Arc::clone(&topic));
        Ok(topic)
    }

    /// An open topic by name.
    pub fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.read_topics().get(name).cloned()
    }

    /// The named topic, created with the default settings when it does not
    /// exist yet.
    fn topic_or_create(&self, name: &str) -> StorageResult<Arc<Topic>> {
        if let Some(topic) = self.topic(name) {
            return Ok(topic);
        }

        let mut topics = self.write_topics();
        if let Some(topic) = topics.get(name) {
            return Ok(Arc::clone(topic));
        }
        let config = match self.storage.get_topic(name)? {
            Some(config) => config,
            None => {
                let config = TopicConfig::new(name.to_string())
                    .with_pending_timeout_ms(self.config.topic.pending_timeout_ms);
                self.storage.put_topic(&config)?;
                info!(topic = %name, "created topic on first use");
                config
            }
        };
        self.open_topic(&mut topics, config)
    }

    /// Create a topic with explicit settings.
    pub fn create_topic(&self, config: TopicConfig) -> Result<Arc<Topic>, TopicError> {
        TopicConfig::validate_name(&config.name).map_err(TopicError::InvalidConfig)?;
        if config.pending_timeout_ms == 0 {
            return Err(TopicError::InvalidConfig(
                "pending_timeout_ms must be positive".into(),
            ));
        }

        let mut topics = self.write_topics();
        if topics.contains_key(&config.name) || self.storage.get_topic(&config.name)?.is_some() {
            return Err(TopicError::AlreadyExists(config.name));
        }
        self.storage.put_topic(&config)?;
        info!(topic = %config.name, pending_timeout_ms = config.pending_timeout_ms, "created topic");
        Ok(self.open_topic(&mut topics, config)?)
    }

    /// Store a new message on `topic` and make it available to workers.
    pub fn push(&self, topic: &str, payload: Vec<u8>) -> Result<Message, PushError> {
        TopicConfig::validate_name(topic).map_err(PushError::InvalidTopic)?;
        let handle = self.topic_or_create(topic)?;
        let msg = Message::new(topic, payload);
        handle.push_message(msg.clone())?;
        info!(topic = %topic, msg_id = %msg.id, "message pushed");
        Ok(msg)
    }

    /// Wait for the next message of `topic` on behalf of `worker_id`.
    ///
    /// Returns `Ok(None)` once `timeout` elapses without a message. With no
    /// timeout the call waits until a message arrives or the topic closes.
    /// Pulling does not create topics.
    pub async fn pull(
        &self,
        topic: &str,
        worker_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, PullError> {
        let handle = self
            .topic(topic)
            .ok_or_else(|| PullError::TopicNotFound(topic.to_string()))?;
        let request = handle.dispatcher().request_next(worker_id);
        let msg = match timeout {
            None => request.await?,
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            },
        };
        info!(topic = %topic, msg_id = %msg.id, worker_id = %worker_id, "message dequeued");
        Ok(Some(msg))
    }

    /// Acknowledge a message. `worker_id`, when given, is checked against the
    /// current holder for logging only.
    pub fn finish(
        &self,
        topic: &str,
        worker_id: Option<&str>,
        id: &MessageId,
    ) -> Result<(), FinishError> {
        let handle = self.topic(topic).ok_or_else(|| {
            FinishError::MessageNotFound(format!("message {id} not found in topic {topic}"))
        })?;
        handle.finish_message(worker_id, id)
    }

    /// A stored message and its recorded results.
    pub fn inspect(&self, topic: &str, id: &MessageId) -> Result<MessageView, InspectError> {
        let handle = self
            .topic(topic)
            .ok_or_else(|| InspectError::TopicNotFound(topic.to_string()))?;
        let message = handle
            .get_message(id)?
            .ok_or_else(|| InspectError::MessageNotFound(id.to_string()))?;
        let results = self.storage.load_task_results(topic, id)?;
        Ok(MessageView { message, results })
    }

    /// Attach worker-reported results to a message. Later calls replace
    /// earlier results.
    pub fn record_results(
        &self,
        topic: &str,
        id: &MessageId,
        results: &serde_json::Value,
    ) -> Result<(), InspectError> {
        let handle = self
            .topic(topic)
            .ok_or_else(|| InspectError::TopicNotFound(topic.to_string()))?;
        if handle.get_message(id)?.is_none() {
            return Err(InspectError::MessageNotFound(id.to_string()));
        }
        self.storage.save_task_results(topic, id, results)?;
        Ok(())
    }

    /// Re-queue every message still held by a worker that is gone. Returns
    /// the number of messages re-queued.
    ///
    /// Only the records read at the start are dropped, each as its message
    /// is re-queued. A message handed straight back to a worker with the same
    /// id keeps its new assignment. Records whose re-queue failed are left
    /// for the recovery sweep.
    pub async fn reclaim_worker(&self, worker_id: &str) -> Result<usize, ReclaimError> {
        let assignments = self.storage.get_pending_assignments(worker_id)?;
        let mut requeued = 0;
        let mut failed = 0;

        for assignment in &assignments {
            let outcome = match self.topic_or_create(&assignment.topic) {
                Ok(topic) => topic.reclaim(assignment).await,
                Err(e) => Err(PushError::Storage(e)),
            };
            match outcome {
                Ok(true) => requeued += 1,
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    warn!(
                        worker_id = %worker_id,
                        topic = %assignment.topic,
                        msg_id = %assignment.message_id,
                        error = %e,
                        "failed to re-queue message of lost worker"
                    );
                }
            }
        }

        if failed > 0 {
            warn!(worker_id = %worker_id, failed, "assignments kept for the recovery sweep");
        }
        info!(worker_id = %worker_id, requeued, "reclaimed messages of lost worker");
        Ok(requeued)
    }

    /// One recovery pass over every topic. Also refreshes the per-topic
    /// gauges. Returns the number of messages re-queued.
    pub async fn sweep_once(&self) -> usize {
        let topics: Vec<Arc<Topic>> = self.read_topics().values().cloned().collect();
        let now = now_ns();
        let mut reclaimed = 0;
        for topic in topics {
            reclaimed += topic.reclaim_expired(now).await;
            let stats = topic.stats();
            self.metrics.set_ready_depth(&stats.name, stats.ready);
            self.metrics
                .set_parked_workers(&stats.name, stats.parked_workers);
        }
        reclaimed
    }

    /// Stats for every open topic, ordered by name.
    pub fn list_topics(&self) -> Vec<TopicStats> {
        let mut stats: Vec<TopicStats> = self.read_topics().values().map(|t| t.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn topic_stats(&self, name: &str) -> Option<TopicStats> {
        self.topic(name).map(|t| t.stats())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Stop the dispatch loops and the sweep, wait for them, then flush
    /// storage. Parked workers see `TopicClosed`.
    #[tracing::instrument(skip_all)]
    pub async fn shutdown(&self) -> BrokerResult<()> {
        info!("initiating broker shutdown");
        self.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "broker task ended abnormally");
            }
        }

        self.storage.flush()?;
        info!("broker shutdown complete");
        Ok(())
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        // Tasks notice on their next wakeup; nothing to join from here.
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests;
