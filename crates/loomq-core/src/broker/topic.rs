use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::broker::config::TopicDefaults;
use crate::broker::dispatcher::{DispatchInbox, Dispatcher, PullRequest};
use crate::broker::metrics::Metrics;
use crate::broker::stats::TopicStats;
use crate::error::{FinishError, PullError, PushError, StorageResult};
use crate::message::{now_ns, Assignment, Message, MessageId, MessageState, PendingAssignment};
use crate::queue::ReadyQueue;
use crate::storage::{Storage, WriteBatchOp};
use crate::topic_config::TopicConfig;

/// Outcome of offering one message to one waiting worker.
enum HandOff {
    /// Nothing left to route: the worker has the message, or the message was
    /// left for the recovery sweep.
    Settled,
    /// The message is no longer deliverable. The worker is still waiting.
    Stale(PullRequest),
    /// The worker is gone. The message is `Enqueued` and needs a new home.
    Abandoned(Message),
}

/// A named message queue: durable records in storage, a ready queue in
/// memory, and the workers parked waiting on it.
///
/// Every state change of a stored message happens under `transitions`, so a
/// message is re-read and checked before it is claimed, finished or
/// re-queued. `waiters` is held across every ready-queue push and pop, which
/// keeps "worker parked" and "message queued" from both being true at rest.
///
/// Storage calls are synchronous and run under `transitions`. The dispatch
/// loop makes them inline, one point read and one batch write per claim or
/// re-queue, so a slow disk delays only that topic's loop. Callers on an
/// async runtime that push or finish in bulk should go through
/// `spawn_blocking`, as the HTTP server does.
pub struct Topic {
    config: TopicConfig,
    storage: Arc<dyn Storage>,
    queue: ReadyQueue,
    waiters: Mutex<VecDeque<PullRequest>>,
    transitions: Mutex<()>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Topic {
    pub(crate) fn new(
        config: TopicConfig,
        storage: Arc<dyn Storage>,
        defaults: &TopicDefaults,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, DispatchInbox) {
        let (dispatcher, inbox) =
            Dispatcher::channel(&config.name, defaults.dispatch_channel_capacity);
        let topic = Arc::new(Self {
            config,
            storage,
            queue: ReadyQueue::new(defaults.ready_capacity),
            waiters: Mutex::new(VecDeque::new()),
            transitions: Mutex::new(()),
            dispatcher,
            metrics,
        });
        (topic, inbox)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn lock_waiters(&self) -> MutexGuard<'_, VecDeque<PullRequest>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Startup replay: queue every stored `Enqueued` message in ID order.
    /// Must run once, before the dispatch loop starts. Returns the number of
    /// messages queued.
    pub(crate) fn init(&self) -> StorageResult<usize> {
        let mut replayed = 0usize;
        let mut skipped_full = 0usize;
        self.storage.walk_messages(&self.config.name, &mut |msg: Message| {
            if msg.state == MessageState::Enqueued {
                match self.queue.push(msg) {
                    Ok(()) => replayed += 1,
                    Err(_) => skipped_full += 1,
                }
            }
            Ok(())
        })?;
        if skipped_full > 0 {
            warn!(
                topic = %self.config.name,
                skipped_full,
                "ready queue full during replay, messages stay durable"
            );
        }
        info!(topic = %self.config.name, replayed, "replayed enqueued messages");
        Ok(replayed)
    }

    /// Persist `msg` as `Enqueued`, then give it to a parked worker or queue it.
    ///
    /// Fresh messages are inserted. A message that already exists is only
    /// re-queued when it is not `Finished`, and when it is `Dequeued` only if
    /// `msg` carries its current assignment. Anything else is a stale re-queue
    /// and is ignored.
    pub fn push_message(&self, msg: Message) -> Result<(), PushError> {
        let Some(msg) = self.persist_enqueued(msg)? else {
            return Ok(());
        };
        self.metrics.record_push(&self.config.name);
        debug!(topic = %self.config.name, msg_id = %msg.id, "message enqueued");
        self.route(msg, false);
        Ok(())
    }

    /// Write the `Enqueued` transition. Returns the message to route, or
    /// `None` when the stored copy says it must not be re-queued.
    fn persist_enqueued(&self, mut msg: Message) -> StorageResult<Option<Message>> {
        let _guard = self.lock_transitions();
        let stored = self.storage.get_message(&self.config.name, &msg.id)?;

        let mut ops = Vec::with_capacity(3);
        match &stored {
            None => {}
            Some(current) if current.state == MessageState::Finished => {
                debug!(topic = %self.config.name, msg_id = %msg.id, "finished message not re-queued");
                return Ok(None);
            }
            Some(current) if current.state == MessageState::Dequeued => {
                let Some(held) = msg.pending_assignment().filter(|pa| pa.is_current_for(current))
                else {
                    debug!(topic = %self.config.name, msg_id = %msg.id, "re-queue of reassigned message ignored");
                    return Ok(None);
                };
                ops.extend(WriteBatchOp::delete_assignment(&held));
            }
            Some(_) => {
                if self.queue.contains(&msg.id) {
                    return Ok(None);
                }
            }
        }

        msg.topic = self.config.name.clone();
        msg.state = MessageState::Enqueued;
        msg.assignment = None;
        ops.push(WriteBatchOp::put_message(&msg)?);
        self.storage.write_batch(ops)?;
        Ok(Some(msg))
    }

    /// Hand `msg` to the first live parked worker, or queue it when none is
    /// waiting. `at_front` puts it back at the head of the ready queue.
    fn route(&self, mut msg: Message, mut at_front: bool) {
        loop {
            let waiter = {
                let mut waiters = self.lock_waiters();
                let mut live = None;
                while let Some(w) = waiters.pop_front() {
                    if !w.is_abandoned() {
                        live = Some(w);
                        break;
                    }
                }
                match live {
                    Some(w) => w,
                    None => {
                        let msg_id = msg.id;
                        if at_front {
                            self.queue.push_front(msg);
                        } else if let Err(e) = self.queue.push(msg) {
                            warn!(
                                topic = %self.config.name,
                                %msg_id,
                                error = %e,
                                "message is durable but was not queued"
                            );
                        }
                        return;
                    }
                }
            };

            match self.hand_off(waiter, msg) {
                HandOff::Settled => return,
                HandOff::Abandoned(m) => {
                    msg = m;
                    at_front = true;
                }
                HandOff::Stale(waiter) => {
                    self.pop(waiter);
                    return;
                }
            }
        }
    }

    /// Serve a pull request from the ready queue, or park it until a message
    /// arrives.
    pub(crate) fn pop(&self, mut request: PullRequest) {
        loop {
            if request.is_abandoned() {
                return;
            }
            let msg = {
                let mut waiters = self.lock_waiters();
                match self.queue.pop() {
                    Some(msg) => msg,
                    None => {
                        waiters.retain(|w| !w.is_abandoned());
                        waiters.push_back(request);
                        return;
                    }
                }
            };

            match self.hand_off(request, msg) {
                HandOff::Settled => return,
                HandOff::Stale(r) => request = r,
                HandOff::Abandoned(m) => {
                    self.route(m, true);
                    return;
                }
            }
        }
    }

    /// Claim `msg` for the requesting worker and send it.
    fn hand_off(&self, request: PullRequest, msg: Message) -> HandOff {
        if request.is_abandoned() {
            return HandOff::Abandoned(msg);
        }

        let claimed = match self.claim(&request.worker_id, &msg.id) {
            Ok(Some(claimed)) => claimed,
            Ok(None) => return HandOff::Stale(request),
            Err(e) => {
                error!(
                    topic = %self.config.name,
                    msg_id = %msg.id,
                    error = %e,
                    "failed to record assignment"
                );
                let _ = request.reply.send(Err(PullError::Storage(e)));
                return HandOff::Abandoned(msg);
            }
        };

        let worker_id = request.worker_id;
        let msg_id = claimed.id;
        match request.reply.send(Ok(claimed)) {
            Ok(()) => {
                self.metrics.record_delivery(&self.config.name);
                debug!(topic = %self.config.name, %msg_id, %worker_id, "message delivered");
                HandOff::Settled
            }
            Err(Ok(mut claimed)) => {
                // Never reached the worker.
                claimed.delivery_count = claimed.delivery_count.saturating_sub(1);
                self.release(claimed, &worker_id)
            }
            Err(Err(_)) => HandOff::Settled,
        }
    }

    /// Put back a message claimed for a worker that left before it was sent.
    fn release(&self, claimed: Message, worker_id: &str) -> HandOff {
        let msg_id = claimed.id;
        match self.persist_enqueued(claimed) {
            Ok(Some(released)) => {
                debug!(topic = %self.config.name, %msg_id, %worker_id, "worker left before delivery");
                HandOff::Abandoned(released)
            }
            Ok(None) => HandOff::Settled,
            Err(e) => {
                warn!(
                    topic = %self.config.name,
                    %msg_id,
                    %worker_id,
                    error = %e,
                    "undelivered message left for the recovery sweep"
                );
                HandOff::Settled
            }
        }
    }

    /// Move a stored `Enqueued` message to `Dequeued` for `worker_id` and
    /// record the pending assignment, atomically. Returns `None` when the
    /// stored copy is no longer `Enqueued`.
    fn claim(&self, worker_id: &str, id: &MessageId) -> StorageResult<Option<Message>> {
        let _guard = self.lock_transitions();
        let Some(mut msg) = self.storage.get_message(&self.config.name, id)? else {
            warn!(topic = %self.config.name, msg_id = %id, "queued message missing from storage");
            return Ok(None);
        };
        if msg.state != MessageState::Enqueued {
            debug!(topic = %self.config.name, msg_id = %id, state = %msg.state, "skipping stale ready entry");
            return Ok(None);
        }

        let pending = PendingAssignment {
            worker_id: worker_id.to_string(),
            topic: self.config.name.clone(),
            message_id: msg.id,
            assigned_at: now_ns(),
        };
        msg.state = MessageState::Dequeued;
        msg.assignment = Some(Assignment {
            worker_id: pending.worker_id.clone(),
            assigned_at: pending.assigned_at,
        });
        msg.delivery_count += 1;

        let mut ops = vec![WriteBatchOp::put_message(&msg)?];
        ops.extend(WriteBatchOp::put_assignment(&pending)?);
        self.storage.write_batch(ops)?;
        Ok(Some(msg))
    }

    /// Mark a message `Finished` and drop its pending assignment.
    ///
    /// Finishing an already finished message succeeds without writing. A
    /// `worker_id` that is not the current holder is logged, not rejected.
    pub fn finish_message(
        &self,
        worker_id: Option<&str>,
        id: &MessageId,
    ) -> Result<(), FinishError> {
        {
            let _guard = self.lock_transitions();
            let mut msg = self
                .storage
                .get_message(&self.config.name, id)?
                .ok_or_else(|| {
                    FinishError::MessageNotFound(format!(
                        "message {id} not found in topic {}",
                        self.config.name
                    ))
                })?;

            if msg.state == MessageState::Finished {
                debug!(topic = %self.config.name, msg_id = %id, "message already finished");
                return Ok(());
            }

            if let (Some(worker_id), Some(holder)) = (worker_id, msg.assignment.as_ref()) {
                if holder.worker_id != worker_id {
                    warn!(
                        topic = %self.config.name,
                        msg_id = %id,
                        %worker_id,
                        holder = %holder.worker_id,
                        "message finished by a worker that does not hold it"
                    );
                }
            }

            let mut ops = Vec::with_capacity(3);
            if let Some(pending) = msg.pending_assignment() {
                ops.extend(WriteBatchOp::delete_assignment(&pending));
            }
            msg.state = MessageState::Finished;
            msg.assignment = None;
            ops.push(WriteBatchOp::put_message(&msg)?);
            self.storage.write_batch(ops)?;
        }

        self.queue.remove(id);
        self.metrics.record_finish(&self.config.name);
        info!(topic = %self.config.name, msg_id = %id, "message finished");
        Ok(())
    }

    pub fn get_message(&self, id: &MessageId) -> StorageResult<Option<Message>> {
        self.storage.get_message(&self.config.name, id)
    }

    /// Re-queue the message behind a lapsed assignment. Returns whether it
    /// was re-queued; a record that no longer matches the stored message is
    /// deleted instead.
    pub async fn reclaim(&self, assignment: &PendingAssignment) -> Result<bool, PushError> {
        let stored = self
            .storage
            .get_message(&self.config.name, &assignment.message_id)?;
        match stored {
            Some(msg) if assignment.is_current_for(&msg) => {
                self.dispatcher.submit(msg).await?;
                self.metrics.record_reclaim(&self.config.name);
                info!(
                    topic = %self.config.name,
                    msg_id = %assignment.message_id,
                    worker_id = %assignment.worker_id,
                    "re-queued unacknowledged message"
                );
                Ok(true)
            }
            _ => {
                self.storage
                    .write_batch(WriteBatchOp::delete_assignment(assignment).into())?;
                debug!(
                    topic = %self.config.name,
                    msg_id = %assignment.message_id,
                    "dropped stale assignment record"
                );
                Ok(false)
            }
        }
    }

    /// Re-queue every message whose assignment is older than the topic's
    /// pending timeout at `now`. Failures are logged and skipped. Returns
    /// the number of messages re-queued.
    pub async fn reclaim_expired(&self, now: u64) -> usize {
        let timeout_ns = self.config.pending_timeout_ms.saturating_mul(1_000_000);
        let cutoff = now.saturating_sub(timeout_ns);
        if cutoff == 0 {
            return 0;
        }

        let expired = match self.storage.list_expired_assignments(&self.config.name, cutoff) {
            Ok(expired) => expired,
            Err(e) => {
                warn!(topic = %self.config.name, error = %e, "failed to list expired assignments");
                return 0;
            }
        };

        let mut reclaimed = 0;
        for assignment in &expired {
            match self.reclaim(assignment).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    topic = %self.config.name,
                    msg_id = %assignment.message_id,
                    error = %e,
                    "failed to re-queue expired message"
                ),
            }
        }
        if reclaimed > 0 {
            info!(topic = %self.config.name, reclaimed, "reclaimed timed-out messages");
        }
        reclaimed
    }

    pub fn stats(&self) -> TopicStats {
        let parked_workers = self
            .lock_waiters()
            .iter()
            .filter(|w| !w.is_abandoned())
            .count();
        TopicStats {
            name: self.config.name.clone(),
            ready: self.queue.len() as u64,
            parked_workers: parked_workers as u64,
            pending_timeout_ms: self.config.pending_timeout_ms,
        }
    }

    /// Drop every parked worker. Their pulls fail with `TopicClosed`.
    pub(crate) fn close_waiters(&self) -> usize {
        let mut waiters = self.lock_waiters();
        let count = waiters.len();
        waiters.clear();
        count
    }
}
