use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::broker::topic::Topic;
use crate::error::{PullError, PushError};
use crate::message::Message;

/// A worker waiting for the next message of a topic.
#[derive(Debug)]
pub(crate) struct PullRequest {
    pub(crate) worker_id: String,
    pub(crate) reply: oneshot::Sender<Result<Message, PullError>>,
}

impl PullRequest {
    /// The requesting worker stopped waiting (timeout or cancelled future).
    pub(crate) fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// A message handed back to the dispatch loop for re-queueing.
#[derive(Debug)]
pub(crate) struct Redispatch {
    pub(crate) message: Message,
    pub(crate) reply: oneshot::Sender<Result<(), PushError>>,
}

/// Receiving half of a topic's dispatch channels, owned by its loop.
pub(crate) struct DispatchInbox {
    requests: mpsc::Receiver<PullRequest>,
    redispatch: mpsc::Receiver<Redispatch>,
}

/// Cloneable handle to a topic's dispatch loop.
///
/// Both channels are bounded. A pull waits for room in the request channel,
/// while a re-queue on a full channel is reported as `Overloaded`.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    topic: String,
    requests: mpsc::Sender<PullRequest>,
    redispatch: mpsc::Sender<Redispatch>,
}

impl Dispatcher {
    pub(crate) fn channel(topic: &str, capacity: usize) -> (Dispatcher, DispatchInbox) {
        let capacity = capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (redispatch_tx, redispatch_rx) = mpsc::channel(capacity);
        let dispatcher = Dispatcher {
            topic: topic.to_string(),
            requests: request_tx,
            redispatch: redispatch_tx,
        };
        let inbox = DispatchInbox {
            requests: request_rx,
            redispatch: redispatch_rx,
        };
        (dispatcher, inbox)
    }

    /// Wait until the topic hands this worker a message.
    ///
    /// Waits indefinitely, including for room in the request channel.
    /// Dropping the returned future withdraws the request; a message claimed
    /// for it in the meantime is put back.
    pub async fn request_next(&self, worker_id: &str) -> Result<Message, PullError> {
        let (reply, rx) = oneshot::channel();
        let request = PullRequest {
            worker_id: worker_id.to_string(),
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| PullError::TopicClosed(self.topic.clone()))?;
        rx.await
            .map_err(|_| PullError::TopicClosed(self.topic.clone()))?
    }

    /// Re-queue `message` through the dispatch loop and wait until it is durable.
    pub async fn submit(&self, message: Message) -> Result<(), PushError> {
        let (reply, rx) = oneshot::channel();
        self.redispatch
            .try_send(Redispatch { message, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PushError::Overloaded(self.topic.clone()),
                mpsc::error::TrySendError::Closed(_) => PushError::TopicClosed(self.topic.clone()),
            })?;
        rx.await
            .map_err(|_| PushError::TopicClosed(self.topic.clone()))?
    }
}

/// Serve a topic's dispatch channels until shutdown is signalled or the
/// broker goes away. Re-queues are drained before pull requests so a
/// reclaimed message is visible to the next waiting worker.
pub(crate) async fn run_dispatch_loop(
    topic: Arc<Topic>,
    mut inbox: DispatchInbox,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(topic = %topic.name(), "dispatch loop started");

    if !*shutdown.borrow_and_update() {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(Redispatch { message, reply }) = inbox.redispatch.recv() => {
                    let _ = reply.send(topic.push_message(message));
                }
                Some(request) = inbox.requests.recv() => topic.pop(request),
            }
        }
    }

    let dropped = topic.close_waiters();
    if dropped > 0 {
        debug!(topic = %topic.name(), dropped, "released parked workers");
    }
    info!(topic = %topic.name(), "dispatch loop stopped");
}
