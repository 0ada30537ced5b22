use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::QueueFull;
use crate::message::{Message, MessageId};

/// In-memory FIFO of messages ready for dispatch.
///
/// A single `VecDeque` behind a mutex. Every operation takes the lock for
/// O(1) work (O(n) for `remove`) and never waits on anything else, so
/// `push` and `pop` never block on other queue users beyond that critical
/// section. Ordering is best-effort FIFO: `push_front` lets an undelivered
/// message jump back to the head.
pub struct ReadyQueue {
    items: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl ReadyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Message>> {
        // Every critical section is a single VecDeque call, so a poisoned
        // lock still guards a consistent deque.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert at the tail. Fails only when the queue is at capacity.
    pub fn push(&self, msg: Message) -> Result<(), QueueFull> {
        let mut items = self.items();
        if items.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        items.push_back(msg);
        Ok(())
    }

    /// Return a message to the head, ignoring capacity.
    pub fn push_front(&self, msg: Message) {
        self.items().push_front(msg);
    }

    /// Remove and return the head, or `None` when empty.
    pub fn pop(&self) -> Option<Message> {
        self.items().pop_front()
    }

    /// Drop a specific message. Returns whether it was queued.
    pub fn remove(&self, id: &MessageId) -> bool {
        let mut items = self.items();
        match items.iter().position(|m| m.id == *id) {
            Some(idx) => {
                items.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.items().iter().any(|m| m.id == *id)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}
