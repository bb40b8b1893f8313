// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Bounded drop-oldest event stream
//!
//! Multi-producer, single-consumer, FIFO. When the queue is full the oldest
//! unconsumed item is discarded to admit the new one. Drops are never
//! silent: the receiver gets one [`Delivery::Overflow`] per overflow
//! episode, ahead of the surviving items. An episode starts with the first
//! drop and ends when the receiver observes the overflow marker.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Item handed to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Event(T),
    /// `dropped` items were discarded since the last delivery
    Overflow { dropped: u64 },
}

/// Result of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queued after discarding the oldest item
    DroppedOldest,
    /// The receiver is gone; the item was discarded
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

struct Queue<T> {
    items: VecDeque<T>,
    capacity: usize,
    senders: usize,
    receiver_alive: bool,
    /// Drops in the current, not yet reported, episode
    pending_drops: u64,
    episodes: u64,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    notify: Notify,
}

/// Create a bounded stream holding at most `capacity` items (minimum 1)
pub fn bounded<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        queue: Mutex::new(Queue {
            items: VecDeque::with_capacity(capacity),
            capacity,
            senders: 1,
            receiver_alive: true,
            pending_drops: 0,
            episodes: 0,
        }),
        notify: Notify::new(),
    });

    (
        EventSender { shared: Arc::clone(&shared) },
        EventReceiver { shared },
    )
}

pub struct EventSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> EventSender<T> {
    /// Enqueue without waiting
    pub fn send(&self, item: T) -> SendOutcome {
        let outcome = {
            let mut queue = self.shared.queue.lock();
            if !queue.receiver_alive {
                return SendOutcome::Closed;
            }

            let outcome = if queue.items.len() >= queue.capacity {
                queue.items.pop_front();
                if queue.pending_drops == 0 {
                    queue.episodes += 1;
                }
                queue.pending_drops += 1;
                SendOutcome::DroppedOldest
            } else {
                SendOutcome::Queued
            };
            queue.items.push_back(item);
            outcome
        };

        self.shared.notify.notify_one();
        outcome
    }

    pub fn is_closed(&self) -> bool {
        !self.shared.queue.lock().receiver_alive
    }
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        self.shared.queue.lock().senders += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for EventSender<T> {
    fn drop(&mut self) {
        let last = {
            let mut queue = self.shared.queue.lock();
            queue.senders -= 1;
            queue.senders == 0
        };
        if last {
            self.shared.notify.notify_one();
        }
    }
}

pub struct EventReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> EventReceiver<T> {
    /// Wait for the next delivery. Returns `None` once every sender is
    /// gone and the queue is drained.
    ///
    /// Cancel safe: an item is only removed when it is returned.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        loop {
            match self.try_recv() {
                Ok(delivery) => return Some(delivery),
                Err(TryRecvError::Closed) => return None,
                Err(TryRecvError::Empty) => self.shared.notify.notified().await,
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Delivery<T>, TryRecvError> {
        let mut queue = self.shared.queue.lock();

        if queue.pending_drops > 0 {
            let dropped = std::mem::take(&mut queue.pending_drops);
            return Ok(Delivery::Overflow { dropped });
        }
        if let Some(item) = queue.items.pop_front() {
            return Ok(Delivery::Event(item));
        }
        if queue.senders == 0 {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of overflow episodes since creation
    pub fn overflow_episodes(&self) -> u64 {
        self.shared.queue.lock().episodes
    }
}

impl<T> Drop for EventReceiver<T> {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.receiver_alive = false;
        queue.items.clear();
    }
}
