//! Queue manager for work-queue destinations
//!
//! Each queue keeps a FIFO backlog. Messages enqueued before any dequeuer
//! exists stay in the backlog until one attaches, and every message is handed
//! to exactly one dequeuer.

use crate::broker::Delivery;
use crate::error::{EventError, Result};
use crate::message::MAX_MESSAGE_SIZE;
use crate::selector::SelectorExpr;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total messages enqueued
    pub messages_enqueued: u64,
    /// Total messages dequeued
    pub messages_dequeued: u64,
    /// Current queue depth
    pub current_depth: usize,
    /// Messages dropped due to full queue
    pub messages_dropped: u64,
}

struct QueueState {
    backlog: VecDeque<Delivery>,
    notify: Arc<Notify>,
    stats: QueueStats,
}

impl QueueState {
    fn new() -> Self {
        Self {
            backlog: VecDeque::new(),
            notify: Arc::new(Notify::new()),
            stats: QueueStats::default(),
        }
    }
}

/// Queue manager shared by a broker and its queue consumers
#[derive(Clone)]
pub struct QueueManager {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    /// Maximum backlog per queue
    max_queue_size: usize,
}

impl QueueManager {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            max_queue_size,
        }
    }

    /// Append a message to `queue` and wake waiting dequeuers
    pub async fn enqueue(&self, queue: &str, delivery: Delivery) -> Result<()> {
        if delivery.payload.len() > MAX_MESSAGE_SIZE {
            return Err(EventError::broker("Message exceeds 1MB limit"));
        }

        let mut queues = self.queues.lock().await;
        let state = queues
            .entry(queue.to_owned())
            .or_insert_with(QueueState::new);

        if state.backlog.len() >= self.max_queue_size {
            state.stats.messages_dropped += 1;
            warn!("Queue full: {}, message dropped", queue);
            return Err(EventError::broker(format!("queue {queue} is full")));
        }

        state.backlog.push_back(delivery);
        state.stats.messages_enqueued += 1;
        state.stats.current_depth = state.backlog.len();
        state.notify.notify_waiters();
        debug!("Enqueued message on queue: {} (depth {})", queue, state.backlog.len());
        Ok(())
    }

    /// Take the oldest message matching `selector`, waiting up to `timeout`.
    ///
    /// `None` as timeout waits indefinitely. Returns `Ok(None)` on timeout.
    pub async fn dequeue(
        &self,
        queue: &str,
        selector: Option<&SelectorExpr>,
        timeout: Option<Duration>,
    ) -> Result<Option<Delivery>> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let notify = self.notifier(queue).await;
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register interest before looking so an enqueue in between is not missed
            notified.as_mut().enable();

            if let Some(delivery) = self.take_matching(queue, selector).await {
                return Ok(Some(delivery));
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn notifier(&self, queue: &str) -> Arc<Notify> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .entry(queue.to_owned())
            .or_insert_with(QueueState::new);
        Arc::clone(&state.notify)
    }

    async fn take_matching(&self, queue: &str, selector: Option<&SelectorExpr>) -> Option<Delivery> {
        let mut queues = self.queues.lock().await;
        let state = queues.get_mut(queue)?;
        let index = state
            .backlog
            .iter()
            .position(|d| selector.is_none_or(|expr| expr.matches(&d.headers)))?;
        let delivery = state.backlog.remove(index)?;
        state.stats.messages_dequeued += 1;
        state.stats.current_depth = state.backlog.len();
        debug!("Dequeued message from queue: {}", queue);
        Some(delivery)
    }

    /// Number of messages waiting on `queue`
    pub async fn depth(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map_or(0, |state| state.backlog.len())
    }

    /// Get queue statistics
    pub async fn get_stats(&self, queue: &str) -> Option<QueueStats> {
        let queues = self.queues.lock().await;
        queues.get(queue).map(|state| state.stats.clone())
    }

    /// Number of queues that have been used
    pub async fn queue_count(&self) -> usize {
        self.queues.lock().await.len()
    }

    /// Remove a queue and its backlog, waking anyone waiting on it
    pub async fn remove_queue(&self, queue: &str) -> usize {
        let mut queues = self.queues.lock().await;
        match queues.remove(queue) {
            Some(state) => {
                state.notify.notify_waiters();
                debug!("Removed queue: {}", queue);
                state.backlog.len()
            }
            None => 0,
        }
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(10_000)
    }
}
