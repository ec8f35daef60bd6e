//! # Message Queue
//!
//! Bounded, deduplicated holding area between ingestion and the application.
//!
//! Consumed items stay in the backing list until a batch eviction removes
//! them, so depth metrics stay stable between evictions. Because
//! [`MessageQueue::dequeue_next`] always takes the oldest unconsumed item,
//! consumed items always form a prefix of the list.
//!
//! ## Id reuse
//!
//! Evicting an item also forgets its id. A provider that later reuses that
//! id for a genuinely new message gets the new message accepted; a provider
//! that re-delivers the old message after eviction gets it accepted again.
//! Both are the accepted cost of keeping memory bounded.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

use super::message::{InboundMessage, MessageSource};
use crate::config::DeliveryTuning;

/// One ingested message awaiting (or past) application processing
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub message: InboundMessage,
    pub received_at: DateTime<Utc>,
    pub source: MessageSource,
    pub consumed: bool,
}

impl QueueItem {
    pub fn id(&self) -> &str {
        &self.message.id
    }
}

/// Result of a single enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Id already present in the dedup window; nothing changed
    Duplicate,
    Accepted {
        /// Items dropped by a batch eviction triggered by this insert
        evicted: usize,
        /// How many of the evicted items had never been consumed
        evicted_unconsumed: usize,
        /// Ids dropped by a dedup compaction triggered by this insert
        forgotten: usize,
    },
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted { .. })
    }
}

/// A drain handler failed; the failing message stays consumed
#[derive(Debug, Error)]
#[error("Drain handler failed on message '{message_id}' after {processed} processed: {error}")]
pub struct DrainError<E> {
    pub processed: usize,
    pub message_id: String,
    pub error: E,
}

/// Bounds applied by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub capacity: usize,
    pub eviction_batch: usize,
    pub dedup_capacity: usize,
    pub dedup_retain: usize,
}

impl From<&DeliveryTuning> for QueueLimits {
    fn from(tuning: &DeliveryTuning) -> Self {
        Self {
            capacity: tuning.queue_capacity,
            eviction_batch: tuning.queue_eviction_batch,
            dedup_capacity: tuning.dedup_capacity,
            dedup_retain: tuning.dedup_retain,
        }
    }
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self::from(&DeliveryTuning::default())
    }
}

#[derive(Debug, Default)]
struct DedupWindow {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupWindow {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: &str) {
        if self.ids.insert(id.to_string()) {
            self.order.push_back(id.to_string());
        }
    }

    fn remove_all(&mut self, evicted: &HashSet<String>) {
        if evicted.is_empty() {
            return;
        }
        self.ids.retain(|id| !evicted.contains(id));
        self.order.retain(|id| !evicted.contains(id));
    }

    /// Keep only the `retain` most recent ids, returning how many were dropped
    fn compact(&mut self, retain: usize) -> usize {
        let mut forgotten = 0;
        while self.order.len() > retain {
            if let Some(id) = self.order.pop_front() {
                self.ids.remove(&id);
                forgotten += 1;
            }
        }
        forgotten
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

/// Bounded FIFO of [`QueueItem`]s with an id-based dedup window
#[derive(Debug)]
pub struct MessageQueue {
    limits: QueueLimits,
    items: VecDeque<QueueItem>,
    /// Index of the first unconsumed item
    next_unconsumed: usize,
    dedup: DedupWindow,
}

impl MessageQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            items: VecDeque::with_capacity(limits.capacity + 1),
            next_unconsumed: 0,
            dedup: DedupWindow::default(),
        }
    }

    /// Append a message unless its id is in the dedup window
    pub fn enqueue(&mut self, message: InboundMessage, source: MessageSource) -> EnqueueOutcome {
        if self.dedup.contains(&message.id) {
            debug!(message_id = %message.id, source = %source, "Duplicate message rejected");
            return EnqueueOutcome::Duplicate;
        }

        self.dedup.insert(&message.id);
        self.items.push_back(QueueItem {
            message,
            received_at: Utc::now(),
            source,
            consumed: false,
        });

        let (evicted, evicted_unconsumed) = if self.items.len() > self.limits.capacity {
            self.evict_oldest()
        } else {
            (0, 0)
        };

        let forgotten = if self.dedup.len() > self.limits.dedup_capacity {
            self.dedup.compact(self.limits.dedup_retain)
        } else {
            0
        };

        EnqueueOutcome::Accepted {
            evicted,
            evicted_unconsumed,
            forgotten,
        }
    }

    fn evict_oldest(&mut self) -> (usize, usize) {
        let count = self.limits.eviction_batch.min(self.items.len());
        let evicted_ids: HashSet<String> = self
            .items
            .drain(..count)
            .map(|item| item.message.id)
            .collect();
        let evicted_unconsumed = count.saturating_sub(self.next_unconsumed);
        self.next_unconsumed = self.next_unconsumed.saturating_sub(count);
        self.dedup.remove_all(&evicted_ids);

        if evicted_unconsumed > 0 {
            warn!(
                evicted = count,
                evicted_unconsumed = evicted_unconsumed,
                "Queue overflow evicted messages the application never consumed"
            );
        }
        (count, evicted_unconsumed)
    }

    /// Mark the oldest unconsumed item consumed and return it
    pub fn dequeue_next(&mut self) -> Option<QueueItem> {
        let item = self.items.get_mut(self.next_unconsumed)?;
        item.consumed = true;
        self.next_unconsumed += 1;
        Some(item.clone())
    }

    /// Hand every unconsumed message to `handler`, oldest first.
    ///
    /// Stops at the first handler error. The message that failed stays
    /// consumed and later messages stay pending for the next drain.
    pub fn drain_all<F, E>(&mut self, mut handler: F) -> Result<usize, DrainError<E>>
    where
        F: FnMut(&InboundMessage, MessageSource) -> Result<(), E>,
    {
        let mut processed = 0;
        while let Some(item) = self.dequeue_next() {
            if let Err(error) = handler(&item.message, item.source) {
                return Err(DrainError {
                    processed,
                    message_id: item.message.id,
                    error,
                });
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Backing list length, consumed items included
    pub fn depth(&self) -> usize {
        self.items.len()
    }

    /// Items not yet handed to the application
    pub fn pending(&self) -> usize {
        self.items.len() - self.next_unconsumed
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.dedup.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item and forget every id
    pub fn clear(&mut self) {
        self.items.clear();
        self.next_unconsumed = 0;
        self.dedup.clear();
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(QueueLimits::default())
    }
}
