//! # Delivery Events
//!
//! Typed records of every decision the delivery engine makes. They mirror the
//! `tracing` output at the same decision points but arrive as data, so an
//! observability layer can count mode transitions or chart health without
//! parsing log lines.

pub mod publisher;

use serde::{Deserialize, Serialize};

use crate::constants::events as names;
use crate::delivery::{DeliveryMode, MessageSource};

pub use publisher::{EventPublisher, PublishedEvent};

/// Why a mode transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Consecutive push failures reached the threshold
    FailureThreshold,
    /// Health score fell below the critical threshold
    CriticalHealth,
    /// A push message arrived while polling
    PushRecovered,
    /// The health monitor's optimistic recovery completed
    HealthRecovered,
    /// Operator override
    Forced,
}

/// Structured event emitted by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Initialized {
        tenant_id: String,
        mode: DeliveryMode,
        health_score: u8,
    },
    ModeChanged {
        tenant_id: String,
        from: DeliveryMode,
        to: DeliveryMode,
        reason: TransitionReason,
        health_score: u8,
        consecutive_failures: u32,
    },
    HealthChanged {
        tenant_id: String,
        previous: u8,
        current: u8,
        cause: String,
    },
    MessageEnqueued {
        tenant_id: String,
        message_id: String,
        source: MessageSource,
        queue_depth: usize,
    },
    DuplicateRejected {
        tenant_id: String,
        message_id: String,
        source: MessageSource,
    },
    QueueEvicted {
        tenant_id: String,
        evicted: usize,
        queue_depth: usize,
    },
    DedupCompacted {
        tenant_id: String,
        forgotten: usize,
        retained: usize,
    },
    PollCompleted {
        tenant_id: String,
        fetched: usize,
        enqueued: usize,
        duration_ms: u64,
    },
    PollFailed {
        tenant_id: String,
        error: String,
        consecutive_failures: u32,
    },
    PollSkipped {
        tenant_id: String,
        reason: String,
        ticks: u64,
    },
    Destroyed {
        tenant_id: Option<String>,
    },
}

impl DeliveryEvent {
    /// Dotted event name, see [`crate::constants::events`]
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryEvent::Initialized { .. } => names::INITIALIZED,
            DeliveryEvent::ModeChanged { .. } => names::MODE_CHANGED,
            DeliveryEvent::HealthChanged { .. } => names::HEALTH_CHANGED,
            DeliveryEvent::MessageEnqueued { .. } => names::MESSAGE_ENQUEUED,
            DeliveryEvent::DuplicateRejected { .. } => names::DUPLICATE_REJECTED,
            DeliveryEvent::QueueEvicted { .. } => names::QUEUE_EVICTED,
            DeliveryEvent::DedupCompacted { .. } => names::DEDUP_COMPACTED,
            DeliveryEvent::PollCompleted { .. } => names::POLL_COMPLETED,
            DeliveryEvent::PollFailed { .. } => names::POLL_FAILED,
            DeliveryEvent::PollSkipped { .. } => names::POLL_SKIPPED,
            DeliveryEvent::Destroyed { .. } => names::DESTROYED,
        }
    }
}
