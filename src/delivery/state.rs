//! Delivery mode, controller state and the read-only snapshot handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::health::{DeliveryHealthStatus, HealthScore};

/// Active delivery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Provider-driven real-time delivery
    #[default]
    Push,
    /// Scheduled polling by the fallback poller
    Pull,
}

impl DeliveryMode {
    pub fn is_pull(&self) -> bool {
        matches!(self, DeliveryMode::Pull)
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Push => write!(f, "push"),
            DeliveryMode::Pull => write!(f, "pull"),
        }
    }
}

/// Mutable state owned by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackState {
    pub mode: DeliveryMode,
    /// True iff the poller task is scheduled
    pub is_active: bool,
    pub last_push_message_at: Option<DateTime<Utc>>,
    pub last_pull_message_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub health_score: HealthScore,
}

impl FallbackState {
    pub fn new(initial_health: u8) -> Self {
        Self {
            mode: DeliveryMode::Push,
            is_active: false,
            last_push_message_at: None,
            last_pull_message_at: None,
            consecutive_failures: 0,
            health_score: HealthScore::new(initial_health),
        }
    }
}

/// Running counters, reset only with the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatistics {
    pub push_messages: u64,
    pub pull_messages: u64,
    pub push_failures: u64,
    pub duplicates_rejected: u64,
    pub messages_evicted: u64,
    pub unconsumed_evicted: u64,
    pub poll_cycles: u64,
    pub poll_failures: u64,
    pub polls_skipped: u64,
    pub mode_transitions: u64,
}

/// Read-only view of the controller for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackSnapshot {
    pub tenant_id: Option<String>,
    pub mode: DeliveryMode,
    pub is_active: bool,
    pub health_score: u8,
    pub health_status: DeliveryHealthStatus,
    pub consecutive_failures: u32,
    /// Backing list length, consumed items included
    pub queue_depth: usize,
    /// Items not yet handed to the application
    pub pending_messages: usize,
    pub last_push_message_at: Option<DateTime<Utc>>,
    pub last_pull_message_at: Option<DateTime<Utc>>,
    pub stats: DeliveryStatistics,
}
