//! # Delivery Constants
//!
//! Tuning constants that define the operational boundaries of the delivery
//! engine. Every value here is the default of an overridable field in
//! [`DeliveryTuning`](crate::config::DeliveryTuning); none of them is read
//! directly by the state machine.
//!
//! The values are empirically chosen. Their only validated property is the
//! behavior covered by the controller and queue tests, so change them through
//! configuration rather than here.

/// Structured event names published by the controller
pub mod events {
    pub const INITIALIZED: &str = "delivery.initialized";
    pub const DESTROYED: &str = "delivery.destroyed";
    pub const MODE_CHANGED: &str = "delivery.mode_changed";
    pub const HEALTH_CHANGED: &str = "delivery.health_changed";
    pub const MESSAGE_ENQUEUED: &str = "queue.message_enqueued";
    pub const DUPLICATE_REJECTED: &str = "queue.duplicate_rejected";
    pub const QUEUE_EVICTED: &str = "queue.evicted";
    pub const DEDUP_COMPACTED: &str = "queue.dedup_compacted";
    pub const POLL_COMPLETED: &str = "poller.completed";
    pub const POLL_FAILED: &str = "poller.failed";
    pub const POLL_SKIPPED: &str = "poller.skipped";
}

/// Queue and dedup window bounds
pub mod queue {
    /// Queue length above which a batch eviction runs
    pub const CAPACITY: usize = 100;
    /// Number of oldest items dropped per eviction
    pub const EVICTION_BATCH: usize = 50;
    /// Dedup set size above which it is compacted
    pub const DEDUP_CAPACITY: usize = 200;
    /// Most recent ids kept after a dedup compaction
    pub const DEDUP_RETAIN: usize = 100;
}

/// Health score bounds, deltas and thresholds
pub mod health {
    pub const MIN_SCORE: u8 = 0;
    pub const MAX_SCORE: u8 = 100;
    pub const INITIAL_SCORE: u8 = 100;
    /// Score assigned by an operator override
    pub const NEUTRAL_SCORE: u8 = 70;

    pub const PUSH_SUCCESS_REWARD: u8 = 10;
    pub const PUSH_FAILURE_PENALTY: u8 = 20;
    /// Silence is weaker evidence than an explicit error
    pub const PUSH_SILENCE_PENALTY: u8 = 5;
    pub const PULL_SILENCE_PENALTY: u8 = 3;
    pub const POLL_FAILURE_PENALTY: u8 = 5;

    /// Consecutive push failures that switch delivery to polling
    pub const FAILURE_THRESHOLD: u32 = 2;
    /// Below this score delivery switches to polling regardless of failures
    pub const CRITICAL_THRESHOLD: u8 = 30;
    /// Above this score polling attempts to recover to push
    pub const RECOVERY_THRESHOLD: u8 = 80;
    /// Lower bound of the `Degraded` band
    pub const DEGRADED_THRESHOLD: u8 = 50;

    pub const PUSH_SILENCE_THRESHOLD_MS: u64 = 60_000;
    pub const PULL_SILENCE_THRESHOLD_MS: u64 = 30_000;
}

/// Defaults for the externally recognized configuration options
pub mod defaults {
    pub const POLLING_INTERVAL_MS: u64 = 5_000;
    pub const MAX_RETRIES: u32 = 5;
    pub const BACKOFF_MULTIPLIER: f64 = 1.5;
    pub const MAX_BACKOFF_DELAY_MS: u64 = 30_000;
    pub const HEALTH_CHECK_INTERVAL_MS: u64 = 10_000;
    pub const FETCH_TIMEOUT_MS: u64 = 10_000;
    pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;
}
