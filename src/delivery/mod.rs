//! # Delivery Engine
//!
//! Keeps inbound messages flowing for a tenant session when the push channel
//! is unreliable. The [`FallbackController`] watches push activity, switches
//! to the [`FallbackPoller`] when push looks broken, and feeds both channels
//! into a bounded, de-duplicating [`MessageQueue`].

pub mod controller;
pub mod health;
pub mod message;
pub mod poller;
pub mod queue;
pub mod source;
pub mod state;

pub use controller::FallbackController;
pub use health::{DeliveryHealthStatus, HealthAction, HealthMonitor, HealthScore, Silence};
pub use message::{InboundMessage, MessageError, MessageSource};
pub use poller::{FallbackPoller, PollCursor, PollCycleResult, PollSink, SkipReason};
pub use queue::{DrainError, EnqueueOutcome, MessageQueue, QueueItem, QueueLimits};
pub use source::{FetchError, MessageFetcher, NoopFetcher};
pub use state::{DeliveryMode, DeliveryStatistics, FallbackSnapshot, FallbackState};
