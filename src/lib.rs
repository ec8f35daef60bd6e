#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Chatflow Core
//!
//! Reliable inbound message delivery for WhatsApp tenant sessions.
//!
//! ## Overview
//!
//! Provider webhooks (push) are the primary delivery channel but fail
//! silently: sockets drop, webhooks stop arriving, sessions expire. This crate
//! tracks the health of the push channel and, when it degrades, falls back to
//! polling a message source (pull) until push recovers. Messages from both
//! channels land in one bounded, de-duplicated queue.
//!
//! ## Module Organization
//!
//! - [`delivery`] - Fallback controller, poller, health scoring and message queue
//! - [`config`] - Tunables and layered configuration loading
//! - [`events`] - Structured delivery events for observability
//! - [`error`] - Errors returned to callers
//! - [`logging`] - `tracing` subscriber setup
//! - [`constants`] - Default thresholds and event names
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatflow_core::config::FallbackConfig;
//! use chatflow_core::delivery::{FallbackController, InboundMessage, NoopFetcher};
//!
//! # async fn example() -> chatflow_core::Result<()> {
//! let controller = FallbackController::new(FallbackConfig::default(), Arc::new(NoopFetcher))?;
//! controller.initialize("tenant-42")?;
//!
//! controller.notify_push_message(InboundMessage::new("wamid.1", serde_json::json!({})))?;
//! while let Some(item) = controller.get_next_message()? {
//!     println!("{} via {}", item.id(), item.source);
//! }
//!
//! controller.destroy();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{ConfigLoader, ConfigurationError, DeliveryTuning, FallbackConfig, RetryPolicy};
pub use delivery::{
    DeliveryHealthStatus, DeliveryMode, FallbackController, FallbackSnapshot, FetchError,
    InboundMessage, MessageFetcher, MessageSource, QueueItem,
};
pub use error::{DeliveryError, Result};
pub use events::{DeliveryEvent, EventPublisher, PublishedEvent, TransitionReason};
pub use logging::init_structured_logging;
