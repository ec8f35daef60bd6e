#![allow(dead_code)]

pub mod fetchers;
pub mod strategies;

pub use fetchers::*;

use chatflow_core::config::FallbackConfig;
use chatflow_core::delivery::InboundMessage;
use std::time::Duration;

/// One-second poll and health intervals
pub fn fast_config() -> FallbackConfig {
    FallbackConfig {
        polling_interval_ms: 1_000,
        health_check_interval_ms: 1_000,
        ..Default::default()
    }
}

pub fn message(id: &str) -> InboundMessage {
    InboundMessage::new(id, serde_json::json!({ "id": id, "text": format!("body of {id}") }))
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Sleep on the paused clock, letting every timer due in between fire
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
