//! Pull-side boundary to the data-access layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use super::message::InboundMessage;

/// Transient fetch failures, absorbed by the poller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Message source error: {0}")]
    Source(String),
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn source_error(error: impl std::fmt::Display) -> Self {
        Self::Source(error.to_string())
    }
}

/// Fetches recent messages for a tenant
///
/// Must be safe to call repeatedly and return an empty list, not an error,
/// when nothing is new.
#[async_trait]
pub trait MessageFetcher: Send + Sync + 'static {
    /// `since` is the newest message timestamp the poller has seen so far.
    /// Sources that support a cursor can use it to skip messages already
    /// delivered; others may ignore it.
    async fn fetch_recent_messages(
        &self,
        tenant_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, FetchError>;
}

/// Fetcher for sessions that never poll, always returning nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFetcher;

#[async_trait]
impl MessageFetcher for NoopFetcher {
    async fn fetch_recent_messages(
        &self,
        _tenant_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, FetchError> {
        Ok(Vec::new())
    }
}
