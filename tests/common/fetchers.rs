use async_trait::async_trait;
use chatflow_core::delivery::{FetchError, InboundMessage, MessageFetcher};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A fetch call as the fetcher saw it
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub tenant_id: String,
    pub since: Option<DateTime<Utc>>,
}

/// Fetcher that replays scripted responses, then returns empty batches
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Vec<InboundMessage>, FetchError>>>,
    calls: Mutex<Vec<FetchCall>>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push_batch(&self, messages: Vec<InboundMessage>) {
        self.responses.lock().push_back(Ok(messages));
    }

    pub fn push_error(&self, error: &str) {
        self.responses
            .lock()
            .push_back(Err(FetchError::source_error(error)));
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl MessageFetcher for ScriptedFetcher {
    async fn fetch_recent_messages(
        &self,
        tenant_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, FetchError> {
        self.calls.lock().push(FetchCall {
            tenant_id: tenant_id.to_string(),
            since,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses.lock().pop_front().unwrap_or(Ok(Vec::new()))
    }
}
