//! # Fallback Poller
//!
//! Pulls messages from a [`MessageFetcher`] on a fixed interval while the
//! controller is in pull mode.
//!
//! Each start spawns one task tagged with a fresh generation number. The task
//! reports through a [`PollSink`] and stops as soon as the sink declines a
//! call, so a task from an earlier generation can never feed the queue after
//! the poller was stopped or restarted.
//!
//! Fetches run inside the task, one at a time, bounded by the fetch timeout.
//! Ticks that come due while a fetch is in flight are skipped, and after a
//! failed fetch the next attempt waits out the configured retry backoff.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::InboundMessage;
use super::source::{FetchError, MessageFetcher};
use crate::config::{FallbackConfig, RetryPolicy};

/// What the next fetch should ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCursor {
    pub tenant_id: String,
    pub since: Option<DateTime<Utc>>,
}

/// Result of one completed fetch
#[derive(Debug, Clone, PartialEq)]
pub struct PollCycleResult {
    pub outcome: Result<Vec<InboundMessage>, FetchError>,
    pub duration: Duration,
    /// Consecutive failed fetches including this one; 0 on success
    pub consecutive_failures: u32,
}

/// Why a tick did not fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Waiting out retry backoff after failed fetches
    Backoff { retry_in: Duration },
    /// The previous fetch ran past one or more ticks
    Overrun { missed_ticks: u64 },
}

/// Receiver of poll results
///
/// Every method returns whether the task with `generation` should keep
/// running; returning `None`/`false` ends it.
pub trait PollSink: Send + Sync + 'static {
    fn begin_cycle(&self, generation: u64) -> Option<PollCursor>;
    fn complete_cycle(&self, generation: u64, result: PollCycleResult) -> bool;
    fn cycle_skipped(&self, generation: u64, reason: SkipReason) -> bool;
}

/// Timing settings copied out of [`FallbackConfig`]
#[derive(Debug, Clone, Copy)]
struct PollerSettings {
    polling_interval: Duration,
    fetch_timeout: Duration,
    retry: RetryPolicy,
}

/// Scheduled pull task owned by the controller
pub struct FallbackPoller {
    poller_id: Uuid,
    settings: PollerSettings,
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl std::fmt::Debug for FallbackPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPoller")
            .field("poller_id", &self.poller_id)
            .field("polling_interval", &self.settings.polling_interval)
            .field("fetch_timeout", &self.settings.fetch_timeout)
            .field("generation", &self.generation)
            .field("is_active", &self.is_active())
            .finish()
    }
}

impl FallbackPoller {
    pub fn new(config: &FallbackConfig) -> Self {
        Self {
            poller_id: Uuid::new_v4(),
            settings: PollerSettings {
                polling_interval: config.polling_interval(),
                fetch_timeout: config.fetch_timeout(),
                retry: config.retry_policy(),
            },
            handle: None,
            generation: 0,
        }
    }

    /// Spawn the poll task on `runtime`; a no-op when already active.
    ///
    /// Returns the generation of the running task.
    pub fn start<S: PollSink>(
        &mut self,
        runtime: &Handle,
        fetcher: Arc<dyn MessageFetcher>,
        sink: S,
    ) -> u64 {
        if self.handle.is_some() {
            return self.generation;
        }

        self.generation += 1;
        let generation = self.generation;
        let poller_id = self.poller_id;
        let settings = self.settings;

        info!(
            poller_id = %poller_id,
            generation = generation,
            polling_interval_ms = settings.polling_interval.as_millis() as u64,
            "Starting fallback poller"
        );

        self.handle = Some(runtime.spawn(run_poll_loop(
            poller_id, generation, settings, fetcher, sink,
        )));
        generation
    }

    /// Abort the poll task; a no-op when already stopped
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!(
                poller_id = %self.poller_id,
                generation = self.generation,
                "Stopping fallback poller"
            );
            handle.abort();
        }
    }

    /// Whether a poll task is currently scheduled
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if `generation` belongs to the currently scheduled task
    pub fn owns(&self, generation: u64) -> bool {
        self.is_active() && self.generation == generation
    }

    pub fn poller_id(&self) -> Uuid {
        self.poller_id
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_poll_loop<S: PollSink>(
    poller_id: Uuid,
    generation: u64,
    settings: PollerSettings,
    fetcher: Arc<dyn MessageFetcher>,
    sink: S,
) {
    let interval = settings.polling_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut consecutive_failures: u32 = 0;
    let mut next_attempt_at: Option<Instant> = None;

    loop {
        let tick_at = ticker.tick().await;

        if let Some(retry_at) = next_attempt_at {
            if tick_at < retry_at {
                let reason = SkipReason::Backoff {
                    retry_in: retry_at - tick_at,
                };
                if !sink.cycle_skipped(generation, reason) {
                    break;
                }
                continue;
            }
        }

        let Some(cursor) = sink.begin_cycle(generation) else {
            break;
        };

        debug!(
            poller_id = %poller_id,
            tenant_id = %cursor.tenant_id,
            since = ?cursor.since,
            "Starting fallback polling cycle"
        );

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            settings.fetch_timeout,
            fetcher.fetch_recent_messages(&cursor.tenant_id, cursor.since),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Timeout(settings.fetch_timeout)),
        };
        let duration = started.elapsed();

        match &outcome {
            Ok(_) => {
                consecutive_failures = 0;
                next_attempt_at = None;
            }
            Err(error) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                let delay = settings.retry.delay(consecutive_failures);
                next_attempt_at = Some(tick_at + delay);
                warn!(
                    poller_id = %poller_id,
                    tenant_id = %cursor.tenant_id,
                    error = %error,
                    consecutive_failures = consecutive_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Fallback fetch failed"
                );
            }
        }

        let result = PollCycleResult {
            outcome,
            duration,
            consecutive_failures,
        };
        if !sink.complete_cycle(generation, result) {
            break;
        }

        let overran = Instant::now().saturating_duration_since(tick_at);
        if overran >= interval {
            let missed_ticks = (overran.as_nanos() / interval.as_nanos().max(1)) as u64;
            ticker.reset();
            if !sink.cycle_skipped(generation, SkipReason::Overrun { missed_ticks }) {
                break;
            }
        }
    }

    debug!(poller_id = %poller_id, generation = generation, "Fallback poll loop exited");
}
