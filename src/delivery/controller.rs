//! # Fallback Controller
//!
//! Single authority over the delivery mode and health score of one tenant
//! session, and the only component that starts or stops the poller.
//!
//! ## State machine
//!
//! ```text
//!            consecutive failures >= threshold
//!            or health < critical (monitor)
//!   +------+ -------------------------------> +------+
//!   | push |                                  | pull |  poller running
//!   +------+ <------------------------------- +------+
//!            any push message, or monitor
//!            recovery (health > recovery and failures
//!            decremented to 0)
//! ```
//!
//! `destroy` leaves the machine entirely; it is not a state within it.
//!
//! All state sits behind one mutex, so push notifications, poll results,
//! health ticks and operator overrides are serialized. The mutex is never
//! held across an `.await` or while a drain handler runs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::health::{silence_penalty, threshold_action, HealthAction, HealthMonitor, HealthScore};
use super::message::{InboundMessage, MessageSource};
use super::poller::{FallbackPoller, PollCursor, PollCycleResult, PollSink, SkipReason};
use super::queue::{DrainError, EnqueueOutcome, MessageQueue, QueueItem, QueueLimits};
use super::source::MessageFetcher;
use super::state::{DeliveryMode, DeliveryStatistics, FallbackSnapshot, FallbackState};
use crate::config::FallbackConfig;
use crate::error::{DeliveryError, Result};
use crate::events::{DeliveryEvent, EventPublisher, PublishedEvent, TransitionReason};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Active { tenant_id: String },
    Destroyed { tenant_id: Option<String> },
}

impl Lifecycle {
    fn tenant_id(&self) -> Option<&str> {
        match self {
            Lifecycle::Created => None,
            Lifecycle::Active { tenant_id } => Some(tenant_id),
            Lifecycle::Destroyed { tenant_id } => tenant_id.as_deref(),
        }
    }

    fn require_active(&self, operation: &'static str) -> Result<String> {
        match self {
            Lifecycle::Active { tenant_id } => Ok(tenant_id.clone()),
            Lifecycle::Created => Err(DeliveryError::NotInitialized { operation }),
            Lifecycle::Destroyed { .. } => Err(DeliveryError::Destroyed { operation }),
        }
    }
}

#[derive(Debug)]
struct ControllerInner {
    lifecycle: Lifecycle,
    state: FallbackState,
    queue: MessageQueue,
    poller: FallbackPoller,
    monitor: HealthMonitor,
    stats: DeliveryStatistics,
    last_push_instant: Option<Instant>,
    last_pull_instant: Option<Instant>,
    mode_entered_at: Instant,
    /// Newest provider timestamp seen by the poller
    poll_cursor: Option<DateTime<Utc>>,
    /// Runtime captured by `initialize`; background tasks are spawned here
    runtime: Option<Handle>,
}

struct ControllerShared {
    controller_id: Uuid,
    config: FallbackConfig,
    fetcher: Arc<dyn MessageFetcher>,
    events: EventPublisher,
    self_ref: Weak<ControllerShared>,
    inner: Mutex<ControllerInner>,
}

/// Self-healing push/pull delivery controller for one tenant session
///
/// Cheap to clone; clones share the same session. Background tasks only hold
/// weak references, so dropping the last clone also cancels them.
#[derive(Clone)]
pub struct FallbackController {
    shared: Arc<ControllerShared>,
}

impl std::fmt::Debug for FallbackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("FallbackController")
            .field("controller_id", &self.shared.controller_id)
            .field("lifecycle", &inner.lifecycle)
            .field("mode", &inner.state.mode)
            .field("health_score", &inner.state.health_score)
            .finish()
    }
}

impl FallbackController {
    /// Validate `config` and build an uninitialized controller
    pub fn new(config: FallbackConfig, fetcher: Arc<dyn MessageFetcher>) -> Result<Self> {
        config.validate()?;

        let controller_id = Uuid::new_v4();
        let inner = ControllerInner {
            lifecycle: Lifecycle::Created,
            state: FallbackState::new(config.tuning.initial_health),
            queue: MessageQueue::new(QueueLimits::from(&config.tuning)),
            poller: FallbackPoller::new(&config),
            monitor: HealthMonitor::new(),
            stats: DeliveryStatistics::default(),
            last_push_instant: None,
            last_pull_instant: None,
            mode_entered_at: Instant::now(),
            poll_cursor: None,
            runtime: None,
        };
        let events = EventPublisher::new(config.event_channel_capacity);

        debug!(
            controller_id = %controller_id,
            polling_interval_ms = config.polling_interval_ms,
            health_check_interval_ms = config.health_check_interval_ms,
            "Creating FallbackController"
        );

        let shared = Arc::new_cyclic(|self_ref| ControllerShared {
            controller_id,
            config,
            fetcher,
            events,
            self_ref: self_ref.clone(),
            inner: Mutex::new(inner),
        });
        Ok(Self { shared })
    }

    /// Bind to a tenant and start the health monitor.
    ///
    /// Calling again with the same tenant is a no-op. Must run inside a Tokio
    /// runtime; that runtime hosts the monitor and poller tasks from then on,
    /// so later calls may come from any thread.
    pub fn initialize(&self, tenant_id: impl Into<String>) -> Result<()> {
        let tenant_id = tenant_id.into();
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        match &inner.lifecycle {
            Lifecycle::Active { tenant_id: bound } if *bound == tenant_id => return Ok(()),
            Lifecycle::Active { tenant_id: bound } => {
                return Err(DeliveryError::TenantMismatch {
                    bound: bound.clone(),
                    requested: tenant_id,
                })
            }
            Lifecycle::Destroyed { .. } => {
                return Err(DeliveryError::Destroyed {
                    operation: "initialize",
                })
            }
            Lifecycle::Created => {}
        }

        let runtime = Handle::try_current().map_err(|_| DeliveryError::RuntimeUnavailable)?;

        inner.lifecycle = Lifecycle::Active {
            tenant_id: tenant_id.clone(),
        };
        inner.mode_entered_at = Instant::now();

        let monitor_ref = shared.self_ref.clone();
        inner
            .monitor
            .start(&runtime, shared.config.health_check_interval(), move || {
                monitor_ref
                    .upgrade()
                    .map(|shared| shared.run_health_check())
                    .unwrap_or(false)
            });
        inner.runtime = Some(runtime);

        info!(
            controller_id = %shared.controller_id,
            tenant_id = %tenant_id,
            mode = %inner.state.mode,
            health_score = inner.state.health_score.value(),
            "FallbackController initialized"
        );
        shared.events.publish(DeliveryEvent::Initialized {
            tenant_id,
            mode: inner.state.mode,
            health_score: inner.state.health_score.value(),
        });
        Ok(())
    }

    /// Record a message delivered by the push channel.
    ///
    /// Resets the failure counter, rewards health, enqueues the message and,
    /// when polling, switches back to push.
    pub fn notify_push_message(&self, message: InboundMessage) -> Result<EnqueueOutcome> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let tenant_id = inner.lifecycle.require_active("notify_push_message")?;
        let tuning = &shared.config.tuning;

        inner.state.consecutive_failures = 0;
        let rewarded = inner.state.health_score.reward(tuning.push_success_reward);
        shared.set_health(&mut inner, &tenant_id, rewarded, "push message");

        inner.state.last_push_message_at = Some(Utc::now());
        inner.last_push_instant = Some(Instant::now());
        inner.stats.push_messages += 1;

        let outcome = shared.ingest(&mut inner, &tenant_id, message, MessageSource::Push);

        if inner.state.mode.is_pull() {
            shared.transition(
                &mut inner,
                &tenant_id,
                DeliveryMode::Push,
                TransitionReason::PushRecovered,
            );
        }
        Ok(outcome)
    }

    /// Record a failure reported by the push channel.
    ///
    /// Switches to polling once consecutive failures reach the threshold.
    pub fn notify_push_failure(&self, error: Option<&str>) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let tenant_id = inner.lifecycle.require_active("notify_push_failure")?;
        let tuning = &shared.config.tuning;

        inner.state.consecutive_failures = inner.state.consecutive_failures.saturating_add(1);
        inner.stats.push_failures += 1;
        let penalized = inner.state.health_score.penalize(tuning.push_failure_penalty);
        shared.set_health(&mut inner, &tenant_id, penalized, "push failure");

        warn!(
            tenant_id = %tenant_id,
            error = error.unwrap_or("unspecified"),
            consecutive_failures = inner.state.consecutive_failures,
            health_score = inner.state.health_score.value(),
            "Push channel failure reported"
        );

        if inner.state.consecutive_failures >= tuning.failure_threshold
            && inner.state.mode == DeliveryMode::Push
        {
            shared.transition(
                &mut inner,
                &tenant_id,
                DeliveryMode::Pull,
                TransitionReason::FailureThreshold,
            );
        }
        Ok(())
    }

    /// Operator override: reset failures, set neutral health and enter `mode`
    pub fn force_mode(&self, mode: DeliveryMode) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let tenant_id = inner.lifecycle.require_active("force_mode")?;

        warn!(
            tenant_id = %tenant_id,
            from = %inner.state.mode,
            to = %mode,
            "Delivery mode forced"
        );

        inner.state.consecutive_failures = 0;
        let neutral = HealthScore::new(shared.config.tuning.neutral_health);
        shared.set_health(&mut inner, &tenant_id, neutral, "forced mode");
        shared.transition(&mut inner, &tenant_id, mode, TransitionReason::Forced);
        Ok(())
    }

    /// Oldest unconsumed message, marked consumed
    pub fn get_next_message(&self) -> Result<Option<QueueItem>> {
        let mut inner = self.shared.inner.lock();
        inner.lifecycle.require_active("get_next_message")?;
        Ok(inner.queue.dequeue_next())
    }

    /// Hand every pending message to `handler`, oldest first.
    ///
    /// The outer error reports misuse; the inner one a handler failure, after
    /// which the failed message stays consumed and the rest stay pending. The
    /// handler runs without the state lock held, so it may call back into the
    /// controller. Draining stops early if the controller is destroyed meanwhile.
    pub fn process_all_pending_messages<F, E>(
        &self,
        mut handler: F,
    ) -> Result<std::result::Result<usize, DrainError<E>>>
    where
        F: FnMut(&InboundMessage, MessageSource) -> std::result::Result<(), E>,
    {
        self.shared
            .inner
            .lock()
            .lifecycle
            .require_active("process_all_pending_messages")?;

        let mut processed = 0;
        loop {
            let next = {
                let mut inner = self.shared.inner.lock();
                if matches!(inner.lifecycle, Lifecycle::Active { .. }) {
                    inner.queue.dequeue_next()
                } else {
                    None
                }
            };
            let Some(item) = next else { break };

            if let Err(error) = handler(&item.message, item.source) {
                return Ok(Err(DrainError {
                    processed,
                    message_id: item.message.id,
                    error,
                }));
            }
            processed += 1;
        }

        if processed > 0 {
            debug!(processed = processed, "Drained pending messages");
        }
        Ok(Ok(processed))
    }

    /// Read-only snapshot for observability
    pub fn get_state(&self) -> FallbackSnapshot {
        let inner = self.shared.inner.lock();
        let tuning = &self.shared.config.tuning;
        FallbackSnapshot {
            tenant_id: inner.lifecycle.tenant_id().map(str::to_string),
            mode: inner.state.mode,
            is_active: inner.state.is_active,
            health_score: inner.state.health_score.value(),
            health_status: inner.state.health_score.status(tuning),
            consecutive_failures: inner.state.consecutive_failures,
            queue_depth: inner.queue.depth(),
            pending_messages: inner.queue.pending(),
            last_push_message_at: inner.state.last_push_message_at,
            last_pull_message_at: inner.state.last_pull_message_at,
            stats: inner.stats,
        }
    }

    /// Stop both background tasks and clear the queue. Idempotent.
    pub fn destroy(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if let Lifecycle::Destroyed { .. } = inner.lifecycle {
            return;
        }

        let tenant_id = inner.lifecycle.tenant_id().map(str::to_string);
        inner.poller.stop();
        inner.monitor.stop();
        inner.queue.clear();
        inner.runtime = None;
        inner.state.is_active = false;
        inner.lifecycle = Lifecycle::Destroyed {
            tenant_id: tenant_id.clone(),
        };

        info!(
            controller_id = %shared.controller_id,
            tenant_id = ?tenant_id,
            "FallbackController destroyed"
        );
        shared.events.publish(DeliveryEvent::Destroyed { tenant_id });
    }

    /// Receive structured events from this controller
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.shared.config
    }

    pub fn controller_id(&self) -> Uuid {
        self.shared.controller_id
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(
            self.shared.inner.lock().lifecycle,
            Lifecycle::Destroyed { .. }
        )
    }
}

impl ControllerShared {
    fn set_health(
        &self,
        inner: &mut ControllerInner,
        tenant_id: &str,
        score: HealthScore,
        cause: &str,
    ) {
        let previous = inner.state.health_score;
        if previous == score {
            return;
        }
        inner.state.health_score = score;

        debug!(
            tenant_id = %tenant_id,
            previous = previous.value(),
            current = score.value(),
            cause = cause,
            "Health score changed"
        );
        self.events.publish(DeliveryEvent::HealthChanged {
            tenant_id: tenant_id.to_string(),
            previous: previous.value(),
            current: score.value(),
            cause: cause.to_string(),
        });
    }

    /// Enter `target`, starting or stopping the poller to match
    fn transition(
        &self,
        inner: &mut ControllerInner,
        tenant_id: &str,
        target: DeliveryMode,
        reason: TransitionReason,
    ) {
        let from = inner.state.mode;
        match target {
            DeliveryMode::Pull => match inner.runtime.clone() {
                Some(runtime) => {
                    let sink = ControllerSink {
                        shared: self.self_ref.clone(),
                    };
                    inner.poller.start(&runtime, self.fetcher.clone(), sink);
                }
                None => warn!(tenant_id = %tenant_id, "No runtime captured, poller not started"),
            },
            DeliveryMode::Push => inner.poller.stop(),
        }
        inner.state.is_active = inner.poller.is_active();

        if from == target {
            return;
        }

        inner.state.mode = target;
        inner.mode_entered_at = Instant::now();
        inner.stats.mode_transitions += 1;

        info!(
            tenant_id = %tenant_id,
            from = %from,
            to = %target,
            reason = ?reason,
            health_score = inner.state.health_score.value(),
            consecutive_failures = inner.state.consecutive_failures,
            "Delivery mode changed"
        );
        self.events.publish(DeliveryEvent::ModeChanged {
            tenant_id: tenant_id.to_string(),
            from,
            to: target,
            reason,
            health_score: inner.state.health_score.value(),
            consecutive_failures: inner.state.consecutive_failures,
        });
    }

    fn ingest(
        &self,
        inner: &mut ControllerInner,
        tenant_id: &str,
        message: InboundMessage,
        source: MessageSource,
    ) -> EnqueueOutcome {
        let message_id = message.id.clone();
        let outcome = inner.queue.enqueue(message, source);

        match outcome {
            EnqueueOutcome::Duplicate => {
                inner.stats.duplicates_rejected += 1;
                self.events.publish(DeliveryEvent::DuplicateRejected {
                    tenant_id: tenant_id.to_string(),
                    message_id,
                    source,
                });
            }
            EnqueueOutcome::Accepted {
                evicted,
                evicted_unconsumed,
                forgotten,
            } => {
                let queue_depth = inner.queue.depth();
                self.events.publish(DeliveryEvent::MessageEnqueued {
                    tenant_id: tenant_id.to_string(),
                    message_id,
                    source,
                    queue_depth,
                });
                if evicted > 0 {
                    inner.stats.messages_evicted += evicted as u64;
                    inner.stats.unconsumed_evicted += evicted_unconsumed as u64;
                    self.events.publish(DeliveryEvent::QueueEvicted {
                        tenant_id: tenant_id.to_string(),
                        evicted,
                        queue_depth,
                    });
                }
                if forgotten > 0 {
                    debug!(
                        tenant_id = %tenant_id,
                        forgotten = forgotten,
                        retained = inner.queue.dedup_len(),
                        "Dedup window compacted"
                    );
                    self.events.publish(DeliveryEvent::DedupCompacted {
                        tenant_id: tenant_id.to_string(),
                        forgotten,
                        retained: inner.queue.dedup_len(),
                    });
                }
            }
        }
        outcome
    }

    /// One health monitor tick; returns whether the monitor should keep running
    fn run_health_check(&self) -> bool {
        let mut inner = self.inner.lock();
        let tenant_id = match &inner.lifecycle {
            Lifecycle::Active { tenant_id } => tenant_id.clone(),
            _ => return false,
        };
        let tuning = &self.config.tuning;
        let now = Instant::now();

        let last_activity = match inner.state.mode {
            DeliveryMode::Push => inner.last_push_instant,
            DeliveryMode::Pull => inner.last_pull_instant,
        }
        .unwrap_or(inner.mode_entered_at);

        if let Some((silence, penalty)) =
            silence_penalty(inner.state.mode, last_activity, now, tuning)
        {
            let penalized = inner.state.health_score.penalize(penalty);
            self.set_health(&mut inner, &tenant_id, penalized, &silence.describe());
        }

        match threshold_action(inner.state.health_score, inner.state.mode, tuning) {
            Some(HealthAction::ForcePull) => {
                warn!(
                    tenant_id = %tenant_id,
                    health_score = inner.state.health_score.value(),
                    critical_health = tuning.critical_health,
                    "Health critical, forcing polling"
                );
                self.transition(
                    &mut inner,
                    &tenant_id,
                    DeliveryMode::Pull,
                    TransitionReason::CriticalHealth,
                );
            }
            Some(HealthAction::AttemptRecovery) => self.attempt_recovery(&mut inner, &tenant_id),
            None => {}
        }
        true
    }

    /// Step the failure counter down; resume push once it reaches zero
    fn attempt_recovery(&self, inner: &mut ControllerInner, tenant_id: &str) {
        inner.state.consecutive_failures = inner.state.consecutive_failures.saturating_sub(1);
        debug!(
            tenant_id = %tenant_id,
            consecutive_failures = inner.state.consecutive_failures,
            health_score = inner.state.health_score.value(),
            "Attempting recovery to push"
        );
        if inner.state.consecutive_failures == 0 {
            self.transition(
                inner,
                tenant_id,
                DeliveryMode::Push,
                TransitionReason::HealthRecovered,
            );
        }
    }

    /// Tenant id if the controller is active and `generation` is the live poller
    fn poll_owner(&self, inner: &ControllerInner, generation: u64) -> Option<String> {
        match &inner.lifecycle {
            Lifecycle::Active { tenant_id } if inner.poller.owns(generation) => {
                Some(tenant_id.clone())
            }
            _ => None,
        }
    }

    fn accept_poll_batch(
        &self,
        inner: &mut ControllerInner,
        tenant_id: &str,
        messages: Vec<InboundMessage>,
    ) -> usize {
        let mut enqueued = 0;
        for message in messages {
            if let Some(timestamp) = message.timestamp {
                if inner.poll_cursor.map_or(true, |cursor| timestamp > cursor) {
                    inner.poll_cursor = Some(timestamp);
                }
            }
            let outcome = self.ingest(inner, tenant_id, message, MessageSource::Pull);
            if outcome.is_accepted() {
                enqueued += 1;
                inner.stats.pull_messages += 1;
                inner.state.last_pull_message_at = Some(Utc::now());
                inner.last_pull_instant = Some(Instant::now());
            }
        }
        enqueued
    }
}

/// Poller callbacks into the controller, through a weak reference
struct ControllerSink {
    shared: Weak<ControllerShared>,
}

impl PollSink for ControllerSink {
    fn begin_cycle(&self, generation: u64) -> Option<PollCursor> {
        let shared = self.shared.upgrade()?;
        let inner = shared.inner.lock();
        let tenant_id = shared.poll_owner(&inner, generation)?;
        Some(PollCursor {
            tenant_id,
            since: inner.poll_cursor,
        })
    }

    fn complete_cycle(&self, generation: u64, result: PollCycleResult) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut inner = shared.inner.lock();
        let Some(tenant_id) = shared.poll_owner(&inner, generation) else {
            return false;
        };
        inner.stats.poll_cycles += 1;

        match result.outcome {
            Ok(messages) => {
                let fetched = messages.len();
                let enqueued = shared.accept_poll_batch(&mut inner, &tenant_id, messages);
                debug!(
                    tenant_id = %tenant_id,
                    fetched = fetched,
                    enqueued = enqueued,
                    duration_ms = result.duration.as_millis() as u64,
                    "Fallback polling cycle completed"
                );
                shared.events.publish(DeliveryEvent::PollCompleted {
                    tenant_id,
                    fetched,
                    enqueued,
                    duration_ms: result.duration.as_millis() as u64,
                });
            }
            Err(error) => {
                inner.stats.poll_failures += 1;
                let penalty = shared.config.tuning.poll_failure_penalty;
                let penalized = inner.state.health_score.penalize(penalty);
                shared.set_health(&mut inner, &tenant_id, penalized, "poll failure");
                shared.events.publish(DeliveryEvent::PollFailed {
                    tenant_id,
                    error: error.to_string(),
                    consecutive_failures: result.consecutive_failures,
                });
            }
        }
        true
    }

    fn cycle_skipped(&self, generation: u64, reason: SkipReason) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut inner = shared.inner.lock();
        let Some(tenant_id) = shared.poll_owner(&inner, generation) else {
            return false;
        };

        let (description, ticks) = match reason {
            SkipReason::Backoff { retry_in } => {
                (format!("backoff, retry in {}ms", retry_in.as_millis()), 1)
            }
            SkipReason::Overrun { missed_ticks } => {
                ("fetch overran interval".to_string(), missed_ticks)
            }
        };
        inner.stats.polls_skipped += ticks;

        debug!(
            tenant_id = %tenant_id,
            reason = %description,
            ticks = ticks,
            "Fallback polling tick skipped"
        );
        shared.events.publish(DeliveryEvent::PollSkipped {
            tenant_id,
            reason: description,
            ticks,
        });
        true
    }
}
