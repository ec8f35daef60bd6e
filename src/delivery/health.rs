//! # Health Scoring and Monitoring
//!
//! [`HealthScore`] is a clamped 0-100 reliability signal. The
//! [`HealthMonitor`] is a cancellable periodic task; the decisions it drives
//! live in the pure functions [`silence_penalty`] and [`threshold_action`] so
//! they can be tested without timers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::state::DeliveryMode;
use crate::config::DeliveryTuning;
use crate::constants::health::{DEGRADED_THRESHOLD, MAX_SCORE, MIN_SCORE};

/// Bounded reliability score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthScore(u8);

impl HealthScore {
    pub fn new(value: u8) -> Self {
        Self(value.min(MAX_SCORE))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Increase by `amount`, clamped to 100
    pub fn reward(self, amount: u8) -> Self {
        Self(self.0.saturating_add(amount).min(MAX_SCORE))
    }

    /// Decrease by `amount`, clamped to 0
    pub fn penalize(self, amount: u8) -> Self {
        Self(self.0.saturating_sub(amount).max(MIN_SCORE))
    }

    /// Band this score falls into, given the critical and recovery thresholds
    pub fn status(self, tuning: &DeliveryTuning) -> DeliveryHealthStatus {
        if self.0 > tuning.recovery_health {
            DeliveryHealthStatus::Healthy
        } else if self.0 >= DEGRADED_THRESHOLD.max(tuning.critical_health) {
            DeliveryHealthStatus::Degraded
        } else if self.0 >= tuning.critical_health {
            DeliveryHealthStatus::Warning
        } else {
            DeliveryHealthStatus::Critical
        }
    }
}

impl fmt::Display for HealthScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse health band for dashboards and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryHealthStatus {
    /// Above the recovery threshold
    Healthy,
    /// Working, with recent trouble
    Degraded,
    /// Close to forcing polling
    Warning,
    /// Below the critical threshold; polling is forced
    Critical,
}

/// Which channel went quiet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Silence {
    Push { quiet_for: Duration },
    Pull { quiet_for: Duration },
}

impl Silence {
    pub fn describe(&self) -> String {
        match self {
            Silence::Push { quiet_for } => format!("push silent for {}ms", quiet_for.as_millis()),
            Silence::Pull { quiet_for } => format!("pull silent for {}ms", quiet_for.as_millis()),
        }
    }
}

/// Penalty for prolonged silence on the active channel, if any.
///
/// `last_activity` is the last message on the active channel, or when that
/// mode was entered if the channel has not produced anything yet.
pub fn silence_penalty(
    mode: DeliveryMode,
    last_activity: Instant,
    now: Instant,
    tuning: &DeliveryTuning,
) -> Option<(Silence, u8)> {
    let quiet_for = now.saturating_duration_since(last_activity);
    match mode {
        DeliveryMode::Push if quiet_for > tuning.push_silence_threshold() => {
            Some((Silence::Push { quiet_for }, tuning.push_silence_penalty))
        }
        DeliveryMode::Pull if quiet_for > tuning.pull_silence_threshold() => {
            Some((Silence::Pull { quiet_for }, tuning.pull_silence_penalty))
        }
        _ => None,
    }
}

/// Action the health thresholds call for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Score below critical while pushing: switch to polling now
    ForcePull,
    /// Score above recovery while polling: step toward push
    AttemptRecovery,
}

pub fn threshold_action(
    score: HealthScore,
    mode: DeliveryMode,
    tuning: &DeliveryTuning,
) -> Option<HealthAction> {
    match mode {
        DeliveryMode::Push if score.value() < tuning.critical_health => {
            Some(HealthAction::ForcePull)
        }
        DeliveryMode::Pull if score.value() > tuning.recovery_health => {
            Some(HealthAction::AttemptRecovery)
        }
        _ => None,
    }
}

/// Periodic health check task
///
/// Owns at most one spawned task. The task ends when its tick callback
/// returns `false` or when [`HealthMonitor::stop`] aborts it.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the periodic task on `runtime`; a no-op when already running.
    ///
    /// The first tick fires one `period` after start. Ticks missed because
    /// the runtime was busy are skipped rather than replayed.
    pub fn start<F>(&mut self, runtime: &Handle, period: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if self.is_running() {
            return;
        }

        debug!(period_ms = period.as_millis() as u64, "Starting health monitor");
        self.handle = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        }));
    }

    /// Abort the task; a no-op when not running
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Stopping health monitor");
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
