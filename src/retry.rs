//! Setpoint retry queue
//!
//! Holds writes that Sitrad has not confirmed, at most one per
//! `(instrument_id, code)`. A background worker sweeps the queue on a fixed
//! interval and retries due tasks with backoff until the write converges,
//! the attempt cap is reached, or the task goes stale.
//!
//! Task lifecycle: PENDING (due in the future) -> DUE (`next_retry` elapsed)
//! -> retried, back to PENDING, or RETIRED (removed from the map).

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::setpoint::{write_and_verify, WriteOutcome};
use crate::sitrad::InstrumentApi;

/// Source of the current time, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Delays and limits governing retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub transport_retry: Duration,
    pub unconverged_retry: Duration,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub max_attempts: u32,
    pub stale_after: Duration,
    pub tolerance: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), 0.1)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, tolerance: f64) -> Self {
        Self {
            initial_delay: secs(config.initial_delay_secs),
            transport_retry: secs(config.transport_retry_secs),
            unconverged_retry: secs(config.unconverged_retry_secs),
            backoff_base_secs: config.backoff_base_secs,
            backoff_cap_secs: config.backoff_cap_secs,
            max_attempts: config.max_attempts,
            stale_after: secs(config.stale_after_secs),
            tolerance,
        }
    }

    /// Delay after a generic failure: `min(cap, base * 2^attempts)`
    ///
    /// `attempts` is the count including the attempt that just failed.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let delay = self
            .backoff_base_secs
            .saturating_mul(factor)
            .min(self.backoff_cap_secs);
        secs(delay)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaskKey {
    instrument_id: i64,
    code: String,
}

/// An unconfirmed setpoint write
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTask {
    pub instrument_id: i64,
    pub code: String,
    pub value: f64,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub next_retry: DateTime<Utc>,
    /// Bumped on every replacement so late results for an older request
    /// cannot touch a newer one
    generation: u64,
}

impl RetryTask {
    fn key(&self) -> TaskKey {
        TaskKey {
            instrument_id: self.instrument_id,
            code: self.code.clone(),
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> TaskState {
        if self.next_retry <= now {
            TaskState::Due
        } else {
            TaskState::Pending
        }
    }
}

/// Scheduling state of a live task; retired tasks are no longer in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Due,
}

/// Read-only view of a task for operators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatus {
    pub instrument_id: i64,
    pub code: String,
    pub value: f64,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub confirmed: usize,
    pub rescheduled: usize,
    pub purged: usize,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<TaskKey, RetryTask>,
    next_generation: u64,
}

/// Shared handle to the retry queue
///
/// Clones share the same tasks. All access goes through one mutex that is
/// never held across an upstream call.
#[derive(Clone)]
pub struct RetryQueue {
    state: Arc<Mutex<QueueState>>,
    policy: Arc<RetryPolicy>,
    clock: Arc<dyn Clock>,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            policy: Arc::new(policy),
            clock,
        }
    }

    /// Insert or replace the task for `(instrument_id, code)`
    pub fn enqueue(&self, instrument_id: i64, code: &str, value: f64) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.next_generation += 1;
        let task = RetryTask {
            instrument_id,
            code: code.to_string(),
            value,
            attempts: 0,
            last_attempt: now,
            next_retry: now + self.policy.initial_delay,
            generation: state.next_generation,
        };
        let replaced = state.tasks.insert(task.key(), task).is_some();
        debug!(instrument_id, code, value, replaced, "Setpoint retry enqueued");
    }

    pub fn get(&self, instrument_id: i64, code: &str) -> Option<RetryTask> {
        let key = TaskKey {
            instrument_id,
            code: code.to_string(),
        };
        self.state.lock().tasks.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every task, ordered by instrument and code
    pub fn snapshot(&self) -> Vec<RetryStatus> {
        let state = self.state.lock();
        let mut statuses: Vec<RetryStatus> = state
            .tasks
            .values()
            .map(|task| RetryStatus {
                instrument_id: task.instrument_id,
                code: task.code.clone(),
                value: task.value,
                attempts: task.attempts,
                last_attempt: task.last_attempt,
            })
            .collect();
        statuses.sort_by(|a, b| (a.instrument_id, &a.code).cmp(&(b.instrument_id, &b.code)));
        statuses
    }

    /// Tasks that are due and still under the attempt cap
    pub fn due_tasks(&self) -> Vec<RetryTask> {
        let now = self.clock.now();
        let max_attempts = self.policy.max_attempts;
        let state = self.state.lock();
        state
            .tasks
            .values()
            .filter(|task| task.state(now) == TaskState::Due && task.attempts < max_attempts)
            .cloned()
            .collect()
    }

    /// Run one sweep: retry every due task, then purge exhausted and stale ones
    pub async fn sweep<A: InstrumentApi + ?Sized>(&self, api: &A) -> SweepReport {
        let mut report = SweepReport::default();

        for task in self.due_tasks() {
            let outcome = write_and_verify(
                api,
                task.instrument_id,
                &task.code,
                task.value,
                self.policy.tolerance,
            )
            .await;

            report.processed += 1;
            if outcome == WriteOutcome::Converged {
                report.confirmed += 1;
            } else {
                report.rescheduled += 1;
            }
            self.record_outcome(&task, &outcome);
        }

        report.purged = self.purge();

        if report.processed > 0 || report.purged > 0 {
            info!(
                processed = report.processed,
                confirmed = report.confirmed,
                rescheduled = report.rescheduled,
                purged = report.purged,
                remaining = self.len(),
                "Retry sweep finished"
            );
        }
        report
    }

    fn record_outcome(&self, task: &RetryTask, outcome: &WriteOutcome) {
        let now = self.clock.now();
        let key = task.key();
        let mut state = self.state.lock();

        let current_generation = state.tasks.get(&key).map(|t| t.generation);
        if current_generation != Some(task.generation) {
            debug!(
                instrument_id = task.instrument_id,
                code = %task.code,
                "Task replaced or removed during retry, dropping result"
            );
            return;
        }

        if *outcome == WriteOutcome::Converged {
            state.tasks.remove(&key);
            info!(
                instrument_id = task.instrument_id,
                code = %task.code,
                value = task.value,
                "Setpoint confirmed after retry"
            );
            return;
        }

        let Some(entry) = state.tasks.get_mut(&key) else {
            return;
        };
        entry.attempts += 1;
        entry.last_attempt = now;
        let delay = match outcome {
            WriteOutcome::TransportError(_) => self.policy.transport_retry,
            WriteOutcome::NotConverged => self.policy.unconverged_retry,
            WriteOutcome::Rejected(_) => self.policy.backoff(entry.attempts),
            WriteOutcome::Converged => Duration::zero(),
        };
        entry.next_retry = now + delay;

        warn!(
            instrument_id = entry.instrument_id,
            code = %entry.code,
            attempts = entry.attempts,
            outcome = ?outcome,
            retry_in_secs = delay.num_seconds(),
            "Setpoint retry failed"
        );
    }

    /// Drop tasks over the attempt cap or scheduled implausibly far ahead
    pub fn purge(&self) -> usize {
        let now = self.clock.now();
        let horizon = now + self.policy.stale_after;
        let max_attempts = self.policy.max_attempts;
        let mut state = self.state.lock();
        let before = state.tasks.len();

        state.tasks.retain(|_, task| {
            let keep = task.attempts < max_attempts && task.next_retry <= horizon;
            if !keep {
                warn!(
                    instrument_id = task.instrument_id,
                    code = %task.code,
                    attempts = task.attempts,
                    "Abandoning setpoint retry"
                );
            }
            keep
        });

        before - state.tasks.len()
    }
}

/// Sweep the queue every `poll_interval` until `shutdown` flips to true
///
/// A sweep already in progress when shutdown is signalled runs to
/// completion before the worker returns.
pub async fn run_worker<A: InstrumentApi + ?Sized>(
    queue: RetryQueue,
    api: Arc<A>,
    poll_interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(poll_interval_secs = poll_interval.as_secs(), "Retry worker started");

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                queue.sweep(api.as_ref()).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(pending = queue.len(), "Retry worker stopped");
}
