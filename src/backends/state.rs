//! Per-client health and load state
//!
//! Every [`BackendClient`](super::BackendClient) owns one [`ClientState`].
//! Counters that change on every call are atomics; everything else sits
//! behind a short-lived mutex that is never held across an `.await`.
//!
//! Eligibility rule: a client may be selected iff it is healthy and its
//! retry count is below the endpoint's `max_retries`.

use crate::clock::{SharedClock, unix_millis};
use crate::types::{Operation, ProcessingStatus, RequestSummary};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Window used for "recent" request statistics
pub const RECENT_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct RequestRecord {
    operation: Operation,
    started_at: Instant,
    started_wall: SystemTime,
    ended_at: Instant,
    success: bool,
}

#[derive(Debug)]
struct Inner {
    healthy: bool,
    retry_count: u32,
    last_check: Option<Instant>,
    last_check_wall: Option<SystemTime>,
    running_models: Vec<String>,
    version: Option<String>,
    current_model: Option<String>,
    history: VecDeque<RequestRecord>,
}

/// Point-in-time copy of a client's state, taken under a single lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub healthy: bool,
    pub retry_count: u32,
    /// `None` until the first health probe completes
    pub last_check_at: Option<SystemTime>,
    pub running_models: Vec<String>,
    pub version: Option<String>,
    pub current_model: Option<String>,
    pub active_requests: usize,
}

/// Health classification, counters, and request history for one endpoint
#[derive(Debug)]
pub struct ClientState {
    name: String,
    max_retries: u32,
    history_capacity: usize,
    clock: SharedClock,
    active_requests: AtomicUsize,
    total_requests: AtomicU64,
    inner: Mutex<Inner>,
}

impl ClientState {
    /// Create state for a client, starting healthy with no failures
    pub fn new(
        name: impl Into<String>,
        max_retries: u32,
        history_capacity: usize,
        clock: SharedClock,
    ) -> Self {
        let inner = Inner {
            healthy: true,
            retry_count: 0,
            last_check: None,
            last_check_wall: None,
            running_models: Vec::new(),
            version: None,
            current_model: None,
            history: VecDeque::with_capacity(history_capacity),
        };

        Self {
            name: name.into(),
            max_retries,
            history_capacity,
            clock,
            active_requests: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn is_healthy(&self) -> bool {
        self.lock().healthy
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    /// Healthy and below the retry threshold
    pub fn is_eligible(&self) -> bool {
        let inner = self.lock();
        inner.healthy && inner.retry_count < self.max_retries
    }

    pub fn last_check(&self) -> Option<Instant> {
        self.lock().last_check
    }

    /// Time elapsed since the last health probe, `None` if never probed
    pub fn since_last_check(&self) -> Option<Duration> {
        let last = self.last_check()?;
        Some(self.clock.now().saturating_duration_since(last))
    }

    /// Whether cached health is older than `interval`
    ///
    /// A client that has never been probed is always stale.
    pub fn is_check_stale(&self, interval: Duration) -> bool {
        self.since_last_check().is_none_or(|elapsed| elapsed > interval)
    }

    pub fn running_models(&self) -> Vec<String> {
        self.lock().running_models.clone()
    }

    pub fn current_model(&self) -> Option<String> {
        self.lock().current_model.clone()
    }

    pub fn version(&self) -> Option<String> {
        self.lock().version.clone()
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Acquire)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Acquire)
    }

    pub fn set_running_models(&self, models: Vec<String>) {
        self.lock().running_models = models;
    }

    pub fn set_current_model(&self, model: Option<String>) {
        self.lock().current_model = model;
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.lock().version = Some(version.into());
    }

    /// `2 × active_requests + |running_models|`, lower is better
    pub fn load_score(&self) -> usize {
        let running = self.lock().running_models.len();
        self.active_requests() * 2 + running
    }

    /// Record a successful call: clears the retry count
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.retry_count > 0 {
            tracing::debug!(
                endpoint = %self.name,
                previous_retry_count = inner.retry_count,
                "Call succeeded, retry count reset"
            );
        }
        inner.retry_count = 0;
    }

    /// Record a failed call
    ///
    /// Increments the retry count and marks the client unhealthy once it
    /// reaches `max_retries`. Returns `true` only on the call that flips the
    /// client from healthy to unhealthy.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.lock();
        inner.retry_count = inner.retry_count.saturating_add(1);
        self.trip_if_exhausted(&mut inner)
    }

    /// Record a successful health probe
    ///
    /// Marks the client healthy, clears the retry count, and stamps the check
    /// time. Returns `true` if the client was unhealthy before.
    pub fn mark_probe_success(&self) -> bool {
        let now = self.clock.now();
        let wall = self.clock.system_now();
        let mut inner = self.lock();
        let recovered = !inner.healthy;

        inner.healthy = true;
        inner.retry_count = 0;
        inner.last_check = Some(now);
        inner.last_check_wall = Some(wall);

        if recovered {
            tracing::info!(endpoint = %self.name, "Endpoint recovered to healthy state");
        } else {
            tracing::debug!(endpoint = %self.name, "Endpoint health check succeeded");
        }
        recovered
    }

    /// Record a failed health probe
    ///
    /// Same threshold rule as [`record_failure`](Self::record_failure), but
    /// also stamps the check time.
    pub fn mark_probe_failure(&self) -> bool {
        let now = self.clock.now();
        let wall = self.clock.system_now();
        let mut inner = self.lock();
        inner.retry_count = inner.retry_count.saturating_add(1);
        inner.last_check = Some(now);
        inner.last_check_wall = Some(wall);
        self.trip_if_exhausted(&mut inner)
    }

    fn trip_if_exhausted(&self, inner: &mut Inner) -> bool {
        if inner.retry_count >= self.max_retries {
            let transitioned = inner.healthy;
            inner.healthy = false;
            if transitioned {
                tracing::warn!(
                    endpoint = %self.name,
                    retry_count = inner.retry_count,
                    max_retries = self.max_retries,
                    "Endpoint marked as unhealthy after reaching max retries"
                );
            }
            transitioned
        } else {
            tracing::debug!(
                endpoint = %self.name,
                retry_count = inner.retry_count,
                max_retries = self.max_retries,
                "Endpoint failure recorded (still eligible)"
            );
            false
        }
    }

    /// Start tracking an in-flight call
    ///
    /// The returned guard decrements `active_requests` and appends to the
    /// request history when dropped, whatever the outcome.
    pub fn begin_request(&self, operation: Operation) -> RequestGuard<'_> {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
        self.total_requests.fetch_add(1, Ordering::AcqRel);
        RequestGuard {
            state: self,
            operation,
            started_at: self.clock.now(),
            started_wall: self.clock.system_now(),
            success: false,
        }
    }

    fn finish_request(&self, record: RequestRecord) {
        self.active_requests.fetch_sub(1, Ordering::AcqRel);
        let mut inner = self.lock();
        if inner.history.len() >= self.history_capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
    }

    /// Summary of in-flight and recently completed calls
    pub fn processing_status(&self) -> ProcessingStatus {
        let now = self.clock.now();
        let inner = self.lock();

        let recent: Vec<&RequestRecord> = inner
            .history
            .iter()
            .filter(|r| now.saturating_duration_since(r.ended_at) < RECENT_WINDOW)
            .collect();

        let average_response_time_ms = if recent.is_empty() {
            0.0
        } else {
            let total: u128 = recent
                .iter()
                .map(|r| r.ended_at.saturating_duration_since(r.started_at).as_millis())
                .sum();
            (total as f64 / recent.len() as f64).round()
        };

        let history = inner
            .history
            .iter()
            .map(|r| RequestSummary {
                operation: r.operation,
                started_at: unix_millis(r.started_wall),
                duration_ms: r.ended_at.saturating_duration_since(r.started_at).as_millis() as u64,
                success: r.success,
            })
            .collect();

        ProcessingStatus {
            active_requests: self.active_requests(),
            total_requests: self.total_requests(),
            recent_requests: recent.len(),
            average_response_time_ms,
            history,
        }
    }

    /// Copy every status field under one lock
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        StateSnapshot {
            healthy: inner.healthy,
            retry_count: inner.retry_count,
            last_check_at: inner.last_check_wall,
            running_models: inner.running_models.clone(),
            version: inner.version.clone(),
            current_model: inner.current_model.clone(),
            active_requests: self.active_requests(),
        }
    }
}

/// RAII marker for one in-flight call
///
/// Created by [`ClientState::begin_request`]. Counts as a failure in the
/// history unless [`succeed`](Self::succeed) is called before drop.
#[must_use = "dropping the guard immediately ends the request"]
#[derive(Debug)]
pub struct RequestGuard<'a> {
    state: &'a ClientState,
    operation: Operation,
    started_at: Instant,
    started_wall: SystemTime,
    success: bool,
}

impl RequestGuard<'_> {
    pub fn succeed(&mut self) {
        self.success = true;
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        let record = RequestRecord {
            operation: self.operation,
            started_at: self.started_at,
            started_wall: self.started_wall,
            ended_at: self.state.clock.now(),
            success: self.success,
        };
        self.state.finish_request(record);
    }
}
