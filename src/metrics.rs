//! Prometheus metrics for the endpoint pool
//!
//! Tracks:
//! - Pool operations by kind and outcome, with latency
//! - Individual backend attempts per endpoint
//! - Fallback attempts after a primary failure
//! - Health state transitions per endpoint
//! - Failures of the background health monitor
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use crate::types::Operation;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Outcome label for request and attempt counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// State label for health transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

/// Metrics collector for the pool
///
/// Cloning is cheap; all clones share one registry.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    backend_attempts: IntCounterVec,
    fallback_attempts: IntCounterVec,
    health_transitions: IntCounterVec,
    request_duration: HistogramVec,
    background_task_failures: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 11 operations x 2 outcomes
        let requests_total = IntCounterVec::new(
            Opts::new(
                "modelpool_requests_total",
                "Total pool operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;

        // Cardinality: N endpoints x 2 outcomes (bounded by configuration)
        let backend_attempts = IntCounterVec::new(
            Opts::new(
                "modelpool_backend_attempts_total",
                "Total calls made to individual backends by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;

        let fallback_attempts = IntCounterVec::new(
            Opts::new(
                "modelpool_fallback_attempts_total",
                "Total attempts made on a fallback backend after the primary failed",
            ),
            &["operation"],
        )?;

        let health_transitions = IntCounterVec::new(
            Opts::new(
                "modelpool_health_transitions_total",
                "Total endpoint health state transitions by endpoint and new state",
            ),
            &["endpoint", "state"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "modelpool_request_duration_ms",
                "Pool operation latency in milliseconds, including failover",
            )
            .buckets(vec![
                5.0, 25.0, 100.0, 250.0, 1000.0, 2500.0, 10_000.0, 30_000.0, 120_000.0,
            ]),
            &["operation"],
        )?;

        // Alert on any increment: health monitoring has stopped
        let background_task_failures = IntCounter::with_opts(Opts::new(
            "modelpool_background_task_failures_total",
            "Background health monitor terminations other than shutdown. \
            Alert on ANY increment - unhealthy endpoints will no longer recover.",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(backend_attempts.clone()))?;
        registry.register(Box::new(fallback_attempts.clone()))?;
        registry.register(Box::new(health_transitions.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(background_task_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            backend_attempts,
            fallback_attempts,
            health_transitions,
            request_duration,
            background_task_failures,
        })
    }

    /// Record a completed pool operation and its latency
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite or negative. Such
    /// values would corrupt every percentile of the histogram.
    pub fn record_request(
        &self,
        operation: Operation,
        outcome: Outcome,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                duration_ms
            )));
        }

        self.requests_total
            .get_metric_with_label_values(&[operation.as_str(), outcome.as_str()])?
            .inc();
        self.request_duration
            .get_metric_with_label_values(&[operation.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    pub fn backend_attempt(&self, endpoint: &str, outcome: Outcome) {
        self.backend_attempts
            .with_label_values(&[endpoint, outcome.as_str()])
            .inc();
    }

    pub fn fallback_attempt(&self, operation: Operation) {
        self.fallback_attempts
            .with_label_values(&[operation.as_str()])
            .inc();
    }

    pub fn health_transition(&self, endpoint: &str, state: HealthState) {
        self.health_transitions
            .with_label_values(&[endpoint, state.as_str()])
            .inc();
    }

    pub fn background_task_failure(&self) {
        self.background_task_failures.inc();
    }

    pub fn background_task_failures_count(&self) -> u64 {
        self.background_task_failures.get()
    }

    /// Sum of health transitions into `state` across all endpoints
    pub fn health_transitions_count(&self, state: HealthState) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == "modelpool_health_transitions_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .filter(|m| {
                        m.label
                            .iter()
                            .any(|l| l.name() == "state" && l.value() == state.as_str())
                    })
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Encode all metrics in Prometheus text exposition format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_families.len(),
                    "Prometheus text encoder failed"
                );
                e
            })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                e.utf8_error().valid_up_to(),
                e
            ))
        })
    }
}
