//! Endpoint health probing
//!
//! Two paths share one probe:
//! - [`HealthMonitor`] probes every client on a fixed interval in the
//!   background.
//! - [`check_health`] refreshes a single client on the hot path when its last
//!   check is older than the interval, and otherwise trusts the cached state.

use crate::backends::SharedClient;
use crate::metrics::{HealthState, Metrics};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;

/// Probe one client and fold the result into its state
///
/// Returns whether the probe succeeded. Errors are logged here; a failed
/// probe only marks the client unhealthy once its retry count reaches the
/// endpoint's `max_retries`.
pub async fn probe(client: &SharedClient, metrics: Option<&Metrics>) -> bool {
    match client.get_health().await {
        Ok(health) => {
            let state = client.state();
            state.set_version(health.version.as_str());
            if state.mark_probe_success()
                && let Some(metrics) = metrics
            {
                metrics.health_transition(client.name(), HealthState::Healthy);
            }
            true
        }
        Err(e) => {
            tracing::debug!(
                endpoint = %client.name(),
                url = %client.url(),
                error = %e,
                "Health probe failed"
            );
            if client.state().mark_probe_failure()
                && let Some(metrics) = metrics
            {
                metrics.health_transition(client.name(), HealthState::Unhealthy);
            }
            false
        }
    }
}

/// Lazily refresh a client's health, returning whether it is eligible
///
/// Probes when the client has never been checked or its last check is older
/// than `interval`.
pub async fn check_health(
    client: &SharedClient,
    interval: Duration,
    metrics: Option<&Metrics>,
) -> bool {
    if client.state().is_check_stale(interval) {
        tracing::debug!(endpoint = %client.name(), "Cached health is stale, probing");
        probe(client, metrics).await;
    }
    client.is_eligible()
}

/// Probe all clients concurrently
///
/// Each probe handles its own error, so one unreachable endpoint never
/// delays or fails the others beyond its own timeout.
pub async fn probe_all(clients: &[SharedClient], metrics: Option<&Metrics>) -> usize {
    let results = join_all(clients.iter().map(|c| probe(c, metrics))).await;
    results.into_iter().filter(|ok| *ok).count()
}

/// Handle to the periodic health-check task
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct HealthMonitor {
    task: AbortHandle,
    watcher: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the periodic task plus a watcher that reports abnormal exits
    ///
    /// The first round runs immediately, then once per `interval`.
    pub fn spawn(clients: Vec<SharedClient>, interval: Duration, metrics: Arc<Metrics>) -> Self {
        let task_metrics = Arc::clone(&metrics);
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                endpoints = clients.len(),
                "Starting background health checks"
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                tracing::debug!("Running scheduled health checks");
                let healthy = probe_all(&clients, Some(&task_metrics)).await;
                tracing::debug!(
                    healthy,
                    total = clients.len(),
                    "Scheduled health checks complete"
                );
            }
        });

        let task = handle.abort_handle();
        let watcher = tokio::spawn(async move {
            match handle.await {
                Ok(()) => {
                    metrics.background_task_failure();
                    tracing::error!(
                        "Background health check task terminated unexpectedly. \
                        Endpoints marked unhealthy will not recover until restart."
                    );
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("Background health check task stopped");
                }
                Err(e) => {
                    metrics.background_task_failure();
                    tracing::error!(
                        error = %e,
                        "Background health check task panicked. \
                        Endpoints marked unhealthy will not recover until restart."
                    );
                }
            }
        });

        Self {
            task,
            watcher: Some(watcher),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the task and wait for the watcher to observe it
    pub async fn shutdown(mut self) {
        self.task.abort();
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendClient;
    use crate::clock::{ManualClock, SharedClock};
    use crate::pool::testing::ScriptedClient;

    fn clock() -> (Arc<ManualClock>, SharedClock) {
        let manual = Arc::new(ManualClock::new());
        let shared: SharedClock = manual.clone();
        (manual, shared)
    }

    #[tokio::test]
    async fn test_probe_success_resets_and_records_version() {
        let (_, clock) = clock();
        let client = ScriptedClient::new("a", 1, 3, clock);
        client.state().record_failure();
        let shared: SharedClient = client.clone();

        assert!(probe(&shared, None).await);
        assert_eq!(client.state().retry_count(), 0);
        assert_eq!(client.state().version().as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn test_probe_failures_trip_at_threshold() {
        let (_, clock) = clock();
        let metrics = Metrics::new().unwrap();
        let client = ScriptedClient::new("a", 1, 2, clock);
        client.set_reachable(false);
        let shared: SharedClient = client.clone();

        assert!(!probe(&shared, Some(&metrics)).await);
        assert!(client.state().is_healthy());
        assert!(!probe(&shared, Some(&metrics)).await);
        assert!(!client.state().is_healthy());
        assert_eq!(metrics.health_transitions_count(HealthState::Unhealthy), 1);

        client.set_reachable(true);
        assert!(probe(&shared, Some(&metrics)).await);
        assert!(client.is_eligible());
        assert_eq!(metrics.health_transitions_count(HealthState::Healthy), 1);
    }

    #[tokio::test]
    async fn test_check_health_uses_cache_until_stale() {
        let (manual, clock) = clock();
        let client = ScriptedClient::new("a", 1, 3, clock);
        let shared: SharedClient = client.clone();
        let interval = Duration::from_secs(30);

        assert!(check_health(&shared, interval, None).await);
        assert_eq!(client.probes(), 1, "a client never checked is probed");

        assert!(check_health(&shared, interval, None).await);
        assert_eq!(client.probes(), 1);

        manual.advance(Duration::from_secs(31));
        assert!(check_health(&shared, interval, None).await);
        assert_eq!(client.probes(), 2);

        assert!(check_health(&shared, interval, None).await);
        assert_eq!(client.probes(), 2);
    }

    #[tokio::test]
    async fn test_probe_all_isolates_failures() {
        let (_, clock) = clock();
        let up = ScriptedClient::new("up", 1, 3, clock.clone());
        let down = ScriptedClient::new("down", 2, 3, clock);
        down.set_reachable(false);
        let clients: Vec<SharedClient> = vec![up.clone(), down.clone()];

        assert_eq!(probe_all(&clients, None).await, 1);
        assert_eq!(up.probes(), 1);
        assert_eq!(down.probes(), 1);
        assert_eq!(down.state().retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_probes_on_interval_and_stops() {
        let (_, clock) = clock();
        let client = ScriptedClient::new("a", 1, 3, clock);
        let metrics = Arc::new(Metrics::new().unwrap());
        let clients: Vec<SharedClient> = vec![client.clone()];
        let monitor = HealthMonitor::spawn(
            clients,
            Duration::from_secs(10),
            Arc::clone(&metrics),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.probes(), 1, "first round runs at startup");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(client.probes(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(client.probes(), 3);

        monitor.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.probes(), 3);
        assert_eq!(metrics.background_task_failures_count(), 0);
    }
}
