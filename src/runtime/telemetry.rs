use crate::executor::ActivityTracker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by the executor, the reconciler and the scan tasks.
#[derive(Default, Debug)]
pub struct Telemetry {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    task_retries: AtomicU64,
    soft_timeouts: AtomicU64,
    hard_timeouts: AtomicU64,
    task_panics: AtomicU64,
    lookup_failures: AtomicU64,
    snapshots_written: AtomicU64,
    duplicate_snapshots: AtomicU64,
    sites_inserted: AtomicU64,
    sites_updated: AtomicU64,
    sites_unranked: AtomicU64,
}

impl Telemetry {
    pub fn record_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_retry(&self) {
        self.task_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_timeout(&self) {
        self.soft_timeouts.fetch_add(1, Ordering::Relaxed);
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hard_timeout(&self) {
        self.hard_timeouts.fetch_add(1, Ordering::Relaxed);
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_panic(&self) {
        self.task_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_failures(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.lookup_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_snapshot_written(&self) {
        self.snapshots_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_snapshot(&self) {
        self.duplicate_snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sites_inserted(&self, count: u64) {
        self.sites_inserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_sites_updated(&self, count: u64) {
        self.sites_updated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_site_unranked(&self) {
        self.sites_unranked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            task_retries: self.task_retries.load(Ordering::Relaxed),
            soft_timeouts: self.soft_timeouts.load(Ordering::Relaxed),
            hard_timeouts: self.hard_timeouts.load(Ordering::Relaxed),
            task_panics: self.task_panics.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            snapshots_written: self.snapshots_written.load(Ordering::Relaxed),
            duplicate_snapshots: self.duplicate_snapshots.load(Ordering::Relaxed),
            sites_inserted: self.sites_inserted.load(Ordering::Relaxed),
            sites_updated: self.sites_updated.load(Ordering::Relaxed),
            sites_unranked: self.sites_unranked.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub task_retries: u64,
    pub soft_timeouts: u64,
    pub hard_timeouts: u64,
    pub task_panics: u64,
    pub lookup_failures: u64,
    pub snapshots_written: u64,
    pub duplicate_snapshots: u64,
    pub sites_inserted: u64,
    pub sites_updated: u64,
    pub sites_unranked: u64,
}

/// Spawns a background task that periodically logs task throughput, in-flight
/// jobs and failure counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    activity: Arc<ActivityTracker>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "dnsposture::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let completed_delta = current
                        .tasks_completed
                        .saturating_sub(last_snapshot.tasks_completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        completed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "dnsposture::metrics",
                        throughput = format!("{throughput:.2}"),
                        in_flight = activity.in_flight(),
                        submitted = current.tasks_submitted,
                        completed = current.tasks_completed,
                        failed = current.tasks_failed,
                        retries = current.task_retries,
                        soft_timeouts = current.soft_timeouts,
                        hard_timeouts = current.hard_timeouts,
                        lookup_failures = current.lookup_failures,
                        snapshots = current.snapshots_written,
                        duplicate_snapshots = current.duplicate_snapshots,
                        panics = current.task_panics,
                        sites_inserted = current.sites_inserted,
                        sites_updated = current.sites_updated,
                        sites_unranked = current.sites_unranked,
                        "scan pipeline metrics"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

/// Waits for a reporter spawned by [`spawn_metrics_reporter`]; a failed join is
/// logged, never propagated.
pub async fn join_metrics_reporter(handle: JoinHandle<()>) {
    if let Err(err) = handle.await {
        tracing::warn!(target: "dnsposture::metrics", error = %err, "metrics reporter join failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_task_submitted();
        telemetry.record_task_submitted();
        telemetry.record_task_completed();
        telemetry.record_soft_timeout();
        telemetry.record_hard_timeout();
        telemetry.record_lookup_failures(0);
        telemetry.record_lookup_failures(3);
        telemetry.record_sites_inserted(100);
        telemetry.record_site_unranked();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.tasks_submitted, 2);
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_failed, 2);
        assert_eq!(snapshot.soft_timeouts, 1);
        assert_eq!(snapshot.hard_timeouts, 1);
        assert_eq!(snapshot.lookup_failures, 3);
        assert_eq!(snapshot.sites_inserted, 100);
        assert_eq!(snapshot.sites_unranked, 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_task_completed();
        let activity = Arc::new(ActivityTracker::new());

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(
            telemetry,
            activity,
            shutdown.clone(),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(25)).await;
        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn join_tolerates_an_aborted_reporter() {
        let handle = spawn_metrics_reporter(
            Arc::new(Telemetry::default()),
            Arc::new(ActivityTracker::new()),
            CancellationToken::new(),
            Duration::from_secs(60),
        );
        handle.abort();
        timeout(Duration::from_secs(1), join_metrics_reporter(handle))
            .await
            .expect("join should return once the task is aborted");
    }
}
