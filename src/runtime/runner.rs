use crate::runtime::config::Schedule;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// The three jobs the scheduler fires once a day.
#[async_trait]
pub trait DailyJobs: Send + Sync {
    async fn import_list(&self) -> Result<()>;
    async fn start_run(&self) -> Result<()>;
    async fn finalize(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyJob {
    ImportList,
    StartRun,
    Finalize,
}

impl fmt::Display for DailyJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DailyJob::ImportList => "import-list",
            DailyJob::StartRun => "start-run",
            DailyJob::Finalize => "finalize",
        };
        f.write_str(label)
    }
}

/// First instant strictly after `now` whose UTC wall-clock time is `at`.
pub fn next_occurrence(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today
            .checked_add_days(Days::new(1))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// The job that fires next after `now`. Ties go to the earlier job in the daily order.
pub fn next_job(now: DateTime<Utc>, schedule: &Schedule) -> (DailyJob, DateTime<Utc>) {
    [
        (DailyJob::ImportList, schedule.import_at),
        (DailyJob::StartRun, schedule.run_at),
        (DailyJob::Finalize, schedule.finalize_at),
    ]
    .into_iter()
    .map(|(job, at)| (job, next_occurrence(now, at)))
    .min_by_key(|(_, when)| *when)
    .unwrap_or((DailyJob::ImportList, next_occurrence(now, schedule.import_at)))
}

/// Fires the daily jobs at their scheduled UTC times and handles OS signals for
/// graceful shutdown.
pub struct Runner<J: DailyJobs> {
    jobs: Arc<J>,
    schedule: Schedule,
    shutdown: CancellationToken,
}

impl<J: DailyJobs> Runner<J> {
    pub fn new(jobs: Arc<J>, schedule: Schedule) -> Self {
        Self {
            jobs,
            schedule,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        tracing::info!("scheduler started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down scheduler");
            }
            _ = self.run_until_cancelled() => {
                tracing::info!("scheduler shutdown token cancelled");
            }
        }

        self.shutdown.cancel();
        Ok(())
    }

    /// Sleeps until the next job is due, runs it and repeats. A failed job is
    /// logged and the loop moves on to the next one.
    #[tracing::instrument(skip_all)]
    pub async fn run_until_cancelled(&self) {
        loop {
            let now = Utc::now();
            let (job, due) = next_job(now, &self.schedule);
            let wait = (due - now).to_std().unwrap_or_default();
            tracing::info!(%job, due = %due.to_rfc3339(), "next scheduled job");

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            self.fire(job).await;
        }
    }

    /// Runs one job now, logging rather than returning its failure.
    pub async fn fire(&self, job: DailyJob) {
        tracing::info!(%job, "scheduled job starting");
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::info!(%job, "scheduled job interrupted by shutdown");
                return;
            }
            outcome = self.dispatch(job) => outcome,
        };
        match outcome {
            Ok(()) => tracing::info!(%job, "scheduled job finished"),
            Err(err) => tracing::error!(%job, error = ?err, "scheduled job failed"),
        }
    }

    async fn dispatch(&self, job: DailyJob) -> Result<()> {
        match job {
            DailyJob::ImportList => self.jobs.import_list().await,
            DailyJob::StartRun => self.jobs.start_run().await,
            DailyJob::Finalize => self.jobs.finalize().await,
        }
    }
}
