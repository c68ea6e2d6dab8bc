//! Fixed-size worker pool fed through an unbounded backlog.
//!
//! Submitting never waits on workers: a million-site run is fully queued as
//! soon as `submit_group` returns. Every
//! accepted job holds an [`ActivityGuard`] from enqueue until it returns (or is
//! dropped at shutdown), so [`TaskExecutor::wait_until_idle`] covers both queued
//! and running work.

use crate::executor::activity::{ActivityGuard, ActivityTracker};
use crate::executor::unit::{Job, JobContext};
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Envelope {
    job: Job,
    _guard: ActivityGuard,
}

pub struct TaskExecutor {
    sender: mpsc::UnboundedSender<Envelope>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    activity: Arc<ActivityTracker>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    worker_count: usize,
}

impl TaskExecutor {
    /// Spawns `worker_count` workers on the current runtime.
    pub fn new(worker_count: usize, telemetry: Arc<Telemetry>) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let activity = Arc::new(ActivityTracker::new());
        let shutdown = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let ctx = JobContext::new(shutdown.clone(), Arc::clone(&telemetry));
                tokio::spawn(worker_loop(worker_id, receiver, ctx))
            })
            .collect();

        tracing::debug!(workers = worker_count, "task executor started");

        Self {
            sender,
            workers: Mutex::new(workers),
            activity,
            telemetry,
            shutdown,
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn activity(&self) -> Arc<ActivityTracker> {
        Arc::clone(&self.activity)
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Enqueues one job without waiting.
    pub fn submit(&self, job: Job) -> Result<()> {
        if self.shutdown.is_cancelled() {
            bail!("task executor is shut down; rejected job {}", job.label());
        }

        let envelope = Envelope {
            job,
            _guard: self.activity.enter(),
        };
        if let Err(mpsc::error::SendError(rejected)) = self.sender.send(envelope) {
            bail!("task executor queue closed; rejected job {}", rejected.job.label());
        }

        self.telemetry.record_task_submitted();
        Ok(())
    }

    /// Enqueues every job of a group in order; members run concurrently.
    pub fn submit_group<I>(&self, jobs: I) -> Result<usize>
    where
        I: IntoIterator<Item = Job>,
    {
        let mut submitted = 0;
        for job in jobs {
            self.submit(job)?;
            submitted += 1;
        }
        Ok(submitted)
    }

    pub async fn wait_until_idle(&self) {
        self.activity.wait_until_idle().await;
    }

    /// Stops accepting work, cancels running jobs and joins the workers. Jobs
    /// still queued are dropped.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for (worker_id, handle) in handles.into_iter().enumerate() {
            if let Err(err) = handle.await {
                tracing::warn!(worker = worker_id, error = %err, "executor worker join failed");
            }
        }
        tracing::debug!("task executor stopped");
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
    ctx: JobContext,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = ctx.shutdown.cancelled() => None,
                item = receiver.recv() => item,
            }
        };

        let Some(Envelope { job, _guard }) = next else {
            break;
        };

        let label = job.label().to_string();
        let result = std::panic::AssertUnwindSafe(job.run(ctx.clone()))
            .catch_unwind()
            .await;

        if let Err(panic_payload) = result {
            let panic_msg = panic_message(panic_payload.as_ref());
            ctx.telemetry.record_task_panic();
            tracing::error!(
                worker = worker_id,
                job = %label,
                panic = %panic_msg,
                "job panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
