//! Units of work and the jobs that compose them.
//!
//! A [`TaskUnit`] pairs a re-runnable operation with its [`TaskKind`] and
//! [`TaskPolicy`]. Executing a unit applies the soft limit (cancel the attempt's
//! token), the hard limit (drop the attempt) and the retry budget. A [`Job`] is
//! what the pool actually runs: one unit, or a chain where the second unit is
//! built from the first unit's output.

use crate::executor::backoff::{retry_with_backoff, RetryDisposition, RetryExit};
use crate::executor::policy::TaskPolicy;
use crate::executor::task::{TaskContext, TaskError, TaskErrorReason, TaskKind};
use crate::runtime::telemetry::Telemetry;
use anyhow::Error as AnyError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub type TaskFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

type Operation<T> = Box<dyn FnMut(TaskContext) -> TaskFuture<T> + Send>;
type RetryFilter = Arc<dyn Fn(&AnyError) -> bool + Send + Sync>;

pub struct TaskUnit<T> {
    kind: TaskKind,
    policy: TaskPolicy,
    label: String,
    operation: Operation<T>,
    retry_when: RetryFilter,
}

impl<T: Send + 'static> TaskUnit<T> {
    /// Builds a unit; `operation` is invoked once per attempt.
    pub fn new<F>(kind: TaskKind, policy: TaskPolicy, label: impl Into<String>, operation: F) -> Self
    where
        F: FnMut(TaskContext) -> TaskFuture<T> + Send + 'static,
    {
        Self {
            kind,
            policy,
            label: label.into(),
            operation: Box::new(operation),
            retry_when: Arc::new(|_| true),
        }
    }

    /// Restricts retries to failures accepted by `filter`. Timeouts are never retried.
    pub fn retry_when<F>(mut self, filter: F) -> Self
    where
        F: Fn(&AnyError) -> bool + Send + Sync + 'static,
    {
        self.retry_when = Arc::new(filter);
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn policy(&self) -> TaskPolicy {
        self.policy
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn execute(
        self,
        shutdown: &CancellationToken,
        telemetry: &Telemetry,
    ) -> Result<T, TaskError> {
        let TaskUnit {
            kind,
            policy,
            label,
            mut operation,
            retry_when,
        } = self;

        let outcome = retry_with_backoff(
            policy.retry,
            Some(shutdown),
            |attempt| {
                let token = shutdown.child_token();
                let future = operation(TaskContext::new(kind, attempt, token.clone()));
                run_attempt(kind, policy, token, future)
            },
            |attempt, delay, err: &TaskError| {
                telemetry.record_task_retry();
                tracing::warn!(
                    kind = %kind,
                    task = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "task attempt failed; retrying"
                );
            },
            |_, err: &TaskError| match err.reason() {
                TaskErrorReason::Failed(source) if (*retry_when)(source) => RetryDisposition::Retry,
                _ => RetryDisposition::Abort,
            },
        )
        .await;

        match outcome {
            Ok(value) => {
                telemetry.record_task_completed();
                Ok(value)
            }
            Err(RetryExit::Failed(err)) => {
                match err.reason() {
                    TaskErrorReason::SoftTimeout { .. } => telemetry.record_soft_timeout(),
                    TaskErrorReason::HardTimeout { .. } => telemetry.record_hard_timeout(),
                    TaskErrorReason::Cancelled => {}
                    TaskErrorReason::Failed(_) => telemetry.record_task_failed(),
                }
                Err(err)
            }
            Err(RetryExit::Cancelled(_)) => Err(TaskError::cancelled(kind)),
        }
    }
}

enum AttemptDecision<T> {
    Finished(anyhow::Result<T>),
    SoftLimit,
    HardLimit,
}

async fn run_attempt<T>(
    kind: TaskKind,
    policy: TaskPolicy,
    token: CancellationToken,
    mut future: TaskFuture<T>,
) -> Result<T, TaskError> {
    let soft = sleep(policy.soft_timeout);
    let hard = sleep(policy.hard_timeout);
    tokio::pin!(soft);
    tokio::pin!(hard);
    let mut soft_fired = false;

    loop {
        let decision = tokio::select! {
            result = &mut future => AttemptDecision::Finished(result),
            _ = &mut soft, if !soft_fired => AttemptDecision::SoftLimit,
            _ = &mut hard => AttemptDecision::HardLimit,
        };

        match decision {
            AttemptDecision::SoftLimit => {
                soft_fired = true;
                tracing::debug!(kind = %kind, limit = ?policy.soft_timeout, "soft time limit reached");
                token.cancel();
            }
            AttemptDecision::HardLimit => {
                token.cancel();
                return Err(TaskError::hard_timeout(kind, policy.hard_timeout));
            }
            // A unit that ran past its soft limit is a timeout even if it
            // produced a value; its output is discarded.
            AttemptDecision::Finished(_) if soft_fired => {
                return Err(TaskError::soft_timeout(kind, policy.soft_timeout));
            }
            AttemptDecision::Finished(Ok(value)) => return Ok(value),
            AttemptDecision::Finished(Err(_)) if token.is_cancelled() => {
                return Err(TaskError::cancelled(kind));
            }
            AttemptDecision::Finished(Err(err)) => return Err(TaskError::failed(kind, err)),
        }
    }
}

/// Handles the pool passes to each job it runs.
#[derive(Clone)]
pub struct JobContext {
    pub(crate) shutdown: CancellationToken,
    pub(crate) telemetry: Arc<Telemetry>,
}

impl JobContext {
    pub fn new(shutdown: CancellationToken, telemetry: Arc<Telemetry>) -> Self {
        Self {
            shutdown,
            telemetry,
        }
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }
}

type JobFn = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, ()> + Send>;

/// Fire-and-forget work accepted by [`TaskExecutor`](super::TaskExecutor).
/// Errors are logged and counted, never returned to the submitter.
pub struct Job {
    label: String,
    run: JobFn,
}

impl Job {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(JobContext) -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    pub fn single<T: Send + 'static>(unit: TaskUnit<T>) -> Self {
        let label = unit.label().to_string();
        Self::new(label, move |ctx: JobContext| {
            async move {
                if let Err(err) = unit.execute(&ctx.shutdown, &ctx.telemetry).await {
                    log_task_error(&err);
                }
            }
            .boxed()
        })
    }

    /// Runs `first`, then the unit built from its output. The second unit never
    /// runs when the first fails.
    pub fn chain<A, B, F>(first: TaskUnit<A>, then: F) -> Self
    where
        A: Send + 'static,
        B: Send + 'static,
        F: FnOnce(A) -> TaskUnit<B> + Send + 'static,
    {
        let label = first.label().to_string();
        Self::new(label, move |ctx: JobContext| {
            async move {
                let output = match first.execute(&ctx.shutdown, &ctx.telemetry).await {
                    Ok(output) => output,
                    Err(err) => {
                        log_task_error(&err);
                        return;
                    }
                };
                if let Err(err) = then(output).execute(&ctx.shutdown, &ctx.telemetry).await {
                    log_task_error(&err);
                }
            }
            .boxed()
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn run(self, ctx: JobContext) -> BoxFuture<'static, ()> {
        (self.run)(ctx)
    }
}

fn log_task_error(err: &TaskError) {
    if err.is_cancelled() {
        tracing::debug!(kind = %err.kind(), "task cancelled");
    } else if err.is_timeout() {
        tracing::warn!(kind = %err.kind(), error = %err, "task timed out");
    } else {
        tracing::warn!(kind = %err.kind(), error = %err, "task failed");
    }
}
