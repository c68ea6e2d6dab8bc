use crate::catalog::{NewRun, RankWindow, Run, RunId, Storage};
use crate::executor::{Job, TaskExecutor, TaskPolicy};
use crate::orchestrator::notify::{Notification, Notifier};
use crate::orchestrator::report::ReportRenderer;
use crate::runtime::config::ScanConfig;
use crate::scan::{ProbeTask, ProcessTask, RecordClassifier, StandardClassifier};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a run's dispatch. Completion is not tracked here: it is
/// inferred by counting the run's snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Created,
    Queuing,
    Queued,
}

impl RunState {
    /// Moves to `next` when the transition is legal.
    pub fn advance(self, next: RunState) -> Result<RunState, IllegalTransition> {
        match (self, next) {
            (RunState::Created, RunState::Queuing) | (RunState::Queuing, RunState::Queued) => {
                Ok(next)
            }
            (from, to) => Err(IllegalTransition { from, to }),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Created => "created",
            RunState::Queuing => "queuing",
            RunState::Queued => "queued",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal run state transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchSummary {
    pub run_id: RunId,
    pub groups: usize,
    pub sites_enqueued: usize,
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedRun {
    pub run_id: RunId,
    pub results: usize,
    pub artifacts: Vec<String>,
}

/// Knobs the orchestrator reads from [`ScanConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSettings {
    pub rank_ceiling: u32,
    pub group_size: usize,
    pub probe_policy: TaskPolicy,
    pub process_policy: TaskPolicy,
}

impl LaunchSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            rank_ceiling: config.run_rank_ceiling(),
            group_size: config.fanout_group_size(),
            probe_policy: config.probe_policy(),
            process_policy: config.process_policy(),
        }
    }
}

/// Creates runs and fans out one probe→process chain per site in the run's window.
pub struct RunOrchestrator {
    store: Arc<dyn Storage>,
    executor: Arc<TaskExecutor>,
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn ReportRenderer>,
    probe: ProbeTask,
    classifier: Arc<dyn RecordClassifier>,
    settings: LaunchSettings,
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<dyn Storage>,
        executor: Arc<TaskExecutor>,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn ReportRenderer>,
        probe: ProbeTask,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
            renderer,
            probe,
            classifier: Arc::new(StandardClassifier::default()),
            settings: LaunchSettings {
                group_size: settings.group_size.max(1),
                ..settings
            },
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RecordClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Persists a run over `[1, rank_ceiling]`, announces it and launches it.
    #[tracing::instrument(skip_all)]
    pub async fn start_run(&self) -> Result<LaunchSummary> {
        let window = RankWindow::new(1, self.settings.rank_ceiling)?;
        let run = self
            .store
            .create_run(NewRun {
                start_time: Utc::now(),
                window,
            })
            .await
            .context("failed to create run")?;
        tracing::info!(run_id = run.id, end_rank = run.end_rank, "run created");

        self.notifier.notify(Notification::scan_starting(&run));
        self.launch(&run).await
    }

    /// Enqueues the run's sites in groups. Groups go out one after another; the
    /// chains inside a group run concurrently. Returns once everything is
    /// enqueued, not once it has finished.
    #[tracing::instrument(skip_all, fields(run_id = run.id))]
    pub async fn launch(&self, run: &Run) -> Result<LaunchSummary> {
        let mut state = RunState::Created.advance(RunState::Queuing)?;

        let window = run.window()?;
        let sites = self
            .store
            .sites_in_window(window)
            .await
            .context("failed to select sites for run")?;
        let process = ProcessTask::load(
            Arc::clone(&self.store),
            Arc::clone(&self.classifier),
            self.executor.telemetry(),
        )
        .await?;

        let mut groups = 0usize;
        let mut enqueued = 0usize;
        for group in sites.chunks(self.settings.group_size) {
            let jobs: Vec<Job> = group
                .iter()
                .map(|site| {
                    let process = process.clone();
                    let process_policy = self.settings.process_policy;
                    Job::chain(
                        self.probe
                            .unit(site.clone(), run.id, self.settings.probe_policy),
                        move |result| process.unit(result, process_policy),
                    )
                })
                .collect();
            enqueued += self
                .executor
                .submit_group(jobs)
                .with_context(|| format!("failed to enqueue group {}", groups + 1))?;
            groups += 1;
            tracing::debug!(group = groups, size = group.len(), "group enqueued");
        }

        state = state.advance(RunState::Queued)?;
        tracing::info!(groups, sites = enqueued, "all scans enqueued");
        self.notifier.notify(Notification::all_enqueued(run, enqueued));

        Ok(LaunchSummary {
            run_id: run.id,
            groups,
            sites_enqueued: enqueued,
            state,
        })
    }

    /// Renders the report for the most recent run and announces it.
    #[tracing::instrument(skip_all)]
    pub async fn finalize(&self) -> Result<PublishedRun> {
        let Some(run) = self
            .store
            .latest_run()
            .await
            .context("failed to load latest run")?
        else {
            bail!("no run to finalize");
        };

        let artifacts = self
            .renderer
            .render(run.id)
            .await
            .with_context(|| format!("failed to render report for run {}", run.id))?;
        let results = self.completion(run.id).await?;

        tracing::info!(run_id = run.id, results, "run published");
        self.notifier
            .notify(Notification::published(run.id, results, &artifacts));
        Ok(PublishedRun {
            run_id: run.id,
            results,
            artifacts,
        })
    }

    /// Snapshots stored so far for `run_id`.
    pub async fn completion(&self, run_id: RunId) -> Result<usize> {
        self.store
            .count_site_runs(run_id)
            .await
            .with_context(|| format!("failed to count snapshots for run {run_id}"))
    }
}
