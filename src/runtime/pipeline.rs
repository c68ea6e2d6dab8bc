use crate::catalog::Storage;
use crate::executor::TaskExecutor;
use crate::orchestrator::{
    notifier_for, JsonSummaryRenderer, LaunchSettings, LaunchSummary, Notifier, PublishedRun,
    ReportRenderer, RunOrchestrator,
};
use crate::reconcile::{FeedSource, HttpFeedSource, ListReconciler, ReconcileSummary};
use crate::runtime::config::ScanConfig;
use crate::runtime::runner::DailyJobs;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::scan::{DnsLookup, HickoryLookup, ProbeTask, SecurityTxtProbe};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Collaborators a pipeline is assembled from. [`Pipeline::from_config`] fills
/// them with the network-backed defaults.
pub struct PipelineParts {
    pub store: Arc<dyn Storage>,
    pub lookup: Arc<dyn DnsLookup>,
    pub feed: Arc<dyn FeedSource>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Arc<dyn ReportRenderer>,
}

/// The reconciler, the orchestrator and the executor they share.
pub struct Pipeline {
    config: ScanConfig,
    executor: Arc<TaskExecutor>,
    reconciler: ListReconciler,
    orchestrator: RunOrchestrator,
    feed: Arc<dyn FeedSource>,
}

impl Pipeline {
    pub fn new(config: ScanConfig, parts: PipelineParts) -> Result<Self> {
        let telemetry = Arc::new(Telemetry::default());
        let executor = Arc::new(TaskExecutor::new(
            config.worker_count(),
            Arc::clone(&telemetry),
        ));

        let security_txt = if config.check_security_txt() {
            Some(SecurityTxtProbe::new(config.lookup_timeout())?)
        } else {
            None
        };
        let probe = ProbeTask::new(parts.lookup, security_txt, telemetry);

        let reconciler = ListReconciler::new(
            Arc::clone(&parts.store),
            Arc::clone(&executor),
            Arc::clone(&parts.notifier),
            config.reconcile_batch_size(),
            config.apply_policy(),
        );
        let orchestrator = RunOrchestrator::new(
            parts.store,
            Arc::clone(&executor),
            parts.notifier,
            parts.renderer,
            probe,
            LaunchSettings::from_config(&config),
        );

        tracing::info!(
            environment = %config.environment(),
            workers = config.worker_count(),
            rank_ceiling = config.run_rank_ceiling(),
            "pipeline assembled"
        );
        Ok(Self {
            config,
            executor,
            reconciler,
            orchestrator,
            feed: parts.feed,
        })
    }

    /// Wires hickory, the HTTP feed, the configured notifier and the JSON renderer around `store`.
    pub fn from_config(config: ScanConfig, store: Arc<dyn Storage>) -> Result<Self> {
        let parts = PipelineParts {
            lookup: Arc::new(HickoryLookup::new(config.lookup_timeout())),
            feed: Arc::new(HttpFeedSource::new(config.feed_url(), config.feed_member())?),
            notifier: notifier_for(&config)?,
            renderer: Arc::new(JsonSummaryRenderer::new(
                Arc::clone(&store),
                config.report_dir(),
            )),
            store,
        };
        Self::new(config, parts)
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn executor(&self) -> Arc<TaskExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn reconciler(&self) -> &ListReconciler {
        &self.reconciler
    }

    pub fn orchestrator(&self) -> &RunOrchestrator {
        &self.orchestrator
    }

    pub async fn import_list(&self) -> Result<ReconcileSummary> {
        self.reconciler.import(self.feed.as_ref()).await
    }

    pub async fn start_run(&self) -> Result<LaunchSummary> {
        self.orchestrator.start_run().await
    }

    pub async fn finalize(&self) -> Result<PublishedRun> {
        self.orchestrator.finalize().await
    }

    /// Logs executor counters every `metrics_interval` until `shutdown` fires.
    pub fn spawn_metrics_reporter(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        spawn_metrics_reporter(
            self.executor.telemetry(),
            self.executor.activity(),
            shutdown,
            self.config.metrics_interval(),
        )
    }
}

#[async_trait]
impl DailyJobs for Pipeline {
    async fn import_list(&self) -> Result<()> {
        let summary = Pipeline::import_list(self).await?;
        tracing::info!(%summary, "scheduled list import dispatched");
        Ok(())
    }

    async fn start_run(&self) -> Result<()> {
        let summary = Pipeline::start_run(self).await?;
        tracing::info!(
            run_id = summary.run_id,
            sites = summary.sites_enqueued,
            "scheduled run enqueued"
        );
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let published = Pipeline::finalize(self).await?;
        tracing::info!(run_id = published.run_id, results = published.results, "scheduled finalize done");
        Ok(())
    }
}
