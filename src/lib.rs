pub mod catalog;
pub mod executor;
pub mod orchestrator;
pub mod reconcile;
pub mod runtime;
pub mod scan;

pub use catalog::{
    CatalogStore, CatalogTransaction, InMemoryStorage, NewRun, PolicyStore, PolicyTable,
    RankWindow, Run, RunId, RunStore, Site, SiteId, SiteRun, SnapshotInsert, SnapshotStore,
    Storage, StorageError, UNRANKED,
};
pub use executor::{
    Job, RetryPolicy, TaskContext, TaskError, TaskErrorReason, TaskExecutor, TaskKind, TaskPolicy,
    TaskUnit,
};
pub use orchestrator::{
    JsonSummaryRenderer, LaunchSummary, LogNotifier, MailNotifier, Notification, Notifier,
    PublishedRun, ReportRenderer, RunOrchestrator, RunState,
};
pub use reconcile::{ChunkApplier, FeedEntry, FeedSource, HttpFeedSource, ListReconciler, ReconcileSummary};
pub use runtime::config::{Environment, MailSettings, Schedule, ScanConfig, ScanConfigBuilder, ScanConfigParams};
pub use runtime::pipeline::{Pipeline, PipelineParts};
pub use runtime::runner::{next_occurrence, DailyJob, DailyJobs, Runner};
pub use runtime::telemetry::{init_tracing, join_metrics_reporter, Telemetry, TelemetrySnapshot};
pub use scan::{
    DnsLookup, HickoryLookup, LookupError, ProbeResult, ProbeTask, ProcessTask, RecordClassifier,
    RecordKind, StandardClassifier,
};
