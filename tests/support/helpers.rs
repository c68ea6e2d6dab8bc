use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use dnsposture::{
    DnsLookup, FeedEntry, FeedSource, InMemoryStorage, JsonSummaryRenderer, Notification,
    Notifier, Pipeline, PipelineParts, RetryPolicy, ScanConfig, ScanConfigBuilder, TaskPolicy,
};
use once_cell::sync::Lazy;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Keeps every notification so tests can assert on subjects and ordering.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|notification| notification.subject.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// Feed that hands back a fixed list, or fails when built with [`StaticFeed::failing`].
pub struct StaticFeed {
    entries: Mutex<Option<Vec<FeedEntry>>>,
}

impl StaticFeed {
    pub fn new(entries: &[(&str, u32)]) -> Self {
        let entries = entries
            .iter()
            .map(|(domain, rank)| FeedEntry::new(*domain, *rank))
            .collect();
        Self {
            entries: Mutex::new(Some(entries)),
        }
    }

    pub fn ranked(count: u32) -> Self {
        let entries = (1..=count)
            .map(|rank| FeedEntry::new(format!("site{rank}.example"), rank))
            .collect();
        Self {
            entries: Mutex::new(Some(entries)),
        }
    }

    pub fn failing() -> Self {
        Self {
            entries: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch(&self) -> Result<Vec<FeedEntry>> {
        match self.entries.lock().unwrap().clone() {
            Some(entries) => Ok(entries),
            None => bail!("feed server returned 503"),
        }
    }
}

/// Short limits so timeout scenarios finish in well under a second.
pub fn fast_config(report_dir: &Path) -> ScanConfigBuilder {
    ScanConfig::builder()
        .worker_count(8)
        .probe_policy(TaskPolicy::new(
            Duration::from_millis(150),
            Duration::from_millis(300),
            RetryPolicy::none(),
        ))
        .process_policy(TaskPolicy::new(
            Duration::from_millis(500),
            Duration::from_secs(1),
            RetryPolicy::attempts(2, Duration::from_millis(5), Duration::from_millis(20)),
        ))
        .apply_policy(TaskPolicy::new(
            Duration::from_millis(500),
            Duration::from_secs(1),
            RetryPolicy::attempts(3, Duration::from_millis(5), Duration::from_millis(20)),
        ))
        .report_dir(report_dir)
}

pub struct Harness {
    pub store: InMemoryStorage,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(
        config: ScanConfig,
        store: InMemoryStorage,
        lookup: Arc<dyn DnsLookup>,
        feed: StaticFeed,
    ) -> Result<Self> {
        let notifier = Arc::new(RecordingNotifier::default());
        let shared: Arc<InMemoryStorage> = Arc::new(store.clone());
        let parts = PipelineParts {
            store: shared.clone(),
            lookup,
            feed: Arc::new(feed),
            notifier: notifier.clone(),
            renderer: Arc::new(JsonSummaryRenderer::new(shared, config.report_dir())),
        };
        let pipeline = Arc::new(Pipeline::new(config, parts)?);
        Ok(Self {
            store,
            notifier,
            pipeline,
        })
    }

    /// Waits for every queued job, failing the test instead of hanging.
    pub async fn settle(&self) -> Result<()> {
        timeout(Duration::from_secs(10), self.pipeline.executor().wait_until_idle()).await?;
        Ok(())
    }
}
