use crate::catalog::{Storage, StorageError};
use crate::executor::{Job, TaskExecutor, TaskKind, TaskPolicy, TaskUnit};
use crate::orchestrator::notify::{Notification, Notifier};
use crate::reconcile::applier::ChunkApplier;
use crate::reconcile::feed::{FeedEntry, FeedSource};
use crate::reconcile::plan::{plan, BatchKind, RankBatch, ReconcilePlan};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub feed_entries: usize,
    pub new_domains: usize,
    pub changed_domains: usize,
    pub unranked_domains: usize,
    pub new_batches: usize,
    pub changed_batches: usize,
}

impl ReconcileSummary {
    fn from_plan(feed_entries: usize, plan: &ReconcilePlan) -> Self {
        Self {
            feed_entries,
            new_domains: plan.new_domains(),
            changed_domains: plan.changed_domains(),
            unranked_domains: plan.unranked.len(),
            new_batches: plan.new_batches().count(),
            changed_batches: plan.changed_batches().count(),
        }
    }
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "feed entries: {}, new: {} in {} batches, changed: {} in {} batches, unranked: {}",
            self.feed_entries,
            self.new_domains,
            self.new_batches,
            self.changed_domains,
            self.changed_batches,
            self.unranked_domains
        )
    }
}

/// Diffs the ranked feed against the catalog and dispatches the resulting
/// unrank tasks and rank batches to the executor.
pub struct ListReconciler {
    store: Arc<dyn Storage>,
    executor: Arc<TaskExecutor>,
    notifier: Arc<dyn Notifier>,
    applier: ChunkApplier,
    batch_size: usize,
    policy: TaskPolicy,
}

impl ListReconciler {
    pub fn new(
        store: Arc<dyn Storage>,
        executor: Arc<TaskExecutor>,
        notifier: Arc<dyn Notifier>,
        batch_size: usize,
        policy: TaskPolicy,
    ) -> Self {
        let applier = ChunkApplier::new(Arc::clone(&store), executor.telemetry());
        Self {
            store,
            executor,
            notifier,
            applier,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    /// Fetches the feed and reconciles it, bracketed by the list-update notifications.
    /// A fetch or parse failure returns before anything is dispatched.
    #[tracing::instrument(skip_all)]
    pub async fn import(&self, source: &dyn FeedSource) -> Result<ReconcileSummary> {
        self.notifier
            .notify(Notification::list_update_started(Utc::now()));

        let feed = source.fetch().await.context("failed to fetch ranked feed")?;
        let summary = self.dispatch(feed).await?;

        self.notifier
            .notify(Notification::list_update_done(Utc::now(), &summary.to_string()));
        Ok(summary)
    }

    /// Reconciles an already-parsed feed, bracketed by the list-update notifications.
    #[tracing::instrument(skip_all, fields(entries = feed.len()))]
    pub async fn reconcile(&self, feed: Vec<FeedEntry>) -> Result<ReconcileSummary> {
        self.notifier
            .notify(Notification::list_update_started(Utc::now()));
        let summary = self.dispatch(feed).await?;
        self.notifier
            .notify(Notification::list_update_done(Utc::now(), &summary.to_string()));
        Ok(summary)
    }

    async fn dispatch(&self, feed: Vec<FeedEntry>) -> Result<ReconcileSummary> {
        let catalog = self
            .store
            .load_ranks()
            .await
            .context("failed to load catalog ranks")?;
        let plan = plan(&feed, &catalog, self.batch_size);
        let summary = ReconcileSummary::from_plan(feed.len(), &plan);
        tracing::info!(
            catalog = catalog.len(),
            new = summary.new_domains,
            changed = summary.changed_domains,
            unranked = summary.unranked_domains,
            "reconcile plan computed"
        );

        let ReconcilePlan { unranked, batches } = plan;
        for domain in unranked {
            self.executor
                .submit(self.unrank_job(domain))
                .context("failed to enqueue unrank task")?;
        }
        for (index, batch) in batches.into_iter().enumerate() {
            tracing::debug!(batch = index + 1, kind = ?batch.kind, size = batch.len(), "enqueue rank batch");
            self.executor
                .submit(self.batch_job(batch))
                .context("failed to enqueue rank batch")?;
        }

        tracing::info!(%summary, "reconcile dispatch complete");
        Ok(summary)
    }

    fn unrank_job(&self, domain: String) -> Job {
        let applier = self.applier.clone();
        let label = format!("unrank {domain}");
        Job::single(
            TaskUnit::new(TaskKind::Unrank, self.policy, label, move |_| {
                let applier = applier.clone();
                let domain = domain.clone();
                async move { applier.apply_unrank(&domain).await.map(|_| ()) }.boxed()
            })
            .retry_when(is_transient),
        )
    }

    fn batch_job(&self, batch: RankBatch) -> Job {
        let applier = self.applier.clone();
        let entries = Arc::new(batch.entries);
        let (kind, label) = match batch.kind {
            BatchKind::New => (TaskKind::ApplyNew, format!("apply {} new sites", entries.len())),
            BatchKind::Changed => (
                TaskKind::ApplyUpdate,
                format!("apply {} rank updates", entries.len()),
            ),
        };
        Job::single(
            TaskUnit::new(kind, self.policy, label, move |_| {
                let applier = applier.clone();
                let entries = Arc::clone(&entries);
                async move {
                    match kind {
                        TaskKind::ApplyNew => applier.apply_new(&entries).await.map(|_| ()),
                        _ => applier.apply_update(&entries).await.map(|_| ()),
                    }
                }
                .boxed()
            })
            .retry_when(is_transient),
        )
    }
}

/// Duplicate keys and missing sites fail the same way on every attempt.
fn is_transient(err: &anyhow::Error) -> bool {
    !matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::DuplicateDomain { .. } | StorageError::SiteNotFound { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_storage_errors_are_not_retried() {
        let duplicate = anyhow::Error::new(StorageError::DuplicateDomain {
            domain: "a.com".into(),
        })
        .context("failed to insert a.com");
        assert!(!is_transient(&duplicate));

        let poisoned = anyhow::Error::new(StorageError::Poisoned);
        assert!(is_transient(&poisoned));
    }

    #[test]
    fn summary_reads_as_counts() {
        let summary = ReconcileSummary {
            feed_entries: 3,
            new_domains: 2,
            changed_domains: 1,
            unranked_domains: 4,
            new_batches: 1,
            changed_batches: 1,
        };
        let text = summary.to_string();
        assert!(text.contains("new: 2 in 1 batches"));
        assert!(text.contains("unranked: 4"));
    }
}
