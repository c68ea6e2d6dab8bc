use crate::catalog::{Storage, StorageError, UNRANKED};
use crate::reconcile::feed::FeedEntry;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Applies reconcile batches to the catalog. Each call is one transaction:
/// either every entry lands or none does.
#[derive(Clone)]
pub struct ChunkApplier {
    store: Arc<dyn Storage>,
    telemetry: Arc<Telemetry>,
}

impl ChunkApplier {
    pub fn new(store: Arc<dyn Storage>, telemetry: Arc<Telemetry>) -> Self {
        Self { store, telemetry }
    }

    /// Inserts every entry as a new site. A domain that already exists fails the whole batch.
    pub async fn apply_new(&self, batch: &[FeedEntry]) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        for entry in batch {
            tx.insert_site(&entry.domain, entry.rank)
                .await
                .with_context(|| format!("failed to insert {}", entry.domain))?;
        }
        tx.commit().await.context("failed to commit new-site batch")?;

        self.telemetry.record_sites_inserted(batch.len() as u64);
        tracing::debug!(sites = batch.len(), "new-site batch applied");
        Ok(batch.len())
    }

    /// Moves each entry to its new rank, skipping entries already at that rank.
    /// Re-applying a batch is a no-op.
    pub async fn apply_update(&self, batch: &[FeedEntry]) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let mut updated = 0usize;
        for entry in batch {
            let site = tx
                .find_site(&entry.domain)
                .await?
                .ok_or_else(|| StorageError::SiteNotFound {
                    domain: entry.domain.clone(),
                })?;
            if site.current_rank != entry.rank {
                tx.set_rank(site.id, entry.rank).await?;
                updated += 1;
            }
        }
        tx.commit().await.context("failed to commit rank-update batch")?;

        self.telemetry.record_sites_updated(updated as u64);
        tracing::debug!(sites = batch.len(), updated, "rank-update batch applied");
        Ok(updated)
    }

    /// Sets a site's rank to 0. Returns `false` when the domain is unknown, which is not an error.
    pub async fn apply_unrank(&self, domain: &str) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let Some(site) = tx.find_site(domain).await? else {
            tracing::debug!(domain, "unrank skipped; site not found");
            return Ok(false);
        };
        if site.current_rank == UNRANKED {
            tx.commit().await.context("failed to commit unrank")?;
            tracing::debug!(domain, "unrank skipped; site already unranked");
            return Ok(true);
        }
        tx.set_rank(site.id, UNRANKED).await?;
        tx.commit().await.context("failed to commit unrank")?;

        self.telemetry.record_site_unranked();
        tracing::debug!(domain, "site unranked");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, InMemoryStorage};

    fn applier(store: &InMemoryStorage) -> ChunkApplier {
        ChunkApplier::new(Arc::new(store.clone()), Arc::new(Telemetry::default()))
    }

    #[tokio::test]
    async fn new_batch_inserts_all_sites() {
        let store = InMemoryStorage::new();
        let batch = vec![FeedEntry::new("a.com", 1), FeedEntry::new("b.com", 2)];
        assert_eq!(applier(&store).apply_new(&batch).await.unwrap(), 2);
        let ranks = store.load_ranks().await.unwrap();
        assert_eq!(ranks.get("b.com"), Some(&2));
    }

    #[tokio::test]
    async fn duplicate_in_new_batch_rolls_back_everything() {
        let store = InMemoryStorage::new();
        store.seed_sites([("b.com", 7)]).unwrap();
        let batch = vec![FeedEntry::new("a.com", 1), FeedEntry::new("b.com", 2)];

        let err = applier(&store).apply_new(&batch).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::DuplicateDomain { .. })
        ));
        assert!(store.site_by_domain("a.com").unwrap().is_none());
        assert_eq!(store.site_by_domain("b.com").unwrap().unwrap().current_rank, 7);
    }

    #[tokio::test]
    async fn update_batch_is_idempotent() {
        let store = InMemoryStorage::new();
        store.seed_sites([("a.com", 5), ("b.com", 6)]).unwrap();
        let batch = vec![FeedEntry::new("a.com", 1), FeedEntry::new("b.com", 6)];
        let applier = applier(&store);

        assert_eq!(applier.apply_update(&batch).await.unwrap(), 1);
        let after_first = store.load_ranks().await.unwrap();
        assert_eq!(applier.apply_update(&batch).await.unwrap(), 0);
        assert_eq!(store.load_ranks().await.unwrap(), after_first);
        assert_eq!(after_first.get("a.com"), Some(&1));
    }

    #[tokio::test]
    async fn update_with_missing_site_fails_batch() {
        let store = InMemoryStorage::new();
        store.seed_sites([("a.com", 5)]).unwrap();
        let batch = vec![FeedEntry::new("a.com", 1), FeedEntry::new("ghost.com", 2)];

        applier(&store).apply_update(&batch).await.unwrap_err();
        assert_eq!(store.site_by_domain("a.com").unwrap().unwrap().current_rank, 5);
    }

    #[tokio::test]
    async fn unrank_missing_site_is_success() {
        let store = InMemoryStorage::new();
        store.seed_sites([("a.com", 5)]).unwrap();
        let applier = applier(&store);

        assert!(!applier.apply_unrank("ghost.com").await.unwrap());
        assert!(applier.apply_unrank("a.com").await.unwrap());
        assert_eq!(store.site_by_domain("a.com").unwrap().unwrap().current_rank, UNRANKED);
    }

    #[tokio::test]
    async fn unrank_counts_only_sites_that_changed() {
        let store = InMemoryStorage::new();
        store.seed_sites([("a.com", 5), ("b.com", 0)]).unwrap();
        let telemetry = Arc::new(Telemetry::default());
        let applier = ChunkApplier::new(Arc::new(store.clone()), Arc::clone(&telemetry));

        assert!(applier.apply_unrank("a.com").await.unwrap());
        assert!(applier.apply_unrank("a.com").await.unwrap());
        assert!(applier.apply_unrank("b.com").await.unwrap());
        assert!(!applier.apply_unrank("ghost.com").await.unwrap());

        assert_eq!(telemetry.snapshot().sites_unranked, 1);
    }
}
