//! In-process storage backend.
//!
//! Suitable for tests, development runs, and single-process deployments. All
//! state lives behind one `RwLock`; catalog transactions stage their writes and
//! apply them atomically on commit, so a failed batch leaves no trace.

use crate::catalog::model::{NewRun, RankWindow, Run, RunId, Site, SiteId, SiteRun};
use crate::catalog::policy::PolicyTable;
use crate::catalog::store::{
    CatalogStore, CatalogTransaction, PolicyStore, RunStore, SnapshotInsert, SnapshotStore,
    StorageError, StorageResult,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct State {
    sites: BTreeMap<SiteId, Site>,
    by_domain: HashMap<String, SiteId>,
    runs: BTreeMap<RunId, Run>,
    next_run_id: RunId,
    snapshots: BTreeMap<(RunId, SiteId), SiteRun>,
    dmarc_policies: PolicyTable,
    spf_policies: PolicyTable,
}

#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
    next_site_id: Arc<AtomicU64>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Poisoned
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_policies(PolicyTable::dmarc_defaults(), PolicyTable::spf_defaults())
    }

    pub fn with_policies(dmarc_policies: PolicyTable, spf_policies: PolicyTable) -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                sites: BTreeMap::new(),
                by_domain: HashMap::new(),
                runs: BTreeMap::new(),
                next_run_id: 1,
                snapshots: BTreeMap::new(),
                dmarc_policies,
                spf_policies,
            })),
            next_site_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Seeds the catalog directly, bypassing the reconciler. Existing domains keep their id.
    pub fn seed_sites<I, S>(&self, sites: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut state = self.write()?;
        for (domain, rank) in sites {
            let domain = domain.into();
            match state.by_domain.get(&domain).copied() {
                Some(site_id) => {
                    if let Some(site) = state.sites.get_mut(&site_id) {
                        site.current_rank = rank;
                    }
                }
                None => {
                    let site_id = self.next_site_id.fetch_add(1, Ordering::SeqCst);
                    state.by_domain.insert(domain.clone(), site_id);
                    state.sites.insert(
                        site_id,
                        Site {
                            id: site_id,
                            domain,
                            current_rank: rank,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    pub fn site_by_domain(&self, domain: &str) -> StorageResult<Option<Site>> {
        let state = self.read()?;
        Ok(state
            .by_domain
            .get(domain)
            .and_then(|site_id| state.sites.get(site_id))
            .cloned())
    }

    pub fn site_count(&self) -> StorageResult<usize> {
        Ok(self.read()?.sites.len())
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(poisoned)
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(poisoned)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStorage {
    async fn load_ranks(&self) -> StorageResult<HashMap<String, u32>> {
        let state = self.read()?;
        Ok(state
            .sites
            .values()
            .map(|site| (site.domain.clone(), site.current_rank))
            .collect())
    }

    async fn begin(&self) -> StorageResult<Box<dyn CatalogTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            next_site_id: Arc::clone(&self.next_site_id),
            inserts: Vec::new(),
            rank_updates: HashMap::new(),
            closed: false,
        }))
    }

    async fn sites_in_window(&self, window: RankWindow) -> StorageResult<Vec<Site>> {
        let state = self.read()?;
        let mut sites: Vec<Site> = state
            .sites
            .values()
            .filter(|site| window.contains(site.current_rank))
            .cloned()
            .collect();
        sites.sort_by_key(|site| (site.current_rank, site.id));
        Ok(sites)
    }
}

#[async_trait]
impl RunStore for InMemoryStorage {
    async fn create_run(&self, run: NewRun) -> StorageResult<Run> {
        let mut state = self.write()?;
        let run_id = state.next_run_id;
        state.next_run_id += 1;
        let run = Run {
            id: run_id,
            start_time: run.start_time,
            start_rank: run.window.start(),
            end_rank: run.window.end(),
        };
        state.runs.insert(run_id, run.clone());
        Ok(run)
    }

    async fn run(&self, run_id: RunId) -> StorageResult<Option<Run>> {
        Ok(self.read()?.runs.get(&run_id).cloned())
    }

    async fn latest_run(&self) -> StorageResult<Option<Run>> {
        let state = self.read()?;
        Ok(state
            .runs
            .values()
            .max_by_key(|run| (run.start_time, run.id))
            .cloned())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStorage {
    async fn insert_site_run(&self, snapshot: SiteRun) -> StorageResult<SnapshotInsert> {
        let mut state = self.write()?;
        if !state.runs.contains_key(&snapshot.run_id) {
            return Err(StorageError::RunNotFound {
                run_id: snapshot.run_id,
            });
        }
        if !state.sites.contains_key(&snapshot.site_id) {
            return Err(StorageError::SiteIdNotFound {
                site_id: snapshot.site_id,
            });
        }

        let key = (snapshot.run_id, snapshot.site_id);
        if state.snapshots.contains_key(&key) {
            return Ok(SnapshotInsert::AlreadyPresent);
        }
        state.snapshots.insert(key, snapshot);
        Ok(SnapshotInsert::Inserted)
    }

    async fn count_site_runs(&self, run_id: RunId) -> StorageResult<usize> {
        let state = self.read()?;
        Ok(state
            .snapshots
            .range((run_id, SiteId::MIN)..=(run_id, SiteId::MAX))
            .count())
    }

    async fn site_runs(&self, run_id: RunId) -> StorageResult<Vec<SiteRun>> {
        let state = self.read()?;
        Ok(state
            .snapshots
            .range((run_id, SiteId::MIN)..=(run_id, SiteId::MAX))
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }
}

#[async_trait]
impl PolicyStore for InMemoryStorage {
    async fn dmarc_policies(&self) -> StorageResult<PolicyTable> {
        Ok(self.read()?.dmarc_policies.clone())
    }

    async fn spf_policies(&self) -> StorageResult<PolicyTable> {
        Ok(self.read()?.spf_policies.clone())
    }
}

#[derive(Debug)]
struct StagedInsert {
    site_id: SiteId,
    domain: String,
    rank: u32,
}

struct MemoryTransaction {
    state: Arc<RwLock<State>>,
    next_site_id: Arc<AtomicU64>,
    inserts: Vec<StagedInsert>,
    rank_updates: HashMap<SiteId, u32>,
    closed: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::TransactionClosed);
        }
        Ok(())
    }

    fn staged_insert(&self, domain: &str) -> Option<&StagedInsert> {
        self.inserts.iter().find(|insert| insert.domain == domain)
    }
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction {
    async fn find_site(&mut self, domain: &str) -> StorageResult<Option<Site>> {
        self.ensure_open()?;
        if let Some(insert) = self.staged_insert(domain) {
            let rank = self
                .rank_updates
                .get(&insert.site_id)
                .copied()
                .unwrap_or(insert.rank);
            return Ok(Some(Site {
                id: insert.site_id,
                domain: insert.domain.clone(),
                current_rank: rank,
            }));
        }

        let state = self.state.read().map_err(poisoned)?;
        let site = state
            .by_domain
            .get(domain)
            .and_then(|site_id| state.sites.get(site_id))
            .map(|site| {
                let mut site = site.clone();
                if let Some(rank) = self.rank_updates.get(&site.id) {
                    site.current_rank = *rank;
                }
                site
            });
        Ok(site)
    }

    async fn insert_site(&mut self, domain: &str, rank: u32) -> StorageResult<SiteId> {
        self.ensure_open()?;
        let exists = self.staged_insert(domain).is_some()
            || self
                .state
                .read()
                .map_err(poisoned)?
                .by_domain
                .contains_key(domain);
        if exists {
            return Err(StorageError::DuplicateDomain {
                domain: domain.to_owned(),
            });
        }

        let site_id = self.next_site_id.fetch_add(1, Ordering::SeqCst);
        self.inserts.push(StagedInsert {
            site_id,
            domain: domain.to_owned(),
            rank,
        });
        Ok(site_id)
    }

    async fn set_rank(&mut self, site_id: SiteId, rank: u32) -> StorageResult<()> {
        self.ensure_open()?;
        let known = self.inserts.iter().any(|insert| insert.site_id == site_id)
            || self
                .state
                .read()
                .map_err(poisoned)?
                .sites
                .contains_key(&site_id);
        if !known {
            return Err(StorageError::SiteIdNotFound { site_id });
        }
        self.rank_updates.insert(site_id, rank);
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(poisoned)?;

        // Another transaction may have inserted the same domain since staging.
        if let Some(conflict) = self
            .inserts
            .iter()
            .find(|insert| state.by_domain.contains_key(&insert.domain))
        {
            return Err(StorageError::DuplicateDomain {
                domain: conflict.domain.clone(),
            });
        }

        for insert in self.inserts.drain(..) {
            state.by_domain.insert(insert.domain.clone(), insert.site_id);
            state.sites.insert(
                insert.site_id,
                Site {
                    id: insert.site_id,
                    domain: insert.domain,
                    current_rank: insert.rank,
                },
            );
        }
        for (site_id, rank) in self.rank_updates.drain() {
            if let Some(site) = state.sites.get_mut(&site_id) {
                site.current_rank = rank;
            }
        }

        self.closed = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.closed && (!self.inserts.is_empty() || !self.rank_updates.is_empty()) {
            tracing::debug!(
                staged_inserts = self.inserts.len(),
                staged_updates = self.rank_updates.len(),
                "catalog transaction dropped without commit; rolling back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::UNRANKED;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let id = tx.insert_site("a.com", 1).await.unwrap();
        tx.set_rank(id, 3).await.unwrap();
        assert_eq!(tx.find_site("a.com").await.unwrap().unwrap().current_rank, 3);
        assert!(storage.site_by_domain("a.com").unwrap().is_none());

        tx.commit().await.unwrap();
        let site = storage.site_by_domain("a.com").unwrap().unwrap();
        assert_eq!(site.id, id);
        assert_eq!(site.current_rank, 3);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let storage = InMemoryStorage::new();
        storage.seed_sites([("a.com", 5)]).unwrap();
        {
            let mut tx = storage.begin().await.unwrap();
            tx.insert_site("b.com", 2).await.unwrap();
            let site = tx.find_site("a.com").await.unwrap().unwrap();
            tx.set_rank(site.id, 1).await.unwrap();
        }
        assert!(storage.site_by_domain("b.com").unwrap().is_none());
        assert_eq!(
            storage.site_by_domain("a.com").unwrap().unwrap().current_rank,
            5
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let storage = InMemoryStorage::new();
        storage.seed_sites([("a.com", 5)]).unwrap();
        let mut tx = storage.begin().await.unwrap();
        let err = tx.insert_site("a.com", 1).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::DuplicateDomain {
                domain: "a.com".into()
            }
        );

        tx.insert_site("b.com", 1).await.unwrap();
        let err = tx.insert_site("b.com", 2).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateDomain { .. }));
    }

    #[tokio::test]
    async fn commit_detects_concurrent_insert() {
        let storage = InMemoryStorage::new();
        let mut first = storage.begin().await.unwrap();
        let mut second = storage.begin().await.unwrap();
        first.insert_site("a.com", 1).await.unwrap();
        second.insert_site("a.com", 1).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateDomain { .. }));
        assert_eq!(storage.site_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn window_query_excludes_unranked_and_out_of_range() {
        let storage = InMemoryStorage::new();
        storage
            .seed_sites([("a.com", 1), ("b.com", 150), ("c.com", 151), ("d.com", UNRANKED)])
            .unwrap();
        let sites = storage
            .sites_in_window(RankWindow::new(1, 150).unwrap())
            .await
            .unwrap();
        let domains: Vec<_> = sites.iter().map(|site| site.domain.as_str()).collect();
        assert_eq!(domains, vec!["a.com", "b.com"]);
    }

    #[tokio::test]
    async fn snapshots_are_unique_per_site_and_run() {
        let storage = InMemoryStorage::new();
        storage.seed_sites([("a.com", 1)]).unwrap();
        let site = storage.site_by_domain("a.com").unwrap().unwrap();
        let run = storage
            .create_run(NewRun {
                start_time: Utc::now(),
                window: RankWindow::new(1, 10).unwrap(),
            })
            .await
            .unwrap();

        let snapshot = SiteRun {
            site_id: site.id,
            run_id: run.id,
            run_rank: 1,
            ..SiteRun::default()
        };
        assert_eq!(
            storage.insert_site_run(snapshot.clone()).await.unwrap(),
            SnapshotInsert::Inserted
        );
        assert_eq!(
            storage.insert_site_run(snapshot).await.unwrap(),
            SnapshotInsert::AlreadyPresent
        );
        assert_eq!(storage.count_site_runs(run.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_run_uses_start_time() {
        let storage = InMemoryStorage::new();
        let window = RankWindow::new(1, 10).unwrap();
        let now = Utc::now();
        let newer = storage
            .create_run(NewRun {
                start_time: now,
                window,
            })
            .await
            .unwrap();
        storage
            .create_run(NewRun {
                start_time: now - Duration::days(1),
                window,
            })
            .await
            .unwrap();

        assert_eq!(storage.latest_run().await.unwrap().unwrap().id, newer.id);
    }
}
