//! Repository-style storage seams consumed by the pipeline.
//!
//! The pipeline never holds a process-wide session: every task receives an
//! explicit handle and scopes its own transaction to a single unit of work.

use crate::catalog::model::{NewRun, RankWindow, Run, RunId, Site, SiteId, SiteRun};
use crate::catalog::policy::PolicyTable;
use async_trait::async_trait;
use std::collections::HashMap;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("site {domain} already exists")]
    DuplicateDomain { domain: String },

    #[error("site {domain} not found")]
    SiteNotFound { domain: String },

    #[error("site id {site_id} not found")]
    SiteIdNotFound { site_id: SiteId },

    #[error("run {run_id} not found")]
    RunNotFound { run_id: RunId },

    #[error("policy table {table} has no \"invalid\" sentinel entry")]
    MissingSentinel { table: &'static str },

    #[error("transaction already committed")]
    TransactionClosed,

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Outcome of persisting a scan snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotInsert {
    Inserted,
    /// A snapshot for the same `(site, run)` pair already exists; nothing was written.
    AlreadyPresent,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Single bulk read of every known domain and its current rank.
    async fn load_ranks(&self) -> StorageResult<HashMap<String, u32>>;

    /// Opens a local transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> StorageResult<Box<dyn CatalogTransaction>>;

    async fn sites_in_window(&self, window: RankWindow) -> StorageResult<Vec<Site>>;
}

#[async_trait]
pub trait CatalogTransaction: Send {
    async fn find_site(&mut self, domain: &str) -> StorageResult<Option<Site>>;

    /// Inserts a new site. A domain that already exists surfaces as
    /// [`StorageError::DuplicateDomain`].
    async fn insert_site(&mut self, domain: &str, rank: u32) -> StorageResult<SiteId>;

    async fn set_rank(&mut self, site_id: SiteId, rank: u32) -> StorageResult<()>;

    async fn commit(&mut self) -> StorageResult<()>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: NewRun) -> StorageResult<Run>;

    async fn run(&self, run_id: RunId) -> StorageResult<Option<Run>>;

    /// Most recently started run, if any.
    async fn latest_run(&self) -> StorageResult<Option<Run>>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert_site_run(&self, snapshot: SiteRun) -> StorageResult<SnapshotInsert>;

    async fn count_site_runs(&self, run_id: RunId) -> StorageResult<usize>;

    async fn site_runs(&self, run_id: RunId) -> StorageResult<Vec<SiteRun>>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn dmarc_policies(&self) -> StorageResult<PolicyTable>;

    async fn spf_policies(&self) -> StorageResult<PolicyTable>;
}

/// Everything the pipeline needs from a storage backend.
pub trait Storage: CatalogStore + RunStore + SnapshotStore + PolicyStore {}

impl<T> Storage for T where T: CatalogStore + RunStore + SnapshotStore + PolicyStore + ?Sized {}
