//! Site catalog, run and snapshot models, and the storage seams the pipeline
//! consumes (plus an in-memory backend).

pub mod memory;
pub mod model;
pub mod policy;
pub mod store;

pub use memory::InMemoryStorage;
pub use model::{NewRun, PolicyId, RankWindow, Run, RunId, Site, SiteId, SiteRun, UNRANKED};
pub use policy::{PolicyTable, INVALID_POLICY, NO_POLICY};
pub use store::{
    CatalogStore, CatalogTransaction, PolicyStore, RunStore, SnapshotInsert, SnapshotStore,
    Storage, StorageError, StorageResult,
};
