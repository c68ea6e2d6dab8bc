//! Rank-list reconciliation: feed ingestion, catalog diff, and transactional
//! batch application.

pub mod applier;
pub mod feed;
pub mod plan;
pub mod reconciler;

pub use applier::ChunkApplier;
pub use feed::{extract_feed, parse_feed, FeedEntry, FeedSource, HttpFeedSource};
pub use plan::{plan, BatchKind, RankBatch, RankBatcher, ReconcilePlan};
pub use reconciler::{ListReconciler, ReconcileSummary};
