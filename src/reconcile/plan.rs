//! Pure diff of a ranked feed against the catalog's domain→rank map.

use crate::catalog::UNRANKED;
use crate::reconcile::feed::FeedEntry;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Domains absent from the catalog.
    New,
    /// Known domains whose rank moved.
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankBatch {
    pub kind: BatchKind,
    pub entries: Vec<FeedEntry>,
}

impl RankBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fixed-capacity accumulator that hands back a batch each time it fills.
#[derive(Debug)]
pub struct RankBatcher {
    kind: BatchKind,
    capacity: usize,
    pending: Vec<FeedEntry>,
}

impl RankBatcher {
    pub fn new(kind: BatchKind, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            kind,
            capacity,
            pending: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: FeedEntry) -> Option<RankBatch> {
        self.pending.push(entry);
        if self.pending.len() >= self.capacity {
            return self.take();
        }
        None
    }

    /// Flushes whatever is left, if anything.
    pub fn finish(mut self) -> Option<RankBatch> {
        self.take()
    }

    fn take(&mut self) -> Option<RankBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let entries = std::mem::replace(&mut self.pending, Vec::with_capacity(self.capacity));
        Some(RankBatch {
            kind: self.kind,
            entries,
        })
    }
}

/// Work derived from one feed. `batches` is in dispatch order: full batches as
/// they filled while walking the feed, then the new tail, then the changed tail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub unranked: Vec<String>,
    pub batches: Vec<RankBatch>,
}

impl ReconcilePlan {
    pub fn new_batches(&self) -> impl Iterator<Item = &RankBatch> {
        self.batches.iter().filter(|batch| batch.kind == BatchKind::New)
    }

    pub fn changed_batches(&self) -> impl Iterator<Item = &RankBatch> {
        self.batches
            .iter()
            .filter(|batch| batch.kind == BatchKind::Changed)
    }

    pub fn new_domains(&self) -> usize {
        self.new_batches().map(RankBatch::len).sum()
    }

    pub fn changed_domains(&self) -> usize {
        self.changed_batches().map(RankBatch::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.unranked.is_empty() && self.batches.is_empty()
    }
}

/// Partitions `feed` against `catalog`.
///
/// Catalog domains missing from the feed are unranked (those already at rank 0
/// are left alone). Feed domains missing from the catalog are new; domains in
/// both with a different rank are changed. New and changed entries never share
/// a batch.
pub fn plan(feed: &[FeedEntry], catalog: &HashMap<String, u32>, batch_size: usize) -> ReconcilePlan {
    let in_feed: HashSet<&str> = feed.iter().map(|entry| entry.domain.as_str()).collect();

    let mut unranked: Vec<String> = catalog
        .iter()
        .filter(|(domain, rank)| **rank != UNRANKED && !in_feed.contains(domain.as_str()))
        .map(|(domain, _)| domain.clone())
        .collect();
    unranked.sort_unstable();

    let mut new_batcher = RankBatcher::new(BatchKind::New, batch_size);
    let mut changed_batcher = RankBatcher::new(BatchKind::Changed, batch_size);
    let mut batches = Vec::new();

    for entry in feed {
        let flushed = match catalog.get(&entry.domain) {
            None => new_batcher.push(entry.clone()),
            Some(&rank) if rank != entry.rank => changed_batcher.push(entry.clone()),
            Some(_) => None,
        };
        batches.extend(flushed);
    }

    batches.extend(new_batcher.finish());
    batches.extend(changed_batcher.finish());

    ReconcilePlan { unranked, batches }
}
