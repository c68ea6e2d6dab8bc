use std::sync::Arc;

use anyhow::Result;
use dnsposture::{CatalogStore, InMemoryStorage, UNRANKED};

use crate::support::helpers::{fast_config, init_tracing, Harness, StaticFeed};
use crate::support::mock_resolver::ScriptedLookup;

const STARTED: &str = "Site List Update Started";
const DONE: &str = "Site List Update Is Done";

fn harness(store: InMemoryStorage, feed: StaticFeed) -> Result<(Harness, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let harness = Harness::new(config, store, Arc::new(ScriptedLookup::default()), feed)?;
    Ok((harness, dir))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_catalog_gets_one_new_batch() -> Result<()> {
    init_tracing();
    let (harness, _dir) = harness(
        InMemoryStorage::new(),
        StaticFeed::new(&[("a.com", 1), ("b.com", 2)]),
    )?;

    let summary = harness.pipeline.import_list().await?;
    harness.settle().await?;

    assert_eq!(summary.new_domains, 2);
    assert_eq!(summary.new_batches, 1);
    assert_eq!(summary.changed_batches, 0);
    assert_eq!(summary.unranked_domains, 0);

    let ranks = harness.store.load_ranks().await?;
    assert_eq!(ranks.get("a.com"), Some(&1));
    assert_eq!(ranks.get("b.com"), Some(&2));
    assert_eq!(harness.notifier.subjects(), vec![STARTED, DONE]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn changed_and_missing_sites_are_updated_and_unranked() -> Result<()> {
    init_tracing();
    let store = InMemoryStorage::new();
    store.seed_sites([("a.com", 5), ("c.com", 9)])?;
    let (harness, _dir) = harness(store, StaticFeed::new(&[("a.com", 1)]))?;

    let summary = harness.pipeline.import_list().await?;
    harness.settle().await?;

    assert_eq!(summary.changed_domains, 1);
    assert_eq!(summary.unranked_domains, 1);
    assert_eq!(summary.new_domains, 0);

    let ranks = harness.store.load_ranks().await?;
    assert_eq!(ranks.get("a.com"), Some(&1));
    assert_eq!(ranks.get("c.com"), Some(&UNRANKED));
    assert_eq!(harness.store.site_count()?, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn feed_failure_leaves_catalog_untouched() -> Result<()> {
    init_tracing();
    let store = InMemoryStorage::new();
    store.seed_sites([("a.com", 5)])?;
    let (harness, _dir) = harness(store, StaticFeed::failing())?;

    let err = harness.pipeline.import_list().await.unwrap_err();
    assert!(format!("{err:#}").contains("503"));
    harness.settle().await?;

    let ranks = harness.store.load_ranks().await?;
    assert_eq!(ranks.len(), 1);
    assert_eq!(ranks.get("a.com"), Some(&5));
    assert_eq!(harness.notifier.subjects(), vec![STARTED]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_feed_is_split_into_bounded_batches() -> Result<()> {
    init_tracing();
    let (harness, _dir) = harness(InMemoryStorage::new(), StaticFeed::ranked(250))?;

    let summary = harness.pipeline.import_list().await?;
    harness.settle().await?;

    assert_eq!(summary.new_domains, 250);
    assert_eq!(summary.new_batches, 3);
    assert_eq!(harness.store.site_count()?, 250);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reimporting_the_same_feed_changes_nothing() -> Result<()> {
    init_tracing();
    let (harness, _dir) = harness(InMemoryStorage::new(), StaticFeed::ranked(20))?;

    harness.pipeline.import_list().await?;
    harness.settle().await?;
    let first = harness.store.load_ranks().await?;

    let again = harness.pipeline.import_list().await?;
    harness.settle().await?;

    assert_eq!(again.new_domains + again.changed_domains + again.unranked_domains, 0);
    assert_eq!(harness.store.load_ranks().await?, first);
    Ok(())
}
