use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dnsposture::{CatalogStore, DailyJob, InMemoryStorage, RunStore, Runner, Schedule};
use tokio::time::timeout;

use crate::support::helpers::{fast_config, init_tracing, Harness, StaticFeed};
use crate::support::mock_resolver::ScriptedLookup;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scheduled_jobs_drive_a_full_cycle() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let harness = Harness::new(
        config,
        InMemoryStorage::new(),
        Arc::new(ScriptedLookup::default()),
        StaticFeed::ranked(12),
    )?;
    let runner = Runner::new(Arc::clone(&harness.pipeline), Schedule::default());

    runner.fire(DailyJob::ImportList).await;
    harness.settle().await?;
    assert_eq!(harness.store.load_ranks().await?.len(), 12);

    runner.fire(DailyJob::StartRun).await;
    harness.settle().await?;
    let run = harness.store.latest_run().await?.expect("run created");
    assert_eq!(run.end_rank, 150);

    runner.fire(DailyJob::Finalize).await;
    assert_eq!(
        harness.notifier.subjects().last().map(String::as_str),
        Some(format!("Scan id {} has been published", run.id).as_str())
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_import_is_logged_and_scheduler_keeps_going() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let store = InMemoryStorage::new();
    store.seed_sites([("a.com", 1)])?;
    let harness = Harness::new(
        config,
        store,
        Arc::new(ScriptedLookup::default()),
        StaticFeed::failing(),
    )?;
    let runner = Runner::new(Arc::clone(&harness.pipeline), Schedule::default());

    runner.fire(DailyJob::ImportList).await;
    runner.fire(DailyJob::StartRun).await;
    harness.settle().await?;

    let run = harness.store.latest_run().await?.expect("run created after failed import");
    assert_eq!(harness.pipeline.orchestrator().completion(run.id).await?, 1);

    let token = runner.cancellation_token();
    token.cancel();
    timeout(Duration::from_secs(1), runner.run_until_cancelled()).await?;
    Ok(())
}

fn require_send<F: std::future::Future + Send>(future: F) -> F {
    future
}

#[tokio::test]
async fn pipeline_stage_futures_are_send() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let harness = Harness::new(
        config,
        InMemoryStorage::new(),
        Arc::new(ScriptedLookup::default()),
        StaticFeed::new(&[]),
    )?;

    let launch = require_send(harness.pipeline.start_run()).await?;
    assert_eq!(launch.sites_enqueued, 0);
    drop(require_send(harness.pipeline.import_list()));
    drop(require_send(harness.pipeline.finalize()));
    Ok(())
}
