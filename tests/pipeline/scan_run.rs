use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dnsposture::{
    InMemoryStorage, RecordKind, RetryPolicy, RunState, RunStore, SnapshotStore, TaskPolicy,
};

use crate::support::helpers::{fast_config, init_tracing, Harness, StaticFeed};
use crate::support::mock_resolver::ScriptedLookup;

fn seeded(count: u32) -> Result<InMemoryStorage> {
    let store = InMemoryStorage::new();
    store.seed_sites((1..=count).map(|rank| (format!("site{rank}.example"), rank)))?;
    store.seed_sites([("retired.example", 0)])?;
    Ok(store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_scans_only_the_rank_window() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    assert_eq!(config.run_rank_ceiling(), 150);
    let harness = Harness::new(
        config,
        seeded(200)?,
        Arc::new(ScriptedLookup::default()),
        StaticFeed::new(&[]),
    )?;

    let launch = harness.pipeline.start_run().await?;
    harness.settle().await?;

    assert_eq!(launch.sites_enqueued, 150);
    assert_eq!(launch.state, RunState::Queued);
    let snapshots = harness.store.site_runs(launch.run_id).await?;
    assert_eq!(snapshots.len(), 150);
    assert!(snapshots
        .iter()
        .all(|snapshot| (1..=150).contains(&snapshot.run_rank)));
    assert_eq!(
        harness.pipeline.orchestrator().completion(launch.run_id).await?,
        150
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sites_are_enqueued_in_bounded_groups() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).fanout_group_size(4).build()?;
    let harness = Harness::new(
        config,
        seeded(10)?,
        Arc::new(ScriptedLookup::default()),
        StaticFeed::new(&[]),
    )?;

    let launch = harness.pipeline.start_run().await?;
    harness.settle().await?;

    assert_eq!(launch.groups, 3);
    assert_eq!(launch.sites_enqueued, 10);
    assert_eq!(
        harness.notifier.subjects(),
        vec!["Scan Starting", "All Scans In Queue"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_notice_goes_out_before_any_scan_finishes() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path())
        .worker_count(2)
        .fanout_group_size(4)
        .probe_policy(TaskPolicy::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
            RetryPolicy::none(),
        ))
        .build()?;
    let harness = Harness::new(
        config,
        seeded(20)?,
        Arc::new(ScriptedLookup::default().stall("example")),
        StaticFeed::new(&[]),
    )?;

    let launch = tokio::time::timeout(Duration::from_secs(2), harness.pipeline.start_run())
        .await??;

    assert_eq!(launch.sites_enqueued, 20);
    assert_eq!(launch.state, RunState::Queued);
    assert_eq!(
        harness.notifier.subjects(),
        vec!["Scan Starting", "All Scans In Queue"]
    );
    let executor = harness.pipeline.executor();
    assert_eq!(executor.activity().in_flight(), 20);
    let telemetry = executor.telemetry().snapshot();
    assert_eq!(telemetry.tasks_submitted, 20);
    assert_eq!(telemetry.soft_timeouts + telemetry.hard_timeouts, 0);
    assert_eq!(harness.store.count_site_runs(launch.run_id).await?, 0);

    executor.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stuck_probe_leaves_no_snapshot_and_spares_siblings() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let lookup = ScriptedLookup::default()
        .stall("site2.example")
        .fail("site3.example");
    let harness = Harness::new(config, seeded(4)?, Arc::new(lookup), StaticFeed::new(&[]))?;

    let launch = harness.pipeline.start_run().await?;
    harness.settle().await?;

    let snapshots = harness.store.site_runs(launch.run_id).await?;
    let stored: Vec<u32> = snapshots.iter().map(|snapshot| snapshot.run_rank).collect();
    assert_eq!(stored, vec![1, 3, 4]);

    let telemetry = harness.pipeline.executor().telemetry().snapshot();
    assert_eq!(telemetry.soft_timeouts + telemetry.hard_timeouts, 1);
    assert_eq!(telemetry.snapshots_written, 3);
    assert!(telemetry.lookup_failures >= 9);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relaunching_a_run_stores_each_site_once() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let harness = Harness::new(
        config,
        seeded(5)?,
        Arc::new(ScriptedLookup::default()),
        StaticFeed::new(&[]),
    )?;

    let launch = harness.pipeline.start_run().await?;
    harness.settle().await?;
    let run = harness
        .store
        .run(launch.run_id)
        .await?
        .expect("run should be persisted");

    harness.pipeline.orchestrator().launch(&run).await?;
    harness.settle().await?;

    assert_eq!(harness.store.count_site_runs(run.id).await?, 5);
    let telemetry = harness.pipeline.executor().telemetry().snapshot();
    assert_eq!(telemetry.snapshots_written, 5);
    assert_eq!(telemetry.duplicate_snapshots, 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn finalize_publishes_the_latest_run() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let lookup = ScriptedLookup::default()
        .answer("site1.example", RecordKind::Txt, &["v=spf1 -all"])
        .answer("_dmarc.site1.example", RecordKind::Txt, &["v=DMARC1; p=reject"]);
    let harness = Harness::new(config, seeded(3)?, Arc::new(lookup), StaticFeed::new(&[]))?;

    let launch = harness.pipeline.start_run().await?;
    harness.settle().await?;
    let published = harness.pipeline.finalize().await?;

    assert_eq!(published.run_id, launch.run_id);
    assert_eq!(published.results, 3);
    assert_eq!(published.artifacts.len(), 1);
    let report: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&published.artifacts[0])?)?;
    assert_eq!(report["sites"], 3);
    assert_eq!(report["with_spf"], 1);
    assert_eq!(report["dmarc_policies"]["reject"], 1);

    let last = harness.notifier.sent().pop().expect("published notification");
    assert_eq!(last.subject, format!("Scan id {} has been published", launch.run_id));
    assert!(last.body.contains("Number results: 3"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn finalize_without_runs_fails() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path()).build()?;
    let harness = Harness::new(
        config,
        InMemoryStorage::new(),
        Arc::new(ScriptedLookup::default()),
        StaticFeed::new(&[]),
    )?;

    let err = harness.pipeline.finalize().await.unwrap_err();
    assert!(err.to_string().contains("no run to finalize"));
    assert!(harness.notifier.subjects().is_empty());
    Ok(())
}
