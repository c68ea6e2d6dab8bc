use std::env;
use std::sync::Arc;

use anyhow::{bail, Result};
use dnsposture::{init_tracing, join_metrics_reporter, InMemoryStorage, Pipeline, Runner, ScanConfig};
use tokio_util::sync::CancellationToken;

const USAGE: &str = "usage: dnsposture <import|run|finalize|serve>

  import    fetch the ranked feed and reconcile the catalog
  run       import, then scan the configured rank window and wait for it to drain
  finalize  run, then render and publish the report
  serve     fire import/run/finalize daily at the configured UTC times

Configuration is read from DNSPOSTURE_* environment variables.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Import,
    Run,
    Finalize,
    Serve,
}

impl Command {
    fn from_args() -> Result<Self> {
        let mut args = env::args().skip(1);
        let command = match args.next().as_deref() {
            Some("import") => Command::Import,
            Some("run") => Command::Run,
            Some("finalize") => Command::Finalize,
            Some("serve") => Command::Serve,
            Some("-h" | "--help") | None => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            Some(other) => bail!("unknown command '{other}'\n\n{USAGE}"),
        };
        if let Some(extra) = args.next() {
            bail!("unexpected argument '{extra}'\n\n{USAGE}");
        }
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let command = Command::from_args()?;
    let config = ScanConfig::from_env()?;
    // The bundled catalog lives in memory, so one-shot commands rebuild it from the feed.
    let store = Arc::new(InMemoryStorage::new());
    let pipeline = Arc::new(Pipeline::from_config(config, store)?);

    let shutdown = CancellationToken::new();
    let reporter = pipeline.spawn_metrics_reporter(shutdown.clone());

    let outcome = execute(command, &pipeline).await;

    shutdown.cancel();
    join_metrics_reporter(reporter).await;
    pipeline.executor().shutdown().await;
    outcome
}

async fn execute(command: Command, pipeline: &Arc<Pipeline>) -> Result<()> {
    if command == Command::Serve {
        let runner = Runner::new(Arc::clone(pipeline), pipeline.config().schedule());
        return runner.run_until_ctrl_c().await;
    }

    let summary = pipeline.import_list().await?;
    pipeline.executor().wait_until_idle().await;
    println!("{summary}");
    if command == Command::Import {
        return Ok(());
    }

    let launch = pipeline.start_run().await?;
    pipeline.executor().wait_until_idle().await;
    let stored = pipeline.orchestrator().completion(launch.run_id).await?;
    println!(
        "run {} scanned {} of {} sites in {} groups",
        launch.run_id, stored, launch.sites_enqueued, launch.groups
    );
    if command == Command::Run {
        return Ok(());
    }

    let published = pipeline.finalize().await?;
    println!(
        "run {} published with {} results",
        published.run_id, published.results
    );
    for artifact in &published.artifacts {
        println!("  {artifact}");
    }
    Ok(())
}
