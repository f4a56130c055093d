//! sqlite-tsdb: Main entry point

use anyhow::Context;
use clap::Parser;
use sqlite_tsdb::api::{serve, AppState};
use sqlite_tsdb::archive::ObjectStoreFinalizer;
use sqlite_tsdb::cli::{Cli, Commands, LogFormat, StartArgs};
use sqlite_tsdb::storage::{SegmentReader, Switcher};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_format);

    match cli.command {
        Commands::Start(args) => start(args).await,
        Commands::Search { file, query, limit } => search(&file, &query, limit),
    }
}

/// Install the global subscriber; logs are flushed when the guard drops.
fn init_tracing(format: LogFormat) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    guard
}

async fn start(args: StartArgs) -> anyhow::Result<()> {
    let remote = args.remote_config()?;
    let store = remote.build().context("could not configure remote storage")?;
    let finalizer = ObjectStoreFinalizer::new(store, remote.prefix_path()?, Handle::current());

    let switcher = Switcher::new(args.switcher_config(), Arc::new(finalizer))
        .with_context(|| format!("could not start writing in {}", args.work_path.display()))?;
    let switcher = Arc::new(switcher);

    let server = args.server_config();
    let listener = TcpListener::bind(server.addr)
        .await
        .with_context(|| format!("could not listen on {}", server.addr))?;

    let state = Arc::new(AppState::new(Arc::clone(&switcher)));
    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not listen for shutdown signal");
        }
    })
    .await?;

    info!("draining buffered events");
    tokio::task::spawn_blocking(move || switcher.close())
        .await
        .context("shutdown task failed")?
        .context("could not close switcher")?;
    Ok(())
}

fn search(file: &Path, query: &str, limit: usize) -> anyhow::Result<()> {
    let reader = SegmentReader::open(file)
        .with_context(|| format!("could not open {}", file.display()))?;
    for stored in reader.search(query, limit)? {
        println!("{}", stored.event.to_json()?);
    }
    Ok(())
}
