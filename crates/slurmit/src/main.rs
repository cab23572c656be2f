//! slurmit - submit and track SLURM jobs over SSH.

mod commands;

use clap::Parser;
use miette::{Result, miette};
use slurmit_cli::{Args, Command};
use slurmit_remote::{Executor, Session};
use slurmit_run::WorkspaceLayout;
use slurmit_store::JobStore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Log output goes to stderr so it never mixes with command output.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_env_var("SLURMIT_LOG")
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let store_dir = match args.store_dir.clone() {
        Some(dir) => dir,
        None => JobStore::default_location()
            .ok_or_else(|| miette!("Cannot locate the home directory; pass --store-dir"))?,
    };
    let store = JobStore::new(store_dir);

    // Record-only commands never open a connection.
    match &args.command {
        Command::List { limit } => return commands::list(&store, *limit),
        Command::Delete { name } => return commands::delete(&store, name),
        _ => {}
    }

    let target = args.connection.target()?;
    let host = target.as_ref().map(|t| t.host().to_string());
    let user = target.as_ref().map(|t| t.user().to_string());
    let mut session = Executor::open(target, &args.connection.retry_policy()).await?;
    tracing::debug!("Connected to {}", session.endpoint());

    let ctx = commands::Context {
        session: &session,
        store: &store,
        layout: WorkspaceLayout::new(args.workspace.clone()),
        host,
        user,
    };
    let result = commands::dispatch(&ctx, &args.command).await;

    session.close().await?;
    result
}
