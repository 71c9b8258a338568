//! Firewatch collector binary.
//!
//! `firewatch run` starts the collector: scheduler, per-device polling,
//! alert evaluation, and scan schedules. `firewatch init-schema` only
//! installs the database schema and exits; `firewatch migrate-device-ids`
//! performs the one-shot deterministic-id migration with an automatic
//! timestamped backup.

mod migrate_cmd;
mod runtime;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use firewatch_config::{ConfigHandle, ConfigPaths};
use firewatch_store::Store;

#[derive(Parser, Debug)]
#[command(name = "firewatch")]
#[command(about = "Firewall telemetry and alerting collector")]
struct Args {
    /// Data directory holding firewatch.toml, devices.json, and
    /// device_metadata.json.
    #[arg(long, env = "FIREWATCH_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector until interrupted.
    Run,
    /// Install or update the database schema and exit.
    InitSchema,
    /// Rewrite legacy random device ids to their deterministic form,
    /// across the registry files and every time-series table.
    MigrateDeviceIds,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let result = match args.command {
        Command::Run => run(&args.data_dir).await,
        Command::InitSchema => init_schema(&args.data_dir).await,
        Command::MigrateDeviceIds => migrate_cmd::migrate_device_ids(&args.data_dir).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(data_dir: &std::path::Path) -> anyhow::Result<()> {
    let config = ConfigHandle::load(ConfigPaths::under(data_dir))?;
    runtime::run_collector(config, data_dir).await
}

async fn init_schema(data_dir: &std::path::Path) -> anyhow::Result<()> {
    let config = ConfigHandle::load(ConfigPaths::under(data_dir))?;
    let snapshot = config.current();
    let dsn = snapshot.settings.database.effective_dsn();

    let store = Store::connect(&dsn, snapshot.devices.devices.len()).await?;
    let report = firewatch_store::schema::ensure_schema(store.pool()).await?;

    if report.is_clean() {
        Ok(())
    } else {
        // Non-critical errors were logged; converging re-runs are expected,
        // but surface the count for operators running this interactively.
        anyhow::bail!("schema initialization finished with {} errors", report.errors.len())
    }
}
