//! Exporter command line.

use clap::{Args, Parser, Subcommand};
use ledgerlake::{
    datastore_from_config, Config, CoreReplayBackend, ExportError, ExportMode, ExportOutcome,
    ExporterApp, ExporterDeps, HistoryArchiveClient, StoreResumableManager, XdrZstdCodec,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ledgerlake",
    version,
    about = "Export Stellar ledger close meta to an object-store data lake"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Walk the whole requested range; objects that already exist are skipped
    ScanAndFill(RangeArgs),
    /// Probe the store for already-exported objects and continue past them
    Append(RangeArgs),
}

#[derive(Args)]
struct RangeArgs {
    /// First ledger to export (minimum 2)
    #[arg(long)]
    start: u32,

    /// Last ledger to export; with append, 0 follows the chain indefinitely
    #[arg(long, default_value_t = 0)]
    end: u32,

    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (mode, args) = match cli.command {
        CliCommand::ScanAndFill(args) => (ExportMode::ScanAndFill, args),
        CliCommand::Append(args) => (ExportMode::Append, args),
    };

    match run(mode, args).await {
        Ok(ExportOutcome::Exported { range }) => {
            info!(range = %range, "export complete");
            ExitCode::SUCCESS
        }
        Ok(ExportOutcome::AlreadyExported) => {
            info!("data store already holds the requested range, nothing to do");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let cancelled = e
                .downcast_ref::<ExportError>()
                .map(ExportError::is_cancelled)
                .unwrap_or(false);
            if cancelled {
                info!("export cancelled");
            } else {
                error!("{}", error_chain(e.as_ref()));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(
    mode: ExportMode,
    args: RangeArgs,
) -> Result<ExportOutcome, Box<dyn std::error::Error>> {
    let config = Config::load(&args.config_file)?;
    if let Some(port) = config.admin_port {
        debug!(port, "admin_port is configured but this build mounts no admin surface");
    }

    let schema = config.batch_schema()?;
    let store = datastore_from_config(&config.datastore_config)?;
    let resolved = config.stellar_core_config.resolve()?;
    let network = Arc::new(HistoryArchiveClient::new(
        resolved.archive_urls,
        &config.user_agent,
    )?);

    let deps = ExporterDeps {
        backend: Arc::new(CoreReplayBackend::new(config.stellar_core_config.clone())),
        codec: Arc::new(XdrZstdCodec::new(schema)),
        resume: Arc::new(StoreResumableManager::new(
            store.clone(),
            schema,
            network.clone(),
        )),
        store,
        network,
    };

    let outcome = ExporterApp::new(config, mode, args.start, args.end, deps)
        .with_signal_handler()
        .run()
        .await?;
    Ok(outcome)
}

/// One human-readable line with the whole cause chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
