//! Exporter application: resume, export and upload composed.

use crate::backend::LedgerBackend;
use crate::batch::BatchCodec;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::error::ExportError;
use crate::export::ExportManager;
use crate::network::NetworkManager;
use crate::resume::{ResumableManager, ResumeOutcome};
use crate::retry::RetryConfig;
use crate::types::{LedgerRange, MIN_LEDGER_SEQUENCE};
use crate::upload::Uploader;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Capacity of the batch channel between export manager and uploader.
const BATCH_QUEUE_CAPACITY: usize = 1;

/// How the exporter treats already-present objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportMode {
    /// Walk the whole requested range; put-if-absent skips existing objects.
    ScanAndFill,
    /// Probe the store first and start past the last complete object.
    Append,
}

/// Terminal outcome of a run that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The range was exported (or re-checked) successfully.
    Exported { range: LedgerRange },
    /// Every object of the requested range already exists.
    AlreadyExported,
}

/// Collaborators of the exporter app, injected rather than discovered
/// through module state.
pub struct ExporterDeps {
    pub backend: Arc<dyn LedgerBackend>,
    pub store: Arc<dyn DataStore>,
    pub codec: Arc<dyn BatchCodec>,
    pub network: Arc<dyn NetworkManager>,
    pub resume: Arc<dyn ResumableManager>,
}

/// Composes resume, export and upload into one run with a single root
/// cancellation.
pub struct ExporterApp {
    config: Config,
    mode: ExportMode,
    start: u32,
    /// Requested end; 0 means unbounded (append mode only).
    end: u32,
    deps: ExporterDeps,
    retry: RetryConfig,
    cancel: CancellationToken,
    handle_signals: bool,
}

impl ExporterApp {
    pub fn new(config: Config, mode: ExportMode, start: u32, end: u32, deps: ExporterDeps) -> Self {
        Self {
            config,
            mode,
            start,
            end,
            deps,
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
            handle_signals: false,
        }
    }

    /// Use an external root cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the uploader's retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Cancel the run on SIGINT/SIGTERM. Off by default so embedders and
    /// tests keep signal handling to themselves.
    pub fn with_signal_handler(mut self) -> Self {
        self.handle_signals = true;
        self
    }

    fn validate_requested_range(&self) -> Result<(), ExportError> {
        if self.start < MIN_LEDGER_SEQUENCE {
            return Err(ExportError::InvalidRange(format!(
                "start ledger {} precedes the minimum exportable ledger {}",
                self.start, MIN_LEDGER_SEQUENCE
            )));
        }
        if self.end == 0 && self.mode == ExportMode::ScanAndFill {
            return Err(ExportError::InvalidRange(
                "scan-and-fill requires a bounded range (end must not be 0)".into(),
            ));
        }
        if self.end != 0 && self.end <= self.start {
            return Err(ExportError::InvalidRange(format!(
                "end ledger {} must be strictly greater than start ledger {}",
                self.end, self.start
            )));
        }
        Ok(())
    }

    /// Run the export to completion (or cancellation).
    pub async fn run(self) -> Result<ExportOutcome, ExportError> {
        let schema = self
            .config
            .batch_schema()
            .map_err(|e| ExportError::InvalidConfig(e.to_string()))?;

        self.validate_requested_range()?;

        // The network's frontier bounds what can be requested; the archives
        // trail the live chain by up to one checkpoint, hence the padding.
        let latest = self.deps.network.latest_ledger_sequence().await?;
        let window = latest.saturating_add(2 * self.deps.network.checkpoint_frequency());
        if self.start > window {
            return Err(ExportError::InvalidRange(format!(
                "start ledger {} is beyond the network's latest ledger {latest}",
                self.start
            )));
        }
        if self.end != 0 && self.end > window {
            return Err(ExportError::InvalidRange(format!(
                "end ledger {} is beyond the network's latest ledger {latest}",
                self.end
            )));
        }

        let mut from = schema.start_boundary(self.start);
        let to = (self.end != 0).then(|| schema.end_boundary(self.end));
        info!(
            start = self.start,
            end = self.end,
            from,
            to = to.unwrap_or(0),
            "aligned export range to batch boundaries"
        );

        if self.mode == ExportMode::Append {
            match self
                .deps
                .resume
                .find_start(from, to.unwrap_or(0))
                .await
            {
                ResumeOutcome::Complete => {
                    info!("data store already holds every object of the requested range");
                    return Ok(ExportOutcome::AlreadyExported);
                }
                ResumeOutcome::Resume(resume) => {
                    if resume != schema.start_boundary(resume) {
                        return Err(ExportError::InvalidDataStore {
                            resume,
                            ledgers_per_file: schema.ledgers_per_file(),
                        });
                    }
                    info!(resume, "resuming past objects already in the data store");
                    from = resume;
                }
                ResumeOutcome::NotApplicable => {}
            }
        }

        if let Some(to) = to {
            if from > to {
                return Ok(ExportOutcome::AlreadyExported);
            }
        }
        let range = match to {
            Some(to) => LedgerRange::bounded(from, to),
            None => LedgerRange::unbounded(from),
        };

        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_CAPACITY);
        let export = ExportManager::new(
            schema,
            Arc::clone(&self.deps.backend),
            batch_tx,
            self.cancel.child_token(),
        );
        let uploader = Uploader::new(
            Arc::clone(&self.deps.store),
            Arc::clone(&self.deps.codec),
            batch_rx,
            self.retry.clone(),
            self.cancel.child_token(),
        );

        let signal_task = self.handle_signals.then(|| {
            let cancel = self.cancel.clone();
            tokio::spawn(wait_for_shutdown_signal(cancel))
        });

        let export_task = tokio::spawn(export.run(range));
        let upload_task = tokio::spawn(uploader.run());

        // First non-cancellation failure cancels the other side.
        let cancel = &self.cancel;
        let settle = |result: Result<Result<(), ExportError>, tokio::task::JoinError>| {
            let result = result.unwrap_or(Err(ExportError::Cancelled));
            if matches!(&result, Err(e) if !e.is_cancelled()) {
                cancel.cancel();
            }
            result
        };
        let (export_result, upload_result) = tokio::join!(
            async { settle(export_task.await) },
            async { settle(upload_task.await) },
        );

        if let Some(task) = signal_task {
            task.abort();
        }
        if let Err(e) = self.deps.store.close().await {
            warn!(error = %e, "closing the data store failed");
        }
        if let Err(e) = self.deps.backend.close().await {
            warn!(error = %e, "closing the upstream backend failed");
        }

        match (export_result, upload_result) {
            (Ok(()), Ok(())) => Ok(ExportOutcome::Exported { range }),
            (Err(e), _) if !e.is_cancelled() => Err(e),
            (_, Err(e)) if !e.is_cancelled() => Err(e),
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    }
}

/// Resolve on SIGINT or SIGTERM and cancel the root token.
async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
            _ = terminate.recv() => info!("terminate received, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, shutting down");
    }
    cancel.cancel();
}
