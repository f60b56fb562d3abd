//! Producer: drive a buffered backend and hand each ledger to a callback.

use crate::backend::LedgerBackend;
use crate::batch::BatchCodec;
use crate::buffered::{BufferedStorageBackend, BufferedStorageBackendConfig};
use crate::datastore::DataStore;
use crate::error::{BackendError, ProducerError};
use crate::types::{LedgerRange, MIN_LEDGER_SEQUENCE};
use std::sync::Arc;
use stellar_xdr::curr::LedgerCloseMeta;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Callback invoked once per ledger, strictly in ascending sequence order
/// and never concurrently with itself. Returning an error stops the
/// producer.
pub type LedgerCallback =
    dyn FnMut(u32, LedgerCloseMeta) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send;

/// Drives a [`BufferedStorageBackend`] over a range and delivers each ledger
/// to a caller-supplied callback, for downstream ingestion.
///
/// [`start`](Self::start) is asynchronous: it returns a result channel of
/// capacity one. For a bounded range the channel closes without a value
/// after the last ledger; for an unbounded range it only ever yields an
/// error or the cancellation signal. Configuration problems are surfaced on
/// the channel before any I/O happens.
pub struct Producer {
    config: BufferedStorageBackendConfig,
    store: Arc<dyn DataStore>,
    codec: Arc<dyn BatchCodec>,
    range: LedgerRange,
    cancel: CancellationToken,
}

impl Producer {
    pub fn new(
        config: BufferedStorageBackendConfig,
        store: Arc<dyn DataStore>,
        codec: Arc<dyn BatchCodec>,
        range: LedgerRange,
    ) -> Self {
        Self {
            config,
            store,
            codec,
            range,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an external cancellation token instead of a private one.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn validate(&self) -> Result<(), ProducerError> {
        self.config.validate().map_err(|e| match e {
            BackendError::InvalidConfig(msg) => ProducerError::InvalidConfig(msg),
            other => ProducerError::Backend(other),
        })?;
        if self.range.from() < MIN_LEDGER_SEQUENCE {
            return Err(ProducerError::InvalidRange(format!(
                "start ledger {} precedes the minimum exportable ledger {}",
                self.range.from(),
                MIN_LEDGER_SEQUENCE
            )));
        }
        if let Some(to) = self.range.to() {
            if to <= self.range.from() {
                return Err(ProducerError::InvalidRange(format!(
                    "end ledger {} must be greater than start ledger {}",
                    to,
                    self.range.from()
                )));
            }
        }
        Ok(())
    }

    /// Start producing. The returned channel yields at most one error; it
    /// closes silently when a bounded range completes.
    pub fn start<F>(self, callback: F) -> mpsc::Receiver<ProducerError>
    where
        F: FnMut(u32, LedgerCloseMeta) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + 'static,
    {
        let (tx, rx) = mpsc::channel(1);

        if let Err(e) = self.validate() {
            let _ = tx.try_send(e);
            return rx;
        }

        tokio::spawn(self.run(callback, tx));
        rx
    }

    async fn run<F>(self, mut callback: F, tx: mpsc::Sender<ProducerError>)
    where
        F: FnMut(u32, LedgerCloseMeta) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + 'static,
    {
        let backend = match BufferedStorageBackend::new(
            self.config,
            self.store,
            self.codec,
            self.cancel.child_token(),
        ) {
            Ok(backend) => backend,
            Err(e) => {
                let _ = tx.send(e.into()).await;
                return;
            }
        };

        let result = drive(&backend, self.range, &self.cancel, &mut callback).await;
        let _ = backend.close().await;

        if let Err(e) = result {
            let _ = tx.send(e).await;
        }
        // Dropping `tx` closes the channel; for a clean bounded run that is
        // the completion signal.
    }
}

async fn drive(
    backend: &BufferedStorageBackend,
    range: LedgerRange,
    cancel: &CancellationToken,
    callback: &mut (impl FnMut(u32, LedgerCloseMeta) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
              + Send),
) -> Result<(), ProducerError> {
    info!(range = %range, "producer starting");
    backend.prepare_range(range).await?;

    let mut sequence = range.from();
    loop {
        if let Some(to) = range.to() {
            if sequence > to {
                break;
            }
        }

        let ledger = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProducerError::Cancelled),
            result = backend.get_ledger(sequence) => result?,
        };
        callback(sequence, ledger).map_err(|source| ProducerError::Callback { sequence, source })?;

        sequence = match sequence.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }

    info!(range = %range, "producer finished");
    Ok(())
}
