//! Uploader: batch channel to object store.

use crate::batch::{BatchCodec, LedgerBatch};
use crate::datastore::DataStore;
use crate::error::ExportError;
use crate::retry::RetryConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Consumes batches from the export manager, encodes them, and writes each
/// one with put-if-not-exists semantics.
///
/// A pre-existing object is success: that is what makes re-runs and
/// concurrent exporters over the same range safe. Transient store failures
/// are retried up to the configured limit; anything else aborts.
pub struct Uploader {
    store: Arc<dyn DataStore>,
    codec: Arc<dyn BatchCodec>,
    input: mpsc::Receiver<LedgerBatch>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn DataStore>,
        codec: Arc<dyn BatchCodec>,
        input: mpsc::Receiver<LedgerBatch>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            codec,
            input,
            retry,
            cancel,
        }
    }

    /// Upload batches until the input channel closes (clean shutdown) or a
    /// write fails for good.
    pub async fn run(mut self) -> Result<(), ExportError> {
        info!("uploader starting");
        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ExportError::Cancelled),
                received = self.input.recv() => match received {
                    Some(batch) => batch,
                    None => break,
                },
            };
            self.upload(batch).await?;
        }
        info!("uploader finished");
        Ok(())
    }

    async fn upload(&self, batch: LedgerBatch) -> Result<(), ExportError> {
        let key = batch.object_key().to_string();
        let encoded = self.codec.encode(&batch)?;
        let started = Instant::now();

        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            match self.store.put_file_if_not_exists(&key, encoded.clone()).await {
                Ok(true) => {
                    info!(
                        key,
                        ledgers = batch.len(),
                        bytes = encoded.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "uploaded object"
                    );
                    return Ok(());
                }
                Ok(false) => {
                    info!(key, "object already exists, skipping upload");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    attempt += 1;
                    warn!(key, attempt, error = %e, "transient upload failure, retrying");
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(ExportError::Cancelled),
                        _ = tokio::time::sleep(self.retry.delay()) => {}
                    }
                }
                Err(e) => {
                    return Err(ExportError::UploadFailed {
                        key,
                        attempts: attempt + 1,
                        source: e,
                    });
                }
            }
        }
    }
}
