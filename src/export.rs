//! Export manager: upstream backend to batch channel.

use crate::backend::LedgerBackend;
use crate::batch::{ledger_sequence, LedgerBatch};
use crate::error::ExportError;
use crate::schema::BatchSchema;
use crate::types::LedgerRange;
use std::sync::Arc;
use stellar_xdr::curr::LedgerCloseMeta;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pulls ledgers in order from the upstream backend, groups them into
/// key-aligned batches, and publishes them on the output channel.
///
/// Batches are published strictly in ascending start order. The output
/// channel is closed (by dropping the sender) when a bounded range
/// completes; any upstream error aborts the run immediately and a partial
/// batch is discarded on cancellation.
pub struct ExportManager {
    schema: BatchSchema,
    backend: Arc<dyn LedgerBackend>,
    output: mpsc::Sender<LedgerBatch>,
    cancel: CancellationToken,
    current: Option<LedgerBatch>,
}

impl ExportManager {
    pub fn new(
        schema: BatchSchema,
        backend: Arc<dyn LedgerBackend>,
        output: mpsc::Sender<LedgerBatch>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            schema,
            backend,
            output,
            cancel,
            current: None,
        }
    }

    /// Drive the upstream backend over `range`, publishing every batch.
    pub async fn run(mut self, range: LedgerRange) -> Result<(), ExportError> {
        info!(range = %range, "export starting");
        self.backend.prepare_range(range).await?;

        let mut sequence = range.from();
        loop {
            if let Some(to) = range.to() {
                if sequence > to {
                    break;
                }
            }

            let ledger = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ExportError::Cancelled),
                result = self.backend.get_ledger(sequence) => result?,
            };

            let got = ledger_sequence(&ledger);
            if got != sequence {
                return Err(ExportError::OutOfOrder {
                    expected: sequence,
                    sequence: got,
                });
            }
            self.add_ledger_close_meta(ledger)?;

            if sequence == self.schema.file_end(sequence) || range.to() == Some(sequence) {
                self.publish().await?;
            }

            sequence = match sequence.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }

        info!(range = %range, "export finished");
        Ok(())
    }

    /// Fold one ledger into the current batch, starting a new batch at file
    /// boundaries.
    ///
    /// The ledger's object key must match the current batch's key; a
    /// mismatch means the caller fed ledgers across a file boundary without
    /// publishing.
    pub fn add_ledger_close_meta(&mut self, ledger: LedgerCloseMeta) -> Result<(), ExportError> {
        match &mut self.current {
            Some(batch) => batch.add(&self.schema, ledger),
            None => {
                self.current = Some(LedgerBatch::new(&self.schema, ledger));
                Ok(())
            }
        }
    }

    async fn publish(&mut self) -> Result<(), ExportError> {
        let Some(batch) = self.current.take() else {
            return Ok(());
        };
        debug!(
            key = batch.object_key(),
            start = batch.start_sequence(),
            end = batch.end_sequence(),
            "publishing batch"
        );
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExportError::Cancelled),
            sent = self.output.send(batch) => sent.map_err(|_| ExportError::ChannelClosed),
        }
    }
}
