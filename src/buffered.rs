//! Buffered storage backend: serve ledgers back out of the lake.

use crate::backend::LedgerBackend;
use crate::batch::{BatchCodec, LedgerBatch};
use crate::buffer::LedgerBuffer;
use crate::datastore::DataStore;
use crate::error::BackendError;
use crate::retry::RetryConfig;
use crate::types::LedgerRange;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stellar_xdr::curr::LedgerCloseMeta;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Tuning for the prefetch buffer behind a [`BufferedStorageBackend`].
#[derive(Clone, Debug)]
pub struct BufferedStorageBackendConfig {
    /// Batches held in flight (dispatched and not yet consumed).
    pub buffer_size: u32,
    /// Concurrent object fetches; at most `buffer_size`.
    pub num_workers: u32,
    /// Retries per transient fetch failure.
    pub retry_limit: u32,
    /// Wait between fetch attempts.
    pub retry_wait: Duration,
}

impl Default for BufferedStorageBackendConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            num_workers: 5,
            retry_limit: 3,
            retry_wait: Duration::from_secs(5),
        }
    }
}

impl BufferedStorageBackendConfig {
    pub(crate) fn validate(&self) -> Result<(), BackendError> {
        if self.buffer_size == 0 {
            return Err(BackendError::InvalidConfig(
                "buffer_size must be at least 1".into(),
            ));
        }
        if self.num_workers == 0 {
            return Err(BackendError::InvalidConfig(
                "num_workers must be at least 1".into(),
            ));
        }
        if self.num_workers > self.buffer_size {
            return Err(BackendError::InvalidConfig(format!(
                "num_workers ({}) must not exceed buffer_size ({})",
                self.num_workers, self.buffer_size
            )));
        }
        Ok(())
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::new()
            .with_retry_limit(self.retry_limit)
            .with_retry_wait(self.retry_wait)
    }
}

/// [`LedgerBackend`] over a [`DataStore`], with read-ahead.
///
/// `get_ledger` is strictly monotonic: sequences must be consumed in
/// ascending order, with a repeat allowed only while its batch is still
/// cached. The prefetch buffer keeps up to `buffer_size` batches in flight
/// so the consumer rarely waits on the store.
pub struct BufferedStorageBackend {
    config: BufferedStorageBackendConfig,
    store: Arc<dyn DataStore>,
    codec: Arc<dyn BatchCodec>,
    cancel: CancellationToken,
    closed: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    prepared: Option<LedgerRange>,
    buffer: Option<LedgerBuffer>,
    cached: Option<LedgerBatch>,
    /// Last sequence delivered to the consumer; 0 before the first delivery.
    last_ledger: u32,
    /// Next sequence the consumer may request.
    next_ledger: u32,
}

impl BufferedStorageBackend {
    /// Create a backend over `store`. `cancel` is the root token; cancelling
    /// it (or calling [`close`](LedgerBackend::close)) interrupts every
    /// blocked consumer and worker.
    pub fn new(
        config: BufferedStorageBackendConfig,
        store: Arc<dyn DataStore>,
        codec: Arc<dyn BatchCodec>,
        cancel: CancellationToken,
    ) -> Result<Self, BackendError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            codec,
            cancel,
            closed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                prepared: None,
                buffer: None,
                cached: None,
                last_ledger: 0,
                next_ledger: 0,
            }),
        })
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    fn covers(prepared: &LedgerRange, range: &LedgerRange) -> bool {
        prepared.from() <= range.from()
            && match (prepared.to(), range.to()) {
                // An unbounded prepared range satisfies any query.
                (None, _) => true,
                (Some(_), None) => false,
                (Some(p), Some(r)) => p >= r,
            }
    }

    #[cfg(test)]
    async fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .await
            .buffer
            .as_ref()
            .map(LedgerBuffer::in_flight)
            .unwrap_or(0)
    }
}

#[async_trait]
impl LedgerBackend for BufferedStorageBackend {
    async fn prepare_range(&self, range: LedgerRange) -> Result<(), BackendError> {
        self.check_open()?;
        if range.is_bounded() && range.is_empty() {
            return Err(BackendError::InvalidConfig(format!(
                "range {range} covers no ledgers"
            )));
        }

        let mut inner = self.inner.lock().await;
        match inner.prepared {
            Some(prepared) if Self::covers(&prepared, &range) => return Ok(()),
            Some(prepared) => {
                // A genuinely different range rebuilds the buffer.
                info!(old = %prepared, new = %range, "re-preparing buffered backend");
                if let Some(old) = inner.buffer.take() {
                    old.close().await;
                }
            }
            None => info!(range = %range, "preparing buffered backend"),
        }

        inner.buffer = Some(LedgerBuffer::new(
            *self.store.schema(),
            Arc::clone(&self.store),
            Arc::clone(&self.codec),
            self.config.retry(),
            range,
            self.config.buffer_size as usize,
            self.config.num_workers as usize,
            self.cancel.child_token(),
        ));
        inner.prepared = Some(range);
        inner.cached = None;
        inner.last_ledger = 0;
        inner.next_ledger = range.from();
        Ok(())
    }

    async fn is_prepared(&self, range: LedgerRange) -> Result<bool, BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(false);
        }
        let inner = self.inner.lock().await;
        Ok(inner
            .prepared
            .as_ref()
            .map(|prepared| Self::covers(prepared, &range))
            .unwrap_or(false))
    }

    async fn get_ledger(&self, sequence: u32) -> Result<LedgerCloseMeta, BackendError> {
        self.check_open()?;
        let mut inner = self.inner.lock().await;
        let range = inner.prepared.ok_or(BackendError::NotPrepared)?;

        if sequence < range.from() {
            return Err(BackendError::PrecedesRange {
                sequence,
                from: range.from(),
            });
        }
        if let Some(to) = range.to() {
            if sequence > to {
                return Err(BackendError::BeyondRange { sequence, to });
            }
        }
        if inner.last_ledger != 0 && sequence < inner.last_ledger {
            return Err(BackendError::PrecedesLast {
                sequence,
                last: inner.last_ledger,
            });
        }
        if sequence > inner.next_ledger {
            return Err(BackendError::NonContiguous {
                sequence,
                expected: inner.next_ledger,
            });
        }

        // Fast path: the batch holding `sequence` is already cached. This is
        // also the only way a repeat of the last delivered sequence succeeds.
        let cached = inner
            .cached
            .as_ref()
            .and_then(|cached| cached.get(sequence))
            .cloned();
        if let Some(ledger) = cached {
            if sequence == inner.next_ledger {
                inner.last_ledger = sequence;
                inner.next_ledger = sequence + 1;
            }
            return Ok(ledger);
        }

        // Here `sequence == next_ledger`: pull the next batch in order.
        let batch = inner
            .buffer
            .as_ref()
            .ok_or(BackendError::NotPrepared)?
            .next_batch()
            .await?;
        if !batch.contains(inner.next_ledger) {
            return Err(BackendError::BatchGap {
                expected: inner.next_ledger,
                found: batch.start_sequence(),
            });
        }

        let ledger = batch
            .get(sequence)
            .cloned()
            .ok_or(BackendError::BatchGap {
                expected: sequence,
                found: batch.start_sequence(),
            })?;
        inner.cached = Some(batch);
        inner.last_ledger = sequence;
        inner.next_ledger = sequence + 1;
        Ok(ledger)
    }

    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError> {
        self.check_open()?;
        let inner = self.inner.lock().await;
        if inner.prepared.is_none() {
            return Err(BackendError::NotPrepared);
        }
        let visible = inner.buffer.as_ref().and_then(LedgerBuffer::visible_latest);
        Ok(visible
            .or_else(|| inner.cached.as_ref().map(LedgerBatch::end_sequence))
            .unwrap_or(inner.last_ledger))
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Cancel before taking the lock: a consumer blocked on the delivery
        // queue holds it and needs the wake-up to let go.
        self.cancel.cancel();
        let mut inner = self.inner.lock().await;
        if let Some(buffer) = inner.buffer.take() {
            buffer.close().await;
        }
        info!("buffered backend closed");
        Ok(())
    }
}
