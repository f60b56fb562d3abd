//! Upstream ledger source capability.

use crate::error::BackendError;
use crate::types::LedgerRange;
use async_trait::async_trait;
use stellar_xdr::curr::LedgerCloseMeta;

/// A source of ledger close meta, replayed strictly in sequence order.
///
/// Two implementations live in this crate: the replay subprocess adapter
/// ([`CoreReplayBackend`](crate::replay::CoreReplayBackend)) feeding the
/// exporter, and the
/// [`BufferedStorageBackend`](crate::buffered::BufferedStorageBackend)
/// serving ledgers back out of the lake. Decorators (metrics, tracing) wrap
/// the capability by composition.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Reserve the source for `range`. Must be called once before
    /// [`get_ledger`](Self::get_ledger).
    async fn prepare_range(&self, range: LedgerRange) -> Result<(), BackendError>;

    /// Whether a previous [`prepare_range`](Self::prepare_range) already
    /// covers `range`.
    async fn is_prepared(&self, range: LedgerRange) -> Result<bool, BackendError>;

    /// Fetch the close meta of `sequence`. Sequences must be requested in
    /// ascending order within the prepared range.
    async fn get_ledger(&self, sequence: u32) -> Result<LedgerCloseMeta, BackendError>;

    /// Highest sequence currently known to the source.
    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError>;

    /// Release the source. Idempotent; all other operations fail with
    /// [`BackendError::Closed`] afterwards.
    async fn close(&self) -> Result<(), BackendError>;
}
