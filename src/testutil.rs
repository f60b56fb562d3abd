//! Synthetic ledger fixtures shared by the unit tests.

use crate::backend::LedgerBackend;
use crate::batch::{BatchCodec, LedgerBatch, XdrZstdCodec};
use crate::datastore::MemoryDataStore;
use crate::error::{BackendError, NetworkError};
use crate::network::NetworkManager;
use crate::schema::BatchSchema;
use crate::types::LedgerRange;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use stellar_xdr::curr::{
    Hash, LedgerCloseMeta, LedgerCloseMetaV0, LedgerHeader, LedgerHeaderExt,
    LedgerHeaderHistoryEntry, LedgerHeaderHistoryEntryExt, StellarValue, StellarValueExt,
    TimePoint, TransactionSet, VecM,
};

/// A minimal close meta for `sequence` with an empty transaction set.
pub(crate) fn ledger(sequence: u32) -> LedgerCloseMeta {
    let header = LedgerHeader {
        ledger_version: 0,
        previous_ledger_hash: Hash([0; 32]),
        scp_value: StellarValue {
            tx_set_hash: Hash([0; 32]),
            close_time: TimePoint(u64::from(sequence) * 5),
            upgrades: VecM::default(),
            ext: StellarValueExt::Basic,
        },
        tx_set_result_hash: Hash([0; 32]),
        bucket_list_hash: Hash([0; 32]),
        ledger_seq: sequence,
        total_coins: 0,
        fee_pool: 0,
        inflation_seq: 0,
        id_pool: 0,
        base_fee: 100,
        base_reserve: 5_000_000,
        max_tx_set_size: 100,
        skip_list: [Hash([0; 32]), Hash([0; 32]), Hash([0; 32]), Hash([0; 32])],
        ext: LedgerHeaderExt::V0,
    };

    LedgerCloseMeta::V0(LedgerCloseMetaV0 {
        ledger_header: LedgerHeaderHistoryEntry {
            hash: Hash([0; 32]),
            header,
            ext: LedgerHeaderHistoryEntryExt::V0,
        },
        tx_set: TransactionSet {
            previous_ledger_hash: Hash([0; 32]),
            txs: VecM::default(),
        },
        tx_processing: VecM::default(),
        upgrades_processing: VecM::default(),
        scp_info: VecM::default(),
    })
}

/// Fill `store` with encoded batch objects covering `[from, to]`, one per
/// file, the way a completed export would have left them.
pub(crate) fn seed_lake(store: &MemoryDataStore, schema: &BatchSchema, from: u32, to: u32) {
    let codec = XdrZstdCodec::new(*schema);
    let mut sequence = from;
    while sequence <= to {
        let file_end = schema.file_end(sequence).min(to);
        let mut batch = LedgerBatch::new(schema, ledger(sequence));
        for next in sequence + 1..=file_end {
            batch.add(schema, ledger(next)).unwrap();
        }
        store.insert(batch.object_key().to_string(), codec.encode(&batch).unwrap());
        match file_end.checked_add(1) {
            Some(next) => sequence = next,
            None => break,
        }
    }
}

/// Synthetic upstream backend replaying generated ledgers.
///
/// Close only records; the fixture is reused across app runs the way a
/// fresh replay subprocess would be spawned per run.
pub(crate) struct MockLedgerBackend {
    latest: u32,
    fail_at: Option<u32>,
    prepared: Mutex<Option<LedgerRange>>,
    close_calls: AtomicU32,
    prepare_calls: AtomicU32,
    get_calls: AtomicU32,
}

impl MockLedgerBackend {
    pub(crate) fn new(latest: u32) -> Self {
        Self {
            latest,
            fail_at: None,
            prepared: Mutex::new(None),
            close_calls: AtomicU32::new(0),
            prepare_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
        }
    }

    /// Fail `get_ledger` once it reaches `sequence`.
    pub(crate) fn failing_at(mut self, sequence: u32) -> Self {
        self.fail_at = Some(sequence);
        self
    }

    pub(crate) fn prepare_calls(&self) -> u32 {
        self.prepare_calls.load(Ordering::Acquire)
    }

    pub(crate) fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::Acquire)
    }

    pub(crate) fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LedgerBackend for MockLedgerBackend {
    async fn prepare_range(&self, range: LedgerRange) -> Result<(), BackendError> {
        self.prepare_calls.fetch_add(1, Ordering::AcqRel);
        *self.prepared.lock() = Some(range);
        Ok(())
    }

    async fn is_prepared(&self, range: LedgerRange) -> Result<bool, BackendError> {
        let prepared = *self.prepared.lock();
        Ok(prepared
            .map(|prepared| {
                prepared.from() <= range.from()
                    && match (prepared.to(), range.to()) {
                        (None, _) => true,
                        (Some(_), None) => false,
                        (Some(p), Some(r)) => p >= r,
                    }
            })
            .unwrap_or(false))
    }

    async fn get_ledger(&self, sequence: u32) -> Result<LedgerCloseMeta, BackendError> {
        if self.prepared.lock().is_none() {
            return Err(BackendError::NotPrepared);
        }
        if self.fail_at == Some(sequence) {
            return Err(BackendError::Replay(format!(
                "synthetic failure at ledger {sequence}"
            )));
        }
        self.get_calls.fetch_add(1, Ordering::AcqRel);
        Ok(ledger(sequence))
    }

    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError> {
        Ok(self.latest)
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Fixed-frontier network manager.
pub(crate) struct MockNetwork {
    latest: Option<u32>,
}

impl MockNetwork {
    pub(crate) fn new(latest: u32) -> Self {
        Self {
            latest: Some(latest),
        }
    }

    pub(crate) fn failing() -> Self {
        Self { latest: None }
    }
}

#[async_trait]
impl NetworkManager for MockNetwork {
    async fn latest_ledger_sequence(&self) -> Result<u32, NetworkError> {
        self.latest
            .ok_or_else(|| NetworkError::Malformed("synthetic archive outage".into()))
    }
}
