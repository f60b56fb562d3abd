//! Shared fixtures for the end-to-end tests.

// Each integration test binary compiles its own copy of this module and
// uses a different subset of it.
#![allow(dead_code)]

use async_trait::async_trait;
use ledgerlake::{BackendError, LedgerBackend, LedgerRange, NetworkError, NetworkManager};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use stellar_xdr::curr::{
    Hash, LedgerCloseMeta, LedgerCloseMetaV0, LedgerHeader, LedgerHeaderExt,
    LedgerHeaderHistoryEntry, LedgerHeaderHistoryEntryExt, StellarValue, StellarValueExt,
    TimePoint, TransactionSet, VecM,
};

/// A minimal close meta for `sequence` with an empty transaction set.
pub fn ledger(sequence: u32) -> LedgerCloseMeta {
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

/// Upstream backend replaying synthetic ledgers.
pub struct ReplayFixture {
    latest: u32,
    prepared: Mutex<Option<LedgerRange>>,
    closed: AtomicBool,
    get_calls: AtomicU32,
}

impl ReplayFixture {
    pub fn new(latest: u32) -> Self {
        Self {
            latest,
            prepared: Mutex::new(None),
            closed: AtomicBool::new(false),
            get_calls: AtomicU32::new(0),
        }
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LedgerBackend for ReplayFixture {
    async fn prepare_range(&self, range: LedgerRange) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        *self.prepared.lock() = Some(range);
        Ok(())
    }

    async fn is_prepared(&self, range: LedgerRange) -> Result<bool, BackendError> {
        let prepared = *self.prepared.lock();
        Ok(prepared.is_some_and(|prepared| prepared.from() <= range.from()))
    }

    async fn get_ledger(&self, sequence: u32) -> Result<LedgerCloseMeta, BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        if self.prepared.lock().is_none() {
            return Err(BackendError::NotPrepared);
        }
        self.get_calls.fetch_add(1, Ordering::AcqRel);
        Ok(ledger(sequence))
    }

    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError> {
        Ok(self.latest)
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Fixed-frontier network manager.
pub struct FixedNetwork {
    latest: u32,
}

impl FixedNetwork {
    pub fn new(latest: u32) -> Self {
        Self { latest }
    }
}

#[async_trait]
impl NetworkManager for FixedNetwork {
    async fn latest_ledger_sequence(&self) -> Result<u32, NetworkError> {
        Ok(self.latest)
    }
}

/// Fill `store` with encoded batch objects covering `[from, to]`, one per
/// file, the way a completed export would have left them.
pub fn seed_lake(
    store: &ledgerlake::MemoryDataStore,
    schema: &ledgerlake::BatchSchema,
    from: u32,
    to: u32,
) {
    use ledgerlake::{BatchCodec, LedgerBatch, XdrZstdCodec};

    let codec = XdrZstdCodec::new(*schema);
    let mut sequence = from;
    while sequence <= to {
        let file_end = schema.end_boundary(sequence).min(to);
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

/// TOML configuration for an in-memory lake with the given schema.
pub fn memory_config(ledgers_per_file: u32, files_per_partition: u32) -> ledgerlake::Config {
    ledgerlake::Config::from_toml(&format!(
        r#"
        network_name = "testnet"
        [datastore_config]
        type = "memory"
        schema = {{ ledgers_per_file = {ledgers_per_file}, files_per_partition = {files_per_partition} }}
        [stellar_core_config]
        preconfigured_network = "testnet"
        "#
    ))
    .unwrap()
}
