//! Ledger batches and the on-disk batch codec.

use crate::error::{CodecError, ExportError};
use crate::schema::BatchSchema;
use bytes::Bytes;
use stellar_xdr::curr::{LedgerCloseMeta, LedgerCloseMetaBatch, Limits, ReadXdr, WriteXdr};

/// Sequence number carried in a ledger's header.
pub fn ledger_sequence(meta: &LedgerCloseMeta) -> u32 {
    match meta {
        LedgerCloseMeta::V0(m) => m.ledger_header.header.ledger_seq,
        LedgerCloseMeta::V1(m) => m.ledger_header.header.ledger_seq,
        LedgerCloseMeta::V2(m) => m.ledger_header.header.ledger_seq,
    }
}

/// An ordered run of consecutive ledgers bound to one object key.
///
/// A batch is never empty: it is seeded with its first ledger, which also
/// fixes the object key, and grows one consecutive ledger at a time. A batch
/// may cover less than a full file when the exported range starts or stops
/// inside one.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerBatch {
    object_key: String,
    start: u32,
    ledgers: Vec<LedgerCloseMeta>,
}

impl LedgerBatch {
    /// Seed a batch with its first ledger.
    pub fn new(schema: &BatchSchema, ledger: LedgerCloseMeta) -> Self {
        let start = ledger_sequence(&ledger);
        Self {
            object_key: schema.object_key(start),
            start,
            ledgers: vec![ledger],
        }
    }

    /// Append the next consecutive ledger.
    ///
    /// The ledger must be the direct successor of the current batch end and
    /// must map to the batch's object key.
    pub fn add(&mut self, schema: &BatchSchema, ledger: LedgerCloseMeta) -> Result<(), ExportError> {
        let sequence = ledger_sequence(&ledger);
        if sequence != self.end_sequence() + 1 {
            return Err(ExportError::OutOfOrder {
                expected: self.end_sequence() + 1,
                sequence,
            });
        }
        let key = schema.object_key(sequence);
        if key != self.object_key {
            return Err(ExportError::KeyMismatch {
                sequence,
                key,
                batch_key: self.object_key.clone(),
            });
        }
        self.ledgers.push(ledger);
        Ok(())
    }

    pub(crate) fn from_parts(object_key: String, start: u32, ledgers: Vec<LedgerCloseMeta>) -> Self {
        Self {
            object_key,
            start,
            ledgers,
        }
    }

    /// Object key this batch is stored under.
    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn start_sequence(&self) -> u32 {
        self.start
    }

    pub fn end_sequence(&self) -> u32 {
        self.start + (self.ledgers.len() as u32) - 1
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }

    pub fn contains(&self, sequence: u32) -> bool {
        sequence >= self.start && sequence <= self.end_sequence()
    }

    /// Ledger at `sequence`, if this batch holds it.
    pub fn get(&self, sequence: u32) -> Option<&LedgerCloseMeta> {
        if !self.contains(sequence) {
            return None;
        }
        self.ledgers.get((sequence - self.start) as usize)
    }

    pub fn ledgers(&self) -> &[LedgerCloseMeta] {
        &self.ledgers
    }
}

/// Batch serialization capability.
///
/// The codec is the only component that knows the on-disk format; everything
/// else treats encoded batches as opaque bytes.
pub trait BatchCodec: Send + Sync {
    fn encode(&self, batch: &LedgerBatch) -> Result<Bytes, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<LedgerBatch, CodecError>;
}

/// Default zstd compression level, matching what the public lakes use.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// XDR `LedgerCloseMetaBatch` wrapped in zstd.
///
/// The encoded form is self-describing: start and end sequences travel with
/// the ledgers, so a decoded batch reconstructs exactly, including short
/// batches that begin past their file boundary.
#[derive(Clone, Debug)]
pub struct XdrZstdCodec {
    schema: BatchSchema,
    level: i32,
}

impl XdrZstdCodec {
    pub fn new(schema: BatchSchema) -> Self {
        Self {
            schema,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

impl BatchCodec for XdrZstdCodec {
    fn encode(&self, batch: &LedgerBatch) -> Result<Bytes, CodecError> {
        let wire = LedgerCloseMetaBatch {
            start_sequence: batch.start_sequence(),
            end_sequence: batch.end_sequence(),
            ledger_close_metas: batch
                .ledgers()
                .to_vec()
                .try_into()
                .map_err(|_| CodecError::Inconsistent("batch exceeds xdr vector limit".into()))?,
        };
        let raw = wire.to_xdr(Limits::none()).map_err(CodecError::Encode)?;
        let compressed = zstd::encode_all(raw.as_slice(), self.level).map_err(CodecError::Compress)?;
        Ok(Bytes::from(compressed))
    }

    fn decode(&self, bytes: &[u8]) -> Result<LedgerBatch, CodecError> {
        let raw = zstd::decode_all(bytes).map_err(CodecError::Decompress)?;
        let wire = LedgerCloseMetaBatch::from_xdr(raw, Limits::none()).map_err(CodecError::Xdr)?;

        if wire.end_sequence < wire.start_sequence {
            return Err(CodecError::Inconsistent(format!(
                "end sequence {} precedes start sequence {}",
                wire.end_sequence, wire.start_sequence
            )));
        }
        let expected = u64::from(wire.end_sequence) - u64::from(wire.start_sequence) + 1;
        let ledgers = wire.ledger_close_metas.into_vec();
        if ledgers.len() as u64 != expected {
            return Err(CodecError::Inconsistent(format!(
                "batch [{}, {}] should hold {} ledgers, found {}",
                wire.start_sequence,
                wire.end_sequence,
                expected,
                ledgers.len()
            )));
        }
        for (i, ledger) in ledgers.iter().enumerate() {
            let sequence = ledger_sequence(ledger);
            if sequence != wire.start_sequence + i as u32 {
                return Err(CodecError::Inconsistent(format!(
                    "ledger at offset {i} has sequence {sequence}, expected {}",
                    wire.start_sequence + i as u32
                )));
            }
        }

        Ok(LedgerBatch::from_parts(
            self.schema.object_key(wire.start_sequence),
            wire.start_sequence,
            ledgers,
        ))
    }
}
