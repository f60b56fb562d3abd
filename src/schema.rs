//! Batch schema: ledger sequence to object key mapping.
//!
//! The lake is laid out as one object per batch of `ledgers_per_file`
//! consecutive ledgers, grouped into partition directories of
//! `files_per_partition` objects. Both prefixes invert the start sequence
//! (`0xFFFFFFFF - start`, zero-padded uppercase hex) so that a plain
//! lexicographic listing returns the newest objects first:
//!
//! ```text
//! FFFFFFFF--0-639/FFFFFFFF--0-63.xdr.zstd
//! FFFFFFFF--0-639/FFFFFFBF--64-127.xdr.zstd
//! ```
//!
//! The partition directory is omitted when `files_per_partition == 1`, and
//! the `-<fileEnd>` suffix is omitted when `ledgers_per_file == 1`. Writers
//! and readers of the same bucket must use identical schema parameters.

use crate::error::ConfigError;
use crate::types::MIN_LEDGER_SEQUENCE;

/// File extension of every batch object in the lake.
pub const OBJECT_SUFFIX: &str = ".xdr.zstd";

/// Maps ledger sequences to object keys and partition/file boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSchema {
    ledgers_per_file: u32,
    files_per_partition: u32,
}

impl BatchSchema {
    /// Create a schema; both parameters must be at least 1.
    pub fn new(ledgers_per_file: u32, files_per_partition: u32) -> Result<Self, ConfigError> {
        if ledgers_per_file == 0 {
            return Err(ConfigError::Invalid(
                "ledgers_per_file must be at least 1".into(),
            ));
        }
        if files_per_partition == 0 {
            return Err(ConfigError::Invalid(
                "files_per_partition must be at least 1".into(),
            ));
        }
        Ok(Self {
            ledgers_per_file,
            files_per_partition,
        })
    }

    pub fn ledgers_per_file(&self) -> u32 {
        self.ledgers_per_file
    }

    pub fn files_per_partition(&self) -> u32 {
        self.files_per_partition
    }

    /// Number of sequences covered by one partition directory.
    pub fn partition_size(&self) -> u64 {
        u64::from(self.ledgers_per_file) * u64::from(self.files_per_partition)
    }

    /// First sequence of the file containing `sequence`.
    pub fn file_start(&self, sequence: u32) -> u32 {
        (sequence / self.ledgers_per_file) * self.ledgers_per_file
    }

    /// Last sequence of the file containing `sequence`.
    pub fn file_end(&self, sequence: u32) -> u32 {
        let end = u64::from(self.file_start(sequence)) + u64::from(self.ledgers_per_file) - 1;
        end.min(u64::from(u32::MAX)) as u32
    }

    /// Align `sequence` down to its file boundary, clamped to the minimum
    /// exportable ledger.
    pub fn start_boundary(&self, sequence: u32) -> u32 {
        self.file_start(sequence).max(MIN_LEDGER_SEQUENCE)
    }

    /// Align `sequence` up to the end of its file.
    pub fn end_boundary(&self, sequence: u32) -> u32 {
        self.file_end(sequence)
    }

    /// Object key of the batch containing `sequence`.
    ///
    /// Deterministic and total: every sequence in the same file yields the
    /// same key.
    pub fn object_key(&self, sequence: u32) -> String {
        let mut key = String::new();

        if self.files_per_partition > 1 {
            let partition_size = self.partition_size();
            let partition_start = (u64::from(sequence) / partition_size) * partition_size;
            let partition_end = partition_start + partition_size - 1;
            key.push_str(&format!(
                "{:08X}--{}-{}/",
                u32::MAX - partition_start as u32,
                partition_start,
                partition_end,
            ));
        }

        let file_start = self.file_start(sequence);
        key.push_str(&format!("{:08X}--{}", u32::MAX - file_start, file_start));
        if self.ledgers_per_file > 1 {
            key.push_str(&format!("-{}", self.file_end(sequence)));
        }
        key.push_str(OBJECT_SUFFIX);

        key
    }

    /// Inverse of [`object_key`](Self::object_key): the `[fileStart,
    /// fileEnd]` range a key covers, or `None` when the key does not belong
    /// to this schema.
    pub fn key_range(&self, key: &str) -> Option<(u32, u32)> {
        let name = key.rsplit('/').next()?;
        let name = name.strip_suffix(OBJECT_SUFFIX)?;
        let (_, sequences) = name.split_once("--")?;
        let file_start: u32 = match sequences.split_once('-') {
            Some((start, _)) => start.parse().ok()?,
            None => sequences.parse().ok()?,
        };

        // Rebuilding the key validates the inverted prefix, the partition
        // directory and the file-end suffix in one shot.
        if self.object_key(file_start) != key || self.file_start(file_start) != file_start {
            return None;
        }
        Some((file_start, self.file_end(file_start)))
    }
}
