//! Error types for the ledger pipeline.

use thiserror::Error;

/// Errors surfaced by [`DataStore`](crate::datastore::DataStore)
/// implementations.
#[derive(Debug, Error)]
pub enum DataStoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("i/o failure on object {key}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("data store is closed")]
    Closed,
}

impl DataStoreError {
    /// Whether this error indicates an absent object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataStoreError::NotFound { .. })
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// I/O failures are treated as transient; an absent object and a closed
    /// store are definitive answers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataStoreError::Io { .. })
    }
}

/// Errors produced by the batch codec.
///
/// Everything on the decode side is a flavour of "corrupt batch": the bytes
/// came out of the store but do not decode back into the batch that was
/// written.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("corrupt batch: decompression failed")]
    Decompress(#[source] std::io::Error),

    #[error("corrupt batch: invalid xdr")]
    Xdr(#[source] stellar_xdr::curr::Error),

    #[error("corrupt batch: {0}")]
    Inconsistent(String),

    #[error("failed to encode batch")]
    Encode(#[source] stellar_xdr::curr::Error),

    #[error("failed to compress batch")]
    Compress(#[source] std::io::Error),
}

/// Errors surfaced by [`LedgerBackend`](crate::backend::LedgerBackend)
/// implementations, including the buffered storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend is closed")]
    Closed,

    #[error("backend is not prepared, call prepare_range first")]
    NotPrepared,

    #[error("requested ledger {sequence} precedes the prepared range starting at {from}")]
    PrecedesRange { sequence: u32, from: u32 },

    #[error("requested ledger {sequence} is beyond the prepared range ending at {to}")]
    BeyondRange { sequence: u32, to: u32 },

    #[error("requested ledger {sequence} precedes the last delivered ledger {last}")]
    PrecedesLast { sequence: u32, last: u32 },

    #[error("requested ledger {sequence} is not contiguous, next deliverable ledger is {expected}")]
    NonContiguous { sequence: u32, expected: u32 },

    #[error("batch starting at ledger {found} does not match the expected batch start {expected}")]
    BatchGap { expected: u32, found: u32 },

    #[error("ledger batch for {sequence} is missing: object {key} does not exist in the data store")]
    MissingBatch { sequence: u32, key: String },

    #[error("retries exhausted after {attempts} attempt(s) fetching object {key}")]
    MaxRetriesExceeded {
        key: String,
        attempts: u32,
        #[source]
        source: DataStoreError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("replay source failed: {0}")]
    Replay(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    DataStore(#[from] DataStoreError),

    #[error("operation cancelled")]
    Cancelled,
}

impl BackendError {
    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }
}

/// Errors surfaced by the export side: manager, uploader, resume probing and
/// the exporter app.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid ledger range: {0}")]
    InvalidRange(String),

    #[error(
        "data store is corrupt: resume ledger {resume} is not aligned to \
         ledgers-per-file {ledgers_per_file}"
    )]
    InvalidDataStore { resume: u32, ledgers_per_file: u32 },

    #[error("ledger {sequence} maps to object {key}, current batch is {batch_key}")]
    KeyMismatch {
        sequence: u32,
        key: String,
        batch_key: String,
    },

    #[error("ledger {sequence} is out of order, expected {expected}")]
    OutOfOrder { expected: u32, sequence: u32 },

    #[error("batch channel closed before the export completed")]
    ChannelClosed,

    #[error("upload of object {key} failed after {attempts} attempt(s)")]
    UploadFailed {
        key: String,
        attempts: u32,
        #[source]
        source: DataStoreError,
    },

    #[error("upstream backend failed")]
    Backend(#[source] BackendError),

    #[error(transparent)]
    DataStore(#[from] DataStoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<BackendError> for ExportError {
    fn from(err: BackendError) -> Self {
        // Cancellation propagates unchanged, it is never a component failure.
        match err {
            BackendError::Cancelled => ExportError::Cancelled,
            other => ExportError::Backend(other),
        }
    }
}

impl ExportError {
    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }
}

/// Errors surfaced by the [`Producer`](crate::producer::Producer).
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid ledger range: {0}")]
    InvalidRange(String),

    #[error("callback failed on ledger {sequence}")]
    Callback {
        sequence: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Backend(BackendError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<BackendError> for ProducerError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => ProducerError::Cancelled,
            other => ProducerError::Backend(other),
        }
    }
}

impl ProducerError {
    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProducerError::Cancelled)
    }
}

/// Errors from the history archive client.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("history archive request failed")]
    Http(#[from] reqwest::Error),

    #[error("history archive returned malformed state: {0}")]
    Malformed(String),

    #[error("no history archive urls configured")]
    NoArchives,
}

/// Errors from loading and validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
