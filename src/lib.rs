//! Ledgerlake
//!
//! A ledger export and streaming pipeline for the Stellar network: read
//! ledger close meta from a replay source, batch and compress it into an
//! object store, and stream it back out in strict sequence order.
//!
//! # Exporting
//!
//! ```rust,no_run
//! use ledgerlake::{
//!     datastore_from_config, Config, CoreReplayBackend, ExporterApp, ExporterDeps, ExportMode,
//!     HistoryArchiveClient, StoreResumableManager, XdrZstdCodec,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.toml")?;
//! let schema = config.batch_schema()?;
//! let store = datastore_from_config(&config.datastore_config)?;
//! let network = Arc::new(HistoryArchiveClient::new(
//!     config.stellar_core_config.resolve()?.archive_urls,
//!     &config.user_agent,
//! )?);
//! let deps = ExporterDeps {
//!     backend: Arc::new(CoreReplayBackend::new(config.stellar_core_config.clone())),
//!     codec: Arc::new(XdrZstdCodec::new(schema)),
//!     resume: Arc::new(StoreResumableManager::new(store.clone(), schema, network.clone())),
//!     store,
//!     network,
//! };
//! let _outcome = ExporterApp::new(config, ExportMode::Append, 2, 0, deps).run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Consuming
//!
//! ```rust,no_run
//! use ledgerlake::{BufferedStorageBackendConfig, LedgerRange, Producer, XdrZstdCodec};
//! use std::sync::Arc;
//!
//! # async fn run(store: Arc<dyn ledgerlake::DataStore>) {
//! let codec = Arc::new(XdrZstdCodec::new(*store.schema()));
//! let producer = Producer::new(
//!     BufferedStorageBackendConfig::default(),
//!     store,
//!     codec,
//!     LedgerRange::unbounded(2),
//! );
//! let mut result = producer.start(|sequence, _ledger| {
//!     println!("ingested ledger {sequence}");
//!     Ok(())
//! });
//! if let Some(err) = result.recv().await {
//!     eprintln!("producer stopped: {err}");
//! }
//! # }
//! ```

mod app;
mod backend;
mod batch;
mod buffer;
mod buffered;
mod config;
mod datastore;
mod error;
mod export;
mod network;
mod producer;
mod replay;
mod resume;
mod retry;
mod schema;
#[cfg(test)]
pub(crate) mod testutil;
mod types;
mod upload;

pub use app::{ExportMode, ExportOutcome, ExporterApp, ExporterDeps};
pub use backend::LedgerBackend;
pub use batch::{ledger_sequence, BatchCodec, LedgerBatch, XdrZstdCodec, DEFAULT_COMPRESSION_LEVEL};
pub use buffered::{BufferedStorageBackend, BufferedStorageBackendConfig};
pub use config::{
    Config, DataStoreConfig, ResolvedNetwork, SchemaConfig, StellarCoreConfig, DEFAULT_USER_AGENT,
};
pub use datastore::{datastore_from_config, DataStore, FsDataStore, MemoryDataStore};
pub use error::{
    BackendError, CodecError, ConfigError, DataStoreError, ExportError, NetworkError, ProducerError,
};
pub use export::ExportManager;
pub use network::{HistoryArchiveClient, NetworkManager, CHECKPOINT_FREQUENCY};
pub use producer::{LedgerCallback, Producer};
pub use replay::CoreReplayBackend;
pub use resume::{ResumableManager, ResumeOutcome, StoreResumableManager};
pub use retry::{JitterMode, RetryConfig};
pub use schema::{BatchSchema, OBJECT_SUFFIX};
pub use types::{LedgerRange, MIN_LEDGER_SEQUENCE};
pub use upload::Uploader;
