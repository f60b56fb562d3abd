//! Object store capability and the built-in drivers.
//!
//! The pipeline only ever talks to a [`DataStore`]: one object per batch,
//! keyed by [`BatchSchema::object_key`](crate::schema::BatchSchema), with
//! concurrent writers coordinating solely through
//! [`put_file_if_not_exists`](DataStore::put_file_if_not_exists). The crate
//! ships a filesystem driver and an in-memory driver; cloud buckets plug in
//! behind the same trait.

use crate::config::DataStoreConfig;
use crate::error::{ConfigError, DataStoreError};
use crate::schema::BatchSchema;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Object store capability.
///
/// Implementations are expected to be thread-safe; the pipeline imposes no
/// serialization of its own on top of them. A test double replaces the whole
/// capability.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Whether an object exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, DataStoreError>;

    /// Fetch the full contents of the object under `key`.
    async fn get_file(&self, key: &str) -> Result<Bytes, DataStoreError>;

    /// Write `data` under `key`, replacing any existing object.
    async fn put_file(&self, key: &str, data: Bytes) -> Result<(), DataStoreError>;

    /// Write `data` under `key` unless the object already exists.
    ///
    /// Returns `true` when this call created the object, `false` when it was
    /// already present. Either outcome is success for an idempotent writer.
    async fn put_file_if_not_exists(&self, key: &str, data: Bytes) -> Result<bool, DataStoreError>;

    /// Size in bytes of the object under `key`.
    async fn size(&self, key: &str) -> Result<u64, DataStoreError>;

    /// Release the store. Idempotent; subsequent calls fail with
    /// [`DataStoreError::Closed`].
    async fn close(&self) -> Result<(), DataStoreError>;

    /// The batch schema this store was written with.
    fn schema(&self) -> &BatchSchema;
}

/// Build a store from the configuration, as an explicit injection point.
pub fn datastore_from_config(config: &DataStoreConfig) -> Result<Arc<dyn DataStore>, ConfigError> {
    let schema = BatchSchema::new(
        config.schema.ledgers_per_file,
        config.schema.files_per_partition,
    )?;
    match config.kind.as_str() {
        "fs" => {
            let base_path = config.params.get("base_path").ok_or_else(|| {
                ConfigError::Invalid("datastore_config.params.base_path is required for type \"fs\"".into())
            })?;
            let store = FsDataStore::open(base_path, schema).map_err(|e| {
                ConfigError::Invalid(format!("cannot open datastore at {base_path}: {e}"))
            })?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryDataStore::new(schema))),
        other => Err(ConfigError::Invalid(format!(
            "unknown datastore type {other:?}, expected \"fs\" or \"memory\""
        ))),
    }
}

fn io_error(key: &str, source: std::io::Error) -> DataStoreError {
    DataStoreError::Io {
        key: key.to_string(),
        source,
    }
}

/// Object store rooted at a local directory.
///
/// Objects are plain files, partition prefixes become directories. Plain
/// writes go through a temp file and a rename; put-if-absent relies on
/// `O_CREAT | O_EXCL`, so concurrent exporters race safely.
pub struct FsDataStore {
    root: PathBuf,
    schema: BatchSchema,
    closed: AtomicBool,
}

impl FsDataStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, schema: BatchSchema) -> Result<Self, std::io::Error> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            schema,
            closed: AtomicBool::new(false),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    fn check_open(&self) -> Result<(), DataStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataStoreError::Closed);
        }
        Ok(())
    }

    async fn ensure_parent(&self, key: &str, path: &Path) -> Result<(), DataStoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for FsDataStore {
    async fn exists(&self, key: &str) -> Result<bool, DataStoreError> {
        self.check_open()?;
        tokio::fs::try_exists(self.path_for(key))
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn get_file(&self, key: &str) -> Result<Bytes, DataStoreError> {
        self.check_open()?;
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DataStoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn put_file(&self, key: &str, data: Bytes) -> Result<(), DataStoreError> {
        self.check_open()?;
        let path = self.path_for(key);
        self.ensure_parent(key, &path).await?;

        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn put_file_if_not_exists(&self, key: &str, data: Bytes) -> Result<bool, DataStoreError> {
        self.check_open()?;
        let path = self.path_for(key);
        self.ensure_parent(key, &path).await?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(io_error(key, e)),
        };
        file.write_all(&data).await.map_err(|e| io_error(key, e))?;
        file.flush().await.map_err(|e| io_error(key, e))?;
        Ok(true)
    }

    async fn size(&self, key: &str) -> Result<u64, DataStoreError> {
        self.check_open()?;
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DataStoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn close(&self) -> Result<(), DataStoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn schema(&self) -> &BatchSchema {
        &self.schema
    }
}

/// In-memory object store.
///
/// Used by the test suites and handy for embedders that want the pipeline
/// without any persistence. Tracks how many writes actually landed so
/// idempotence is observable.
pub struct MemoryDataStore {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    schema: BatchSchema,
    puts: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl MemoryDataStore {
    pub fn new(schema: BatchSchema) -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            schema,
            puts: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// A fresh handle on the same underlying bucket.
    ///
    /// Closing a handle does not close the bucket, mirroring how separate
    /// exporter runs each open their own connection to shared storage.
    pub fn handle(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
            schema: self.schema,
            puts: Arc::clone(&self.puts),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of writes that created or replaced an object.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Acquire)
    }

    /// All object keys currently present, sorted.
    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Seed an object directly, bypassing the put counter.
    pub fn insert(&self, key: impl Into<String>, data: Bytes) {
        self.objects.lock().insert(key.into(), data);
    }

    /// Drop an object, if present.
    pub fn remove(&self, key: &str) {
        self.objects.lock().remove(key);
    }

    fn check_open(&self) -> Result<(), DataStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataStoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn exists(&self, key: &str) -> Result<bool, DataStoreError> {
        self.check_open()?;
        Ok(self.objects.lock().contains_key(key))
    }

    async fn get_file(&self, key: &str) -> Result<Bytes, DataStoreError> {
        self.check_open()?;
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| DataStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put_file(&self, key: &str, data: Bytes) -> Result<(), DataStoreError> {
        self.check_open()?;
        self.objects.lock().insert(key.to_string(), data);
        self.puts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn put_file_if_not_exists(&self, key: &str, data: Bytes) -> Result<bool, DataStoreError> {
        self.check_open()?;
        let mut objects = self.objects.lock();
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_string(), data);
        self.puts.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    async fn size(&self, key: &str) -> Result<u64, DataStoreError> {
        self.check_open()?;
        self.objects
            .lock()
            .get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| DataStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn close(&self) -> Result<(), DataStoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn schema(&self) -> &BatchSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> BatchSchema {
        BatchSchema::new(64, 10).unwrap()
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryDataStore::new(schema());
        let key = "FFFFFFFF--0-639/FFFFFFFF--0-63.xdr.zstd";

        assert!(!store.exists(key).await.unwrap());
        assert!(store.get_file(key).await.unwrap_err().is_not_found());

        assert!(store
            .put_file_if_not_exists(key, Bytes::from_static(b"payload"))
            .await
            .unwrap());
        assert!(store.exists(key).await.unwrap());
        assert_eq!(store.get_file(key).await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(store.size(key).await.unwrap(), 7);

        // Second conditional write is a no-op success.
        assert!(!store
            .put_file_if_not_exists(key, Bytes::from_static(b"other"))
            .await
            .unwrap());
        assert_eq!(store.get_file(key).await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn memory_store_close_is_idempotent_and_terminal() {
        let store = MemoryDataStore::new(schema());
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(
            store.exists("any").await,
            Err(DataStoreError::Closed)
        ));
    }

    #[tokio::test]
    async fn memory_store_handles_share_the_bucket() {
        let store = MemoryDataStore::new(schema());
        store
            .put_file("obj.xdr.zstd", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        store.close().await.unwrap();

        // A new handle sees the same objects and counters, but not the
        // closed state.
        let reopened = store.handle();
        assert!(reopened.exists("obj.xdr.zstd").await.unwrap());
        assert_eq!(reopened.put_count(), 1);
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDataStore::open(dir.path(), schema()).unwrap();
        let key = "FFFFFFFF--0-639/FFFFFFFF--0-63.xdr.zstd";

        assert!(!store.exists(key).await.unwrap());
        assert!(store
            .put_file_if_not_exists(key, Bytes::from_static(b"payload"))
            .await
            .unwrap());
        assert!(!store
            .put_file_if_not_exists(key, Bytes::from_static(b"other"))
            .await
            .unwrap());

        assert_eq!(store.get_file(key).await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(store.size(key).await.unwrap(), 7);

        // The partition prefix became a directory.
        assert!(dir.path().join("FFFFFFFF--0-639").is_dir());
    }

    #[tokio::test]
    async fn fs_store_put_file_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDataStore::open(dir.path(), schema()).unwrap();

        store.put_file("obj.xdr.zstd", Bytes::from_static(b"one")).await.unwrap();
        store.put_file("obj.xdr.zstd", Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(
            store.get_file("obj.xdr.zstd").await.unwrap(),
            Bytes::from_static(b"two")
        );
    }

    #[test]
    fn factory_rejects_unknown_type() {
        use crate::config::{DataStoreConfig, SchemaConfig};

        let config = DataStoreConfig {
            kind: "gcs".into(),
            params: HashMap::new(),
            schema: SchemaConfig {
                ledgers_per_file: 1,
                files_per_partition: 10,
            },
        };
        assert!(datastore_from_config(&config).is_err());
    }
}
