use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
pub use rocksdb::Error;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};

use super::{in_range, StorageBackend};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RocksBackendSettings {
    /// Directory holding the database files.
    pub db_path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

/// RocksDB backed history. Every batch goes through one `WriteBatch`, and
/// scans run over a snapshot.
pub struct RocksBackend {
    rocks: Arc<DB>,
}

impl RocksBackend {
    pub fn new(settings: RocksBackendSettings) -> Result<Self, Error> {
        let RocksBackendSettings { db_path, read_only } = settings;
        let mut opts = Options::default();
        let db = if read_only {
            opts.create_if_missing(false);
            DB::open_for_read_only(&opts, db_path, false)?
        } else {
            opts.create_if_missing(true);
            DB::open(&opts, db_path)?
        };
        Ok(Self {
            rocks: Arc::new(db),
        })
    }
}

impl core::fmt::Debug for RocksBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksBackend")
            .field("path", &self.rocks.path())
            .finish()
    }
}

#[async_trait]
impl StorageBackend for RocksBackend {
    type Error = Error;

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Self::Error> {
        self.rocks.get(key).map(|opt| opt.map(Bytes::from))
    }

    async fn write_batch(&self, batch: Vec<(Bytes, Bytes)>) -> Result<(), Self::Error> {
        let mut writes = WriteBatch::default();
        for (key, value) in batch {
            writes.put(key, value);
        }
        self.rocks.write(writes)
    }

    async fn scan_prefix_range(
        &self,
        prefix: &[u8],
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Bytes, Bytes)>, Self::Error> {
        let from = [prefix, start].concat();
        let snapshot = self.rocks.snapshot();
        let mut entries = Vec::new();
        for item in snapshot.iterator(IteratorMode::From(&from, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if in_range(&key, prefix, start, end) {
                entries.push((Bytes::from(key.to_vec()), Bytes::from(value.to_vec())));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open(dir: &TempDir) -> RocksBackend {
        RocksBackend::new(RocksBackendSettings {
            db_path: dir.path().to_path_buf(),
            read_only: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn batch_then_scan() -> Result<(), Error> {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.write_batch(vec![
            (Bytes::from_static(b"prefix1/a"), Bytes::from_static(b"v1")),
            (Bytes::from_static(b"prefix1/b"), Bytes::from_static(b"v2")),
            (Bytes::from_static(b"prefix1/c"), Bytes::from_static(b"v3")),
            (Bytes::from_static(b"prefix2/a"), Bytes::from_static(b"v4")),
        ])
        .await?;

        let scanned = db.scan_prefix_range(b"prefix1/", b"b", None).await?;
        assert_eq!(
            scanned,
            vec![
                (Bytes::from_static(b"prefix1/b"), Bytes::from_static(b"v2")),
                (Bytes::from_static(b"prefix1/c"), Bytes::from_static(b"v3")),
            ]
        );
        assert!(db.scan_prefix(b"prefix3/").await?.is_empty());
        assert_eq!(
            db.get(b"prefix2/a").await?,
            Some(Bytes::from_static(b"v4"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn reopened_database_keeps_data() -> Result<(), Error> {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.write_batch(vec![(Bytes::from_static(b"k"), Bytes::from_static(b"v"))])
                .await?;
        }
        let db = open(&dir);
        assert_eq!(db.get(b"k").await?, Some(Bytes::from_static(b"v")));
        Ok(())
    }
}
