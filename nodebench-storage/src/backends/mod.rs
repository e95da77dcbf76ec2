pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocksdb;

use std::error::Error;

use async_trait::async_trait;
use bytes::Bytes;

/// Ordered key/value store the history is kept in.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    type Error: Error + Send + Sync + 'static;

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Self::Error>;

    /// Applies every write at once: a reader sees either none or all of them.
    async fn write_batch(&self, batch: Vec<(Bytes, Bytes)>) -> Result<(), Self::Error>;

    /// Entries whose key starts with `prefix` and whose remainder lies in
    /// `[start, end)`, in key order. A missing `end` runs to the end of the
    /// prefix.
    async fn scan_prefix_range(
        &self,
        prefix: &[u8],
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Bytes, Bytes)>, Self::Error>;

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, Self::Error> {
        self.scan_prefix_range(prefix, &[], None).await
    }
}

/// `true` when `key` belongs to the `[prefix + start, prefix + end)` range.
pub(crate) fn in_range(key: &[u8], prefix: &[u8], start: &[u8], end: Option<&[u8]>) -> bool {
    let Some(rest) = key.strip_prefix(prefix) else {
        return false;
    };
    rest >= start && end.map_or(true, |end| rest < end)
}
