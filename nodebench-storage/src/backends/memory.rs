use std::{collections::BTreeMap, convert::Infallible, ops::Bound};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{in_range, StorageBackend};

/// Volatile backend for tests and dry runs. A batch is applied under a single
/// write lock.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Error = Infallible;

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Self::Error> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write_batch(&self, batch: Vec<(Bytes, Bytes)>) -> Result<(), Self::Error> {
        self.entries.write().await.extend(batch);
        Ok(())
    }

    async fn scan_prefix_range(
        &self,
        prefix: &[u8],
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Bytes, Bytes)>, Self::Error> {
        let from = Bytes::from([prefix, start].concat());
        let entries = self.entries.read().await;
        Ok(entries
            .range((Bound::Included(from), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| in_range(key, prefix, start, end))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
