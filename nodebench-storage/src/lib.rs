pub mod backends;
pub mod error;
pub mod keys;
pub mod rows;
pub mod store;

#[cfg(feature = "rocksdb-backend")]
pub use backends::rocksdb::{RocksBackend, RocksBackendSettings};
pub use backends::{memory::MemoryBackend, StorageBackend};
pub use error::StoreError;
pub use rows::NodeRow;
pub use store::HistoricalStore;
