use nodebench_core::ConfigError;
use nodebench_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not read history: {0}")]
    Store(#[from] StoreError),
    #[error("could not format a date: {0}")]
    Date(#[from] time::error::Format),
    #[error("could not render the report body")]
    Render(#[from] std::fmt::Error),
}

/// Raised by a [`Publisher`](crate::Publisher). The report itself is
/// unaffected.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("io error while publishing: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode post metadata: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("publish rejected: {0}")]
    Rejected(String),
}
