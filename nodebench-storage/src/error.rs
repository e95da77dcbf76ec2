use nodebench_core::RunId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("could not encode or decode a row: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("run {0} is already recorded")]
    DuplicateRun(RunId),
    #[error("history is inconsistent: {0}")]
    Corrupted(String),
}

impl StoreError {
    pub(crate) fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}
