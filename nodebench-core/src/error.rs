use std::time::Duration;

/// Problems detected before any network activity starts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("node list is empty")]
    EmptyNodeList,
    #[error("invalid node url `{url}`: {reason}")]
    InvalidNodeUrl { url: String, reason: String },
    #[error("history window must cover at least one day, got {0}")]
    InvalidWindow(u32),
    #[error("minimum success rate must be within [0, 1], got {0}")]
    InvalidSuccessRate(f64),
    #[error("{name} must be non-zero, got {value:?}")]
    ZeroDuration { name: &'static str, value: Duration },
    #[error("{name} must be a whole number of milliseconds, got {value:?}")]
    SubMillisecond { name: &'static str, value: Duration },
    #[error("worker pool needs at least one worker")]
    NoWorkers,
}
