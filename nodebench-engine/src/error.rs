use std::time::Duration;

use nodebench_core::{ErrorCategory, ProbeFailure};

/// Failure of a single call or probe against a node.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("request timed out: {0}")]
    RequestTimeout(String),
    #[error("unexpected http status {0}")]
    Status(reqwest::StatusCode),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("{0}")]
    Unexpected(String),
}

impl ProbeError {
    pub fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) => ErrorCategory::Connection,
            Self::Timeout(_) | Self::RequestTimeout(_) => ErrorCategory::Timeout,
            Self::Status(_) | Self::Rpc { .. } | Self::Malformed(_) => ErrorCategory::Protocol,
            Self::Unexpected(_) => ErrorCategory::Unexpected,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::RequestTimeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status)
        } else if err.is_decode() || err.is_body() {
            Self::Malformed(err.to_string())
        } else {
            Self::Unexpected(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<ProbeError> for ProbeFailure {
    fn from(err: ProbeError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            ProbeError::Connection("refused".into()).category(),
            ErrorCategory::Connection
        );
        assert_eq!(
            ProbeError::Timeout(Duration::from_secs(1)).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ProbeError::Rpc {
                code: -32601,
                message: "method not found".into()
            }
            .category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            ProbeError::malformed("missing head_block_number").category(),
            ErrorCategory::Protocol
        );
    }

    #[test]
    fn folds_into_failure() {
        let failure = ProbeFailure::from(ProbeError::malformed("empty body"));
        assert_eq!(failure.category, ErrorCategory::Protocol);
        assert_eq!(failure.error, "malformed response: empty body");
    }
}
