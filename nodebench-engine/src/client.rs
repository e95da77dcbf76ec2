use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use nodebench_core::NodeUrl;
use serde_json::Value;

use crate::ProbeError;

/// Handle on a node that answered the connection handshake.
#[async_trait]
pub trait NodeClient: Send + Sync {
    fn node(&self) -> &NodeUrl;

    /// Issues `method` against `endpoint`, a path relative to the node URL
    /// (empty for the root), and returns the call's result payload.
    async fn call(&self, endpoint: &str, method: &str, params: Value)
        -> Result<Value, ProbeError>;
}

/// Opens node handles. One connection attempt per call; retries are the
/// caller's concern.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        node: &NodeUrl,
        timeout: Duration,
    ) -> Result<Arc<dyn NodeClient>, ProbeError>;
}

/// Cheap call used to decide whether a node is reachable at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub endpoint: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl Handshake {
    #[must_use]
    pub const fn new(endpoint: &'static str, method: &'static str, params: Value) -> Self {
        Self {
            endpoint,
            method,
            params,
        }
    }
}
