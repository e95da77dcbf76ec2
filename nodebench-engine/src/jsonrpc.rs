use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use nodebench_core::NodeUrl;
use reqwest::Client as ReqwestClient;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    client::{Connector, Handshake, NodeClient},
    ProbeError,
};

const USER_AGENT: &str = concat!("nodebench/", env!("CARGO_PKG_VERSION"));

/// JSON-RPC 2.0 over HTTP POST.
pub struct JsonRpcClient {
    node: NodeUrl,
    raw: ReqwestClient,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl JsonRpcClient {
    pub fn new(node: NodeUrl, timeout: Duration) -> Result<Self, ProbeError> {
        let raw = ReqwestClient::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ProbeError::Unexpected(format!("building http client: {err}")))?;
        Ok(Self {
            node,
            raw,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl NodeClient for JsonRpcClient {
    fn node(&self) -> &NodeUrl {
        &self.node
    }

    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, ProbeError> {
        let url = self
            .node
            .join(endpoint)
            .map_err(|err| ProbeError::Unexpected(format!("bad endpoint `{endpoint}`: {err}")))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self.raw.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status()));
        }
        let payload = response.json::<RpcResponse>().await?;
        if let Some(error) = payload.error {
            return Err(ProbeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        payload
            .result
            .ok_or_else(|| ProbeError::malformed(format!("`{method}` returned no result")))
    }
}

/// Connects by building a [`JsonRpcClient`] and issuing the handshake call.
pub struct JsonRpcConnector {
    handshake: Handshake,
}

impl JsonRpcConnector {
    #[must_use]
    pub const fn new(handshake: Handshake) -> Self {
        Self { handshake }
    }
}

#[async_trait]
impl Connector for JsonRpcConnector {
    async fn connect(
        &self,
        node: &NodeUrl,
        timeout: Duration,
    ) -> Result<Arc<dyn NodeClient>, ProbeError> {
        let client = JsonRpcClient::new(node.clone(), timeout)?;
        client
            .call(
                self.handshake.endpoint,
                self.handshake.method,
                self.handshake.params.clone(),
            )
            .await
            .map_err(|err| match err {
                ProbeError::Status(_) | ProbeError::Malformed(_) => {
                    ProbeError::Connection(format!("handshake rejected: {err}"))
                }
                other => other,
            })?;
        Ok(Arc::new(client))
    }
}
