//! Probes for Hive Engine sidechain nodes.
//!
//! The node URL is the API root; `blockchain` and `contracts` are the
//! standard JSON-RPC endpoints below it and `history` is the account history
//! endpoint.

use std::time::Duration;

use async_trait::async_trait;
use nodebench_core::ProbeSample;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::{Probe, ProbeContext, ProbeSettings, ProbeSet, Stream};
use crate::{
    client::{Handshake, NodeClient},
    probes::Domain,
    ProbeError,
};

const BLOCKCHAIN: &str = "blockchain";
const CONTRACTS: &str = "contracts";
const HISTORY: &str = "history";
const LATENCY_PAUSE: Duration = Duration::from_millis(100);

#[must_use]
pub fn probe_set(settings: &ProbeSettings) -> ProbeSet {
    ProbeSet::new(
        Domain::Engine,
        Handshake::new(BLOCKCHAIN, "getLatestBlockInfo", json!({})),
    )
    .with_probe(StatusProbe)
    .with_probe(TokenProbe {
        token: settings.token.clone(),
    })
    .with_probe(ContractProbe {
        contract: settings.contract.clone(),
    })
    .with_probe(HistoryProbe {
        account: settings.account.clone(),
        token: settings.token.clone(),
    })
    .with_probe(LatencyProbe {
        token: settings.token.clone(),
        samples: settings.latency_samples.max(1),
    })
}

/// Repeats one `find` until the stream window closes.
async fn find_until_closed(
    client: &dyn NodeClient,
    ctx: &ProbeContext,
    endpoint: &str,
    method: &str,
    params: &Value,
) -> Result<ProbeSample, ProbeError> {
    let mut stream = Stream::start();
    let mut error = None;
    while ctx.stream_open() {
        match ctx.call(client, endpoint, method, params.clone()).await {
            Ok(Value::Null) => {
                error = Some(ProbeError::malformed(format!("`{method}` found nothing")));
                break;
            }
            Ok(_) => stream.add(1),
            Err(err) => {
                error = Some(err);
                break;
            }
        }
    }
    stream.finish(ctx, error)
}

/// Reads the node status and records the node software version.
pub struct StatusProbe;

#[async_trait]
impl Probe for StatusProbe {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let started = Instant::now();
        let status = ctx.call(client, BLOCKCHAIN, "getStatus", json!({})).await?;
        let elapsed = started.elapsed();
        if !status.is_object() {
            return Err(ProbeError::malformed("status is not an object"));
        }

        let text = |key: &str| match status.get(key) {
            Some(Value::String(value)) => Some(value.clone()),
            Some(Value::Number(value)) => Some(value.to_string()),
            _ => None,
        };
        let mut sample = ProbeSample::timed(elapsed)
            .with_fact("version", text("SSCnodeVersion").unwrap_or_else(|| "unknown".to_owned()));
        if let Some(chain_id) = text("chainId") {
            sample = sample.with_fact("chain_id", chain_id);
        }
        if let Some(last_block) = text("lastBlockNumber") {
            sample = sample.with_fact("last_block", last_block);
        }
        Ok(sample)
    }
}

pub struct TokenProbe {
    token: String,
}

#[async_trait]
impl Probe for TokenProbe {
    fn name(&self) -> &'static str {
        "token"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let params = json!({
            "contract": "tokens",
            "table": "tokens",
            "query": { "symbol": self.token },
        });
        find_until_closed(client, ctx, CONTRACTS, "findOne", &params).await
    }
}

pub struct ContractProbe {
    contract: String,
}

#[async_trait]
impl Probe for ContractProbe {
    fn name(&self) -> &'static str {
        "contract"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let params = json!({
            "contract": self.contract,
            "table": self.contract,
            "query": {},
            "limit": 5,
        });
        find_until_closed(client, ctx, CONTRACTS, "find", &params).await
    }
}

pub struct HistoryProbe {
    account: String,
    token: String,
}

#[async_trait]
impl Probe for HistoryProbe {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let params = json!({
            "account": self.account,
            "symbol": self.token,
            "limit": 5,
        });
        find_until_closed(client, ctx, HISTORY, "accountHistory", &params).await
    }
}

/// Mean round trip of a few light `find` calls.
pub struct LatencyProbe {
    token: String,
    samples: u32,
}

#[async_trait]
impl Probe for LatencyProbe {
    fn name(&self) -> &'static str {
        "latency"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let params = json!({
            "contract": "tokens",
            "table": "tokens",
            "query": { "symbol": self.token },
            "limit": 1,
        });
        let mut measured = Vec::new();
        let mut error = None;
        for sample in 0..self.samples {
            if sample > 0 {
                tokio::time::sleep(LATENCY_PAUSE).await;
            }
            let started = Instant::now();
            match ctx.call(client, CONTRACTS, "find", params.clone()).await {
                Ok(_) => measured.push(started.elapsed()),
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        if measured.is_empty() {
            return Err(error.unwrap_or_else(|| ProbeError::malformed("no latency sample")));
        }
        let fastest = measured.iter().min().copied().unwrap_or_default();
        let slowest = measured.iter().max().copied().unwrap_or_default();
        let total: Duration = measured.iter().sum();
        Ok(ProbeSample::timed(total)
            .with_items(measured.len() as u64)
            .with_fact("min_ms", fastest.as_millis())
            .with_fact("max_ms", slowest.as_millis()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    };

    use nodebench_core::{NodeUrl, RetryPolicy};

    use super::*;

    struct Engine {
        node: NodeUrl,
        calls: AtomicU32,
        fail_after: u32,
        params: Mutex<Vec<Value>>,
    }

    impl Engine {
        fn new(fail_after: u32) -> Arc<Self> {
            Arc::new(Self {
                node: NodeUrl::parse("https://engine.example").unwrap(),
                calls: AtomicU32::new(0),
                fail_after,
                params: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NodeClient for Engine {
        fn node(&self) -> &NodeUrl {
            &self.node
        }

        async fn call(
            &self,
            endpoint: &str,
            method: &str,
            params: Value,
        ) -> Result<Value, ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.params.lock().unwrap().push(params);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if call >= self.fail_after {
                return Err(ProbeError::Rpc {
                    code: -32603,
                    message: "internal".into(),
                });
            }
            match (endpoint, method) {
                (BLOCKCHAIN, "getStatus") => Ok(json!({
                    "SSCnodeVersion": "1.14.1",
                    "chainId": "mainnet-hive",
                    "lastBlockNumber": 41_000_000,
                })),
                (CONTRACTS, "findOne") => Ok(json!({ "symbol": "SWAP.HIVE" })),
                _ => Ok(json!([])),
            }
        }
    }

    fn ctx() -> ProbeContext {
        ProbeContext::new(Duration::from_secs(1), RetryPolicy::once())
    }

    #[tokio::test(start_paused = true)]
    async fn status_records_version() {
        let sample = StatusProbe.run(Engine::new(u32::MAX).as_ref(), &ctx()).await.unwrap();
        assert_eq!(sample.fact("version"), Some("1.14.1"));
        assert_eq!(sample.fact("last_block"), Some("41000000"));
    }

    #[tokio::test(start_paused = true)]
    async fn token_counts_calls_within_window() {
        let probe = TokenProbe {
            token: "SWAP.HIVE".into(),
        };
        let sample = probe.run(Engine::new(u32::MAX).as_ref(), &ctx()).await.unwrap();
        assert_eq!(sample.items, Some(40));
        assert_eq!(sample.latency(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_cut_short_keeps_progress() {
        let probe = ContractProbe {
            contract: "tokens".into(),
        };
        let sample = probe.run(Engine::new(3).as_ref(), &ctx()).await.unwrap();
        assert_eq!(sample.items, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_without_progress_fails() {
        let probe = HistoryProbe {
            account: "thecrazygm".into(),
            token: "SWAP.HIVE".into(),
        };
        let err = probe.run(Engine::new(0).as_ref(), &ctx()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Rpc { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_mean_of_samples() {
        let engine = Engine::new(u32::MAX);
        let sample = LatencyProbe {
            token: "SWAP.HIVE".into(),
            samples: 5,
        }
            .run(engine.as_ref(), &ctx())
            .await
            .unwrap();
        assert_eq!(sample.items, Some(5));
        assert_eq!(sample.latency(), Duration::from_millis(20));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_queries_configured_token() {
        let engine = Engine::new(u32::MAX);
        let settings = ProbeSettings {
            token: "BEE".to_owned(),
            latency_samples: 2,
            ..ProbeSettings::default()
        };
        let set = probe_set(&settings);
        let latency = set
            .iter()
            .find(|probe| probe.name() == "latency")
            .unwrap();
        latency.run(engine.as_ref(), &ctx()).await.unwrap();

        let params = engine.params.lock().unwrap();
        assert_eq!(params.len(), 2);
        assert!(params
            .iter()
            .all(|params| params["query"]["symbol"] == "BEE"));
    }
}
