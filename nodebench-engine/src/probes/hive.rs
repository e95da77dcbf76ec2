//! Probes for Hive API nodes, spoken over the `condenser_api`,
//! `database_api` and `block_api` JSON-RPC namespaces.

use async_trait::async_trait;
use nodebench_core::ProbeSample;
use serde_json::{json, Value};
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};
use tokio::time::Instant;

use super::{field, u64_field, Probe, ProbeContext, ProbeSettings, ProbeSet, Stream};
use crate::{
    client::{Handshake, NodeClient},
    probes::Domain,
    ProbeError,
};

const ROOT: &str = "";
const HISTORY_BATCH: u64 = 100;

#[must_use]
pub fn probe_set(settings: &ProbeSettings) -> ProbeSet {
    ProbeSet::new(
        Domain::Hive,
        Handshake::new(ROOT, "condenser_api.get_version", json!([])),
    )
    .with_probe(ConfigProbe)
    .with_probe(BlockProbe)
    .with_probe(HistoryProbe {
        account: settings.account.clone(),
    })
    .with_probe(ApiCallProbe {
        post: settings.post.clone(),
    })
    .with_probe(BlockDiffProbe)
}

async fn dynamic_global_properties(
    client: &dyn NodeClient,
    ctx: &ProbeContext,
) -> Result<Value, ProbeError> {
    ctx.call(
        client,
        ROOT,
        "condenser_api.get_dynamic_global_properties",
        json!([]),
    )
    .await
}

/// Times a fresh read of the node configuration and records the version.
pub struct ConfigProbe;

#[async_trait]
impl Probe for ConfigProbe {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let version = ctx
            .call(client, ROOT, "database_api.get_version", json!({}))
            .await?;
        let version = field(&version, "blockchain_version")?
            .as_str()
            .ok_or_else(|| ProbeError::malformed("`blockchain_version` is not a string"))?
            .to_owned();

        let started = Instant::now();
        let config = ctx
            .call(client, ROOT, "database_api.get_config", json!({}))
            .await?;
        let elapsed = started.elapsed();
        if !config.is_object() {
            return Err(ProbeError::malformed("config is not an object"));
        }
        Ok(ProbeSample::timed(elapsed).with_fact("version", version))
    }
}

/// Streams consecutive blocks starting at three quarters of the head height.
pub struct BlockProbe;

#[async_trait]
impl Probe for BlockProbe {
    fn name(&self) -> &'static str {
        "block"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let properties = dynamic_global_properties(client, ctx).await?;
        let head = u64_field(&properties, "head_block_number")?;
        let mut block_num = head * 3 / 4;

        let mut stream = Stream::start();
        let mut error = None;
        while ctx.stream_open() && block_num <= head {
            match ctx
                .call(
                    client,
                    ROOT,
                    "block_api.get_block",
                    json!({ "block_num": block_num }),
                )
                .await
            {
                Ok(response) if response.get("block").is_some_and(Value::is_object) => {
                    stream.add(1);
                    block_num += 1;
                }
                Ok(_) => {
                    error = Some(ProbeError::malformed(format!("block {block_num} missing")));
                    break;
                }
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        stream.finish(ctx, error)
    }
}

/// Reads account history backwards in batches.
pub struct HistoryProbe {
    account: String,
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
        let mut stream = Stream::start();
        let mut error = None;
        let mut start: i64 = -1;
        while ctx.stream_open() {
            let limit = if start < 0 {
                HISTORY_BATCH
            } else {
                HISTORY_BATCH.min(start.unsigned_abs() + 1)
            };
            let batch = match ctx
                .call(
                    client,
                    ROOT,
                    "condenser_api.get_account_history",
                    json!([self.account, start, limit]),
                )
                .await
            {
                Ok(Value::Array(batch)) => batch,
                Ok(_) => {
                    error = Some(ProbeError::malformed("history is not an array"));
                    break;
                }
                Err(err) => {
                    error = Some(err);
                    break;
                }
            };
            let lowest = batch
                .iter()
                .filter_map(|entry| entry.get(0).and_then(Value::as_i64))
                .min();
            stream.add(batch.len() as u64);
            match lowest {
                Some(index) if index > 0 => start = index - 1,
                _ => break,
            }
        }
        stream.finish(ctx, error)
    }
}

/// Fetches one post, falling back to the author's latest blog entry.
pub struct ApiCallProbe {
    post: String,
}

impl ApiCallProbe {
    fn author_permlink(&self) -> Result<(&str, &str), ProbeError> {
        let reference = self.post.split('|').next().unwrap_or_default();
        reference
            .trim_start_matches('@')
            .split_once('/')
            .filter(|(author, permlink)| !author.is_empty() && !permlink.is_empty())
            .ok_or_else(|| ProbeError::Unexpected(format!("invalid post `{}`", self.post)))
    }
}

#[async_trait]
impl Probe for ApiCallProbe {
    fn name(&self) -> &'static str {
        "apicall"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let (author, permlink) = self.author_permlink()?;

        let started = Instant::now();
        let content = ctx
            .call(
                client,
                ROOT,
                "condenser_api.get_content",
                json!([author, permlink]),
            )
            .await?;
        if content.get("id").and_then(Value::as_u64).unwrap_or_default() > 0 {
            return Ok(ProbeSample::timed(started.elapsed()).with_fact("source", "post"));
        }

        tracing::debug!(node = %client.node(), author, permlink, "post not found, reading blog");
        let started = Instant::now();
        let blog = ctx
            .call(client, ROOT, "condenser_api.get_blog", json!([author, 0, 1]))
            .await?;
        if blog.as_array().is_some_and(|entries| !entries.is_empty()) {
            return Ok(ProbeSample::timed(started.elapsed()).with_fact("source", "blog"));
        }
        dynamic_global_properties(client, ctx).await?;
        Ok(ProbeSample::timed(started.elapsed()).with_fact("source", "head"))
    }
}

/// Measures how far the head lags behind wall time and the last
/// irreversible block.
pub struct BlockDiffProbe;

#[async_trait]
impl Probe for BlockDiffProbe {
    fn name(&self) -> &'static str {
        "block_diff"
    }

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError> {
        let started = Instant::now();
        let properties = dynamic_global_properties(client, ctx).await?;
        let elapsed = started.elapsed();

        let head = u64_field(&properties, "head_block_number")?;
        let irreversible = u64_field(&properties, "last_irreversible_block_num")?;
        let head_time = field(&properties, "time")?
            .as_str()
            .ok_or_else(|| ProbeError::malformed("`time` is not a string"))?;
        let head_time = PrimitiveDateTime::parse(
            head_time,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
        .map_err(|err| ProbeError::malformed(format!("bad head time `{head_time}`: {err}")))?
        .assume_utc();
        let head_delay = (OffsetDateTime::now_utc() - head_time).as_seconds_f64();

        Ok(ProbeSample::timed(elapsed)
            .with_fact("head_delay_secs", format!("{head_delay:.3}"))
            .with_fact("irreversible_gap", head.saturating_sub(irreversible)))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use nodebench_core::{NodeUrl, RetryPolicy};
    use tokio::sync::Mutex;

    use super::*;

    /// Answers calls from a fixed table, counting how often each method was hit.
    struct Scripted {
        node: NodeUrl,
        calls: Mutex<Vec<String>>,
        answer: fn(&str, &Value) -> Result<Value, ProbeError>,
    }

    impl Scripted {
        fn new(answer: fn(&str, &Value) -> Result<Value, ProbeError>) -> Arc<Self> {
            Arc::new(Self {
                node: NodeUrl::parse("https://api.hive.example").unwrap(),
                calls: Mutex::new(Vec::new()),
                answer,
            })
        }
    }

    #[async_trait]
    impl NodeClient for Scripted {
        fn node(&self) -> &NodeUrl {
            &self.node
        }

        async fn call(
            &self,
            _endpoint: &str,
            method: &str,
            params: Value,
        ) -> Result<Value, ProbeError> {
            self.calls.lock().await.push(method.to_owned());
            tokio::time::sleep(Duration::from_millis(10)).await;
            (self.answer)(method, &params)
        }
    }

    fn ctx() -> ProbeContext {
        ProbeContext::new(Duration::from_secs(1), RetryPolicy::retries(2))
    }

    #[tokio::test(start_paused = true)]
    async fn config_records_version() {
        let client = Scripted::new(|method, _| match method {
            "database_api.get_version" => Ok(json!({ "blockchain_version": "1.27.5" })),
            "database_api.get_config" => Ok(json!({ "HIVE_CHAIN_ID": "beeab0de" })),
            other => panic!("unexpected call {other}"),
        });
        let sample = ConfigProbe.run(client.as_ref(), &ctx()).await.unwrap();
        assert_eq!(sample.fact("version"), Some("1.27.5"));
        assert_eq!(sample.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn block_stream_stops_at_window() {
        let client = Scripted::new(|method, _| match method {
            "condenser_api.get_dynamic_global_properties" => {
                Ok(json!({ "head_block_number": 1_000_000 }))
            }
            "block_api.get_block" => Ok(json!({ "block": { "previous": "00" } })),
            other => panic!("unexpected call {other}"),
        });
        let sample = BlockProbe.run(client.as_ref(), &ctx()).await.unwrap();
        // 800 ms window, 10 ms for the head lookup, 10 ms per block.
        assert_eq!(sample.items, Some(79));
        assert_eq!(sample.latency(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn history_walks_backwards_until_genesis() {
        let client = Scripted::new(|_, params| {
            let start = params[1].as_i64().unwrap();
            let top = if start < 0 { 149 } else { start };
            let limit = params[2].as_i64().unwrap();
            let entries: Vec<Value> = ((top - limit + 1).max(0)..=top)
                .map(|index| json!([index, {}]))
                .collect();
            Ok(Value::Array(entries))
        });
        let sample = HistoryProbe {
            account: "thecrazygm".into(),
        }
        .run(client.as_ref(), &ctx())
        .await
        .unwrap();
        assert_eq!(sample.items, Some(150));
        assert_eq!(client.calls.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn apicall_falls_back_to_blog() {
        let client = Scripted::new(|method, _| match method {
            "condenser_api.get_content" => Ok(json!({ "id": 0, "author": "" })),
            "condenser_api.get_blog" => Ok(json!([{ "entry_id": 1 }])),
            other => panic!("unexpected call {other}"),
        });
        let probe = ApiCallProbe {
            post: "thecrazygm/gone|voter".into(),
        };
        let sample = probe.run(client.as_ref(), &ctx()).await.unwrap();
        assert_eq!(sample.fact("source"), Some("blog"));
    }

    #[tokio::test]
    async fn apicall_rejects_bad_reference() {
        let client = Scripted::new(|_, _| Ok(Value::Null));
        let probe = ApiCallProbe {
            post: "no-permlink".into(),
        };
        let err = probe.run(client.as_ref(), &ctx()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Unexpected(_)));
        assert!(client.calls.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn block_diff_reports_gap() {
        let client = Scripted::new(|_, _| {
            Ok(json!({
                "head_block_number": 95_000_123,
                "last_irreversible_block_num": 95_000_104,
                "time": "2024-05-01T10:00:00",
            }))
        });
        let sample = BlockDiffProbe.run(client.as_ref(), &ctx()).await.unwrap();
        assert_eq!(sample.fact("irreversible_gap"), Some("19"));
        assert!(sample.fact("head_delay_secs").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_calls() {
        let client = Scripted::new(|_, _| Err(ProbeError::Connection("reset".into())));
        let err = BlockDiffProbe.run(client.as_ref(), &ctx()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
        assert_eq!(client.calls.lock().await.len(), 2);
    }
}
