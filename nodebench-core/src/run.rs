use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use time::OffsetDateTime;

use crate::{ConfigError, ErrorCategory, NodeRecord, NodeUrl, RetryPolicy};

/// Identifier of a benchmark run: milliseconds since the Unix epoch at which
/// the run started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    #[must_use]
    pub fn from_time(started_at: OffsetDateTime) -> Self {
        let millis = started_at.unix_timestamp_nanos() / 1_000_000;
        Self(u64::try_from(millis).unwrap_or_default())
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How node runners are fanned out over the node list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Scheduling {
    Concurrent { max_workers: usize },
    Sequential,
}

impl Default for Scheduling {
    fn default() -> Self {
        Self::Concurrent { max_workers: 8 }
    }
}

/// Configuration snapshot a run was executed with.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Time budget of a single probe.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "probe_budget_ms")]
    pub probe_budget: Duration,
    pub call_retries: u32,
    pub connect_retries: u32,
    /// Bound on a single connection attempt and on a single call.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
    pub scheduling: Scheduling,
    pub concurrent_probes: bool,
    pub min_success_rate: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "latency_reference_ms")]
    pub latency_reference: Duration,
    #[serde(default)]
    pub retry_backoff: crate::Backoff,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            probe_budget: Duration::from_secs(30),
            call_retries: 3,
            connect_retries: 3,
            timeout: Duration::from_secs(30),
            scheduling: Scheduling::default(),
            concurrent_probes: false,
            min_success_rate: 0.5,
            latency_reference: Duration::from_millis(500),
            retry_backoff: crate::Backoff::None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("probe_budget", self.probe_budget),
            ("timeout", self.timeout),
            ("latency_reference", self.latency_reference),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { name, value });
            }
            if value.subsec_nanos() % 1_000_000 != 0 {
                return Err(ConfigError::SubMillisecond { name, value });
            }
        }
        if !(0.0..=1.0).contains(&self.min_success_rate) {
            return Err(ConfigError::InvalidSuccessRate(self.min_success_rate));
        }
        if matches!(self.scheduling, Scheduling::Concurrent { max_workers: 0 }) {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    #[must_use]
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::retries(self.connect_retries).with_backoff(self.retry_backoff)
    }

    #[must_use]
    pub fn call_policy(&self) -> RetryPolicy {
        RetryPolicy::retries(self.call_retries).with_backoff(self.retry_backoff)
    }

    /// Longest a single node runner may take with this configuration.
    #[must_use]
    pub fn node_deadline(&self, probe_count: usize) -> Duration {
        let connect = self.connect_policy();
        let connecting = self
            .timeout
            .saturating_mul(connect.max_attempts())
            .saturating_add(connect.max_total_delay());
        let probing = self
            .probe_budget
            .saturating_mul(u32::try_from(probe_count).unwrap_or(u32::MAX));
        connecting.saturating_add(probing)
    }
}

/// A sealed benchmark run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub run_id: RunId,
    /// Probe domain the run exercised, `hive` or `engine` for instance.
    pub domain: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub config: RunConfig,
    /// Probe names in execution order.
    pub probes: Vec<String>,
    /// One record per node, in input order.
    pub records: Vec<NodeRecord>,
}

impl BenchmarkRun {
    /// Working nodes, best first.
    #[must_use]
    pub fn ranking(&self) -> Vec<&NodeRecord> {
        let mut ranked: Vec<&NodeRecord> = self
            .records
            .iter()
            .filter(|record| record.rank.is_some())
            .collect();
        ranked.sort_by_key(|record| record.rank);
        ranked
    }

    #[must_use]
    pub fn failing(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.iter().filter(|record| !record.is_working())
    }

    #[must_use]
    pub fn working_count(&self) -> usize {
        self.records.iter().filter(|record| record.is_working()).count()
    }

    #[must_use]
    pub fn failing_count(&self) -> usize {
        self.records.len() - self.working_count()
    }

    #[must_use]
    pub fn record(&self, node: &NodeUrl) -> Option<&NodeRecord> {
        self.records.iter().find(|record| &record.node == node)
    }

    #[must_use]
    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            domain: self.domain.clone(),
            nodes: self
                .ranking()
                .into_iter()
                .map(|record| record.node.clone())
                .collect(),
            failing_nodes: self.failing().map(FailingNode::from_record).collect(),
            report: self.records.clone(),
            parameter: RunParameters {
                config: self.config.clone(),
                started_at: self.started_at,
                finished_at: self.finished_at,
                probes: self.probes.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailingNode {
    pub url: NodeUrl,
    pub category: ErrorCategory,
    pub error: String,
}

impl FailingNode {
    fn from_record(record: &NodeRecord) -> Self {
        let (category, error) = record.error.as_ref().map_or_else(
            || (ErrorCategory::Unexpected, String::from("unknown failure")),
            |failure| (failure.category, failure.error.clone()),
        );
        Self {
            url: record.node.clone(),
            category,
            error,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub config: RunConfig,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub probes: Vec<String>,
}

/// Single-run report consumed by summary printers and metadata updaters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub domain: String,
    /// Working nodes in rank order.
    pub nodes: Vec<NodeUrl>,
    pub failing_nodes: Vec<FailingNode>,
    pub report: Vec<NodeRecord>,
    pub parameter: RunParameters,
}
