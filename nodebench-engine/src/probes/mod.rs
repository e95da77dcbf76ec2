//! Probe sets: the named, ordered checks run against every node.

pub mod engine;
pub mod hive;

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use nodebench_core::{ProbeSample, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    client::{Handshake, NodeClient},
    ProbeError,
};

/// Share of the probe budget a streaming probe may spend fetching items.
const STREAM_WINDOW: f64 = 0.8;

/// One timed capability check against a connected node.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        client: &dyn NodeClient,
        ctx: &ProbeContext,
    ) -> Result<ProbeSample, ProbeError>;
}

/// Per-probe execution context handed out by the node runner.
#[derive(Clone, Debug)]
pub struct ProbeContext {
    started: Instant,
    budget: Duration,
    call_policy: RetryPolicy,
}

impl ProbeContext {
    #[must_use]
    pub fn new(budget: Duration, call_policy: RetryPolicy) -> Self {
        Self {
            started: Instant::now(),
            budget,
            call_policy,
        }
    }

    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Point after which streaming probes stop fetching, leaving headroom
    /// before the hard per-probe timeout.
    #[must_use]
    pub fn stream_deadline(&self) -> Instant {
        self.started + self.budget.mul_f64(STREAM_WINDOW)
    }

    #[must_use]
    pub fn stream_open(&self) -> bool {
        Instant::now() < self.stream_deadline()
    }

    /// One logical call, retried according to the call retry policy.
    pub async fn call(
        &self,
        client: &dyn NodeClient,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, ProbeError> {
        let (result, attempts) = self
            .call_policy
            .run(|| client.call(endpoint, method, params.clone()))
            .await;
        if attempts > 1 {
            tracing::trace!(node = %client.node(), method, attempts, "call needed retries");
        }
        result
    }
}

/// A named, ordered collection of probes plus the handshake used to connect.
pub struct ProbeSet {
    domain: Domain,
    handshake: Handshake,
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeSet {
    #[must_use]
    pub const fn new(domain: Domain, handshake: Handshake) -> Self {
        Self {
            domain,
            handshake,
            probes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probes.push(Arc::new(probe));
        self
    }

    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Probe>> {
        self.probes.iter()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.probes
            .iter()
            .map(|probe| probe.name().to_owned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

/// Family of nodes being benchmarked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    #[default]
    Hive,
    Engine,
}

impl Domain {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hive => "hive",
            Self::Engine => "engine",
        }
    }

    #[must_use]
    pub fn probe_set(self, settings: &ProbeSettings) -> ProbeSet {
        match self {
            Self::Hive => hive::probe_set(settings),
            Self::Engine => engine::probe_set(settings),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hive" => Ok(Self::Hive),
            "engine" | "hive-engine" => Ok(Self::Engine),
            other => Err(format!("unknown domain `{other}`")),
        }
    }
}

/// Accounts and objects the probes look up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Account whose history is read.
    pub account: String,
    /// Post fetched by the hive api call probe, as `author/permlink`.
    pub post: String,
    pub token: String,
    pub contract: String,
    pub latency_samples: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            account: "thecrazygm".to_owned(),
            post: "thecrazygm/still-lazy".to_owned(),
            token: "SWAP.HIVE".to_owned(),
            contract: "tokens".to_owned(),
            latency_samples: 5,
        }
    }
}

/// Counts items fetched by a streaming probe until its window closes.
pub(crate) struct Stream {
    started: Instant,
    items: u64,
}

impl Stream {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            items: 0,
        }
    }

    pub(crate) fn add(&mut self, items: u64) {
        self.items += items;
    }

    /// A stream that fetched something is a success even if it was cut short
    /// by an error; one that fetched nothing reports why.
    pub(crate) fn finish(
        self,
        ctx: &ProbeContext,
        error: Option<ProbeError>,
    ) -> Result<ProbeSample, ProbeError> {
        if self.items == 0 {
            return Err(error.unwrap_or(ProbeError::Timeout(ctx.budget())));
        }
        if let Some(error) = error {
            tracing::debug!(%error, items = self.items, "stream cut short");
        }
        Ok(ProbeSample::timed(self.started.elapsed()).with_items(self.items))
    }
}

pub(crate) fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value, ProbeError> {
    value
        .get(key)
        .ok_or_else(|| ProbeError::malformed(format!("missing `{key}`")))
}

pub(crate) fn u64_field(value: &Value, key: &str) -> Result<u64, ProbeError> {
    field(value, key)?
        .as_u64()
        .ok_or_else(|| ProbeError::malformed(format!("`{key}` is not an unsigned integer")))
}
