use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMicroSeconds};

use crate::{
    probe::truncate_to_micros, ErrorCategory, NodeUrl, ProbeFailure, ProbeResult,
};

/// How the initial connection to a node went.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Connection {
    Established {
        #[serde_as(as = "DurationMicroSeconds<u64>")]
        #[serde(rename = "elapsed_us")]
        elapsed: Duration,
        attempts: u32,
    },
    Failed {
        failure: ProbeFailure,
        attempts: u32,
    },
}

impl Connection {
    #[must_use]
    pub fn established(elapsed: Duration, attempts: u32) -> Self {
        Self::Established {
            elapsed: truncate_to_micros(elapsed),
            attempts,
        }
    }

    #[must_use]
    pub const fn failed(failure: ProbeFailure, attempts: u32) -> Self {
        Self::Failed { failure, attempts }
    }

    #[must_use]
    pub const fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            Self::Established { .. } => None,
            Self::Failed { failure, .. } => Some(failure),
        }
    }
}

/// Raw outcome of running the probe set against one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node: NodeUrl,
    pub connection: Connection,
    pub probes: Vec<ProbeResult>,
}

impl NodeResult {
    /// Result for a node that never answered the connection handshake. No
    /// probes are attempted against such a node.
    #[must_use]
    pub const fn unreachable(node: NodeUrl, failure: ProbeFailure, attempts: u32) -> Self {
        Self {
            node,
            connection: Connection::failed(failure, attempts),
            probes: Vec::new(),
        }
    }

    /// Result for a node whose runner blew up before it could report.
    #[must_use]
    pub fn crashed(node: NodeUrl, reason: impl Into<String>) -> Self {
        Self::unreachable(
            node,
            ProbeFailure::new(ErrorCategory::Unexpected, reason),
            0,
        )
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.probes.iter().filter(|probe| probe.is_success()).count()
    }

    /// Share of probes that passed, `0.0` when no probe ran.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.probes.is_empty() {
            return 0.0;
        }
        self.passed_count() as f64 / self.probes.len() as f64
    }

    /// Mean latency over the probes that passed.
    #[must_use]
    pub fn mean_latency(&self) -> Option<Duration> {
        let durations: Vec<Duration> = self
            .probes
            .iter()
            .filter_map(ProbeResult::duration)
            .collect();
        if durations.is_empty() {
            return None;
        }
        let total: Duration = durations.iter().sum();
        Some(total / durations.len() as u32)
    }

    /// Version string reported by whichever probe exposes one.
    #[must_use]
    pub fn version(&self) -> Option<String> {
        self.probes
            .iter()
            .filter_map(ProbeResult::sample)
            .find_map(|sample| sample.fact("version"))
            .map(str::to_owned)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Working,
    Failing,
}

impl NodeStatus {
    #[must_use]
    pub const fn is_working(self) -> bool {
        matches!(self, Self::Working)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Working => "working",
            Self::Failing => "failing",
        })
    }
}

/// A node's result once it has been scored and classified.
///
/// Only [`crate::ScoringPolicy::assess`] builds these, so status and score
/// always agree with the probe results they were derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: NodeUrl,
    pub status: NodeStatus,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// First failure that explains a failing status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeFailure>,
    pub connection: Connection,
    pub probes: Vec<ProbeResult>,
}

impl NodeRecord {
    #[must_use]
    pub const fn is_working(&self) -> bool {
        self.status.is_working()
    }

    #[must_use]
    pub fn probe(&self, name: &str) -> Option<&ProbeResult> {
        self.probes.iter().find(|probe| probe.probe == name)
    }
}
