//! Serialized shape of the stored rows.

use std::{collections::BTreeMap, time::Duration};

use nodebench_core::{
    Connection, ErrorCategory, NodeRecord, NodeStatus, NodeUrl, ProbeFailure, ProbeOutcome,
    ProbeResult, ProbeSample, RunConfig, RunId,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id: RunId,
    pub domain: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub config: RunConfig,
    pub probes: Vec<String>,
    pub node_count: u32,
    pub working_count: u32,
    pub failing_count: u32,
}

/// A node as first seen by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRow {
    pub node_id: u64,
    pub url: NodeUrl,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    pub node_id: u64,
    pub status: NodeStatus,
    pub score: f64,
    pub rank: Option<u32>,
    pub version: Option<String>,
    pub error: Option<ProbeFailure>,
    pub connection: Connection,
}

impl StatusRow {
    pub fn from_record(node_id: u64, record: &NodeRecord) -> Self {
        Self {
            node_id,
            status: record.status,
            score: record.score,
            rank: record.rank,
            version: record.version.clone(),
            error: record.error.clone(),
            connection: record.connection.clone(),
        }
    }

    pub fn into_record(self, node: NodeUrl, probes: Vec<ProbeResult>) -> NodeRecord {
        NodeRecord {
            node,
            status: self.status,
            score: self.score,
            rank: self.rank,
            version: self.version,
            error: self.error,
            connection: self.connection,
            probes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRow {
    pub node_id: u64,
    pub probe: String,
    pub success: bool,
    /// Reported duration: per item for streaming probes.
    pub duration_us: Option<u64>,
    pub elapsed_us: Option<u64>,
    pub error_category: Option<ErrorCategory>,
    pub error: Option<String>,
    pub items: Option<u64>,
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    pub rank: Option<u32>,
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl ProbeRow {
    pub fn from_result(node_id: u64, result: &ProbeResult) -> Self {
        let mut row = Self {
            node_id,
            probe: result.probe.clone(),
            success: result.is_success(),
            duration_us: result.duration().map(micros),
            elapsed_us: None,
            error_category: result.error_category(),
            error: None,
            items: None,
            facts: BTreeMap::new(),
            rank: result.rank,
        };
        match &result.outcome {
            ProbeOutcome::Passed(sample) => {
                row.elapsed_us = Some(micros(sample.elapsed()));
                row.items = sample.items;
                row.facts.clone_from(&sample.facts);
            }
            ProbeOutcome::Failed(failure) => row.error = Some(failure.error.clone()),
        }
        row
    }

    pub fn into_result(self) -> Option<ProbeResult> {
        let outcome = if self.success {
            let mut sample = ProbeSample::timed(Duration::from_micros(self.elapsed_us?));
            sample.items = self.items;
            sample.facts = self.facts;
            ProbeOutcome::Passed(sample)
        } else {
            ProbeOutcome::Failed(ProbeFailure::new(
                self.error_category?,
                self.error.unwrap_or_default(),
            ))
        };
        Some(ProbeResult {
            probe: self.probe,
            outcome,
            rank: self.rank,
        })
    }
}
