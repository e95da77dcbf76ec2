//! Scoring, classification and ranking of node results.
//!
//! `score = 100 * success_rate * R / (R + mean_latency)` where `R` is the
//! latency reference. A node that passed nothing scores zero. The score
//! grows with the success rate at fixed latency and shrinks as latency grows
//! at a fixed success rate.

use std::{cmp::Ordering, collections::BTreeMap, time::Duration};

use crate::{
    ErrorCategory, NodeRecord, NodeResult, NodeStatus, ProbeFailure, ProbeResult, RunConfig,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoringPolicy {
    pub min_success_rate: f64,
    pub latency_reference: Duration,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for ScoringPolicy {
    fn from(config: &RunConfig) -> Self {
        Self {
            min_success_rate: config.min_success_rate,
            latency_reference: config.latency_reference,
        }
    }
}

/// Derived figures for one node result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Assessment {
    pub status: NodeStatus,
    pub score: f64,
    pub success_rate: f64,
    pub mean_latency: Option<Duration>,
}

impl ScoringPolicy {
    #[must_use]
    pub fn evaluate(&self, result: &NodeResult) -> Assessment {
        let success_rate = result.success_rate();
        let mean_latency = result.mean_latency();
        let score = mean_latency.map_or(0.0, |latency| self.score(success_rate, latency));
        let connected = result.connection.is_established();
        let status = if connected && success_rate >= self.min_success_rate {
            NodeStatus::Working
        } else {
            NodeStatus::Failing
        };
        Assessment {
            status,
            score,
            success_rate,
            mean_latency,
        }
    }

    #[must_use]
    pub fn score(&self, success_rate: f64, mean_latency: Duration) -> f64 {
        let reference = self.latency_reference.as_secs_f64();
        100.0 * success_rate * reference / (reference + mean_latency.as_secs_f64())
    }

    /// Turns a raw node result into an unranked record.
    #[must_use]
    pub fn assess(&self, result: NodeResult) -> NodeRecord {
        let assessment = self.evaluate(&result);
        let version = result.version();
        let error = match assessment.status {
            NodeStatus::Working => None,
            NodeStatus::Failing => Some(self.failure_reason(&result, assessment.success_rate)),
        };
        NodeRecord {
            node: result.node,
            status: assessment.status,
            score: assessment.score,
            rank: None,
            version,
            error,
            connection: result.connection,
            probes: result.probes,
        }
    }

    fn failure_reason(&self, result: &NodeResult, success_rate: f64) -> ProbeFailure {
        if let Some(failure) = result.connection.failure() {
            return failure.clone();
        }
        let first = result.probes.iter().find_map(ProbeResult::failure);
        let category = first.map_or(ErrorCategory::Unexpected, |failure| failure.category);
        let detail = first.map_or_else(
            || String::from("no probe ran"),
            |failure| failure.error.clone(),
        );
        ProbeFailure::new(
            category,
            format!(
                "success rate {success_rate:.2} below {:.2}: {detail}",
                self.min_success_rate
            ),
        )
    }
}

/// Orders working records by score, best first, with the node URL breaking
/// ties.
fn by_score(a: &NodeRecord, b: &NodeRecord) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.node.cmp(&b.node))
}

/// Assigns 1-based ranks to working records and clears them on failing ones.
/// The outcome depends only on the set of records, not on their order.
pub fn rank(records: &mut [NodeRecord]) {
    let mut working: Vec<usize> = (0..records.len())
        .filter(|&index| records[index].is_working())
        .collect();
    working.sort_by(|&a, &b| by_score(&records[a], &records[b]));
    for record in records.iter_mut() {
        record.rank = None;
    }
    for (position, index) in working.into_iter().enumerate() {
        records[index].rank = Some(position as u32 + 1);
    }
}

/// Ranks working nodes per probe by duration, fastest first, among the nodes
/// that passed the probe.
pub fn rank_probes(records: &mut [NodeRecord]) {
    let mut timings: BTreeMap<String, Vec<(Duration, usize, usize)>> = BTreeMap::new();
    for (index, record) in records.iter_mut().enumerate() {
        for (slot, probe) in record.probes.iter_mut().enumerate() {
            probe.rank = None;
            if !record.status.is_working() {
                continue;
            }
            if let Some(duration) = probe.duration() {
                timings
                    .entry(probe.probe.clone())
                    .or_default()
                    .push((duration, index, slot));
            }
        }
    }
    for mut entries in timings.into_values() {
        entries.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| records[a.1].node.cmp(&records[b.1].node))
        });
        for (position, (_, index, slot)) in entries.into_iter().enumerate() {
            records[index].probes[slot].rank = Some(position as u32 + 1);
        }
    }
}
