use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMicroSeconds};

/// Coarse reason a probe or a connection attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    Timeout,
    Protocol,
    Unexpected,
}

impl ErrorCategory {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Measurement returned by a probe that completed.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeSample {
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    #[serde(rename = "elapsed_us")]
    elapsed: Duration,
    /// Number of items fetched within the probe window, for throughput probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facts: BTreeMap<String, String>,
}

impl ProbeSample {
    /// Durations are kept with microsecond precision so they survive storage
    /// unchanged.
    #[must_use]
    pub fn timed(elapsed: Duration) -> Self {
        Self {
            elapsed: truncate_to_micros(elapsed),
            items: None,
            facts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn with_items(mut self, items: u64) -> Self {
        self.items = Some(items);
        self
    }

    #[must_use]
    pub fn with_fact(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.facts.insert(key.into(), value.to_string());
        self
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Latency attributed to the probe: the per-item mean for throughput
    /// probes, the whole elapsed time otherwise.
    #[must_use]
    pub fn latency(&self) -> Duration {
        match self.items {
            Some(items) if items > 0 => {
                let micros = u64::try_from(self.elapsed.as_micros()).unwrap_or(u64::MAX);
                Duration::from_micros(micros / items)
            }
            _ => self.elapsed,
        }
    }

    #[must_use]
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub category: ErrorCategory,
    pub error: String,
}

impl ProbeFailure {
    #[must_use]
    pub fn new(category: ErrorCategory, error: impl Into<String>) -> Self {
        Self {
            category,
            error: error.into(),
        }
    }

    #[must_use]
    pub fn timeout(budget: Duration) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            format!("no answer within {budget:?}"),
        )
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.error)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Passed(ProbeSample),
    Failed(ProbeFailure),
}

/// Outcome of one probe against one node within one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe: String,
    pub outcome: ProbeOutcome,
    /// Position of the node among the working nodes that passed this probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

impl ProbeResult {
    #[must_use]
    pub fn passed(probe: impl Into<String>, sample: ProbeSample) -> Self {
        Self {
            probe: probe.into(),
            outcome: ProbeOutcome::Passed(sample),
            rank: None,
        }
    }

    #[must_use]
    pub fn failed(probe: impl Into<String>, failure: ProbeFailure) -> Self {
        Self {
            probe: probe.into(),
            outcome: ProbeOutcome::Failed(failure),
            rank: None,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Passed(_))
    }

    /// `None` for failed and timed out probes.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match &self.outcome {
            ProbeOutcome::Passed(sample) => Some(sample.latency()),
            ProbeOutcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn sample(&self) -> Option<&ProbeSample> {
        match &self.outcome {
            ProbeOutcome::Passed(sample) => Some(sample),
            ProbeOutcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&ProbeFailure> {
        match &self.outcome {
            ProbeOutcome::Passed(_) => None,
            ProbeOutcome::Failed(failure) => Some(failure),
        }
    }

    #[must_use]
    pub fn error_category(&self) -> Option<ErrorCategory> {
        self.failure().map(|failure| failure.category)
    }
}

pub(crate) fn truncate_to_micros(duration: Duration) -> Duration {
    Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_latency_is_per_item() {
        let sample = ProbeSample::timed(Duration::from_millis(1_000)).with_items(4);
        assert_eq!(sample.latency(), Duration::from_millis(250));
        assert_eq!(sample.elapsed(), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_items_fall_back_to_elapsed() {
        let sample = ProbeSample::timed(Duration::from_millis(30)).with_items(0);
        assert_eq!(sample.latency(), Duration::from_millis(30));
    }

    #[test]
    fn timed_out_probe_has_no_duration() {
        let result = ProbeResult::failed("block", ProbeFailure::timeout(Duration::from_secs(1)));
        assert_eq!(result.duration(), None);
        assert_eq!(result.error_category(), Some(ErrorCategory::Timeout));
        assert!(!result.is_success());
    }

    #[test]
    fn sample_keeps_microsecond_precision() {
        let sample = ProbeSample::timed(Duration::from_nanos(1_234_567));
        assert_eq!(sample.elapsed(), Duration::from_micros(1_234));
    }

    #[test]
    fn outcome_is_tagged_in_json() {
        let result = ProbeResult::passed(
            "config",
            ProbeSample::timed(Duration::from_micros(1_500)).with_fact("version", "1.27.5"),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["outcome"]["status"], "passed");
        assert_eq!(value["outcome"]["elapsed_us"], 1_500);
        assert_eq!(value["outcome"]["facts"]["version"], "1.27.5");
        let back: ProbeResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }
}
