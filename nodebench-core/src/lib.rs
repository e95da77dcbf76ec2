//! Shared vocabulary of the benchmark: what a node is, what a probe reports,
//! how a node is scored, and how a finished run is laid out.

pub mod error;
pub mod node;
pub mod probe;
pub mod result;
pub mod retry;
pub mod run;
pub mod scoring;

pub use error::ConfigError;
pub use node::NodeUrl;
pub use probe::{ErrorCategory, ProbeFailure, ProbeOutcome, ProbeResult, ProbeSample};
pub use result::{Connection, NodeRecord, NodeResult, NodeStatus};
pub use retry::{Backoff, RetryPolicy};
pub use run::{BenchmarkRun, FailingNode, RunConfig, RunId, RunParameters, RunReport, Scheduling};
pub use scoring::{Assessment, ScoringPolicy};
