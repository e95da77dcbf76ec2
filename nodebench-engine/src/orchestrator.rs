use std::{collections::HashSet, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt as _;
use nodebench_core::{
    scoring, BenchmarkRun, ConfigError, NodeRecord, NodeResult, NodeUrl, RunConfig, RunId,
    Scheduling, ScoringPolicy,
};
use time::OffsetDateTime;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::{client::Connector, probes::ProbeSet, runner::panic_message, NodeRunner};

/// Strategy for fanning the node runner out over a node list.
///
/// Implementations return exactly one result per input node, in input order,
/// whatever order the runners complete in.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn run_all(&self, runner: Arc<NodeRunner>, nodes: Vec<NodeUrl>) -> Vec<NodeResult>;
}

/// One node at a time, in input order.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sequential;

#[async_trait]
impl Scheduler for Sequential {
    async fn run_all(&self, runner: Arc<NodeRunner>, nodes: Vec<NodeUrl>) -> Vec<NodeResult> {
        let mut results = Vec::with_capacity(nodes.len());
        for node in nodes {
            results.push(run_guarded(&runner, node).await);
        }
        results
    }
}

/// Up to `max_workers` node runners at once, each on its own task. Every task
/// owns the slot of its node index and writes it exactly once.
#[derive(Clone, Copy, Debug)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }
}

#[async_trait]
impl Scheduler for WorkerPool {
    async fn run_all(&self, runner: Arc<NodeRunner>, nodes: Vec<NodeUrl>) -> Vec<NodeResult> {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        for (index, node) in nodes.iter().cloned().enumerate() {
            let runner = Arc::clone(&runner);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, run_guarded(&runner, node).await)
            });
        }

        let mut slots: Vec<Option<NodeResult>> = nodes.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => warn!(error = %err, "node runner task failed"),
            }
        }

        slots
            .into_iter()
            .zip(nodes)
            .map(|(slot, node)| {
                slot.unwrap_or_else(|| NodeResult::crashed(node, "node runner task did not finish"))
            })
            .collect()
    }
}

async fn run_guarded(runner: &NodeRunner, node: NodeUrl) -> NodeResult {
    AssertUnwindSafe(runner.run(node.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            NodeResult::crashed(
                node,
                format!("node runner panicked: {}", panic_message(panic)),
            )
        })
}

/// Drops repeated nodes, keeping the first occurrence.
pub fn unique_nodes(nodes: &[NodeUrl]) -> Result<Vec<NodeUrl>, ConfigError> {
    let mut seen = HashSet::new();
    let unique: Vec<NodeUrl> = nodes
        .iter()
        .filter(|node| seen.insert(*node))
        .cloned()
        .collect();
    if unique.is_empty() {
        return Err(ConfigError::EmptyNodeList);
    }
    Ok(unique)
}

/// Drives node runners over a node list and seals the outcome into a
/// [`BenchmarkRun`].
pub struct Orchestrator {
    runner: Arc<NodeRunner>,
    scheduler: Box<dyn Scheduler>,
    scoring: ScoringPolicy,
}

impl Orchestrator {
    /// Validates `config` and picks the scheduler it asks for.
    pub fn new(
        connector: Arc<dyn Connector>,
        probes: ProbeSet,
        config: RunConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler: Box<dyn Scheduler> = match config.scheduling {
            Scheduling::Concurrent { max_workers } => Box::new(WorkerPool::new(max_workers)),
            Scheduling::Sequential => Box::new(Sequential),
        };
        let scoring = ScoringPolicy::from(&config);
        Ok(Self {
            runner: Arc::new(NodeRunner::new(connector, Arc::new(probes), config)),
            scheduler,
            scoring,
        })
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        self.runner.config()
    }

    /// Benchmarks `nodes`. Per-node failures end up in the run; only an
    /// empty node list is an error.
    pub async fn run(&self, nodes: &[NodeUrl]) -> Result<BenchmarkRun, ConfigError> {
        let nodes = unique_nodes(nodes)?;
        let started_at = OffsetDateTime::now_utc();
        let run_id = RunId::from_time(started_at);
        info!(
            %run_id,
            domain = %self.runner.probes().domain(),
            nodes = nodes.len(),
            deadline = ?self.runner.deadline(),
            "benchmark run started"
        );

        let results = self
            .scheduler
            .run_all(Arc::clone(&self.runner), nodes)
            .await;
        let run = self.seal(started_at, OffsetDateTime::now_utc(), results);

        info!(
            %run_id,
            working = run.working_count(),
            failing = run.failing_count(),
            "benchmark run finished"
        );
        Ok(run)
    }

    /// Scores, classifies and ranks `results`. The ranking depends only on the
    /// set of results, not on their order.
    #[must_use]
    pub fn seal(
        &self,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
        results: Vec<NodeResult>,
    ) -> BenchmarkRun {
        let mut records: Vec<NodeRecord> = results
            .into_iter()
            .map(|result| self.scoring.assess(result))
            .collect();
        scoring::rank(&mut records);
        scoring::rank_probes(&mut records);
        BenchmarkRun {
            run_id: RunId::from_time(started_at),
            domain: self.runner.probes().domain().to_string(),
            started_at,
            finished_at,
            config: self.runner.config().clone(),
            probes: self.runner.probes().names(),
            records,
        }
    }
}
