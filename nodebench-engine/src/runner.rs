use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::{future::join_all, FutureExt as _};
use nodebench_core::{
    Connection, ErrorCategory, NodeResult, NodeUrl, ProbeFailure, ProbeResult, RunConfig,
};
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument};

use crate::{
    client::{Connector, NodeClient},
    probes::{Probe, ProbeContext, ProbeSet},
    ProbeError,
};

/// Runs the whole probe set against one node.
///
/// A runner never gives up on a node because a probe failed: only a failed
/// connection handshake skips the probes. Every connection attempt is bounded
/// by the configured timeout and every probe by the probe budget, so a run
/// finishes within [`RunConfig::node_deadline`].
pub struct NodeRunner {
    connector: Arc<dyn Connector>,
    probes: Arc<ProbeSet>,
    config: RunConfig,
}

impl NodeRunner {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, probes: Arc<ProbeSet>, config: RunConfig) -> Self {
        Self {
            connector,
            probes,
            config,
        }
    }

    #[must_use]
    pub fn probes(&self) -> &ProbeSet {
        &self.probes
    }

    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.config.node_deadline(self.probes.len())
    }

    #[instrument(level = "debug", skip(self, node), fields(node = %node))]
    pub async fn run(&self, node: NodeUrl) -> NodeResult {
        let (client, connection) = match self.connect(&node).await {
            Ok(connected) => connected,
            Err(unreachable) => return unreachable,
        };

        let probes = if self.config.concurrent_probes {
            join_all(
                self.probes
                    .iter()
                    .map(|probe| self.run_probe(probe.as_ref(), client.as_ref())),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(self.probes.len());
            for probe in self.probes.iter() {
                results.push(self.run_probe(probe.as_ref(), client.as_ref()).await);
            }
            results
        };

        NodeResult {
            node,
            connection,
            probes,
        }
    }

    async fn connect(
        &self,
        node: &NodeUrl,
    ) -> Result<(Arc<dyn NodeClient>, Connection), NodeResult> {
        let limit = self.config.timeout;
        let connector = &self.connector;
        let (outcome, attempts) = self
            .config
            .connect_policy()
            .run(move || async move {
                let started = Instant::now();
                match timeout(limit, connector.connect(node, limit)).await {
                    Ok(Ok(client)) => Ok((client, started.elapsed())),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(ProbeError::Timeout(limit)),
                }
            })
            .await;

        match outcome {
            Ok((client, elapsed)) => {
                debug!(attempts, ?elapsed, "connected");
                Ok((client, Connection::established(elapsed, attempts)))
            }
            Err(err) => {
                debug!(attempts, error = %err, "unreachable");
                Err(NodeResult::unreachable(node.clone(), err.into(), attempts))
            }
        }
    }

    async fn run_probe(&self, probe: &dyn Probe, client: &dyn NodeClient) -> ProbeResult {
        let budget = self.config.probe_budget;
        let ctx = ProbeContext::new(budget, self.config.call_policy());
        let guarded = AssertUnwindSafe(probe.run(client, &ctx)).catch_unwind();
        let result = match timeout(budget, guarded).await {
            Ok(Ok(Ok(sample))) => ProbeResult::passed(probe.name(), sample),
            Ok(Ok(Err(err))) => ProbeResult::failed(probe.name(), err.into()),
            Ok(Err(panic)) => ProbeResult::failed(
                probe.name(),
                ProbeFailure::new(
                    ErrorCategory::Unexpected,
                    format!("probe panicked: {}", panic_message(panic)),
                ),
            ),
            Err(_) => ProbeResult::failed(probe.name(), ProbeFailure::timeout(budget)),
        };
        debug!(
            probe = probe.name(),
            success = result.is_success(),
            duration = ?result.duration(),
            "probe finished"
        );
        result
    }
}

/// Attempts to turn a panic payload into a readable string for diagnostics.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}
