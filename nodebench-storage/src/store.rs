use std::collections::HashMap;

use bytes::Bytes;
use nodebench_core::{BenchmarkRun, NodeUrl, RunId};
use serde::{de::DeserializeOwned, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    backends::StorageBackend,
    keys,
    rows::{NodeRow, ProbeRow, RunRow, StatusRow},
    StoreError,
};

/// Append-only record of benchmark runs.
///
/// Each run lands in a single backend batch, so readers never observe half a
/// run. Writers are serialized; readers do not wait on them.
pub struct HistoricalStore<B> {
    backend: B,
    writer: Mutex<()>,
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, StoreError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(raw)?)
}

impl<B: StorageBackend> HistoricalStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            writer: Mutex::new(()),
        }
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Appends `run`. Recording a run id twice is an error; nothing is merged.
    pub async fn record_run(&self, run: &BenchmarkRun) -> Result<(), StoreError> {
        let _guard = self.writer.lock().await;

        let run_key = keys::run(run.run_id);
        if self.get(&run_key).await?.is_some() {
            return Err(StoreError::DuplicateRun(run.run_id));
        }

        let mut batch = Vec::new();
        let mut next_node_id: u64 = match self.get(keys::NEXT_NODE_ID).await? {
            Some(raw) => decode(&raw)?,
            None => 0,
        };
        let mut new_nodes = 0;

        for (position, record) in run.records.iter().enumerate() {
            let position = u32::try_from(position)
                .map_err(|_| StoreError::Corrupted("too many nodes in one run".to_owned()))?;
            let node_id = match self.node(&record.node).await? {
                Some(row) => row.node_id,
                None => {
                    let row = NodeRow {
                        node_id: next_node_id,
                        url: record.node.clone(),
                        first_seen: run.started_at,
                    };
                    next_node_id += 1;
                    new_nodes += 1;
                    let encoded = encode(&row)?;
                    batch.push((keys::node_by_url(&record.node), encoded.clone()));
                    batch.push((keys::node_by_id(row.node_id), encoded));
                    row.node_id
                }
            };

            batch.push((
                keys::status(run.run_id, position),
                encode(&StatusRow::from_record(node_id, record))?,
            ));
            for (seq, probe) in record.probes.iter().enumerate() {
                let seq = u32::try_from(seq)
                    .map_err(|_| StoreError::Corrupted("too many probes".to_owned()))?;
                batch.push((
                    keys::probe(run.run_id, position, seq),
                    encode(&ProbeRow::from_result(node_id, probe))?,
                ));
            }
        }

        if new_nodes > 0 {
            batch.push((Bytes::from_static(keys::NEXT_NODE_ID), encode(&next_node_id)?));
        }
        let row = RunRow {
            run_id: run.run_id,
            domain: run.domain.clone(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            config: run.config.clone(),
            probes: run.probes.clone(),
            node_count: count(run.records.len()),
            working_count: count(run.working_count()),
            failing_count: count(run.failing_count()),
        };
        batch.push((run_key, encode(&row)?));

        let writes = batch.len();
        self.backend
            .write_batch(batch)
            .await
            .map_err(StoreError::backend)?;
        info!(run_id = %run.run_id, writes, new_nodes, "benchmark run recorded");
        Ok(())
    }

    /// Runs that started within `[start, end]`, oldest first. An empty or
    /// inverted window yields no runs.
    pub async fn query_window(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<BenchmarkRun>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        let from = RunId::from_time(start).to_be_bytes();
        let until = RunId::from_time(end).as_millis().saturating_add(1).to_be_bytes();
        let rows = self
            .backend
            .scan_prefix_range(keys::RUNS, &from, Some(until.as_slice()))
            .await
            .map_err(StoreError::backend)?;

        let mut nodes = HashMap::new();
        let mut runs = Vec::with_capacity(rows.len());
        for (_, raw) in rows {
            let row: RunRow = decode(&raw)?;
            if row.started_at < start || row.started_at > end {
                continue;
            }
            runs.push(self.assemble(row, &mut nodes).await?);
        }
        debug!(%start, %end, runs = runs.len(), "history window read");
        Ok(runs)
    }

    pub async fn latest_run(&self) -> Result<Option<BenchmarkRun>, StoreError> {
        let rows = self
            .backend
            .scan_prefix(keys::RUNS)
            .await
            .map_err(StoreError::backend)?;
        let Some((_, raw)) = rows.last() else {
            return Ok(None);
        };
        let row: RunRow = decode(raw)?;
        Ok(Some(self.assemble(row, &mut HashMap::new()).await?))
    }

    /// Every node ever recorded, in first-seen order.
    pub async fn known_nodes(&self) -> Result<Vec<NodeRow>, StoreError> {
        self.backend
            .scan_prefix(keys::NODES_BY_ID)
            .await
            .map_err(StoreError::backend)?
            .iter()
            .map(|(_, raw)| decode(raw))
            .collect()
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.backend.get(key).await.map_err(StoreError::backend)
    }

    async fn node(&self, url: &NodeUrl) -> Result<Option<NodeRow>, StoreError> {
        self.get(&keys::node_by_url(url))
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    async fn node_url(
        &self,
        node_id: u64,
        cache: &mut HashMap<u64, NodeUrl>,
    ) -> Result<NodeUrl, StoreError> {
        if let Some(url) = cache.get(&node_id) {
            return Ok(url.clone());
        }
        let raw = self
            .get(&keys::node_by_id(node_id))
            .await?
            .ok_or_else(|| StoreError::Corrupted(format!("unknown node id {node_id}")))?;
        let row: NodeRow = decode(&raw)?;
        cache.insert(node_id, row.url.clone());
        Ok(row.url)
    }

    async fn assemble(
        &self,
        row: RunRow,
        nodes: &mut HashMap<u64, NodeUrl>,
    ) -> Result<BenchmarkRun, StoreError> {
        let statuses = self
            .backend
            .scan_prefix(&keys::status_prefix(row.run_id))
            .await
            .map_err(StoreError::backend)?;

        let mut records = Vec::with_capacity(statuses.len());
        for (position, (_, raw)) in statuses.iter().enumerate() {
            let status: StatusRow = decode(raw)?;
            let node = self.node_url(status.node_id, nodes).await?;
            let position = count(position);
            let probes = self
                .backend
                .scan_prefix(&keys::probes_prefix(row.run_id, position))
                .await
                .map_err(StoreError::backend)?
                .iter()
                .map(|(_, raw)| {
                    decode::<ProbeRow>(raw)?.into_result().ok_or_else(|| {
                        StoreError::Corrupted(format!("incomplete probe row in run {}", row.run_id))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            records.push(status.into_record(node, probes));
        }

        if records.len() != row.node_count as usize {
            return Err(StoreError::Corrupted(format!(
                "run {} lists {} nodes but has {} status rows",
                row.run_id,
                row.node_count,
                records.len()
            )));
        }

        Ok(BenchmarkRun {
            run_id: row.run_id,
            domain: row.domain,
            started_at: row.started_at,
            finished_at: row.finished_at,
            config: row.config,
            probes: row.probes,
            records,
        })
    }
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
