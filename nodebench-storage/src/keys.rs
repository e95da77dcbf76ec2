//! Key layout. Numbers are big-endian so that key order is numeric order.
//!
//! ```text
//! runs/<run_id>                      run row
//! nodes/url/<url>                    node row
//! nodes/id/<node_id>                 node row
//! meta/next_node_id                  node id counter
//! status/<run_id>/<position>         node status row
//! probes/<run_id>/<position>/<seq>   probe result row
//! ```

use bytes::Bytes;
use nodebench_core::{NodeUrl, RunId};

pub const RUNS: &[u8] = b"runs/";
pub const NODES_BY_URL: &[u8] = b"nodes/url/";
pub const NODES_BY_ID: &[u8] = b"nodes/id/";
pub const NEXT_NODE_ID: &[u8] = b"meta/next_node_id";
const STATUS: &[u8] = b"status/";
const PROBES: &[u8] = b"probes/";

fn join(parts: &[&[u8]]) -> Bytes {
    Bytes::from(parts.concat())
}

#[must_use]
pub fn run(run_id: RunId) -> Bytes {
    join(&[RUNS, &run_id.to_be_bytes()])
}

#[must_use]
pub fn node_by_url(url: &NodeUrl) -> Bytes {
    join(&[NODES_BY_URL, url.as_str().as_bytes()])
}

#[must_use]
pub fn node_by_id(node_id: u64) -> Bytes {
    join(&[NODES_BY_ID, &node_id.to_be_bytes()])
}

#[must_use]
pub fn status_prefix(run_id: RunId) -> Bytes {
    join(&[STATUS, &run_id.to_be_bytes(), b"/"])
}

#[must_use]
pub fn status(run_id: RunId, position: u32) -> Bytes {
    join(&[&status_prefix(run_id), &position.to_be_bytes()])
}

#[must_use]
pub fn probes_prefix(run_id: RunId, position: u32) -> Bytes {
    join(&[PROBES, &run_id.to_be_bytes(), b"/", &position.to_be_bytes(), b"/"])
}

#[must_use]
pub fn probe(run_id: RunId, position: u32, seq: u32) -> Bytes {
    join(&[&probes_prefix(run_id, position), &seq.to_be_bytes()])
}

/// Recovers the run id from a key under [`RUNS`].
#[must_use]
pub fn run_id_of(key: &[u8]) -> Option<RunId> {
    let raw: [u8; 8] = key.strip_prefix(RUNS)?.try_into().ok()?;
    Some(RunId::from_be_bytes(raw))
}
