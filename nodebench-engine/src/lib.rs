//! Runs probe sets against API nodes and assembles benchmark runs.

pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod orchestrator;
pub mod probes;
pub mod runner;

pub use client::{Connector, Handshake, NodeClient};
pub use error::ProbeError;
pub use jsonrpc::{JsonRpcClient, JsonRpcConnector};
pub use orchestrator::{Orchestrator, Scheduler, Sequential, WorkerPool};
pub use probes::{Domain, Probe, ProbeContext, ProbeSet, ProbeSettings};
pub use runner::NodeRunner;
