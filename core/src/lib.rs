//! CRD ledger node: a small proof-of-work chain of typed asset
//! messages with bounded reorganization and gossip + pull replication.

pub mod asset;
pub mod blockchain;
pub mod crypto;
pub mod error;
pub mod events;
pub mod ledger;
pub mod mempool;
pub mod message;
pub mod miner;
pub mod node;
pub mod p2p;
pub mod rpc;
pub mod storage;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
