//! Cooperative PoW miner.
//!
//! Each round builds a candidate off the current tail (one coinbase
//! paying the miner plus whatever mempool messages still validate) and
//! grinds nonces for at most `HASH_WORK_TIME`, then yields so the tail
//! and mempool can refresh before the next slice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::asset::CRD;
use crate::blockchain::block::{Block, BLOCK_VERSION, ZERO_HASH};
use crate::blockchain::consensus::{self, HASH_WORK_TIME};
use crate::blockchain::validation;
use crate::crypto::{keys, sha256};
use crate::message::{Message, Payload, COINBASE_QUANTITY, MESSAGES_PER_BLOCK_MAX};
use crate::node::Node;

#[derive(Debug)]
pub enum MinerCommand {
    Start(String),
    Stop,
}

struct Candidate {
    prev_hash: String,
    height: u64,
    difficulty: f64,
    timestamp: u64,
    messages: Vec<Message>,
}

pub fn spawn(
    node: Node,
    mut rx: mpsc::UnboundedReceiver<MinerCommand>,
    mined: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut address: Option<String> = None;
        loop {
            // Drain control messages without blocking an active miner.
            loop {
                match rx.try_recv() {
                    Ok(MinerCommand::Start(a)) => address = Some(a),
                    Ok(MinerCommand::Stop) => address = None,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return,
                }
            }

            let miner_address = match &address {
                Some(a) => a.clone(),
                None => {
                    // Idle until told to start.
                    match rx.recv().await {
                        Some(MinerCommand::Start(a)) => {
                            address = Some(a);
                            continue;
                        }
                        Some(MinerCommand::Stop) => continue,
                        None => return,
                    }
                }
            };

            let candidate = build_candidate(&node, &miner_address).await;
            match mine_slice(&candidate) {
                Some(block) => {
                    match node.submit_block(block).await {
                        Ok(()) => {
                            mined.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if e.is_soft() => {}
                        Err(e) => log::warn!("mined block rejected: {e}"),
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }
    })
}

/// Assemble the next block candidate: a coinbase paying `address`, then
/// mempool messages that still validate against the confirmed view with
/// the already-selected messages as siblings.
async fn build_candidate(node: &Node, address: &str) -> Candidate {
    let chain = node.chain.lock().await;
    let tail_height = chain.tail_height();
    let db = chain.head_db();
    let now = crate::now_ms();

    let coinbase = Message::from_payload(
        &Payload::Coinbase {
            asset: CRD.to_string(),
            quantity: COINBASE_QUANTITY,
            address: address.to_string(),
            public_key: keys::null_public_key_hex().to_string(),
            start_height: tail_height + 1,
            timestamp: now,
        },
        &keys::null_signing_key(),
    );

    let mut messages = vec![coinbase];
    for pending in &chain.mempool.messages {
        if messages.len() >= MESSAGES_PER_BLOCK_MAX {
            break;
        }
        if validation::validate_message(&db, tail_height, None, pending, &messages).is_ok() {
            messages.push(pending.clone());
        }
    }

    let difficulty = consensus::required_difficulty(chain.blocks(), &messages);
    let median = consensus::median_timestamp(chain.blocks());
    Candidate {
        prev_hash: chain
            .tail()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| ZERO_HASH.to_string()),
        height: tail_height + 1,
        difficulty,
        timestamp: now.max(median.ceil() as u64),
        messages,
    }
}

/// Grind nonces over a fixed root for one `HASH_WORK_TIME` budget.
fn mine_slice(candidate: &Candidate) -> Option<Block> {
    let root = Block::hash_root(
        &candidate.prev_hash,
        candidate.height,
        candidate.difficulty,
        BLOCK_VERSION,
        candidate.timestamp,
        &candidate.messages,
    );

    // Fixed-width big-endian target for cheap byte comparison.
    let target = target_bytes(candidate.difficulty);
    let start = Instant::now();
    let budget = Duration::from_millis(HASH_WORK_TIME);
    let mut nonce = 0u32;
    loop {
        let mut data = [0u8; 36];
        data[..32].copy_from_slice(&root);
        data[32..].copy_from_slice(&nonce.to_le_bytes());
        let digest = sha256(&data);
        if digest <= target {
            return Some(Block {
                hash: hex::encode(digest),
                prev_hash: candidate.prev_hash.clone(),
                height: candidate.height,
                difficulty: candidate.difficulty,
                version: BLOCK_VERSION.to_string(),
                timestamp: candidate.timestamp,
                messages: candidate.messages.clone(),
                nonce,
            });
        }
        if nonce % 1024 == 0 && start.elapsed() >= budget {
            return None;
        }
        nonce = nonce.wrapping_add(1);
    }
}

fn target_bytes(difficulty: f64) -> [u8; 32] {
    let raw = consensus::target_for_difficulty(difficulty).to_bytes_be();
    let mut bytes = [0u8; 32];
    bytes[32 - raw.len()..].copy_from_slice(&raw);
    bytes
}
