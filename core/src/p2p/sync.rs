//! Periodic pull synchronization: every cycle each live peer is asked
//! for recent blocks (ascending until 404), its mempool and its peer
//! list, all applied through the normal ingestion API. Soft errors are
//! expected traffic and stay silent.

use reqwest::Client;

use crate::blockchain::block::Block;
use crate::blockchain::chain::CHARGE_SETTLE_BLOCKS;
use crate::error::Rejection;
use crate::events::NodeEvent;
use crate::mempool::Mempool;
use crate::node::Node;

pub async fn ingest_event(node: &Node, event: NodeEvent) {
    match event {
        NodeEvent::Block { block } => ingest_block(node, block).await,
        NodeEvent::Message { message } => {
            if let Err(e) = node.submit_message(message).await {
                log_hard(&e, "peer message");
            }
        }
        NodeEvent::Peer { url } => {
            node.add_peer(url).await;
        }
    }
}

pub async fn ingest_block(node: &Node, block: Block) {
    if let Err(e) = node.submit_block(block).await {
        log_hard(&e, "peer block");
    }
}

fn log_hard(e: &Rejection, what: &str) {
    if !e.is_soft() {
        log::warn!("{what} rejected: {e}");
    }
}

/// One pull cycle against one peer.
pub async fn pull_peer(node: &Node, client: &Client, url: &str) {
    pull_blocks(node, client, url).await;
    pull_mempool(node, client, url).await;
    pull_peers(node, client, url).await;
}

async fn pull_blocks(node: &Node, client: &Client, url: &str) {
    let start = {
        let chain = node.chain.lock().await;
        chain
            .tail_height()
            .saturating_sub(CHARGE_SETTLE_BLOCKS as u64)
            .max(1)
    };
    let mut height = start;
    loop {
        let response = match client.get(format!("{url}/blocks/{height}")).send().await {
            Ok(response) => response,
            Err(_) => return,
        };
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return;
        }
        if !response.status().is_success() {
            return;
        }
        match response.json::<Block>().await {
            Ok(block) => ingest_block(node, block).await,
            Err(_) => return,
        }
        height += 1;
    }
}

async fn pull_mempool(node: &Node, client: &Client, url: &str) {
    let response = match client.get(format!("{url}/mempool")).send().await {
        Ok(response) => response,
        Err(_) => return,
    };
    let pool = match response.json::<Mempool>().await {
        Ok(pool) => pool,
        Err(_) => return,
    };
    for block in pool.blocks {
        ingest_block(node, block).await;
    }
    for message in pool.messages {
        if let Err(e) = node.submit_message(message).await {
            log_hard(&e, "pulled message");
        }
    }
}

async fn pull_peers(node: &Node, client: &Client, url: &str) {
    let response = match client.get(format!("{url}/peers")).send().await {
        Ok(response) => response,
        Err(_) => return,
    };
    if let Ok(urls) = response.json::<Vec<String>>().await {
        for url in urls {
            node.add_peer(url).await;
        }
    }
}
