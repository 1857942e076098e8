//! Peer replication: outbound gossip rides on each peer's `/listen`
//! stream, a periodic puller backfills anything gossip missed, and a
//! quorum of live peers is maintained by enabling random disabled
//! peers.

pub mod peers;
pub mod sync;

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;

use crate::events::NodeEvent;
use crate::node::Node;

/// Reconnect delay after a dropped `/listen` stream.
pub const LISTEN_RETRY: Duration = Duration::from_secs(1);

/// Pull cycle period.
pub const PULL_INTERVAL: Duration = Duration::from_secs(30);

/// Run the replicator: quorum top-up plus the pull loop. Newly enabled
/// peers get a streaming subscription task; a disabled peer's tasks
/// wind down on their own.
pub async fn start(node: Node) {
    let client = Client::new();

    enable_new_peers(&node, &client);

    let mut ticker = tokio::time::interval(PULL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        enable_new_peers(&node, &client);

        // Pull every live peer in parallel.
        let live = node.peers.enabled();
        let pulls = live.iter().map(|url| sync::pull_peer(&node, &client, url));
        futures::future::join_all(pulls).await;
    }
}

fn enable_new_peers(node: &Node, client: &Client) {
    for url in node.peers.top_up() {
        log::info!("peer enabled: {url}");
        tokio::spawn(listen_loop(node.clone(), client.clone(), url));
    }
}

/// Persistent subscription to one peer's `/listen` stream: frames are
/// newline-delimited JSON events, applied through the ingestion API.
/// Retries while the peer stays enabled.
async fn listen_loop(node: Node, client: Client, url: String) {
    while node.peers.is_enabled(&url) {
        match client.get(format!("{url}/listen")).send().await {
            Ok(response) => {
                let mut stream = response.bytes_stream();
                let mut buffer: Vec<u8> = Vec::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(_) => break,
                    };
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        match serde_json::from_slice::<NodeEvent>(&line) {
                            Ok(event) => sync::ingest_event(&node, event).await,
                            Err(e) => log::warn!("bad event from {url}: {e}"),
                        }
                    }
                    if !node.peers.is_enabled(&url) {
                        return;
                    }
                }
            }
            Err(_) => {}
        }
        tokio::time::sleep(LISTEN_RETRY).await;
    }
}
