use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use crate::error::Rejection;
use crate::message::Message;
use crate::miner::MinerCommand;
use crate::node::Node;

fn reject(r: Rejection) -> Response {
    let status = StatusCode::from_u16(r.status).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(json!({ "error": r.message }))).into_response()
}

pub async fn status(State(node): State<Node>) -> Response {
    let chain = node.chain.lock().await;
    Json(json!({
        "startHeight": chain.tail_height() + 1,
        "timestamp": crate::now_ms(),
    }))
    .into_response()
}

pub async fn assets(State(node): State<Node>) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.base_assets()).into_response()
}

pub async fn balances(State(node): State<Node>, Path(address): Path<String>) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.balances(&address)).into_response()
}

pub async fn balance(
    State(node): State<Node>,
    Path((address, asset)): Path<(String, String)>,
) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.balance(&address, &asset)).into_response()
}

pub async fn unconfirmed_balances(
    State(node): State<Node>,
    Path(address): Path<String>,
) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.unconfirmed_db().balances_of(&address)).into_response()
}

pub async fn unconfirmed_balance(
    State(node): State<Node>,
    Path((address, asset)): Path<(String, String)>,
) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.unconfirmed_db().balance(&address, &asset)).into_response()
}

pub async fn minter(State(node): State<Node>, Path(asset): Path<String>) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.minter(&asset)).into_response()
}

pub async fn unconfirmed_minter(
    State(node): State<Node>,
    Path(asset): Path<String>,
) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.unconfirmed_db().current_minter(&asset).map(str::to_string)).into_response()
}

pub async fn price(State(node): State<Node>, Path(asset): Path<String>) -> Response {
    let chain = node.chain.lock().await;
    // +infinity (and never-priced) serialize as null.
    Json(chain.price(&asset)).into_response()
}

pub async fn unconfirmed_price(
    State(node): State<Node>,
    Path(asset): Path<String>,
) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.unconfirmed_db().price(&asset)).into_response()
}

pub async fn submit_message(
    State(node): State<Node>,
    Json(message): Json<Message>,
) -> Response {
    match node.submit_message(message).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => reject(e),
    }
}

#[derive(Deserialize)]
pub struct MineRequest {
    pub address: Option<String>,
}

pub async fn mine(State(node): State<Node>, Json(req): Json<MineRequest>) -> Response {
    let command = match req.address {
        Some(address) => MinerCommand::Start(address),
        None => MinerCommand::Stop,
    };
    match node.miner_tx.send(command) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(_) => reject(Rejection::overload("miner unavailable")),
    }
}

pub async fn mined_blocks(State(node): State<Node>) -> Response {
    Json(node.mined_blocks.load(std::sync::atomic::Ordering::Relaxed)).into_response()
}

pub async fn block_by_height(
    State(node): State<Node>,
    Path(height): Path<u64>,
) -> Response {
    {
        let chain = node.chain.lock().await;
        if let Some(block) = chain.block_at(height) {
            return Json(block.clone()).into_response();
        }
    }
    // Older than the in-memory window: stream from disk.
    match node.store.read_block(height).await {
        Some(block) => Json(block).into_response(),
        None => reject(Rejection::not_found("block not found")),
    }
}

pub async fn blockcache(State(node): State<Node>) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.blocks().to_vec()).into_response()
}

pub async fn mempool(State(node): State<Node>) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.mempool.clone()).into_response()
}

pub async fn difficulty(State(node): State<Node>) -> Response {
    let chain = node.chain.lock().await;
    Json(chain.next_difficulty()).into_response()
}

pub async fn peers(State(node): State<Node>) -> Response {
    Json(node.peers.known()).into_response()
}

#[derive(Deserialize)]
pub struct PeerRequest {
    pub url: String,
}

pub async fn add_peer(State(node): State<Node>, Json(req): Json<PeerRequest>) -> Response {
    node.add_peer(req.url).await;
    Json(json!({ "ok": true })).into_response()
}

pub async fn remove_peer(State(node): State<Node>, Json(req): Json<PeerRequest>) -> Response {
    node.remove_peer(&req.url).await;
    Json(json!({ "ok": true })).into_response()
}

/// Newline-delimited JSON event stream; one line per accepted block,
/// message or peer. Lagging subscribers skip ahead instead of
/// back-pressuring the chain task.
pub async fn listen(State(node): State<Node>) -> Response {
    let rx = node.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let mut line = match serde_json::to_string(&event) {
                        Ok(line) => line,
                        Err(_) => continue,
                    };
                    line.push('\n');
                    return Some((Ok::<String, std::io::Error>(line), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Body::from_stream(stream).into_response()
}
