use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::node::Node;
use crate::rpc::{auth, methods};

pub fn build(node: Node) -> Router {
    Router::new()
        .route("/status", get(methods::status))
        .route("/assets", get(methods::assets))
        .route("/balances/:address", get(methods::balances))
        .route("/balance/:address/:asset", get(methods::balance))
        .route("/unconfirmedBalances/:address", get(methods::unconfirmed_balances))
        .route("/unconfirmedBalance/:address/:asset", get(methods::unconfirmed_balance))
        .route("/minter/:asset", get(methods::minter))
        .route("/unconfirmedMinter/:asset", get(methods::unconfirmed_minter))
        .route("/price/:asset", get(methods::price))
        .route("/unconfirmedPrice/:asset", get(methods::unconfirmed_price))
        .route("/submitMessage", post(methods::submit_message))
        .route("/mine", post(methods::mine))
        .route("/minedBlocks", get(methods::mined_blocks))
        .route("/blocks/:height", get(methods::block_by_height))
        .route("/blockcache", get(methods::blockcache))
        .route("/mempool", get(methods::mempool))
        .route("/difficulty", get(methods::difficulty))
        .route("/peers", get(methods::peers))
        .route("/peer", post(methods::add_peer))
        .route("/removePeer", post(methods::remove_peer))
        .route("/listen", get(methods::listen))
        .layer(middleware::from_fn(auth::require_loopback))
        .with_state(node)
}
