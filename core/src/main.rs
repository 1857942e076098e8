use std::net::SocketAddr;

use clap::Parser;

use crd_core::miner::MinerCommand;
use crd_core::node::{Inner as NodeState, Node};
use crd_core::{p2p, rpc};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the HTTP API (bound to loopback only)
    #[arg(long, default_value_t = 8844)]
    port: u16,

    /// Path to the data directory
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Initial peer URLs (comma separated)
    #[arg(long)]
    peers: Option<String>,

    /// This node's own URL, excluded from the peer set
    #[arg(long)]
    self_url: Option<String>,

    /// Start mining for this address immediately
    #[arg(long)]
    mine: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut args = Args::parse();

    if let Ok(v) = std::env::var("CRD_PORT") {
        if let Ok(p) = v.parse::<u16>() {
            args.port = p;
        }
    }
    if let Ok(v) = std::env::var("CRD_DATA_DIR") {
        if !v.trim().is_empty() {
            args.data_dir = v;
        }
    }
    if args.peers.is_none() {
        if let Ok(v) = std::env::var("CRD_PEERS") {
            if !v.trim().is_empty() {
                args.peers = Some(v);
            }
        }
    }

    let self_url = args
        .self_url
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", args.port));

    println!("Starting CRD node");
    println!("Data Dir: {}", args.data_dir);
    println!("API Port: {} (loopback only)", args.port);
    println!("Self URL: {self_url}");

    let node = match NodeState::init(&args.data_dir, self_url).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("Failed to initialize node: {e}");
            std::process::exit(1);
        }
    };

    if let Some(peers) = args.peers {
        for url in peers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            node.add_peer(url.to_string()).await;
        }
    }

    if let Some(address) = args.mine {
        println!("Mining for {address}");
        let _ = node.miner_tx.send(MinerCommand::Start(address));
    }

    let replicator = node.clone();
    tokio::spawn(async move { p2p::start(replicator).await });

    let app = rpc::server::build(node.clone());
    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    println!("CRD node listening on {addr}");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(node))
    .await;
    if let Err(e) = result {
        eprintln!("Server error: {e}");
    }
}

async fn shutdown_signal(node: Node) {
    let _ = tokio::signal::ctrl_c().await;
    println!("Shutting down...");
    node.shutdown().await;
}
