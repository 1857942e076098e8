//! The shared node handle. All chain-state mutation funnels through the
//! single async mutex here; every other subsystem (RPC, replicator,
//! miner) reads and writes through this API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::blockchain::block::Block;
use crate::blockchain::chain::{BlockOutcome, Chain};
use crate::error::Result;
use crate::events::{EventBus, NodeEvent};
use crate::message::Message;
use crate::miner::{self, MinerCommand};
use crate::p2p::peers::PeerSet;
use crate::storage::Store;

pub struct Inner {
    pub chain: Mutex<Chain>,
    pub store: Store,
    pub events: EventBus,
    pub peers: PeerSet,
    pub self_url: String,
    pub miner_tx: mpsc::UnboundedSender<MinerCommand>,
    pub mined_blocks: Arc<AtomicU64>,
    save_tx: mpsc::Sender<()>,
    /// Held by the saver for the duration of each write; shutdown takes
    /// it to drain the in-flight save.
    save_lock: Mutex<()>,
    shutting_down: AtomicBool,
}

pub type Node = Arc<Inner>;

impl Inner {
    /// Recover persisted state and bring up the saver and miner tasks.
    pub async fn init(data_dir: &str, self_url: String) -> anyhow::Result<Node> {
        let store = Store::new(data_dir);
        store.ensure_layout().await?;
        let (blocks, dbs) = store.load_state().await?;
        if !blocks.is_empty() {
            println!(
                "Recovered chain at height {} ({} blocks in memory)",
                blocks.last().map(|b| b.height).unwrap_or(0),
                blocks.len()
            );
        }
        let chain = Chain::restore(blocks, dbs);

        let peer_urls = store.load_peers().await.unwrap_or_default();
        let peers = PeerSet::new(self_url.clone(), peer_urls);

        let (miner_tx, miner_rx) = mpsc::unbounded_channel();
        // Capacity 1: one queued save coalesces any number of requests
        // arriving while a save is in flight.
        let (save_tx, save_rx) = mpsc::channel(1);
        let mined_blocks = Arc::new(AtomicU64::new(0));

        let node: Node = Arc::new(Inner {
            chain: Mutex::new(chain),
            store,
            events: EventBus::new(),
            peers,
            self_url,
            miner_tx,
            mined_blocks: mined_blocks.clone(),
            save_tx,
            save_lock: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
        });

        spawn_saver(node.clone(), save_rx);
        miner::spawn(node.clone(), miner_rx, mined_blocks);
        Ok(node)
    }

    /// Ingest a block from any source. Commits and reorgs enqueue a
    /// save and emit the block event strictly afterwards; messages from
    /// orphaned blocks re-enter through the normal submission path.
    pub async fn submit_block(self: &Arc<Self>, block: Block) -> Result<()> {
        let outcome = {
            let mut chain = self.chain.lock().await;
            chain.submit_block(block.clone())?
        };
        match outcome {
            BlockOutcome::Committed => {
                self.schedule_save();
                self.events.publish(NodeEvent::Block { block });
            }
            BlockOutcome::Reorged { orphaned } => {
                self.schedule_save();
                self.events.publish(NodeEvent::Block { block });
                for message in orphaned {
                    // Stale after the reorg is fine; drop quietly.
                    let _ = self.submit_message(message).await;
                }
            }
            BlockOutcome::Stashed => {}
        }
        Ok(())
    }

    /// Admit a message to the mempool. The message event fires exactly
    /// when it enters; duplicates surface as soft errors and stay
    /// silent.
    pub async fn submit_message(self: &Arc<Self>, message: Message) -> Result<()> {
        {
            let mut chain = self.chain.lock().await;
            chain.submit_message(message.clone())?;
        }
        self.events.publish(NodeEvent::Message { message });
        Ok(())
    }

    pub fn schedule_save(&self) {
        // A full buffer means a save is already queued.
        let _ = self.save_tx.try_send(());
    }

    pub async fn add_peer(self: &Arc<Self>, url: String) -> bool {
        if !self.peers.add(url.clone()) {
            return false;
        }
        if let Err(e) = self.store.save_peers(&self.peers.known()).await {
            log::warn!("failed to persist peers: {e}");
        }
        self.events.publish(NodeEvent::Peer { url });
        true
    }

    pub async fn remove_peer(self: &Arc<Self>, url: &str) -> bool {
        if !self.peers.remove(url) {
            return false;
        }
        if let Err(e) = self.store.save_peers(&self.peers.known()).await {
            log::warn!("failed to persist peers: {e}");
        }
        self.events
            .publish(NodeEvent::Peer { url: url.to_string() });
        true
    }

    /// Graceful shutdown: stop the miner, disable all peers, then wait
    /// out any in-flight save.
    pub async fn shutdown(&self) {
        let _ = self.miner_tx.send(MinerCommand::Stop);
        self.shutting_down.store(true, Ordering::Relaxed);
        self.peers.disable_all();
        let _drained = self.save_lock.lock().await;
    }
}

fn spawn_saver(node: Node, mut save_rx: mpsc::Receiver<()>) {
    tokio::spawn(async move {
        while save_rx.recv().await.is_some() {
            if node.shutting_down.load(Ordering::Relaxed) {
                break;
            }
            let _guard = node.save_lock.lock().await;
            let (blocks, dbs) = {
                let chain = node.chain.lock().await;
                (chain.blocks().to_vec(), chain.dbs().to_vec())
            };
            if let Err(e) = node.store.save_state(&blocks, &dbs).await {
                log::warn!("save failed: {e}");
            }
        }
    });
}
