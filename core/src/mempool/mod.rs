use serde::{Deserialize, Serialize};

use crate::blockchain::block::Block;
use crate::error::{Rejection, Result};
use crate::message::{Message, MESSAGES_PER_BLOCK_MAX};

/// Pending messages awaiting confirmation plus orphan / side-chain
/// blocks stashed within the undo window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mempool {
    pub blocks: Vec<Block>,
    pub messages: Vec<Message>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_block(&self, hash: &str) -> bool {
        self.blocks.iter().any(|b| b.hash == hash)
    }

    pub fn find_block(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.hash == hash)
    }

    /// Stash a side-chain or orphan block; duplicates are ignored.
    pub fn stash_block(&mut self, block: Block) {
        if !self.contains_block(&block.hash) {
            self.blocks.push(block);
        }
    }

    pub fn remove_block(&mut self, hash: &str) {
        self.blocks.retain(|b| b.hash != hash);
    }

    /// Drop stashed blocks that fell below the undo window.
    pub fn prune_blocks_below(&mut self, min_height: u64) {
        self.blocks.retain(|b| b.height >= min_height);
    }

    pub fn contains_message(&self, hash: &str) -> bool {
        self.messages.iter().any(|m| m.hash == hash)
    }

    /// Queue a validated message. Capacity is bounded by the per-block
    /// message maximum.
    pub fn push_message(&mut self, message: Message) -> Result<()> {
        if self.messages.len() >= MESSAGES_PER_BLOCK_MAX {
            return Err(Rejection::overload("mempool full"));
        }
        self.messages.push(message);
        Ok(())
    }

    /// Evict pending messages confirmed by a block, matched by
    /// signature equality.
    pub fn evict_confirmed(&mut self, block_messages: &[Message]) {
        self.messages
            .retain(|m| !block_messages.iter().any(|c| c.signature == m.signature));
    }
}
