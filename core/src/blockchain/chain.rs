//! Chain manager: the undo-window state stack, the block attachment
//! classifier, the reorg executor and mempool reconciliation.

use std::collections::HashMap;

use crate::blockchain::block::{Block, ZERO_HASH};
use crate::blockchain::consensus;
use crate::blockchain::validation;
use crate::error::{Rejection, Result};
use crate::ledger::Ledger;
use crate::mempool::Mempool;
use crate::message::Message;

// ──────────────────────────────────────────────
// Chain constants
// ──────────────────────────────────────────────

/// Snapshots retained for rollback; bounds reorganization depth.
pub const UNDO_HEIGHT: usize = 10;

/// Confirmed blocks kept in memory; older blocks live only on disk.
pub const CHARGE_SETTLE_BLOCKS: usize = 100;

/// Where an incoming block attaches relative to the current chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Already known, on the main chain or stashed.
    Duplicate,
    /// Extends the tip directly.
    MainChain,
    /// Traces through stashed blocks to a main-chain block within the
    /// undo window (height 0 for a competing genesis family).
    SideChain { forked_height: u64 },
    /// In range by height but with no traceable ancestor.
    Dangling,
    /// Below the undo window.
    Stale,
    /// Above tip + 1; pull sync will catch up.
    Ahead,
}

#[derive(Debug)]
pub enum BlockOutcome {
    Committed,
    /// A side chain out-worked the main chain. The orphaned blocks'
    /// messages are handed back for re-admission.
    Reorged { orphaned: Vec<Message> },
    /// Side chain did not out-work the main chain; stashed.
    Stashed,
}

/// In-memory chain state. All mutation is driven through
/// [`Chain::submit_block`] and [`Chain::submit_message`]; the owner
/// serializes access (one logical task).
pub struct Chain {
    /// Undo stack: one post-block snapshot per tail block, newest last.
    dbs: Vec<Ledger>,
    /// The last `CHARGE_SETTLE_BLOCKS` confirmed blocks.
    blocks: Vec<Block>,
    pub mempool: Mempool,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self { dbs: Vec::new(), blocks: Vec::new(), mempool: Mempool::new() }
    }

    /// Rebuild from persisted blocks and snapshots (crash recovery).
    pub fn restore(blocks: Vec<Block>, dbs: Vec<Ledger>) -> Self {
        Self { dbs, blocks, mempool: Mempool::new() }
    }

    pub fn tail(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn tail_height(&self) -> u64 {
        self.tail().map(|b| b.height).unwrap_or(0)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn dbs(&self) -> &[Ledger] {
        &self.dbs
    }

    pub fn block_at(&self, height: u64) -> Option<&Block> {
        let first = self.blocks.first()?.height;
        if height < first {
            return None;
        }
        self.blocks.get((height - first) as usize)
    }

    /// Snapshot at the tip (empty ledger while the chain is empty).
    pub fn head_db(&self) -> Ledger {
        self.dbs.last().cloned().unwrap_or_default()
    }

    /// Tip snapshot with pending mempool messages folded in.
    pub fn unconfirmed_db(&self) -> Ledger {
        self.head_db().project(&[], Some(&self.mempool.messages))
    }

    // ── Queries ──

    pub fn balance(&self, address: &str, asset_id: &str) -> u64 {
        self.dbs.last().map(|db| db.balance(address, asset_id)).unwrap_or(0)
    }

    pub fn balances(&self, address: &str) -> HashMap<String, u64> {
        self.dbs.last().map(|db| db.balances_of(address)).unwrap_or_default()
    }

    pub fn minter(&self, base: &str) -> Option<String> {
        self.dbs
            .last()
            .and_then(|db| db.current_minter(base).map(str::to_string))
    }

    pub fn price(&self, base: &str) -> Option<u64> {
        self.dbs.last().and_then(|db| db.price(base))
    }

    pub fn base_assets(&self) -> Vec<String> {
        self.dbs.last().map(|db| db.base_assets()).unwrap_or_default()
    }

    /// Base difficulty the next block retargets to.
    pub fn next_difficulty(&self) -> f64 {
        consensus::base_difficulty(&self.blocks).max(consensus::MIN_DIFFICULTY)
    }

    // ── Ingestion ──

    pub fn classify(&self, block: &Block) -> Attachment {
        if self.blocks.iter().any(|b| b.hash == block.hash)
            || self.mempool.contains_block(&block.hash)
        {
            return Attachment::Duplicate;
        }

        let tail = match self.tail() {
            Some(tail) => tail,
            None => {
                return match block.height {
                    1 if block.prev_hash == ZERO_HASH => Attachment::MainChain,
                    1 => Attachment::Dangling,
                    _ => Attachment::Ahead,
                };
            }
        };

        if block.height == tail.height + 1 && block.prev_hash == tail.hash {
            return Attachment::MainChain;
        }
        if block.height > tail.height + 1 {
            return Attachment::Ahead;
        }
        if block.height < tail.height.saturating_sub(UNDO_HEIGHT as u64) {
            return Attachment::Stale;
        }

        match self.trace_fork(block) {
            Some(forked_height) => Attachment::SideChain { forked_height },
            None => Attachment::Dangling,
        }
    }

    /// Walk `block`'s ancestry through stashed mempool blocks until it
    /// lands on the main chain (or the empty genesis parent). Returns
    /// the fork height, or None when the ancestry breaks off.
    fn trace_fork(&self, block: &Block) -> Option<u64> {
        let window_floor = self.tail_height().saturating_sub(UNDO_HEIGHT as u64);
        let mut prev_hash = block.prev_hash.clone();
        let mut height = block.height;
        loop {
            if height == 1 {
                return if prev_hash == ZERO_HASH { Some(0) } else { None };
            }
            let parent_height = height - 1;
            if parent_height < window_floor {
                return None;
            }
            if let Some(main) = self.block_at(parent_height) {
                if main.hash == prev_hash {
                    return Some(parent_height);
                }
            }
            match self.mempool.find_block(&prev_hash) {
                Some(parent) if parent.height == parent_height => {
                    prev_hash = parent.prev_hash.clone();
                    height = parent.height;
                }
                _ => return None,
            }
        }
    }

    /// Ingest a block from any source (miner, peer stream, pull sync).
    pub fn submit_block(&mut self, block: Block) -> Result<BlockOutcome> {
        match self.classify(&block) {
            Attachment::Duplicate => Err(Rejection::soft("duplicate block")),
            Attachment::Stale => Err(Rejection::soft("stale block")),
            Attachment::Ahead => Err(Rejection::soft("desynchronized block")),
            Attachment::Dangling => {
                self.mempool.stash_block(block);
                Err(Rejection::soft("dangling block"))
            }
            Attachment::MainChain => {
                self.commit_main(block)?;
                Ok(BlockOutcome::Committed)
            }
            Attachment::SideChain { forked_height } => self.try_reorg(block, forked_height),
        }
    }

    fn commit_main(&mut self, block: Block) -> Result<()> {
        let db = self.head_db();
        validation::validate_block(&block, &self.blocks, &db)?;

        let mut next = db;
        for message in &block.messages {
            // Validated above; a failure here is a node bug.
            next.apply_message(message)
                .expect("validated message failed to apply");
        }
        next.note_block_hashes(&block.messages);
        self.push_committed(block, next);
        Ok(())
    }

    fn push_committed(&mut self, block: Block, db: Ledger) {
        self.mempool.evict_confirmed(&block.messages);
        self.mempool.remove_block(&block.hash);

        self.dbs.push(db);
        if self.dbs.len() > UNDO_HEIGHT {
            self.dbs.remove(0);
        }
        self.blocks.push(block);
        if self.blocks.len() > CHARGE_SETTLE_BLOCKS {
            self.blocks.remove(0);
        }
        self.mempool
            .prune_blocks_below(self.tail_height().saturating_sub(UNDO_HEIGHT as u64));
    }

    /// Side-chain commit: compare accumulated work above the fork and
    /// reorganize when the side chain wins. Validation runs against
    /// copies; the live state is only touched after every side block
    /// passed.
    fn try_reorg(&mut self, block: Block, forked_height: u64) -> Result<BlockOutcome> {
        // Assemble the side chain tip-first, then flip it ascending.
        let mut side = vec![block];
        while side.last().map(|b| b.height).unwrap_or(0) > forked_height + 1 {
            let parent_hash = side.last().map(|b| b.prev_hash.clone()).unwrap_or_default();
            match self.mempool.find_block(&parent_hash) {
                Some(parent) => side.push(parent.clone()),
                None => {
                    // Ancestry evaporated between classify and here.
                    if let Some(tip) = side.into_iter().next() {
                        self.mempool.stash_block(tip);
                    }
                    return Err(Rejection::soft("dangling block"));
                }
            }
        }
        side.reverse();

        let main_above: Vec<Block> = self
            .blocks
            .iter()
            .filter(|b| b.height > forked_height)
            .cloned()
            .collect();
        let side_work = consensus::chain_work(&side);
        let main_work = consensus::chain_work(&main_above);
        if side_work <= main_work {
            if let Some(tip) = side.pop() {
                self.mempool.stash_block(tip);
            }
            return Ok(BlockOutcome::Stashed);
        }

        let num_sliced = (self.tail_height() - forked_height) as usize;
        let base_db = if num_sliced < self.dbs.len() {
            self.dbs[self.dbs.len() - 1 - num_sliced].clone()
        } else if forked_height == 0 && num_sliced == self.dbs.len() {
            Ledger::new()
        } else {
            if let Some(tip) = side.pop() {
                self.mempool.stash_block(tip);
            }
            return Err(Rejection::soft("fork outside undo window"));
        };

        // Re-apply the side chain on copies, validating each block.
        let mut temp_blocks: Vec<Block> = self
            .blocks
            .iter()
            .filter(|b| b.height <= forked_height)
            .cloned()
            .collect();
        let mut db = base_db;
        let mut new_dbs = Vec::with_capacity(side.len());
        for side_block in &side {
            validation::validate_block(side_block, &temp_blocks, &db)?;
            for message in &side_block.messages {
                db.apply_message(message)
                    .expect("validated message failed to apply");
            }
            db.note_block_hashes(&side_block.messages);
            new_dbs.push(db.clone());
            temp_blocks.push(side_block.clone());
        }

        // Commit: orphaned main-chain blocks move to the mempool and
        // their messages are handed back for re-admission.
        let keep = self
            .blocks
            .iter()
            .position(|b| b.height > forked_height)
            .unwrap_or(self.blocks.len());
        let orphaned_blocks = self.blocks.split_off(keep);
        let orphaned: Vec<Message> = orphaned_blocks
            .iter()
            .flat_map(|b| b.messages.iter().cloned())
            .collect();
        for orphan in orphaned_blocks {
            self.mempool.stash_block(orphan);
        }

        self.dbs.truncate(self.dbs.len() - num_sliced.min(self.dbs.len()));
        self.dbs.extend(new_dbs);
        while self.dbs.len() > UNDO_HEIGHT {
            self.dbs.remove(0);
        }

        for side_block in &side {
            self.mempool.remove_block(&side_block.hash);
            self.mempool.evict_confirmed(&side_block.messages);
        }
        self.blocks = temp_blocks;
        while self.blocks.len() > CHARGE_SETTLE_BLOCKS {
            self.blocks.remove(0);
        }
        self.mempool
            .prune_blocks_below(self.tail_height().saturating_sub(UNDO_HEIGHT as u64));

        Ok(BlockOutcome::Reorged { orphaned })
    }

    /// Admit a message to the mempool (the unconfirmed view gates it).
    pub fn submit_message(&mut self, message: Message) -> Result<()> {
        if self.mempool.contains_message(&message.hash) {
            return Err(Rejection::soft("duplicate message"));
        }
        let db = self.head_db();
        validation::validate_message(
            &db,
            self.tail_height(),
            Some(&self.mempool.messages),
            &message,
            &[],
        )?;
        self.mempool.push_message(message)
    }
}
