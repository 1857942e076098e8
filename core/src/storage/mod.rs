//! Per-block / per-snapshot JSON persistence.
//!
//! Layout under the data directory:
//!   - `blocks/block-{height}.json` — every confirmed block
//!   - `db/db-{height}.json`        — snapshots for the undo window
//!   - `peers.txt`                  — newline-separated peer URLs
//!
//! Every file is written to a temporary name and renamed into place, so
//! a crash never leaves a half-written file under a live name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::blockchain::block::Block;
use crate::blockchain::chain::{CHARGE_SETTLE_BLOCKS, UNDO_HEIGHT};
use crate::ledger::Ledger;

pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub async fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir.join("blocks")).await?;
        fs::create_dir_all(self.data_dir.join("db")).await?;
        Ok(())
    }

    fn block_path(&self, height: u64) -> PathBuf {
        self.data_dir.join("blocks").join(format!("block-{height}.json"))
    }

    fn db_path(&self, height: u64) -> PathBuf {
        self.data_dir.join("db").join(format!("db-{height}.json"))
    }

    fn peers_path(&self) -> PathBuf {
        self.data_dir.join("peers.txt")
    }

    async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await.with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).await.with_context(|| format!("rename {}", path.display()))?;
        Ok(())
    }

    /// Persist the in-memory window (blocks already on disk below the
    /// window stay), then drop files outside the kept set: block files
    /// above the tail and snapshot files outside the undo window.
    pub async fn save_state(&self, blocks: &[Block], dbs: &[Ledger]) -> Result<()> {
        self.ensure_layout().await?;

        let tail = match blocks.last() {
            Some(tail) => tail.height,
            None => return Ok(()),
        };

        for block in blocks {
            let json = serde_json::to_vec(block)?;
            Self::write_atomic(&self.block_path(block.height), json).await?;
        }

        let first_db_height = tail - dbs.len() as u64 + 1;
        for (i, db) in dbs.iter().enumerate() {
            let json = serde_json::to_vec(db)?;
            Self::write_atomic(&self.db_path(first_db_height + i as u64), json).await?;
        }

        // Heights orphaned by a reorg leave stale files above the tail.
        for height in Self::scan_heights(&self.data_dir.join("blocks"), "block-").await? {
            if height > tail {
                let _ = fs::remove_file(self.block_path(height)).await;
            }
        }
        for height in Self::scan_heights(&self.data_dir.join("db"), "db-").await? {
            if height < first_db_height || height > tail {
                let _ = fs::remove_file(self.db_path(height)).await;
            }
        }
        Ok(())
    }

    async fn scan_heights(dir: &Path, prefix: &str) -> Result<HashSet<u64>> {
        let mut heights = HashSet::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(heights),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(prefix).and_then(|n| n.strip_suffix(".json")) {
                if let Ok(height) = rest.parse::<u64>() {
                    heights.insert(height);
                }
            }
        }
        Ok(heights)
    }

    /// Crash recovery. Best height is the largest contiguous run of
    /// block files starting at 1; snapshots load contiguously downward
    /// from there (up to the undo depth), and blocks load for the
    /// in-memory window. Anything inconsistent means starting empty.
    pub async fn load_state(&self) -> Result<(Vec<Block>, Vec<Ledger>)> {
        let heights = Self::scan_heights(&self.data_dir.join("blocks"), "block-").await?;
        let mut best_height = 0u64;
        while heights.contains(&(best_height + 1)) {
            best_height += 1;
        }
        if best_height == 0 {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut dbs = Vec::new();
        let mut height = best_height;
        while dbs.len() < UNDO_HEIGHT && height >= 1 {
            match fs::read(self.db_path(height)).await {
                Ok(bytes) => {
                    let db: Ledger = serde_json::from_slice(&bytes)
                        .with_context(|| format!("parse db-{height}.json"))?;
                    dbs.push(db);
                }
                Err(_) => break,
            }
            if height == 1 {
                break;
            }
            height -= 1;
        }
        if dbs.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        dbs.reverse();

        let start = best_height.saturating_sub(CHARGE_SETTLE_BLOCKS as u64 - 1).max(1);
        let mut blocks = Vec::new();
        for h in start..=best_height {
            let bytes = fs::read(self.block_path(h))
                .await
                .with_context(|| format!("read block-{h}.json"))?;
            let block: Block = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse block-{h}.json"))?;
            blocks.push(block);
        }
        Ok((blocks, dbs))
    }

    /// One block, streamed from disk (the window may have moved past it).
    pub async fn read_block(&self, height: u64) -> Option<Block> {
        let bytes = fs::read(self.block_path(height)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub async fn save_peers(&self, urls: &[String]) -> Result<()> {
        fs::create_dir_all(&self.data_dir).await?;
        let mut text = urls.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        Self::write_atomic(&self.peers_path(), text.into_bytes()).await
    }

    pub async fn load_peers(&self) -> Result<Vec<String>> {
        let path = self.peers_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).await?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::{BLOCK_VERSION, ZERO_HASH};

    fn block_at(height: u64, prev_hash: &str) -> Block {
        let mut b = Block {
            hash: String::new(),
            prev_hash: prev_hash.to_string(),
            height,
            difficulty: 1000.0,
            version: BLOCK_VERSION.to_string(),
            timestamp: height * 1000,
            messages: vec![],
            nonce: 0,
        };
        b.hash = b.compute_hash();
        b
    }

    fn chain_of(n: u64) -> (Vec<Block>, Vec<Ledger>) {
        let mut blocks = Vec::new();
        let mut prev = ZERO_HASH.to_string();
        for h in 1..=n {
            let b = block_at(h, &prev);
            prev = b.hash.clone();
            blocks.push(b);
        }
        let dbs = (0..n.min(UNDO_HEIGHT as u64)).map(|_| Ledger::new()).collect();
        (blocks, dbs)
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let (blocks, dbs) = chain_of(5);
        store.save_state(&blocks, &dbs).await.unwrap();

        let (loaded_blocks, loaded_dbs) = store.load_state().await.unwrap();
        assert_eq!(loaded_blocks, blocks);
        assert_eq!(loaded_dbs.len(), 5);
    }

    #[tokio::test]
    async fn test_recovery_requires_contiguous_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let (blocks, dbs) = chain_of(5);
        store.save_state(&blocks, &dbs).await.unwrap();

        // A hole at height 2 limits the usable chain to height 1.
        fs::remove_file(store.block_path(2)).await.unwrap();
        let (loaded_blocks, loaded_dbs) = store.load_state().await.unwrap();
        assert_eq!(loaded_blocks.len(), 1);
        assert_eq!(loaded_dbs.len(), 1);

        // Losing block 1 as well means starting empty.
        fs::remove_file(store.block_path(1)).await.unwrap();
        let (loaded_blocks, loaded_dbs) = store.load_state().await.unwrap();
        assert!(loaded_blocks.is_empty());
        assert!(loaded_dbs.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_without_snapshots_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let (blocks, dbs) = chain_of(3);
        store.save_state(&blocks, &dbs).await.unwrap();

        for h in 1..=3 {
            fs::remove_file(store.db_path(h)).await.unwrap();
        }
        let (loaded_blocks, loaded_dbs) = store.load_state().await.unwrap();
        assert!(loaded_blocks.is_empty());
        assert!(loaded_dbs.is_empty());
    }

    #[tokio::test]
    async fn test_save_removes_files_outside_kept_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let (blocks, dbs) = chain_of(12);
        store.save_state(&blocks, &dbs).await.unwrap();

        // Shrink to a 10-block chain; files 11, 12 must go, and db files
        // must track the new undo window.
        let (short_blocks, short_dbs) = chain_of(10);
        store.save_state(&short_blocks, &short_dbs).await.unwrap();
        assert!(!store.block_path(11).exists());
        assert!(!store.block_path(12).exists());
        assert!(!store.db_path(12).exists());
        assert!(store.block_path(10).exists());
        assert!(store.db_path(10).exists());
    }

    #[tokio::test]
    async fn test_no_tmp_residue() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let (blocks, dbs) = chain_of(3);
        store.save_state(&blocks, &dbs).await.unwrap();

        let mut entries = fs::read_dir(dir.path().join("blocks")).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().ends_with(".tmp"));
        }
    }

    #[tokio::test]
    async fn test_read_block_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let (blocks, dbs) = chain_of(4);
        store.save_state(&blocks, &dbs).await.unwrap();

        let block = store.read_block(3).await.unwrap();
        assert_eq!(block.height, 3);
        assert!(store.read_block(99).await.is_none());
    }

    #[tokio::test]
    async fn test_peers_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.load_peers().await.unwrap().is_empty());

        let urls = vec!["http://a:8844".to_string(), "http://b:8844".to_string()];
        store.save_peers(&urls).await.unwrap();
        assert_eq!(store.load_peers().await.unwrap(), urls);
    }
}
