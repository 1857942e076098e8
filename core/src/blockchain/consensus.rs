//! Difficulty retargeting, PoW target math and the message-bonus
//! discount.
//!
//! Work is measured in 256-bit target space: a block hash meets
//! difficulty `d` iff `bigint(hash) <= maxTarget / round(d)`.

use num_bigint::BigUint;
use num_traits::{Num, ToPrimitive};

use crate::blockchain::block::Block;
use crate::message::Message;

// ──────────────────────────────────────────────
// Consensus constants
// ──────────────────────────────────────────────

/// Difficulty floor, also the effective difficulty while the chain is
/// shorter than one retarget window.
pub const MIN_DIFFICULTY: f64 = 1000.0;

/// Retarget window, in blocks. Also the timestamp-median window.
pub const TARGET_BLOCKS: usize = 10;

/// Intended wall-clock span of one retarget window, in milliseconds.
pub const TARGET_TIME: u64 = 600_000;

/// Per-retarget clamp on the window-time ratio.
pub const TARGET_SWAY_MIN: f64 = 0.5;
pub const TARGET_SWAY_MAX: f64 = 2.0;

/// Budget of one cooperative mining slice, in milliseconds.
pub const HASH_WORK_TIME: u64 = 20;

fn max_target() -> BigUint {
    BigUint::from_str_radix(
        "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        16,
    )
    .expect("max target parses")
}

/// target(d) = maxTarget / round(d).
pub fn target_for_difficulty(difficulty: f64) -> BigUint {
    let d = (difficulty.round() as u64).max(1);
    max_target() / BigUint::from(d)
}

pub fn hash_meets_target(hash_hex: &str, difficulty: f64) -> bool {
    let value = match BigUint::from_str_radix(hash_hex, 16) {
        Ok(v) => v,
        Err(_) => return false,
    };
    value <= target_for_difficulty(difficulty)
}

/// The hash value as a fraction of the target space, used for summing
/// chain work and the per-message difficulty bonus.
pub fn hash_difficulty(hash_hex: &str) -> f64 {
    let value = match BigUint::from_str_radix(hash_hex, 16) {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    let max = max_target().to_f64().unwrap_or(f64::MAX);
    value.to_f64().unwrap_or(0.0) / max
}

/// Accumulated work of a run of blocks.
pub fn chain_work(blocks: &[Block]) -> f64 {
    blocks.iter().map(|b| hash_difficulty(&b.hash)).sum()
}

/// Base-difficulty retarget over the last `TARGET_BLOCKS` blocks of
/// `blocks`: the mean window difficulty scaled by the clamped ratio of
/// observed window time to `TARGET_TIME`. An empty window yields 0; use
/// sites floor at `MIN_DIFFICULTY` via [`required_difficulty`].
pub fn base_difficulty(blocks: &[Block]) -> f64 {
    let window = tail_window(blocks);
    if window.is_empty() {
        return 0.0;
    }
    let min_ts = window.iter().map(|b| b.timestamp).min().unwrap_or(0);
    let max_ts = window.iter().map(|b| b.timestamp).max().unwrap_or(0);
    let elapsed = (max_ts - min_ts) as f64;
    let mean: f64 =
        window.iter().map(|b| b.difficulty).sum::<f64>() / window.len() as f64;
    let sway = (elapsed / TARGET_TIME as f64).clamp(TARGET_SWAY_MIN, TARGET_SWAY_MAX);
    (mean / sway).max(MIN_DIFFICULTY)
}

/// Aggregate PoW credit granted for bundling hashed messages.
pub fn messages_bonus(messages: &[Message]) -> f64 {
    messages.iter().map(|m| hash_difficulty(&m.hash)).sum()
}

/// The difficulty a candidate block must claim at minimum.
pub fn required_difficulty(blocks: &[Block], messages: &[Message]) -> f64 {
    (base_difficulty(blocks) - messages_bonus(messages)).max(MIN_DIFFICULTY)
}

/// Median timestamp of the last `TARGET_BLOCKS` blocks; an even-sized
/// sample medians as the arithmetic mean of the two middle values.
pub fn median_timestamp(blocks: &[Block]) -> f64 {
    let window = tail_window(blocks);
    if window.is_empty() {
        return 0.0;
    }
    let mut timestamps: Vec<u64> = window.iter().map(|b| b.timestamp).collect();
    timestamps.sort_unstable();
    let n = timestamps.len();
    if n % 2 == 1 {
        timestamps[n / 2] as f64
    } else {
        (timestamps[n / 2 - 1] as f64 + timestamps[n / 2] as f64) / 2.0
    }
}

fn tail_window(blocks: &[Block]) -> &[Block] {
    let start = blocks.len().saturating_sub(TARGET_BLOCKS);
    &blocks[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::{BLOCK_VERSION, ZERO_HASH};

    fn block_at(height: u64, timestamp: u64, difficulty: f64) -> Block {
        let mut b = Block {
            hash: String::new(),
            prev_hash: ZERO_HASH.to_string(),
            height,
            difficulty,
            version: BLOCK_VERSION.to_string(),
            timestamp,
            messages: vec![],
            nonce: 0,
        };
        b.hash = b.compute_hash();
        b
    }

    fn window(n: usize, spacing_ms: u64, difficulty: f64) -> Vec<Block> {
        (0..n)
            .map(|i| block_at(i as u64 + 1, i as u64 * spacing_ms, difficulty))
            .collect()
    }

    #[test]
    fn test_target_shrinks_with_difficulty() {
        assert!(target_for_difficulty(2000.0) < target_for_difficulty(1000.0));
    }

    #[test]
    fn test_target_rounds_difficulty() {
        assert_eq!(target_for_difficulty(1000.4), target_for_difficulty(1000.0));
        assert_eq!(target_for_difficulty(1000.6), target_for_difficulty(1001.0));
    }

    #[test]
    fn test_meets_target_boundaries() {
        // Difficulty 1 accepts everything.
        assert!(hash_meets_target(&"f".repeat(64), 1.0));
        // A high hash fails a real difficulty.
        assert!(!hash_meets_target(&"f".repeat(64), 1000.0));
        // A tiny hash passes it.
        assert!(hash_meets_target(&format!("{:0>64}", "1"), 1000.0));
        assert!(!hash_meets_target("not hex", 1.0));
    }

    #[test]
    fn test_hash_difficulty_is_a_ratio() {
        let top = hash_difficulty(&"f".repeat(64));
        assert!((top - 1.0).abs() < 1e-9);
        let low = hash_difficulty(&format!("{:0>64}", "1"));
        assert!(low > 0.0 && low < 1e-60);
        assert_eq!(hash_difficulty("zz"), 0.0);
    }

    #[test]
    fn test_base_difficulty_empty_window() {
        assert_eq!(base_difficulty(&[]), 0.0);
    }

    #[test]
    fn test_base_difficulty_on_target_holds() {
        // 10 blocks spanning exactly TARGET_TIME: sway ratio 1.
        let blocks = window(10, TARGET_TIME / 9, 5000.0);
        let base = base_difficulty(&blocks);
        assert!((base - 5000.0).abs() / 5000.0 < 0.01, "base={base}");
    }

    #[test]
    fn test_fast_window_raises_clamped() {
        // Blocks nearly simultaneous: ratio clamps at 0.5, doubling.
        let blocks = window(10, 1, 5000.0);
        assert!((base_difficulty(&blocks) - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn test_slow_window_lowers_clamped() {
        // Window spanning many TARGET_TIMEs: ratio clamps at 2, halving.
        let blocks = window(10, TARGET_TIME, 5000.0);
        assert!((base_difficulty(&blocks) - 2500.0).abs() < 1.0);
    }

    #[test]
    fn test_base_difficulty_floors_at_min() {
        let blocks = window(10, TARGET_TIME, MIN_DIFFICULTY);
        assert_eq!(base_difficulty(&blocks), MIN_DIFFICULTY);
    }

    #[test]
    fn test_required_difficulty_floors_at_min() {
        assert_eq!(required_difficulty(&[], &[]), MIN_DIFFICULTY);
    }

    #[test]
    fn test_median_odd_and_even() {
        let blocks: Vec<Block> = [10u64, 30, 20]
            .iter()
            .enumerate()
            .map(|(i, ts)| block_at(i as u64 + 1, *ts, 1000.0))
            .collect();
        assert_eq!(median_timestamp(&blocks), 20.0);

        let blocks: Vec<Block> = [10u64, 30, 20, 40]
            .iter()
            .enumerate()
            .map(|(i, ts)| block_at(i as u64 + 1, *ts, 1000.0))
            .collect();
        // Mean of the two middle values (20, 30).
        assert_eq!(median_timestamp(&blocks), 25.0);
    }

    #[test]
    fn test_median_uses_last_ten_only() {
        let mut blocks = window(12, 1000, 1000.0);
        // First two blocks are outside the window; shifting them must
        // not change the median.
        blocks[0].timestamp = 0;
        blocks[1].timestamp = 0;
        let a = median_timestamp(&blocks);
        blocks[0].timestamp = 999_999;
        let b = median_timestamp(&blocks);
        assert_eq!(a, b);
    }
}
