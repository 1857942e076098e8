use serde::{Deserialize, Serialize};

use crate::crypto::sha256;
use crate::message::Message;

pub const BLOCK_VERSION: &str = "0.0.1";

/// `prevHash` of a height-1 block.
pub const ZERO_HASH: &str = "0";

/// A proof-of-work block carrying typed asset messages.
///
/// `difficulty` is logically real-valued (the message bonus subtracts
/// fractional hash-difficulties); hashing frames it as `u32` along with
/// height and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub prev_hash: String,
    pub height: u64,
    pub difficulty: f64,
    pub version: String,
    pub timestamp: u64,
    pub messages: Vec<Message>,
    pub nonce: u32,
}

impl Block {
    /// First digest stage: everything except the nonce.
    ///
    /// root = SHA256(prevHash ":" u32LE(height) ":" u32LE(difficulty)
    ///               ":" version ":" u32LE(timestamp) ":" messages ":")
    /// with messages serialized as JSON joined by `\n`. The framing is
    /// byte-exact; height, difficulty and timestamp truncate to 32 bits.
    pub fn hash_root(
        prev_hash: &str,
        height: u64,
        difficulty: f64,
        version: &str,
        timestamp: u64,
        messages: &[Message],
    ) -> [u8; 32] {
        let mut data = Vec::new();
        data.extend_from_slice(prev_hash.as_bytes());
        data.push(b':');
        data.extend_from_slice(&(height as u32).to_le_bytes());
        data.push(b':');
        data.extend_from_slice(&(difficulty.round() as u32).to_le_bytes());
        data.push(b':');
        data.extend_from_slice(version.as_bytes());
        data.push(b':');
        data.extend_from_slice(&(timestamp as u32).to_le_bytes());
        data.push(b':');
        let joined = messages
            .iter()
            .map(|m| serde_json::to_string(m).expect("message serializes to JSON"))
            .collect::<Vec<_>>()
            .join("\n");
        data.extend_from_slice(joined.as_bytes());
        data.push(b':');
        sha256(&data)
    }

    /// Second digest stage: hash = SHA256(root || u32LE(nonce)), hex.
    pub fn hash_with_nonce(root: &[u8; 32], nonce: u32) -> String {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(root);
        data.extend_from_slice(&nonce.to_le_bytes());
        hex::encode(sha256(&data))
    }

    pub fn root(&self) -> [u8; 32] {
        Self::hash_root(
            &self.prev_hash,
            self.height,
            self.difficulty,
            &self.version,
            self.timestamp,
            &self.messages,
        )
    }

    pub fn compute_hash(&self) -> String {
        Self::hash_with_nonce(&self.root(), self.nonce)
    }

    pub fn hash_matches(&self) -> bool {
        self.compute_hash() == self.hash
    }
}
