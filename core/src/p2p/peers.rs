use std::collections::HashMap;
use std::sync::Mutex;

use rand::seq::SliceRandom;

/// Minimum number of enabled peers the replicator keeps alive.
pub const MIN_NUM_LIVE_PEERS: usize = 10;

/// The peer set. A peer is its URL; the node's own URL is excluded at
/// the door. Peers start disabled and are enabled by the quorum
/// top-up, which owns their listen tasks.
pub struct PeerSet {
    self_url: String,
    peers: Mutex<HashMap<String, bool>>,
}

impl PeerSet {
    pub fn new(self_url: String, initial: Vec<String>) -> Self {
        let set = Self { self_url, peers: Mutex::new(HashMap::new()) };
        for url in initial {
            set.add(url);
        }
        set
    }

    /// Add a peer (disabled). Returns false for duplicates and the
    /// self URL.
    pub fn add(&self, url: String) -> bool {
        if url == self.self_url || url.is_empty() {
            return false;
        }
        let mut peers = self.peers.lock().unwrap();
        if peers.contains_key(&url) {
            return false;
        }
        peers.insert(url, false);
        true
    }

    pub fn remove(&self, url: &str) -> bool {
        self.peers.lock().unwrap().remove(url).is_some()
    }

    pub fn known(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.peers.lock().unwrap().keys().cloned().collect();
        urls.sort();
        urls
    }

    pub fn enabled(&self) -> Vec<String> {
        let peers = self.peers.lock().unwrap();
        let mut urls: Vec<String> = peers
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    pub fn is_enabled(&self, url: &str) -> bool {
        self.peers.lock().unwrap().get(url).copied().unwrap_or(false)
    }

    pub fn disable(&self, url: &str) {
        if let Some(enabled) = self.peers.lock().unwrap().get_mut(url) {
            *enabled = false;
        }
    }

    pub fn disable_all(&self) {
        for enabled in self.peers.lock().unwrap().values_mut() {
            *enabled = false;
        }
    }

    /// Enable disabled peers chosen uniformly at random until the live
    /// quorum is met or the pool is exhausted. Returns the URLs that
    /// just went live (the caller spawns their subscriptions).
    pub fn top_up(&self) -> Vec<String> {
        let mut peers = self.peers.lock().unwrap();
        let live = peers.values().filter(|enabled| **enabled).count();
        if live >= MIN_NUM_LIVE_PEERS {
            return Vec::new();
        }
        let disabled: Vec<String> = peers
            .iter()
            .filter(|(_, enabled)| !**enabled)
            .map(|(url, _)| url.clone())
            .collect();
        let picked: Vec<String> = disabled
            .choose_multiple(&mut rand::thread_rng(), MIN_NUM_LIVE_PEERS - live)
            .cloned()
            .collect();
        for url in &picked {
            peers.insert(url.clone(), true);
        }
        picked
    }
}
