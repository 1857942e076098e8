//! The state projector: pure functions mapping (state, messages) to new
//! state, plus the balance/minter/price queries the validators and RPC
//! layer read through.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::asset::{self, CRD};
use crate::error::{Rejection, Result};
use crate::message::{Message, Payload, MESSAGE_TTL};

/// Confirmed chain state. One snapshot per block is kept on the undo
/// stack; queries against pending state overlay mempool messages via
/// [`Ledger::project`].
///
/// `prices` values of `None` mean +infinity (JSON `null`); the `CRD`
/// entries in `minters` and `prices` are pinned at construction and
/// never reassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    pub balances: HashMap<String, HashMap<String, u64>>,
    pub minters: HashMap<String, Option<String>>,
    pub prices: HashMap<String, Option<u64>>,
    pub message_hashes: VecDeque<HashSet<String>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        let mut minters = HashMap::new();
        minters.insert(CRD.to_string(), None);
        let mut prices = HashMap::new();
        prices.insert(CRD.to_string(), None);
        Self {
            balances: HashMap::new(),
            minters,
            prices,
            message_hashes: VecDeque::new(),
        }
    }

    // ── Queries ──

    pub fn balance(&self, address: &str, asset_id: &str) -> u64 {
        self.balances
            .get(address)
            .and_then(|assets| assets.get(asset_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn balances_of(&self, address: &str) -> HashMap<String, u64> {
        self.balances.get(address).cloned().unwrap_or_default()
    }

    /// The minter map entry: `None` = unclaimed, `Some(None)` = claimed
    /// by nobody (only `CRD`), `Some(Some(addr))` = claimed.
    pub fn minter_entry(&self, base: &str) -> Option<&Option<String>> {
        self.minters.get(base)
    }

    pub fn current_minter(&self, base: &str) -> Option<&str> {
        self.minters.get(base).and_then(|m| m.as_deref())
    }

    /// Latest advertised price; `None` covers both +infinity and
    /// never-priced assets.
    pub fn price(&self, base: &str) -> Option<u64> {
        self.prices.get(base).copied().flatten()
    }

    pub fn base_assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = self.minters.keys().cloned().collect();
        assets.sort();
        assets
    }

    /// Replay protection: true if the hash appears in any of the last
    /// `MESSAGE_TTL` confirmed blocks.
    pub fn has_recent_message(&self, hash: &str) -> bool {
        self.message_hashes.iter().any(|set| set.contains(hash))
    }

    // ── Mutation ──

    fn credit(&mut self, address: &str, asset_id: &str, quantity: u64) -> Result<()> {
        let entry = self
            .balances
            .entry(address.to_string())
            .or_default()
            .entry(asset_id.to_string())
            .or_insert(0);
        *entry = entry
            .checked_add(quantity)
            .ok_or_else(|| Rejection::invalid("balance overflow"))?;
        Ok(())
    }

    /// Debit with pruning: zero balances lose their asset key, emptied
    /// addresses lose their sub-map.
    fn debit(&mut self, address: &str, asset_id: &str, quantity: u64) -> Result<()> {
        if quantity == 0 {
            return Ok(());
        }
        if self.balance(address, asset_id) < quantity {
            return Err(Rejection::funds("insufficient funds"));
        }
        let assets = self
            .balances
            .get_mut(address)
            .ok_or_else(|| Rejection::funds("insufficient funds"))?;
        let remaining = assets[asset_id] - quantity;
        if remaining == 0 {
            assets.remove(asset_id);
        } else {
            assets.insert(asset_id.to_string(), remaining);
        }
        if assets.is_empty() {
            self.balances.remove(address);
        }
        Ok(())
    }

    fn signer_of(payload: &Payload) -> Result<String> {
        payload
            .signer_address()
            .ok_or_else(|| Rejection::invalid("invalid public key"))
    }

    /// Apply one message's state transition. Checks happen before any
    /// mutation, so a rejected message leaves the state untouched.
    pub fn apply_message(&mut self, message: &Message) -> Result<()> {
        let payload = message.parsed()?;
        match &payload {
            Payload::Coinbase { asset, quantity, address, .. } => {
                self.credit(address, asset, *quantity)?;
            }
            Payload::Send { asset, quantity, src_address, dst_address, .. } => {
                self.debit(src_address, asset, *quantity)?;
                self.credit(dst_address, asset, *quantity)?;
                if asset::is_mint_asset(asset) {
                    // Transferring X:mint hands over the right to mint X.
                    self.minters
                        .insert(asset::base_of(asset).to_string(), Some(dst_address.clone()));
                }
            }
            Payload::Mint { asset, quantity, .. } => {
                let signer = Self::signer_of(&payload)?;
                self.credit(&signer, asset, *quantity)?;
            }
            Payload::Get { address, asset, quantity, .. } => {
                self.credit(address, asset, *quantity)?;
            }
            Payload::Burn { asset, quantity, .. } => {
                let signer = Self::signer_of(&payload)?;
                self.debit(&signer, asset, *quantity)?;
            }
            Payload::Drop { address, asset, quantity, .. } => {
                self.debit(address, asset, *quantity)?;
            }
            Payload::Minter { asset, .. } => {
                let signer = Self::signer_of(&payload)?;
                self.credit(&signer, &asset::mint_asset(asset), 1)?;
                self.minters.insert(asset.clone(), Some(signer));
            }
            Payload::Price { asset, price, .. } => {
                self.prices.insert(asset.clone(), Some(*price));
            }
            Payload::Buy { asset, quantity, price, .. } => {
                let buyer = Self::signer_of(&payload)?;
                let cost = quantity
                    .checked_mul(*price)
                    .ok_or_else(|| Rejection::invalid("invalid quantity"))?;
                let minter = self
                    .current_minter(asset)
                    .ok_or_else(|| Rejection::invalid("asset has no minter"))?
                    .to_string();
                // A self-buy nets out; the proceeds credit lands first.
                let available = self.balance(&buyer, CRD)
                    + if minter == buyer { cost } else { 0 };
                if available < cost {
                    return Err(Rejection::funds("insufficient funds"));
                }
                self.credit(&minter, CRD, cost)?;
                self.debit(&buyer, CRD, cost)?;
                self.credit(&buyer, asset, *quantity)?;
            }
        }
        Ok(())
    }

    /// Record a committed block's message hashes for replay rejection,
    /// keeping at most `MESSAGE_TTL` layers.
    pub fn note_block_hashes(&mut self, messages: &[Message]) {
        let set: HashSet<String> = messages.iter().map(|m| m.hash.clone()).collect();
        self.message_hashes.push_back(set);
        while self.message_hashes.len() > MESSAGE_TTL {
            self.message_hashes.pop_front();
        }
    }

    /// Transient view: the snapshot with confirming siblings applied in
    /// order, then (for the unconfirmed view) pending mempool messages.
    /// Messages that no longer apply are skipped; admission is the
    /// authoritative gate.
    pub fn project(&self, siblings: &[Message], pending: Option<&[Message]>) -> Ledger {
        let mut view = self.clone();
        for message in siblings {
            let _ = view.apply_message(message);
        }
        if let Some(pending) = pending {
            for message in pending {
                let _ = view.apply_message(message);
            }
        }
        view
    }

    /// Total supply of one asset across all addresses.
    pub fn total_supply(&self, asset_id: &str) -> u64 {
        self.balances
            .values()
            .filter_map(|assets| assets.get(asset_id))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys;
    use crate::message::COINBASE_QUANTITY;
    use ed25519_dalek::SigningKey;

    fn user_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn addr(key: &SigningKey) -> String {
        keys::address_from_public_key_hex(&keys::public_key_hex(key)).unwrap()
    }

    fn signed(payload: Payload, key: &SigningKey) -> Message {
        Message::from_payload(&payload, key)
    }

    fn coinbase(address: &str, quantity: u64) -> Message {
        signed(
            Payload::Coinbase {
                asset: CRD.to_string(),
                quantity,
                address: address.to_string(),
                public_key: keys::null_public_key_hex().to_string(),
                start_height: 1,
                timestamp: 0,
            },
            &keys::null_signing_key(),
        )
    }

    #[test]
    fn test_new_pins_crd() {
        let db = Ledger::new();
        assert_eq!(db.minter_entry(CRD), Some(&None));
        assert_eq!(db.price(CRD), None);
    }

    #[test]
    fn test_coinbase_credits() {
        let mut db = Ledger::new();
        db.apply_message(&coinbase("A", COINBASE_QUANTITY)).unwrap();
        assert_eq!(db.balance("A", CRD), 100);
    }

    #[test]
    fn test_send_moves_and_prunes() {
        let key = user_key(1);
        let a = addr(&key);
        let mut db = Ledger::new();
        db.apply_message(&coinbase(&a, 100)).unwrap();

        let send = signed(
            Payload::Send {
                asset: CRD.to_string(),
                quantity: 100,
                src_address: a.clone(),
                dst_address: "B".to_string(),
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        );
        db.apply_message(&send).unwrap();
        assert_eq!(db.balance(&a, CRD), 0);
        assert_eq!(db.balance("B", CRD), 100);
        // Emptied address sub-map is pruned entirely.
        assert!(!db.balances.contains_key(&a));
    }

    #[test]
    fn test_send_insufficient_is_rejected_without_effect() {
        let key = user_key(1);
        let a = addr(&key);
        let mut db = Ledger::new();
        db.apply_message(&coinbase(&a, 50)).unwrap();
        let send = signed(
            Payload::Send {
                asset: CRD.to_string(),
                quantity: 100,
                src_address: a.clone(),
                dst_address: "B".to_string(),
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        );
        let err = db.apply_message(&send).unwrap_err();
        assert_eq!(err.status, 402);
        assert_eq!(db.balance(&a, CRD), 50);
        assert_eq!(db.balance("B", CRD), 0);
    }

    #[test]
    fn test_minter_claim_creates_mint_unit() {
        let key = user_key(2);
        let a = addr(&key);
        let mut db = Ledger::new();
        let claim = signed(
            Payload::Minter {
                asset: "GOLD".to_string(),
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        );
        db.apply_message(&claim).unwrap();
        assert_eq!(db.current_minter("GOLD"), Some(a.as_str()));
        assert_eq!(db.balance(&a, "GOLD:mint"), 1);
    }

    #[test]
    fn test_mint_asset_transfer_reassigns_minter() {
        let key = user_key(2);
        let a = addr(&key);
        let mut db = Ledger::new();
        db.apply_message(&signed(
            Payload::Minter {
                asset: "GOLD".to_string(),
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        ))
        .unwrap();

        let transfer = signed(
            Payload::Send {
                asset: "GOLD:mint".to_string(),
                quantity: 1,
                src_address: a.clone(),
                dst_address: "B".to_string(),
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        );
        db.apply_message(&transfer).unwrap();
        assert_eq!(db.current_minter("GOLD"), Some("B"));
        assert_eq!(db.balance("B", "GOLD:mint"), 1);
        assert_eq!(db.balance(&a, "GOLD:mint"), 0);
    }

    #[test]
    fn test_price_and_buy() {
        let minter_key = user_key(3);
        let buyer_key = user_key(4);
        let m = addr(&minter_key);
        let b = addr(&buyer_key);
        let mut db = Ledger::new();
        db.apply_message(&coinbase(&b, 100)).unwrap();
        db.apply_message(&signed(
            Payload::Minter {
                asset: "GOLD".to_string(),
                public_key: keys::public_key_hex(&minter_key),
                start_height: 1,
                timestamp: 0,
            },
            &minter_key,
        ))
        .unwrap();
        db.apply_message(&signed(
            Payload::Price {
                asset: "GOLD".to_string(),
                price: 5,
                public_key: keys::public_key_hex(&minter_key),
                start_height: 1,
                timestamp: 0,
            },
            &minter_key,
        ))
        .unwrap();
        assert_eq!(db.price("GOLD"), Some(5));

        db.apply_message(&signed(
            Payload::Buy {
                asset: "GOLD".to_string(),
                quantity: 10,
                price: 5,
                public_key: keys::public_key_hex(&buyer_key),
                start_height: 1,
                timestamp: 0,
            },
            &buyer_key,
        ))
        .unwrap();
        assert_eq!(db.balance(&b, CRD), 50);
        assert_eq!(db.balance(&b, "GOLD"), 10);
        assert_eq!(db.balance(&m, CRD), 50);
    }

    #[test]
    fn test_burn_and_drop_prune() {
        let key = user_key(5);
        let a = addr(&key);
        let mut db = Ledger::new();
        db.apply_message(&signed(
            Payload::Mint {
                asset: "GOLD".to_string(),
                quantity: 3,
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        ))
        .unwrap();
        db.apply_message(&signed(
            Payload::Burn {
                asset: "GOLD".to_string(),
                quantity: 2,
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        ))
        .unwrap();
        assert_eq!(db.balance(&a, "GOLD"), 1);

        db.apply_message(&signed(
            Payload::Drop {
                address: a.clone(),
                asset: "GOLD".to_string(),
                quantity: 1,
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        ))
        .unwrap();
        assert!(!db.balances.contains_key(&a));
    }

    #[test]
    fn test_message_hash_window_trims() {
        let mut db = Ledger::new();
        for i in 0..15u8 {
            let m = coinbase(&format!("A{i}"), 100);
            db.note_block_hashes(std::slice::from_ref(&m));
        }
        assert_eq!(db.message_hashes.len(), MESSAGE_TTL);
        let old = coinbase("A0", 100);
        let recent = coinbase("A14", 100);
        assert!(!db.has_recent_message(&old.hash));
        assert!(db.has_recent_message(&recent.hash));
    }

    #[test]
    fn test_send_conserves_supply() {
        let key = user_key(6);
        let a = addr(&key);
        let mut db = Ledger::new();
        db.apply_message(&coinbase(&a, 100)).unwrap();
        let before = db.total_supply(CRD);
        db.apply_message(&signed(
            Payload::Send {
                asset: CRD.to_string(),
                quantity: 40,
                src_address: a,
                dst_address: "B".to_string(),
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        ))
        .unwrap();
        assert_eq!(db.total_supply(CRD), before);
    }

    #[test]
    fn test_project_overlays_without_mutating() {
        let key = user_key(7);
        let a = addr(&key);
        let mut db = Ledger::new();
        db.apply_message(&coinbase(&a, 100)).unwrap();

        let pending = signed(
            Payload::Send {
                asset: CRD.to_string(),
                quantity: 30,
                src_address: a.clone(),
                dst_address: "B".to_string(),
                public_key: keys::public_key_hex(&key),
                start_height: 1,
                timestamp: 0,
            },
            &key,
        );
        let view = db.project(&[], Some(std::slice::from_ref(&pending)));
        assert_eq!(view.balance(&a, CRD), 70);
        assert_eq!(db.balance(&a, CRD), 100);
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let key = user_key(8);
        let mut db = Ledger::new();
        db.apply_message(&coinbase(&addr(&key), 100)).unwrap();
        db.note_block_hashes(&[coinbase("X", 100)]);
        let json = serde_json::to_string(&db).unwrap();
        let back: Ledger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, db);
    }
}
