//! Context-dependent validation for messages and blocks.
//!
//! Message validity depends on the view: with `pending = None` only
//! committed state plus confirming siblings count (the confirmed view,
//! used for block validation and mining); supplying the pending
//! mempool messages folds them in (the unconfirmed view, used for
//! submission). Validation is pure — no check mutates anything.

use crate::asset::{self, CRD};
use crate::blockchain::block::{Block, ZERO_HASH};
use crate::blockchain::consensus;
use crate::error::{Rejection, Result};
use crate::ledger::Ledger;
use crate::message::{Message, Payload, COINBASE_QUANTITY, MESSAGES_PER_BLOCK_MAX, MESSAGE_TTL};

/// Free-mint gate shared by `mint`, `get`, `burn` and `drop`: the
/// subject holds the minter right, or the base asset is priced at 0.
fn may_mint(view: &Ledger, base: &str, subject: &str) -> bool {
    view.current_minter(base) == Some(subject) || view.price(base) == Some(0)
}

/// Prices currently advertised for `asset`: the confirmed price plus
/// any prices set by sibling (and pending, when supplied) messages.
/// A buy never consumes an advertisement.
fn advertised_prices(
    db: &Ledger,
    asset_id: &str,
    siblings: &[Message],
    pending: Option<&[Message]>,
) -> Vec<u64> {
    let mut prices = Vec::new();
    if let Some(p) = db.price(asset_id) {
        prices.push(p);
    }
    let unconfirmed = pending.unwrap_or(&[]);
    for message in siblings.iter().chain(unconfirmed.iter()) {
        if let Ok(Payload::Price { asset, price, .. }) = message.parsed() {
            if asset == asset_id {
                prices.push(price);
            }
        }
    }
    prices
}

fn positive(quantity: u64) -> Result<()> {
    if quantity == 0 {
        return Err(Rejection::invalid("invalid quantity"));
    }
    Ok(())
}

/// Validate one message against a view of the chain.
///
/// `tail_height` is the height of the last confirmed block (0 when the
/// chain is empty); the message would confirm at `tail_height + 1`.
/// `siblings` are the messages preceding it in its candidate block.
pub fn validate_message(
    db: &Ledger,
    tail_height: u64,
    pending: Option<&[Message]>,
    message: &Message,
    siblings: &[Message],
) -> Result<()> {
    let payload = message.verify_integrity()?;

    let next_height = tail_height + 1;
    let start = payload.start_height();
    if next_height < start {
        return Err(Rejection::invalid("start height not reached"));
    }
    if next_height >= start + MESSAGE_TTL as u64 {
        return Err(Rejection::invalid("ttl expired"));
    }

    if db.has_recent_message(&message.hash) {
        return Err(Rejection::soft("message replay"));
    }
    if siblings.iter().any(|s| s.hash == message.hash) {
        return Err(Rejection::soft("duplicate message"));
    }

    let view = db.project(siblings, pending);

    match &payload {
        Payload::Coinbase { asset, quantity, .. } => {
            if asset != CRD {
                return Err(Rejection::invalid("invalid asset"));
            }
            if *quantity != COINBASE_QUANTITY {
                return Err(Rejection::invalid("invalid quantity"));
            }
            let sibling_coinbase = siblings
                .iter()
                .any(|s| matches!(s.parsed(), Ok(Payload::Coinbase { .. })));
            if sibling_coinbase {
                return Err(Rejection::invalid("multiple coinbase messages"));
            }
        }
        Payload::Send { asset, quantity, src_address, .. } => {
            let signer = signer_address(&payload)?;
            if signer != *src_address {
                return Err(Rejection::invalid("invalid address"));
            }
            if !asset::is_valid_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            positive(*quantity)?;
            if asset::is_mint_asset(asset) && *quantity != 1 {
                return Err(Rejection::invalid("invalid quantity"));
            }
            if view.balance(src_address, asset) < *quantity {
                return Err(Rejection::funds("insufficient funds"));
            }
        }
        Payload::Minter { asset, .. } => {
            if !asset::is_base_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            if view.minter_entry(asset).is_some() {
                return Err(Rejection::invalid("minter already claimed"));
            }
        }
        Payload::Mint { asset, quantity, .. } => {
            if !asset::is_basic_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            positive(*quantity)?;
            let signer = signer_address(&payload)?;
            if !may_mint(&view, asset::base_of(asset), &signer) {
                return Err(Rejection::invalid("not the minter"));
            }
        }
        Payload::Get { address, asset, quantity, .. } => {
            if !asset::is_basic_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            positive(*quantity)?;
            if !may_mint(&view, asset::base_of(asset), address) {
                return Err(Rejection::invalid("not the minter"));
            }
        }
        Payload::Burn { asset, quantity, .. } => {
            if !asset::is_basic_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            positive(*quantity)?;
            let signer = signer_address(&payload)?;
            if !may_mint(&view, asset::base_of(asset), &signer) {
                return Err(Rejection::invalid("not the minter"));
            }
            if view.balance(&signer, asset) < *quantity {
                return Err(Rejection::funds("insufficient funds"));
            }
        }
        Payload::Drop { address, asset, quantity, .. } => {
            if !asset::is_basic_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            positive(*quantity)?;
            let signer = signer_address(&payload)?;
            if !may_mint(&view, asset::base_of(asset), &signer) {
                return Err(Rejection::invalid("not the minter"));
            }
            if view.balance(address, asset) < *quantity {
                return Err(Rejection::funds("insufficient funds"));
            }
        }
        Payload::Price { asset, .. } => {
            if !asset::is_base_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            let signer = signer_address(&payload)?;
            if view.current_minter(asset) != Some(signer.as_str()) {
                return Err(Rejection::invalid("not the minter"));
            }
        }
        Payload::Buy { asset, quantity, price, .. } => {
            if !asset::is_base_asset(asset) {
                return Err(Rejection::invalid("invalid asset"));
            }
            positive(*quantity)?;
            positive(*price)?;
            if view.current_minter(asset).is_none() {
                return Err(Rejection::invalid("asset has no minter"));
            }
            if !advertised_prices(db, asset, siblings, pending).contains(price) {
                return Err(Rejection::invalid("invalid price"));
            }
            let signer = signer_address(&payload)?;
            let cost = quantity
                .checked_mul(*price)
                .ok_or_else(|| Rejection::invalid("invalid quantity"))?;
            if view.balance(&signer, CRD) < cost {
                return Err(Rejection::funds("insufficient funds"));
            }
        }
    }

    Ok(())
}

fn signer_address(payload: &Payload) -> Result<String> {
    payload
        .signer_address()
        .ok_or_else(|| Rejection::invalid("invalid public key"))
}

/// Validate a block against the confirmed chain it would extend.
///
/// `chain` is the in-memory window of confirmed blocks (parent last);
/// `db` is the snapshot at the parent. Checks run in order and the
/// first failure wins. Message validation is confirmed-only.
pub fn validate_block(block: &Block, chain: &[Block], db: &Ledger) -> Result<()> {
    if !block.hash_matches() {
        return Err(Rejection::invalid("invalid block hash"));
    }

    let expected_prev = chain.last().map(|b| b.hash.as_str()).unwrap_or(ZERO_HASH);
    if block.prev_hash != expected_prev {
        // Forks surface here first; the chain manager decides what to
        // do with them, so this stays quiet.
        return Err(Rejection::soft("invalid previous hash"));
    }

    let expected_height = chain.last().map(|b| b.height + 1).unwrap_or(1);
    if block.height != expected_height {
        return Err(Rejection::invalid("invalid height"));
    }

    if (block.timestamp as f64) < consensus::median_timestamp(chain) {
        return Err(Rejection::invalid("invalid timestamp"));
    }

    if !consensus::hash_meets_target(&block.hash, block.difficulty) {
        return Err(Rejection::invalid("invalid proof of work"));
    }

    if block.messages.len() > MESSAGES_PER_BLOCK_MAX {
        return Err(Rejection::invalid("too many messages"));
    }

    if block.difficulty < consensus::required_difficulty(chain, &block.messages) {
        return Err(Rejection::invalid("invalid difficulty"));
    }

    let tail_height = block.height - 1;
    for i in 0..block.messages.len() {
        validate_message(db, tail_height, None, &block.messages[i], &block.messages[..i])?;
    }

    Ok(())
}
