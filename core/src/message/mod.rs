use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, keys};
use crate::error::{Rejection, Result};

/// A message is live only in blocks with height
/// `h in [startHeight, startHeight + MESSAGE_TTL)`.
pub const MESSAGE_TTL: usize = 10;

/// Upper bound on messages per block and on the pending-message pool.
pub const MESSAGES_PER_BLOCK_MAX: usize = 10_000;

/// Fixed coinbase payout, in CRD.
pub const COINBASE_QUANTITY: u64 = 100;

/// A signed, typed asset message.
///
/// `payload` holds the canonical JSON bytes exactly as the producer
/// serialized them — the hash binds those bytes, so they are never
/// re-normalized on ingest. `hash` is hex SHA-256 of the payload and
/// `signature` is a hex ed25519 signature over the hash's ASCII hex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub payload: String,
    pub hash: String,
    pub signature: String,
}

/// Decoded payload view. Field order inside `payload` is whatever the
/// producer chose; this enum only reads it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Payload {
    Coinbase {
        asset: String,
        quantity: u64,
        address: String,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Send {
        asset: String,
        quantity: u64,
        src_address: String,
        dst_address: String,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Minter {
        asset: String,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Mint {
        asset: String,
        quantity: u64,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Get {
        address: String,
        asset: String,
        quantity: u64,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Burn {
        asset: String,
        quantity: u64,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Drop {
        address: String,
        asset: String,
        quantity: u64,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Price {
        asset: String,
        price: u64,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
    Buy {
        asset: String,
        quantity: u64,
        price: u64,
        public_key: String,
        start_height: u64,
        timestamp: u64,
    },
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Coinbase { .. } => "coinbase",
            Payload::Send { .. } => "send",
            Payload::Minter { .. } => "minter",
            Payload::Mint { .. } => "mint",
            Payload::Get { .. } => "get",
            Payload::Burn { .. } => "burn",
            Payload::Drop { .. } => "drop",
            Payload::Price { .. } => "price",
            Payload::Buy { .. } => "buy",
        }
    }

    pub fn public_key(&self) -> &str {
        match self {
            Payload::Coinbase { public_key, .. }
            | Payload::Send { public_key, .. }
            | Payload::Minter { public_key, .. }
            | Payload::Mint { public_key, .. }
            | Payload::Get { public_key, .. }
            | Payload::Burn { public_key, .. }
            | Payload::Drop { public_key, .. }
            | Payload::Price { public_key, .. }
            | Payload::Buy { public_key, .. } => public_key,
        }
    }

    pub fn start_height(&self) -> u64 {
        match self {
            Payload::Coinbase { start_height, .. }
            | Payload::Send { start_height, .. }
            | Payload::Minter { start_height, .. }
            | Payload::Mint { start_height, .. }
            | Payload::Get { start_height, .. }
            | Payload::Burn { start_height, .. }
            | Payload::Drop { start_height, .. }
            | Payload::Price { start_height, .. }
            | Payload::Buy { start_height, .. } => *start_height,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Payload::Coinbase { timestamp, .. }
            | Payload::Send { timestamp, .. }
            | Payload::Minter { timestamp, .. }
            | Payload::Mint { timestamp, .. }
            | Payload::Get { timestamp, .. }
            | Payload::Burn { timestamp, .. }
            | Payload::Drop { timestamp, .. }
            | Payload::Price { timestamp, .. }
            | Payload::Buy { timestamp, .. } => *timestamp,
        }
    }

    /// Address derived from the signing public key.
    pub fn signer_address(&self) -> Option<String> {
        keys::address_from_public_key_hex(self.public_key())
    }

    /// The null sender is the well-known coinbase key, required for
    /// `coinbase` and `get`.
    pub fn requires_null_sender(&self) -> bool {
        matches!(self, Payload::Coinbase { .. } | Payload::Get { .. })
    }
}

impl Message {
    /// Serialize a payload canonically, hash it and sign the hash.
    pub fn from_payload(payload: &Payload, key: &SigningKey) -> Self {
        let payload_json =
            serde_json::to_string(payload).expect("payload serializes to JSON");
        let hash = crypto::sha256_hex(payload_json.as_bytes());
        let signature = keys::sign(key, hash.as_bytes());
        Self { payload: payload_json, hash, signature }
    }

    pub fn parsed(&self) -> Result<Payload> {
        serde_json::from_str(&self.payload)
            .map_err(|_| Rejection::invalid("invalid payload"))
    }

    pub fn hash_matches(&self) -> bool {
        crypto::sha256_hex(self.payload.as_bytes()) == self.hash
    }

    /// Self-contained checks: hash binds the payload bytes, the payload
    /// decodes, the sender key matches the type, and the signature
    /// verifies over the payload hash. Contextual rules (TTL, replay,
    /// balances) live in the validator.
    pub fn verify_integrity(&self) -> Result<Payload> {
        if !self.hash_matches() {
            return Err(Rejection::invalid("invalid message hash"));
        }
        let payload = self.parsed()?;
        if payload.requires_null_sender() && !keys::is_null_public_key(payload.public_key()) {
            return Err(Rejection::invalid(format!(
                "{} must be signed by the null key",
                payload.type_name()
            )));
        }
        if !keys::verify(payload.public_key(), self.hash.as_bytes(), &self.signature) {
            return Err(Rejection::invalid("invalid message signature"));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::CRD;

    fn user_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn coinbase_payload(address: &str) -> Payload {
        Payload::Coinbase {
            asset: CRD.to_string(),
            quantity: COINBASE_QUANTITY,
            address: address.to_string(),
            public_key: keys::null_public_key_hex().to_string(),
            start_height: 1,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_payload_json_shape() {
        let key = user_key(1);
        let payload = Payload::Send {
            asset: CRD.to_string(),
            quantity: 40,
            src_address: "src".to_string(),
            dst_address: "dst".to_string(),
            public_key: keys::public_key_hex(&key),
            start_height: 3,
            timestamp: 9,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&payload).unwrap()).unwrap();
        assert_eq!(json["type"], "send");
        assert_eq!(json["srcAddress"], "src");
        assert_eq!(json["startHeight"], 3);
    }

    #[test]
    fn test_from_payload_verifies() {
        let key = user_key(2);
        let payload = Payload::Minter {
            asset: "GOLD".to_string(),
            public_key: keys::public_key_hex(&key),
            start_height: 1,
            timestamp: 5,
        };
        let msg = Message::from_payload(&payload, &key);
        assert_eq!(msg.verify_integrity().unwrap(), payload);
    }

    #[test]
    fn test_tampered_payload_fails_hash() {
        let key = user_key(2);
        let payload = Payload::Mint {
            asset: "GOLD".to_string(),
            quantity: 10,
            public_key: keys::public_key_hex(&key),
            start_height: 1,
            timestamp: 5,
        };
        let mut msg = Message::from_payload(&payload, &key);
        msg.payload = msg.payload.replace("10", "11");
        assert_eq!(
            msg.verify_integrity().unwrap_err(),
            Rejection::invalid("invalid message hash")
        );
    }

    #[test]
    fn test_wrong_signer_fails() {
        let key = user_key(2);
        let payload = Payload::Burn {
            asset: "GOLD".to_string(),
            quantity: 1,
            public_key: keys::public_key_hex(&key),
            start_height: 1,
            timestamp: 5,
        };
        // Signed with a different key than the payload claims.
        let msg = Message::from_payload(&payload, &user_key(3));
        assert_eq!(
            msg.verify_integrity().unwrap_err(),
            Rejection::invalid("invalid message signature")
        );
    }

    #[test]
    fn test_coinbase_requires_null_key() {
        let key = user_key(4);
        let payload = Payload::Coinbase {
            asset: CRD.to_string(),
            quantity: COINBASE_QUANTITY,
            address: "miner".to_string(),
            public_key: keys::public_key_hex(&key),
            start_height: 1,
            timestamp: 5,
        };
        let msg = Message::from_payload(&payload, &key);
        assert!(msg.verify_integrity().is_err());

        let null_signed =
            Message::from_payload(&coinbase_payload("miner"), &keys::null_signing_key());
        assert!(null_signed.verify_integrity().is_ok());
    }

    #[test]
    fn test_payload_bytes_not_renormalized() {
        // A payload with producer-chosen field order must keep its exact
        // bytes through a Message serde round trip.
        let raw = r#"{"timestamp":5,"type":"mint","asset":"GOLD","quantity":2,"publicKey":"ab","startHeight":1}"#;
        let msg = Message {
            payload: raw.to_string(),
            hash: crypto::sha256_hex(raw.as_bytes()),
            signature: String::new(),
        };
        let round: Message =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(round.payload, raw);
        assert!(round.hash_matches());
    }

    #[test]
    fn test_garbage_payload_is_invalid() {
        let msg = Message {
            payload: "not json".to_string(),
            hash: crypto::sha256_hex(b"not json"),
            signature: String::new(),
        };
        assert_eq!(msg.parsed().unwrap_err(), Rejection::invalid("invalid payload"));
    }
}
