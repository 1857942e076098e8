use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::sync::OnceLock;

use crate::crypto::sha256;

/// The well-known coinbase scalar: first byte `0xFF`, rest zero.
///
/// This is a marker, not a security construct — anyone can derive the
/// signing key from it. Messages carrying its public key are treated as
/// sent by the null sender (coinbase, get).
pub const NULL_KEY_SCALAR: [u8; 32] = {
    let mut scalar = [0u8; 32];
    scalar[0] = 0xFF;
    scalar
};

pub fn null_signing_key() -> SigningKey {
    SigningKey::from_bytes(&NULL_KEY_SCALAR)
}

/// Hex of the public key derived from the null scalar, cached on first use.
pub fn null_public_key_hex() -> &'static str {
    static HEX: OnceLock<String> = OnceLock::new();
    HEX.get_or_init(|| hex::encode(null_signing_key().verifying_key().to_bytes()))
}

pub fn is_null_public_key(pk_hex: &str) -> bool {
    pk_hex == null_public_key_hex()
}

/// Verify an ed25519 signature (both key and signature hex-encoded).
pub fn verify(public_key_hex: &str, msg: &[u8], signature_hex: &str) -> bool {
    let pk_bytes = match hex::decode(public_key_hex) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let pk_array: [u8; 32] = match pk_bytes.as_slice().try_into() {
        Ok(arr) => arr,
        Err(_) => return false,
    };
    let public_key = match VerifyingKey::from_bytes(&pk_array) {
        Ok(pk) => pk,
        Err(_) => return false,
    };

    let sig_bytes = match hex::decode(signature_hex) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let sig_array: [u8; 64] = match sig_bytes.as_slice().try_into() {
        Ok(arr) => arr,
        Err(_) => return false,
    };

    public_key.verify(msg, &Signature::from_bytes(&sig_array)).is_ok()
}

pub fn sign(key: &SigningKey, msg: &[u8]) -> String {
    hex::encode(key.sign(msg).to_bytes())
}

pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

/// Address derivation: Base58 of SHA-256 of the public key bytes.
pub fn address_from_public_key_hex(pk_hex: &str) -> Option<String> {
    let pk_bytes = hex::decode(pk_hex).ok()?;
    Some(bs58::encode(sha256(&pk_bytes)).into_string())
}
