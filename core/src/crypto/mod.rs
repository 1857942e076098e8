pub mod keys;

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    digest.into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
