use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// First 4 bytes of SHA-256, hex encoded. Short enough for socket names.
pub fn checksum8(bytes: &[u8]) -> String {
    let mut full = sha256_hex(bytes);
    full.truncate(8);
    full
}
