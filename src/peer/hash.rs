use sha2::{Digest, Sha256};

/// SHA-256 applied `rounds` times to `payload`; the first four bytes of the
/// final digest as a little-endian `u32`.
pub fn digest_rounds(payload: &str, rounds: u32) -> u32 {
    if rounds == 0 {
        return le_prefix(payload.as_bytes());
    }
    let mut digest = Sha256::digest(payload.as_bytes());
    for _ in 1..rounds {
        digest = Sha256::digest(digest);
    }
    le_prefix(&digest)
}

/// Up to four leading bytes, zero-padded, as little-endian.
fn le_prefix(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}
