//! SHA-256 checksum service. Payloads handled here are small (a geometry
//! block, a header, a tables blob), so no streaming API is needed.

use sha2::{Digest, Sha256};

pub fn sha256(span: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(span);
    hasher.finalize().into()
}

pub fn try_sha256(span: &[u8], out: &mut [u8; 32]) {
    *out = sha256(span);
}

/// Zero-then-hash discipline for self-referential checksums: write the
/// digest of `block` (with `checksum_range` zeroed first) into
/// `block[checksum_range]`.
pub fn stamp_checksum(block: &mut [u8], checksum_range: std::ops::Range<usize>) {
    block[checksum_range.clone()].fill(0);
    let digest = sha256(block);
    block[checksum_range].copy_from_slice(&digest);
}

/// Verify a self-referential checksum: clone `block`, zero the checksum
/// range, hash, and compare against the bytes recorded at that range in
/// the original block.
pub fn verify_checksum(block: &[u8], checksum_range: std::ops::Range<usize>) -> bool {
    let recorded = &block[checksum_range.clone()];
    let mut clone = block.to_vec();
    clone[checksum_range].fill(0);
    let digest = sha256(&clone);
    digest.as_slice() == recorded
}
