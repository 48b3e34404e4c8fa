//! Hash helpers for the Siftblock engine.
//!
//! All lookups key on 64-bit XxHash values: domain sets, pattern token
//! buckets, the source fingerprint and the cache payload checksum. Distinct
//! seeds keep the key spaces independent.

use std::hash::Hasher;

use twox_hash::XxHash64;

const DOMAIN_SEED: u64 = 0x5eed_d0_0d_0001;
const TOKEN_SEED: u64 = 0x5eed_d0_0d_0002;
const FINGERPRINT_SEED: u64 = 0x5eed_d0_0d_0003;

/// Hash raw bytes with the given seed.
#[inline]
pub fn hash64(data: &[u8], seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(data);
    hasher.finish()
}

/// Hash a domain for lookup in the host entry set.
///
/// Lowercases ASCII on the fly so lookups are case-insensitive without an
/// allocation on the hot path.
#[inline]
pub fn hash_domain(domain: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(DOMAIN_SEED);
    let mut buf = [0u8; 64];
    let mut filled = 0;

    for &b in domain.as_bytes() {
        buf[filled] = b.to_ascii_lowercase();
        filled += 1;
        if filled == buf.len() {
            hasher.write(&buf);
            filled = 0;
        }
    }
    hasher.write(&buf[..filled]);
    hasher.finish()
}

/// Hash a URL token (already lowercased) for bucket probing.
#[inline]
pub fn hash_token(token: &[u8]) -> u64 {
    hash64(token, TOKEN_SEED)
}

/// Incremental fingerprint over filter list sources.
///
/// Feed each source's identity and bytes in order; the result changes if any
/// source is renamed, reordered, revised or edited.
pub struct Fingerprint {
    hasher: XxHash64,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self {
            hasher: XxHash64::with_seed(FINGERPRINT_SEED),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        // Length-prefix every field so field boundaries can't alias.
        self.hasher.write(&(data.len() as u64).to_le_bytes());
        self.hasher.write(data);
    }

    pub fn finish(self) -> u64 {
        self.hasher.finish()
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}
