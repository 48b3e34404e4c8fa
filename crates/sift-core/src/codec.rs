//! Binary cache codec for the compiled rule index.
//!
//! The blob stores the parsed records, not the built lookup structures:
//! [`RuleIndex::build`] is deterministic, so rebuilding on decode yields a
//! match-equivalent index while keeping the format small and trivially
//! validated. All integers are little-endian.
//!
//! Decoding trusts nothing: magic and version are checked before any record
//! is touched, the payload checksum is verified, and every length and count
//! is bounded against the bytes remaining. A truncated or tampered blob
//! yields [`CacheError::Corrupt`], never a panic or an oversized allocation.

use crate::hash::hash64;
use crate::index::RuleIndex;
use crate::rule::{FilterRule, HostEntry, Pattern};
use crate::types::{PartyScope, ResourceType};

/// Magic bytes: "SFB1"
pub const CACHE_MAGIC: [u8; 4] = [0x53, 0x46, 0x42, 0x31];

/// Current cache format version.
pub const CACHE_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 32;

const CHECKSUM_SEED: u64 = 0x5eed_cac4_e001;

/// Rule record flag bits.
mod rule_flags {
    pub const EXCEPTION: u8 = 1 << 0;
    pub const HOST_ANCHOR: u8 = 1 << 1;
    pub const START_ANCHOR: u8 = 1 << 2;
    pub const END_ANCHOR: u8 = 1 << 3;
}

/// Error type for cache decoding.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Truncated data, bad magic, checksum mismatch, or malformed records.
    #[error("corrupt cache blob: {0}")]
    Corrupt(&'static str),
    /// The blob was written by a different engine version.
    #[error("cache format version {found}, expected {expected}")]
    VersionMismatch { found: u16, expected: u16 },
}

// =============================================================================
// Encoding
// =============================================================================

/// Serialize an index into a cache blob.
pub fn encode(index: &RuleIndex) -> Vec<u8> {
    let mut payload = Vec::new();

    for entry in index.host_entries() {
        write_str16(&mut payload, entry.domain());
    }

    for rule in index.filter_rules() {
        let mut flags = 0u8;
        if rule.is_exception {
            flags |= rule_flags::EXCEPTION;
        }
        if rule.pattern.is_host_anchored() {
            flags |= rule_flags::HOST_ANCHOR;
        }
        if rule.pattern.is_start_anchored() {
            flags |= rule_flags::START_ANCHOR;
        }
        if rule.pattern.is_end_anchored() {
            flags |= rule_flags::END_ANCHOR;
        }
        payload.push(flags);
        payload.push(rule.party as u8);
        payload.extend_from_slice(&rule.resource_types.bits().to_le_bytes());
        write_str16(&mut payload, &rule.pattern.render());
        payload.extend_from_slice(&(rule.domain_include.len() as u16).to_le_bytes());
        for domain in &rule.domain_include {
            write_str16(&mut payload, domain);
        }
        payload.extend_from_slice(&(rule.domain_exclude.len() as u16).to_le_bytes());
        for domain in &rule.domain_exclude {
            write_str16(&mut payload, domain);
        }
        write_str16(&mut payload, &rule.raw_text);
    }

    let mut blob = Vec::with_capacity(HEADER_SIZE + payload.len());
    blob.extend_from_slice(&CACHE_MAGIC);
    blob.extend_from_slice(&CACHE_VERSION.to_le_bytes());
    blob.extend_from_slice(&0u16.to_le_bytes()); // flags, reserved
    blob.extend_from_slice(&index.fingerprint().to_le_bytes());
    blob.extend_from_slice(&hash64(&payload, CHECKSUM_SEED).to_le_bytes());
    blob.extend_from_slice(&(index.host_entry_count() as u32).to_le_bytes());
    blob.extend_from_slice(&(index.filter_rule_count() as u32).to_le_bytes());
    debug_assert_eq!(blob.len(), HEADER_SIZE);
    blob.extend_from_slice(&payload);
    blob
}

fn write_str16(out: &mut Vec<u8>, s: &str) {
    let len = s.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&s.as_bytes()[..len]);
}

// =============================================================================
// Decoding
// =============================================================================

/// Deserialize a cache blob back into a match-equivalent [`RuleIndex`].
pub fn decode(blob: &[u8]) -> Result<RuleIndex, CacheError> {
    if blob.len() < HEADER_SIZE {
        return Err(CacheError::Corrupt("shorter than header"));
    }
    if blob[0..4] != CACHE_MAGIC {
        return Err(CacheError::Corrupt("bad magic"));
    }

    let version = u16::from_le_bytes([blob[4], blob[5]]);
    if version != CACHE_VERSION {
        return Err(CacheError::VersionMismatch {
            found: version,
            expected: CACHE_VERSION,
        });
    }

    let fingerprint = read_u64(blob, 8);
    let checksum = read_u64(blob, 16);
    let host_count = read_u32(blob, 24) as usize;
    let rule_count = read_u32(blob, 28) as usize;

    let payload = &blob[HEADER_SIZE..];
    if hash64(payload, CHECKSUM_SEED) != checksum {
        return Err(CacheError::Corrupt("checksum mismatch"));
    }

    let mut reader = Reader { data: payload, pos: 0 };

    // Every host record is at least 2 bytes, every rule at least 12; a count
    // larger than the payload could ever hold is rejected before allocating.
    if host_count > payload.len() / 2 || rule_count > payload.len() / 12 {
        return Err(CacheError::Corrupt("counts exceed payload"));
    }

    let mut hosts = Vec::with_capacity(host_count);
    for _ in 0..host_count {
        hosts.push(HostEntry::new(reader.read_str16()?));
    }

    let mut rules = Vec::with_capacity(rule_count);
    for _ in 0..rule_count {
        rules.push(read_rule(&mut reader)?);
    }

    if !reader.at_end() {
        return Err(CacheError::Corrupt("trailing bytes"));
    }

    Ok(RuleIndex::build(hosts, rules, fingerprint))
}

fn read_rule(reader: &mut Reader<'_>) -> Result<FilterRule, CacheError> {
    let flags = reader.read_u8()?;
    let party = PartyScope::try_from(reader.read_u8()?)
        .map_err(|_| CacheError::Corrupt("bad party scope"))?;
    let type_bits = reader.read_u16()?;
    let resource_types = ResourceType::from_bits(type_bits)
        .ok_or(CacheError::Corrupt("bad resource type mask"))?;

    let pattern_text = reader.read_str16()?;
    let pattern = Pattern::parse(pattern_text).ok_or(CacheError::Corrupt("empty pattern"))?;
    if pattern.is_host_anchored() != (flags & rule_flags::HOST_ANCHOR != 0)
        || pattern.is_start_anchored() != (flags & rule_flags::START_ANCHOR != 0)
        || pattern.is_end_anchored() != (flags & rule_flags::END_ANCHOR != 0)
    {
        return Err(CacheError::Corrupt("anchor flags disagree with pattern"));
    }

    let include_count = reader.read_u16()? as usize;
    let mut domain_include = Vec::with_capacity(include_count.min(reader.remaining() / 2));
    for _ in 0..include_count {
        domain_include.push(reader.read_str16()?.to_string());
    }
    let exclude_count = reader.read_u16()? as usize;
    let mut domain_exclude = Vec::with_capacity(exclude_count.min(reader.remaining() / 2));
    for _ in 0..exclude_count {
        domain_exclude.push(reader.read_str16()?.to_string());
    }

    let raw_text = reader.read_str16()?.to_string();

    Ok(FilterRule {
        pattern,
        is_exception: flags & rule_flags::EXCEPTION != 0,
        domain_include,
        domain_exclude,
        resource_types,
        party,
        raw_text,
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheError> {
        if self.remaining() < n {
            return Err(CacheError::Corrupt("record overruns payload"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CacheError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CacheError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_str16(&mut self) -> Result<&'a str, CacheError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| CacheError::Corrupt("invalid utf-8"))
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Verdict;

    fn sample_index() -> RuleIndex {
        let hosts = vec![HostEntry::new("ads.example.com"), HostEntry::new("track.io")];
        let rules = vec![
            FilterRule {
                pattern: Pattern::parse("||tracker.net^").unwrap(),
                is_exception: false,
                domain_include: Vec::new(),
                domain_exclude: Vec::new(),
                resource_types: ResourceType::empty(),
                party: PartyScope::ThirdParty,
                raw_text: "||tracker.net^$third-party".to_string(),
            },
            FilterRule {
                pattern: Pattern::parse("||tracker.net/ok^").unwrap(),
                is_exception: true,
                domain_include: vec!["example.com".to_string()],
                domain_exclude: vec!["evil.example.com".to_string()],
                resource_types: ResourceType::SCRIPT | ResourceType::XHR,
                party: PartyScope::Any,
                raw_text: "@@||tracker.net/ok^$script,xmlhttprequest,domain=example.com|~evil.example.com".to_string(),
            },
        ];
        RuleIndex::build(hosts, rules, 0xfeed_beef)
    }

    fn verdicts(index: &RuleIndex) -> Vec<Verdict> {
        let queries = [
            ("ads.example.com", "http://ads.example.com/x", "page.com", ResourceType::IMAGE),
            ("sub.track.io", "http://sub.track.io/y", "page.com", ResourceType::SCRIPT),
            ("tracker.net", "http://tracker.net/z", "othersite.com", ResourceType::SCRIPT),
            ("tracker.net", "http://tracker.net/z", "tracker.net", ResourceType::SCRIPT),
            ("tracker.net", "http://tracker.net/ok", "example.com", ResourceType::SCRIPT),
            ("clean.org", "http://clean.org/a", "page.com", ResourceType::OTHER),
        ];
        queries
            .iter()
            .map(|(host, url, page, ty)| index.match_request(host, url, page, *ty))
            .collect()
    }

    #[test]
    fn round_trip_is_match_equivalent() {
        let index = sample_index();
        let blob = encode(&index);
        let decoded = decode(&blob).expect("decode should succeed");

        assert_eq!(decoded.fingerprint(), index.fingerprint());
        assert_eq!(decoded.host_entry_count(), index.host_entry_count());
        assert_eq!(decoded.filter_rule_count(), index.filter_rule_count());
        assert_eq!(verdicts(&decoded), verdicts(&index));
    }

    #[test]
    fn truncation_anywhere_is_corrupt_not_panic() {
        let blob = encode(&sample_index());
        for len in 0..blob.len() {
            match decode(&blob[..len]) {
                Err(CacheError::Corrupt(_)) => {}
                Err(CacheError::VersionMismatch { .. }) => {
                    panic!("truncated blob misread as version issue at {len}")
                }
                Ok(_) => panic!("truncated blob decoded at {len}"),
            }
        }
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut blob = encode(&sample_index());
        blob[0] ^= 0xFF;
        assert!(matches!(decode(&blob), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn version_bump_is_version_mismatch() {
        let mut blob = encode(&sample_index());
        blob[4] = 0x7F;
        assert!(matches!(
            decode(&blob),
            Err(CacheError::VersionMismatch { found: 0x7F, .. })
        ));
    }

    #[test]
    fn payload_tampering_is_corrupt() {
        let mut blob = encode(&sample_index());
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(decode(&blob), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn adversarial_count_does_not_allocate() {
        // Claim 4 billion host entries in an otherwise tiny blob.
        let mut blob = encode(&RuleIndex::empty());
        blob[24..28].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&blob), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn empty_index_round_trips() {
        let blob = encode(&RuleIndex::empty());
        let decoded = decode(&blob).expect("empty blob decodes");
        assert_eq!(decoded.rule_count(), 0);
    }
}
