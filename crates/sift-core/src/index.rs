//! The compiled, queryable rule index.
//!
//! This is the hot path: every request a page makes is matched here. The
//! index is immutable once built; a reload builds a brand-new one and the
//! match service swaps it in atomically.
//!
//! Candidate selection is two-tier. Host entries (and nothing else) live in
//! a hash set walked over the request host's suffixes. Filter rules are
//! bucketed under one complete token of their pattern, so a query only
//! verifies rules whose token actually occurs in the URL; rules with no
//! usable token land in a small fallback list scanned every time.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::domain::{is_third_party, walk_suffixes};
use crate::hash::{hash_domain, hash_token};
use crate::rule::{FilterRule, HostEntry, Segment};
use crate::types::{PartyScope, ResourceType, RuleRef, Verdict};
use crate::url::{host_position, tokenize, MIN_TOKEN_LEN};

/// Tokens too common to discriminate; used only when nothing better exists.
const WEAK_TOKENS: &[&str] = &["http", "https", "www", "com"];

/// Immutable compiled snapshot of one rule set.
pub struct RuleIndex {
    fingerprint: u64,
    host_entries: Vec<HostEntry>,
    host_lookup: HashMap<u64, Vec<u32>>,
    rules: Vec<FilterRule>,
    buckets: HashMap<u64, Vec<u32>>,
    unbucketed: Vec<u32>,
}

impl RuleIndex {
    /// An index with no rules; blocks nothing.
    pub fn empty() -> Self {
        Self::build(Vec::new(), Vec::new(), 0)
    }

    /// Build an index from parsed entries. Pure and deterministic: the same
    /// inputs always yield identical matching behavior.
    pub fn build(hosts: Vec<HostEntry>, rules: Vec<FilterRule>, fingerprint: u64) -> Self {
        let mut host_lookup: HashMap<u64, Vec<u32>> = HashMap::with_capacity(hosts.len());
        for (id, entry) in hosts.iter().enumerate() {
            host_lookup
                .entry(hash_domain(entry.domain()))
                .or_default()
                .push(id as u32);
        }

        let mut buckets: HashMap<u64, Vec<u32>> = HashMap::new();
        let mut unbucketed = Vec::new();
        for (id, rule) in rules.iter().enumerate() {
            match bucket_token(rule) {
                Some(token) => buckets.entry(token).or_default().push(id as u32),
                None => unbucketed.push(id as u32),
            }
        }

        log::debug!(
            "index built: {} hosts, {} rules ({} unbucketed)",
            hosts.len(),
            rules.len(),
            unbucketed.len()
        );

        Self {
            fingerprint,
            host_entries: hosts,
            host_lookup,
            rules,
            buckets,
            unbucketed,
        }
    }

    #[inline]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    #[inline]
    pub fn host_entry_count(&self) -> usize {
        self.host_entries.len()
    }

    #[inline]
    pub fn filter_rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Total rule count across both tables.
    #[inline]
    pub fn rule_count(&self) -> usize {
        self.host_entries.len() + self.rules.len()
    }

    #[inline]
    pub fn host_entries(&self) -> &[HostEntry] {
        &self.host_entries
    }

    #[inline]
    pub fn filter_rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Human-readable text of the rule behind a verdict.
    pub fn rule_text(&self, rule: RuleRef) -> &str {
        match rule {
            RuleRef::Host(id) => self
                .host_entries
                .get(id as usize)
                .map(|e| e.domain())
                .unwrap_or(""),
            RuleRef::Filter(id) => self
                .rules
                .get(id as usize)
                .map(|r| r.raw_text.as_str())
                .unwrap_or(""),
        }
    }

    /// Match one request. Exceptions beat blocks regardless of which table
    /// or list produced the block.
    pub fn match_request(
        &self,
        request_host: &str,
        request_url: &str,
        page_host: &str,
        resource_type: ResourceType,
    ) -> Verdict {
        let request_host = normalize_host(request_host);
        let page_host = normalize_host(page_host);
        let url = lowercase_if_needed(request_url);

        let mut block: Option<RuleRef> = None;

        // Host entry lookup over the request host and its parents.
        'suffixes: for suffix in walk_suffixes(&request_host) {
            if let Some(ids) = self.host_lookup.get(&hash_domain(suffix)) {
                for &id in ids {
                    if self.host_entries[id as usize].domain() == suffix {
                        block = Some(RuleRef::Host(id));
                        break 'suffixes;
                    }
                }
            }
        }

        // Filter rule lookup via token buckets.
        let host_span = host_position(&url);
        let third_party = is_third_party(&request_host, &page_host);

        let mut tokens = Vec::new();
        tokenize(&url, &mut tokens);
        tokens.sort_unstable();
        tokens.dedup();

        let bucket_lists = tokens
            .iter()
            .filter_map(|t| self.buckets.get(t))
            .chain(std::iter::once(&self.unbucketed));

        for list in bucket_lists {
            for &id in list {
                let rule = &self.rules[id as usize];
                // Once a block is known only exceptions can change the verdict.
                if !rule.is_exception && block.is_some() {
                    continue;
                }
                if !self.rule_matches(rule, &url, host_span, &page_host, third_party, resource_type)
                {
                    continue;
                }
                if rule.is_exception {
                    return Verdict::Allow(RuleRef::Filter(id));
                }
                block = Some(RuleRef::Filter(id));
            }
        }

        match block {
            Some(rule) => Verdict::Block(rule),
            None => Verdict::NoMatch,
        }
    }

    fn rule_matches(
        &self,
        rule: &FilterRule,
        url: &str,
        host_span: Option<(usize, usize)>,
        page_host: &str,
        third_party: bool,
        resource_type: ResourceType,
    ) -> bool {
        if !rule.applies_to_type(resource_type) {
            return false;
        }
        match rule.party {
            PartyScope::Any => {}
            PartyScope::ThirdParty if !third_party => return false,
            PartyScope::FirstParty if third_party => return false,
            _ => {}
        }
        if !domain_scope_allows(rule, page_host) {
            return false;
        }
        rule.pattern.matches(url, host_span)
    }
}

/// `domain=` constraint check against the page host and its ancestors.
fn domain_scope_allows(rule: &FilterRule, page_host: &str) -> bool {
    if !rule.domain_include.is_empty() {
        let included = walk_suffixes(page_host)
            .any(|suffix| rule.domain_include.iter().any(|d| d == suffix));
        if !included {
            return false;
        }
    }
    if !rule.domain_exclude.is_empty() {
        let excluded = walk_suffixes(page_host)
            .any(|suffix| rule.domain_exclude.iter().any(|d| d == suffix));
        if excluded {
            return false;
        }
    }
    true
}

fn normalize_host(host: &str) -> Cow<'_, str> {
    let host = host.trim_end_matches('.');
    if host.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(host.to_ascii_lowercase())
    } else {
        Cow::Borrowed(host)
    }
}

fn lowercase_if_needed(url: &str) -> Cow<'_, str> {
    if url.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(url.to_ascii_lowercase())
    } else {
        Cow::Borrowed(url)
    }
}

// =============================================================================
// Bucket Token Selection
// =============================================================================

/// Pick the token a rule is bucketed under.
///
/// Only a *complete* alphanumeric run qualifies: one bounded on both sides
/// by non-alphanumeric pattern text, a `^` separator, or an anchored edge.
/// Such a run is guaranteed to appear as a whole URL token in any URL the
/// pattern matches, which is what makes bucket probing sound.
fn bucket_token(rule: &FilterRule) -> Option<u64> {
    let segments = rule.pattern.segments();
    let mut best: Option<&str> = None;
    let mut best_weak: Option<&str> = None;

    for (seg_idx, segment) in segments.iter().enumerate() {
        let lit = match segment {
            Segment::Literal(lit) => lit.as_str(),
            _ => continue,
        };
        let bytes = lit.as_bytes();

        let left_edge_closed = match seg_idx.checked_sub(1).map(|i| &segments[i]) {
            Some(Segment::Separator) => true,
            Some(_) => false,
            None => rule.pattern.is_host_anchored() || rule.pattern.is_start_anchored(),
        };
        let right_edge_closed = match segments.get(seg_idx + 1) {
            Some(Segment::Separator) => true,
            Some(_) => false,
            None => rule.pattern.is_end_anchored(),
        };

        let mut run_start = None;
        for i in 0..=bytes.len() {
            let in_run = i < bytes.len() && bytes[i].is_ascii_alphanumeric();
            if in_run {
                if run_start.is_none() {
                    run_start = Some(i);
                }
                continue;
            }
            let Some(start) = run_start.take() else { continue };

            let closed_left = start > 0 || left_edge_closed;
            let closed_right = i < bytes.len() || right_edge_closed;
            let run = &lit[start..i];
            if !closed_left || !closed_right || run.len() < MIN_TOKEN_LEN || run.len() > 64 {
                continue;
            }

            if WEAK_TOKENS.contains(&run) {
                if best_weak.map_or(true, |b| run.len() > b.len()) {
                    best_weak = Some(run);
                }
            } else if best.map_or(true, |b| run.len() > b.len()) {
                best = Some(run);
            }
        }
    }

    best.or(best_weak).map(|t| hash_token(t.as_bytes()))
}
