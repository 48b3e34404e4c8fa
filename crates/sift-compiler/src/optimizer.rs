//! Rule set cleanup between parsing and the index build.
//!
//! Real-world subscriptions overlap heavily; dropping exact duplicates
//! keeps the index smaller without changing any verdict.

use std::collections::HashSet;

use sift_core::rule::{FilterRule, HostEntry};

/// Counters from one de-duplication pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Drop filter rules whose matching behavior duplicates an earlier rule.
pub fn dedup_rules(rules: &mut Vec<FilterRule>) -> OptimizeStats {
    let before = rules.len();
    let mut seen: HashSet<RuleKey> = HashSet::with_capacity(before);
    rules.retain(|rule| seen.insert(RuleKey::from(rule)));
    let after = rules.len();

    OptimizeStats {
        before,
        after,
        deduped: before - after,
    }
}

/// Drop repeated host entries, returning how many were removed.
pub fn dedup_hosts(hosts: &mut Vec<HostEntry>) -> usize {
    let before = hosts.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(before);
    hosts.retain(|entry| seen.insert(entry.domain().to_string()));
    before - hosts.len()
}

/// Everything that decides a rule's matching behavior; `raw_text` is
/// deliberately absent so the same rule from two lists still collapses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    is_exception: bool,
    pattern: String,
    type_bits: u16,
    party: u8,
    domain_include: Vec<String>,
    domain_exclude: Vec<String>,
}

impl From<&FilterRule> for RuleKey {
    fn from(rule: &FilterRule) -> Self {
        let mut domain_include = rule.domain_include.clone();
        let mut domain_exclude = rule.domain_exclude.clone();
        domain_include.sort();
        domain_exclude.sort();
        Self {
            is_exception: rule.is_exception,
            pattern: rule.pattern.render(),
            type_bits: rule.resource_types.bits(),
            party: rule.party as u8,
            domain_include,
            domain_exclude,
        }
    }
}
