//! The per-request query façade.
//!
//! Holds the currently published [`RuleIndex`] behind an [`ArcSwap`] so the
//! read path is lock-free: request threads load a reference-counted snapshot,
//! query it, and drop it; a reload installs a new index with one atomic swap
//! and the old snapshot lives until its last in-flight query finishes.
//!
//! User overrides sit in a small mutable table guarded by an `RwLock`.
//! Writes are rare (explicit user action), reads take a shared lock per
//! query, and overrides are consulted before the compiled index: user intent
//! is absolute.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::index::RuleIndex;
use crate::types::{OverrideAction, ResourceType, Verdict};
use crate::url::extract_host;

/// Answer returned to the network layer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDecision {
    pub blocked: bool,
    /// Text of the deciding rule, when one matched.
    pub matched_rule: Option<String>,
}

impl BlockDecision {
    fn allow() -> Self {
        Self {
            blocked: false,
            matched_rule: None,
        }
    }
}

/// Thread-safe query surface over the published index and the override table.
pub struct MatchService {
    published: ArcSwap<RuleIndex>,
    overrides: RwLock<HashMap<String, OverrideAction>>,
}

impl MatchService {
    /// Start with an empty index; nothing is blocked until a compilation
    /// pass publishes.
    pub fn new() -> Self {
        Self::with_index(RuleIndex::empty())
    }

    /// Start from an existing index (e.g. decoded from cache).
    pub fn with_index(index: RuleIndex) -> Self {
        Self {
            published: ArcSwap::from_pointee(index),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Install a freshly built index. Single atomic swap; concurrent queries
    /// see either the old or the new index, never a mix.
    pub fn publish(&self, index: RuleIndex) {
        self.published.store(Arc::new(index));
    }

    /// Snapshot of the currently published index.
    pub fn current(&self) -> Arc<RuleIndex> {
        self.published.load_full()
    }

    /// Should this request be blocked?
    ///
    /// Override table first (keyed on the exact page host), then the
    /// compiled index with its exception-beats-block precedence.
    pub fn is_blocked(
        &self,
        request_url: &str,
        page_url: &str,
        resource_type: ResourceType,
    ) -> BlockDecision {
        let request_host = match extract_host(request_url) {
            Some(host) => host,
            None => return BlockDecision::allow(),
        };
        let page_host = extract_host(page_url).unwrap_or("");

        if let Some((domain, action)) = self.lookup_override(page_host) {
            return match action {
                OverrideAction::Allow => BlockDecision::allow(),
                OverrideAction::Deny => BlockDecision {
                    blocked: true,
                    matched_rule: Some(format!("override:{domain}")),
                },
            };
        }

        let index = self.published.load();
        match index.match_request(request_host, request_url, page_host, resource_type) {
            Verdict::Block(rule) => BlockDecision {
                blocked: true,
                matched_rule: Some(index.rule_text(rule).to_string()),
            },
            Verdict::Allow(rule) => BlockDecision {
                blocked: false,
                matched_rule: Some(index.rule_text(rule).to_string()),
            },
            Verdict::NoMatch => BlockDecision::allow(),
        }
    }

    /// Add or replace the override for a page domain.
    pub fn add_override(&self, domain: &str, action: OverrideAction) {
        let key = normalize_override_key(domain);
        self.overrides.write().insert(key, action);
    }

    /// Remove the override for a page domain. Returns whether one existed.
    pub fn remove_override(&self, domain: &str) -> bool {
        let key = normalize_override_key(domain);
        self.overrides.write().remove(&key).is_some()
    }

    /// Snapshot of the override table, for settings UIs.
    pub fn overrides(&self) -> Vec<(String, OverrideAction)> {
        let table = self.overrides.read();
        let mut entries: Vec<_> = table
            .iter()
            .map(|(domain, action)| (domain.clone(), *action))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Total rules in the published index.
    pub fn rule_count(&self) -> usize {
        self.published.load().rule_count()
    }

    /// Source fingerprint of the published index, hex-encoded.
    pub fn cache_fingerprint(&self) -> String {
        format!("{:016x}", self.published.load().fingerprint())
    }

    fn lookup_override(&self, page_host: &str) -> Option<(String, OverrideAction)> {
        if page_host.is_empty() {
            return None;
        }
        let key = normalize_override_key(page_host);
        let table = self.overrides.read();
        table.get(&key).map(|action| (key, *action))
    }
}

impl Default for MatchService {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_override_key(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}
