//! Rule representations: host entries, filter rules, and URL patterns.
//!
//! A pattern is compiled once at parse time into a flat segment list and
//! matched directly against the (lowercased) request URL. Anchors are kept
//! out of the segment list so the matcher can pick candidate start positions
//! before any segment work happens.

use crate::types::{PartyScope, ResourceType};
use crate::url::is_separator;

// =============================================================================
// Host Entry
// =============================================================================

/// A bare domain from a hosts-style source: block every request whose host
/// equals this domain or is a subdomain of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    domain: String,
}

impl HostEntry {
    /// Lowercases and strips a trailing dot. Immutable afterwards.
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.trim_end_matches('.').to_ascii_lowercase(),
        }
    }

    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

// =============================================================================
// Pattern
// =============================================================================

/// One piece of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, stored lowercased.
    Literal(String),
    /// `*`: any run of characters, including none.
    Wildcard,
    /// `^`: one separator character, or the end of the URL.
    Separator,
}

/// A compiled URL pattern: anchor flags plus a segment list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    text: String,
    segments: Vec<Segment>,
    host_anchored: bool,
    start_anchored: bool,
    end_anchored: bool,
}

impl Pattern {
    /// Compile pattern text (with anchor markers) into a [`Pattern`].
    ///
    /// Returns `None` when nothing remains once the anchor markers are
    /// stripped; a bare `*` is still a valid match-everything pattern.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut text = raw;
        let mut host_anchored = false;
        let mut start_anchored = false;
        let mut end_anchored = false;

        if let Some(rest) = text.strip_prefix("||") {
            host_anchored = true;
            text = rest;
        } else if let Some(rest) = text.strip_prefix('|') {
            start_anchored = true;
            text = rest;
        }
        if let Some(rest) = text.strip_suffix('|') {
            end_anchored = true;
            text = rest;
        }

        if text.is_empty() {
            return None;
        }

        let text = text.to_ascii_lowercase();
        let mut segments = Vec::new();
        let mut literal = String::new();
        for ch in text.chars() {
            match ch {
                '*' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if segments.last() != Some(&Segment::Wildcard) {
                        segments.push(Segment::Wildcard);
                    }
                }
                '^' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Separator);
                }
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Some(Self {
            text,
            segments,
            host_anchored,
            start_anchored,
            end_anchored,
        })
    }

    /// The pattern source text with anchor markers restored.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.text.len() + 3);
        if self.host_anchored {
            out.push_str("||");
        } else if self.start_anchored {
            out.push('|');
        }
        out.push_str(&self.text);
        if self.end_anchored {
            out.push('|');
        }
        out
    }

    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    pub fn is_host_anchored(&self) -> bool {
        self.host_anchored
    }

    #[inline]
    pub fn is_start_anchored(&self) -> bool {
        self.start_anchored
    }

    #[inline]
    pub fn is_end_anchored(&self) -> bool {
        self.end_anchored
    }

    /// Match against a lowercased URL. `host_span` is the byte range of the
    /// hostname within the URL, when the URL has one; host-anchored patterns
    /// cannot match without it.
    pub fn matches(&self, url: &str, host_span: Option<(usize, usize)>) -> bool {
        let bytes = url.as_bytes();

        if self.host_anchored {
            let (host_start, host_end) = match host_span {
                Some(span) => span,
                None => return false,
            };
            // A host anchor may bind at the first byte of the host or right
            // after any '.' inside it (subdomain boundary).
            if match_from(&self.segments, bytes, host_start, self.end_anchored) {
                return true;
            }
            for idx in host_start..host_end {
                if bytes[idx] == b'.'
                    && match_from(&self.segments, bytes, idx + 1, self.end_anchored)
                {
                    return true;
                }
            }
            false
        } else if self.start_anchored {
            match_from(&self.segments, bytes, 0, self.end_anchored)
        } else {
            scan_match(&self.segments, bytes, self.end_anchored)
        }
    }
}

/// Match segments starting exactly at `pos`.
fn match_from(segments: &[Segment], url: &[u8], pos: usize, end_anchored: bool) -> bool {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return !end_anchored || pos == url.len(),
    };

    match first {
        Segment::Literal(lit) => {
            let lit = lit.as_bytes();
            url.len() - pos >= lit.len()
                && &url[pos..pos + lit.len()] == lit
                && match_from(rest, url, pos + lit.len(), end_anchored)
        }
        Segment::Separator => {
            if pos < url.len() && is_separator(url[pos]) {
                match_from(rest, url, pos + 1, end_anchored)
            } else if pos == url.len() {
                // ^ also matches the end of the address
                match_from(rest, url, pos, end_anchored)
            } else {
                false
            }
        }
        Segment::Wildcard => {
            if rest.is_empty() {
                return true;
            }
            if let Some(Segment::Literal(lit)) = rest.first() {
                let lit = lit.as_bytes();
                let mut search = pos;
                while let Some(found) = find_from(url, search, lit) {
                    if match_from(&rest[1..], url, found + lit.len(), end_anchored) {
                        return true;
                    }
                    search = found + 1;
                }
                false
            } else {
                (pos..=url.len()).any(|p| match_from(rest, url, p, end_anchored))
            }
        }
    }
}

/// Unanchored match: try every viable start position, jumping between
/// occurrences of the leading literal when there is one.
fn scan_match(segments: &[Segment], url: &[u8], end_anchored: bool) -> bool {
    if let Some(Segment::Literal(lit)) = segments.first() {
        let lit_bytes = lit.as_bytes();
        let mut search = 0;
        while let Some(found) = find_from(url, search, lit_bytes) {
            if match_from(&segments[1..], url, found + lit_bytes.len(), end_anchored) {
                return true;
            }
            search = found + 1;
        }
        false
    } else {
        (0..=url.len()).any(|p| match_from(segments, url, p, end_anchored))
    }
}

fn find_from(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

// =============================================================================
// Filter Rule
// =============================================================================

/// One parsed ABP-style filter rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub pattern: Pattern,
    /// `@@`-prefixed rules whitelist instead of block.
    pub is_exception: bool,
    /// Page domains the rule is limited to; empty = applies everywhere.
    pub domain_include: Vec<String>,
    /// Page domains the rule never applies on.
    pub domain_exclude: Vec<String>,
    /// Empty mask = all types.
    pub resource_types: ResourceType,
    pub party: PartyScope,
    /// Original line, kept for diagnostics and export only.
    pub raw_text: String,
}

impl FilterRule {
    /// Canonical filter line for this rule. `parse(render(r))` is
    /// match-equivalent to `r`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.is_exception {
            out.push_str("@@");
        }
        out.push_str(&self.pattern.render());

        let mut options: Vec<String> = Vec::new();
        match self.party {
            PartyScope::ThirdParty => options.push("third-party".to_string()),
            PartyScope::FirstParty => options.push("~third-party".to_string()),
            PartyScope::Any => {}
        }
        if !self.resource_types.is_empty() && self.resource_types != ResourceType::ALL {
            for ty in ResourceType::EACH {
                if self.resource_types.contains(ty) {
                    options.push(ty.name().to_string());
                }
            }
        }
        if !self.domain_include.is_empty() || !self.domain_exclude.is_empty() {
            let mut domains: Vec<String> = self.domain_include.clone();
            domains.extend(self.domain_exclude.iter().map(|d| format!("~{d}")));
            options.push(format!("domain={}", domains.join("|")));
        }

        if !options.is_empty() {
            out.push('$');
            out.push_str(&options.join(","));
        }
        out
    }

    /// Does the rule's type mask admit this request type?
    #[inline]
    pub fn applies_to_type(&self, resource_type: ResourceType) -> bool {
        self.resource_types.is_empty() || self.resource_types.intersects(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(text: &str) -> Pattern {
        Pattern::parse(text).expect("pattern should compile")
    }

    fn host_span(url: &str) -> Option<(usize, usize)> {
        crate::url::host_position(url)
    }

    #[test]
    fn empty_patterns_rejected() {
        assert!(Pattern::parse("").is_none());
        assert!(Pattern::parse("||").is_none());
        assert!(Pattern::parse("|").is_none());
        assert!(Pattern::parse("|||").is_none());
        assert!(Pattern::parse("*").is_some());
    }

    #[test]
    fn plain_substring_match() {
        let p = pat("/banner/");
        assert!(p.matches("http://example.com/banner/img.png", host_span("http://example.com/banner/img.png")));
        assert!(!p.matches("http://example.com/header/img.png", None));
    }

    #[test]
    fn wildcard_spans_segments() {
        let p = pat("ads*track");
        assert!(p.matches("http://x.com/ads/pixel/track", None));
        assert!(!p.matches("http://x.com/track/ads", None));
    }

    #[test]
    fn separator_matches_class_and_end() {
        let p = pat("||tracker.net^");
        let url = "http://tracker.net/x";
        assert!(p.matches(url, host_span(url)));
        // ^ matches end of address too
        let bare = "http://tracker.net";
        assert!(p.matches(bare, host_span(bare)));
        // but not an ordinary letter
        let longer = "http://tracker.nettle.com/";
        assert!(!p.matches(longer, host_span(longer)));
    }

    #[test]
    fn host_anchor_binds_subdomains_only() {
        let p = pat("||ads.example.com^");
        let sub = "https://sub.ads.example.com/x";
        assert!(p.matches(sub, host_span(sub)));
        let cousin = "https://badads.example.com/x";
        assert!(!p.matches(cousin, host_span(cousin)));
        // host text appearing in the path must not bind
        let in_path = "https://safe.com/ads.example.com/x";
        assert!(!p.matches(in_path, host_span(in_path)));
    }

    #[test]
    fn start_and_end_anchors() {
        let left = pat("|http://ads.");
        assert!(left.matches("http://ads.example.com/", None));
        assert!(!left.matches("https://ads.example.com/", None));

        let right = pat(".swf|");
        assert!(right.matches("http://example.com/movie.swf", None));
        assert!(!right.matches("http://example.com/movie.swf?x=1", None));
    }

    #[test]
    fn matching_is_case_insensitive_via_lowercase_contract() {
        // Callers lowercase the URL once; patterns are lowercased at parse.
        let p = pat("/Banner/");
        let url = "http://example.com/banner/a.png";
        assert!(p.matches(url, host_span(url)));
    }

    #[test]
    fn render_restores_anchor_markers() {
        assert_eq!(pat("||ads.net^").render(), "||ads.net^");
        assert_eq!(pat("|http://x/*.js|").render(), "|http://x/*.js|");
        assert_eq!(pat("plain").render(), "plain");
    }

    #[test]
    fn host_entry_normalizes() {
        let entry = HostEntry::new("Ads.Example.COM.");
        assert_eq!(entry.domain(), "ads.example.com");
    }

    #[test]
    fn consecutive_wildcards_collapse() {
        let p = pat("a***b");
        assert_eq!(
            p.segments()
                .iter()
                .filter(|s| matches!(s, Segment::Wildcard))
                .count(),
            1
        );
        assert!(p.matches("http://x/a123b", None));
    }
}
