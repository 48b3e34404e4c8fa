//! Registrable-domain heuristic and host suffix walking.
//!
//! The third-party check only needs eTLD+1 granularity, so a compact
//! two-part-suffix table covers the common public-suffix cases without
//! shipping the full list. Everything here is a pure function over its
//! arguments; the engine carries no process-wide domain state.

/// Common two-part public suffixes.
const TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Strip the leftmost label, if any remains after it.
#[inline]
pub fn parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx + 1 < host.len() => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// The registrable domain (eTLD+1) of a hostname, as a slice of the input.
///
/// Expects an already-lowercased host. Returns the input unchanged for
/// single-label hosts and IP-literal-looking inputs.
pub fn registrable_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');

    let last_dot = match host.rfind('.') {
        Some(idx) => idx,
        None => return host,
    };
    let second_dot = match host[..last_dot].rfind('.') {
        Some(idx) => idx,
        None => return host,
    };

    let last_two = &host[second_dot + 1..];
    if TWO_PART_SUFFIXES.contains(&last_two) {
        match host[..second_dot].rfind('.') {
            Some(third_dot) => &host[third_dot + 1..],
            None => host,
        }
    } else {
        last_two
    }
}

/// True when the request and page origins have different registrable domains.
#[inline]
pub fn is_third_party(request_host: &str, page_host: &str) -> bool {
    registrable_domain(request_host) != registrable_domain(page_host)
}

/// Iterator over a host and its parent domains, most specific first.
///
/// `sub.ads.example.com` yields itself, `ads.example.com`, `example.com`,
/// `com`.
pub struct SuffixWalk<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for SuffixWalk<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let host = self.current?;
        self.current = parent_domain(host);
        Some(host)
    }
}

/// Walk `host` and each of its parent domains.
pub fn walk_suffixes(host: &str) -> SuffixWalk<'_> {
    SuffixWalk {
        current: if host.is_empty() { None } else { Some(host) },
    }
}
