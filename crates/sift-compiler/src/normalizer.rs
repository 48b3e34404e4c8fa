//! Hosts-file line normalizer.
//!
//! One line in, zero or more bare domain tokens out. Malformed lines yield
//! nothing: a corrupt line must never abort the list it came from, so this
//! module has no error type at all. Tokens are emitted as written (minus
//! surrounding whitespace); case folding happens when entries are built.

/// Loopback address prefixes hosts files map blocked domains to.
const LOOPBACK_PREFIXES: &[&str] = &["127.0.0.1", "0.0.0.0", "::1"];

/// Strip a leading loopback address from a line, returning the rest.
///
/// Only strips when the address is followed by whitespace (or ends the
/// line), so a domain like `0.0.0.0.example.com` is left alone.
pub fn strip_loopback_prefix(line: &str) -> Option<&str> {
    for prefix in LOOPBACK_PREFIXES {
        if let Some(rest) = line.strip_prefix(prefix) {
            if rest.is_empty() {
                return Some(rest);
            }
            if rest.starts_with(' ') || rest.starts_with('\t') {
                return Some(rest);
            }
        }
    }
    None
}

/// Extract the domain tokens of one hosts-file line.
///
/// A token qualifies when it contains at least one `.` and is not the
/// literal `localhost`. Comment lines (`#` first) and comment tails are
/// dropped; tabs count as spaces; a line may carry several hostnames.
pub fn domain_tokens(line: &str) -> Vec<&str> {
    let mut rest = line.trim();

    if rest.starts_with('#') {
        return Vec::new();
    }

    if let Some(stripped) = strip_loopback_prefix(rest) {
        rest = stripped.trim_start();
    }

    // Everything after an embedded comment marker is dropped; a marker as
    // the first remaining character means the line held nothing but comment.
    if let Some(pos) = rest.find('#') {
        if pos == 0 {
            return Vec::new();
        }
        rest = rest[..pos].trim_end();
    }

    rest.split([' ', '\t'])
        .filter(|token| !token.is_empty() && token.contains('.') && *token != "localhost")
        .collect()
}
