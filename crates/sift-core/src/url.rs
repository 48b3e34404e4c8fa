//! Fast URL slicing for the hot path.
//!
//! These functions work directly on string slices and never allocate.

use crate::hash::hash_token;

// =============================================================================
// Scheme / Host Positions
// =============================================================================

/// Get the position just past `://`, or past `:` for `data:` URLs.
#[inline]
pub fn scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();
    let colon = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon + 2 && bytes[colon + 1] == b'/' && bytes[colon + 2] == b'/' {
        return Some(colon + 3);
    }
    if colon >= 4 && bytes[..colon].eq_ignore_ascii_case(b"data") {
        return Some(colon + 1);
    }
    None
}

/// Start and end byte offsets of the hostname within a URL.
#[inline]
pub fn host_position(url: &str) -> Option<(usize, usize)> {
    let after_scheme = scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo if present before the first path separator.
    let mut host_start = after_scheme;
    for i in after_scheme..bytes.len() {
        match bytes[i] {
            b'@' => {
                host_start = i + 1;
                break;
            }
            b'/' => break,
            _ => {}
        }
    }

    let mut host_end = bytes.len();
    for i in host_start..bytes.len() {
        match bytes[i] {
            b'/' | b'?' | b'#' | b':' => {
                host_end = i;
                break;
            }
            _ => {}
        }
    }

    Some((host_start, host_end))
}

/// Extract the hostname as a slice of the URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (start, end) = host_position(url)?;
    if start == end {
        return None;
    }
    Some(&url[start..end])
}

// =============================================================================
// Separator Class
// =============================================================================

/// The ABP `^` separator class: anything that is not a letter, a digit, or
/// one of `_`, `-`, `.`, `%`.
#[inline]
pub fn is_separator(b: u8) -> bool {
    !(b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' || b == b'%')
}

// =============================================================================
// URL Tokenization
// =============================================================================

/// Minimum token length worth indexing.
pub const MIN_TOKEN_LEN: usize = 3;
/// Hot-path bound on tokens considered per URL.
pub const MAX_TOKENS: usize = 64;

/// Hash every alphanumeric run of the URL (lowercased), up to [`MAX_TOKENS`].
///
/// The same run extraction is used when picking a bucket token for a pattern
/// at compile time, so a rule's bucket token is guaranteed to surface here
/// for any URL its pattern can match.
pub fn tokenize(url: &str, out: &mut Vec<u64>) {
    out.clear();
    let bytes = url.as_bytes();
    let mut buf = [0u8; 64];
    let mut run_start = None;

    for i in 0..=bytes.len() {
        let in_run = i < bytes.len() && bytes[i].is_ascii_alphanumeric();
        if in_run {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take() {
            let len = i - start;
            if len >= MIN_TOKEN_LEN && len <= buf.len() && out.len() < MAX_TOKENS {
                for (slot, &b) in buf.iter_mut().zip(&bytes[start..i]) {
                    *slot = b.to_ascii_lowercase();
                }
                out.push(hash_token(&buf[..len]));
            }
        }
    }
}
