//! ABP-style filter rule parser.
//!
//! One line in, one of: a parsed [`FilterRule`], a recognized no-op
//! (comments, list headers, cosmetic syntax this engine does not evaluate),
//! or a [`ParseError`]. Unknown options are ignored for forward
//! compatibility; only directly contradictory constraints reject a rule.

use sift_core::rule::{FilterRule, Pattern};
use sift_core::types::{PartyScope, ResourceType};

/// Why a filter line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A `$` with no options behind it, a dangling comma, or an empty
    /// `domain=` value list.
    #[error("unterminated option list")]
    UnterminatedOption,
    /// Contradictory type or party constraints on one rule.
    #[error("conflicting type constraint")]
    ConflictingTypeConstraint,
    /// Nothing left of the pattern once anchors are stripped.
    #[error("empty pattern")]
    EmptyPattern,
}

/// Result of looking at one line of filter list text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// A network filter rule this engine will match.
    Rule(FilterRule),
    /// Comment, list header, or element-hiding syntax: valid input, but
    /// nothing for the network matcher. Skipped without error.
    Ignored,
}

/// Parse one line of ABP-style filter text.
pub fn parse_line(line: &str) -> Result<Parsed, ParseError> {
    let line = line.trim();
    if line.is_empty() || is_comment(line) {
        return Ok(Parsed::Ignored);
    }

    // Element-hiding and related cosmetic syntax is a different engine's
    // problem; classify it as a no-op, not an error.
    if line.contains("##") || line.contains("#@#") || line.contains("#?#") {
        return Ok(Parsed::Ignored);
    }

    let (is_exception, rest) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };

    let (pattern_part, options_part) = match rest.find('$') {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    let options = match options_part {
        Some(text) => parse_options(text)?,
        None => Options::default(),
    };

    let pattern = Pattern::parse(pattern_part.trim()).ok_or(ParseError::EmptyPattern)?;

    Ok(Parsed::Rule(FilterRule {
        pattern,
        is_exception,
        domain_include: options.domain_include,
        domain_exclude: options.domain_exclude,
        resource_types: options.resource_types,
        party: options.party,
        raw_text: line.to_string(),
    }))
}

fn is_comment(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with('#')
}

struct Options {
    domain_include: Vec<String>,
    domain_exclude: Vec<String>,
    resource_types: ResourceType,
    party: PartyScope,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            domain_include: Vec::new(),
            domain_exclude: Vec::new(),
            resource_types: ResourceType::empty(),
            party: PartyScope::Any,
        }
    }
}

struct ResourceTypeAcc {
    include: ResourceType,
    exclude: ResourceType,
}

impl Default for ResourceTypeAcc {
    fn default() -> Self {
        Self {
            include: ResourceType::empty(),
            exclude: ResourceType::empty(),
        }
    }
}

fn parse_options(text: &str) -> Result<Options, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::UnterminatedOption);
    }

    let mut options = Options::default();
    let mut types = ResourceTypeAcc::default();
    let mut party: Option<PartyScope> = None;

    for raw in text.split(',') {
        let opt = raw.trim();
        if opt.is_empty() {
            // A dangling comma leaves the list unterminated.
            return Err(ParseError::UnterminatedOption);
        }
        let lower = opt.to_ascii_lowercase();

        if let Some(value) = lower.strip_prefix("domain=") {
            parse_domain_option(value, &mut options)?;
            continue;
        }

        let (negated, name) = match lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, lower.as_str()),
        };

        if let Some(scope) = party_scope(name, negated) {
            party = merge_party(party, scope)?;
            continue;
        }

        if let Some(ty) = resource_type(name) {
            if negated {
                types.exclude |= ty;
            } else {
                types.include |= ty;
            }
            continue;
        }

        // Forward compatibility: unknown options never reject a rule.
        log::debug!("ignoring unrecognized filter option '{opt}'");
    }

    options.resource_types = finalize_types(types)?;
    options.party = party.unwrap_or(PartyScope::Any);
    Ok(options)
}

fn parse_domain_option(value: &str, options: &mut Options) -> Result<(), ParseError> {
    let mut any = false;
    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        any = true;
        let (is_exclude, domain) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            continue;
        }
        if is_exclude {
            options.domain_exclude.push(domain);
        } else {
            options.domain_include.push(domain);
        }
    }

    if !any {
        return Err(ParseError::UnterminatedOption);
    }
    Ok(())
}

fn party_scope(name: &str, negated: bool) -> Option<PartyScope> {
    match name {
        "third-party" | "thirdparty" | "3p" => Some(if negated {
            PartyScope::FirstParty
        } else {
            PartyScope::ThirdParty
        }),
        "first-party" | "firstparty" | "1p" => Some(if negated {
            PartyScope::ThirdParty
        } else {
            PartyScope::FirstParty
        }),
        _ => None,
    }
}

fn merge_party(
    current: Option<PartyScope>,
    incoming: PartyScope,
) -> Result<Option<PartyScope>, ParseError> {
    match current {
        None => Ok(Some(incoming)),
        Some(existing) if existing == incoming => Ok(Some(existing)),
        Some(_) => Err(ParseError::ConflictingTypeConstraint),
    }
}

fn resource_type(name: &str) -> Option<ResourceType> {
    match name {
        "script" => Some(ResourceType::SCRIPT),
        "image" => Some(ResourceType::IMAGE),
        "stylesheet" => Some(ResourceType::STYLESHEET),
        "xmlhttprequest" | "xhr" | "fetch" => Some(ResourceType::XHR),
        "subdocument" => Some(ResourceType::SUBDOCUMENT),
        "font" => Some(ResourceType::FONT),
        "media" => Some(ResourceType::MEDIA),
        "document" => Some(ResourceType::DOCUMENT),
        "other" => Some(ResourceType::OTHER),
        _ => None,
    }
}

fn finalize_types(acc: ResourceTypeAcc) -> Result<ResourceType, ParseError> {
    if acc.include.intersects(acc.exclude) {
        return Err(ParseError::ConflictingTypeConstraint);
    }

    let mask = if !acc.include.is_empty() {
        acc.include
    } else if !acc.exclude.is_empty() {
        ResourceType::ALL.difference(acc.exclude)
    } else {
        return Ok(ResourceType::empty());
    };

    if mask.is_empty() {
        // Every type excluded: the rule could never apply.
        return Err(ParseError::ConflictingTypeConstraint);
    }
    if mask == ResourceType::ALL {
        return Ok(ResourceType::empty());
    }
    Ok(mask)
}
