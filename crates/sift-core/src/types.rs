//! Shared type definitions for the Siftblock engine.

// =============================================================================
// Resource Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    ///
    /// An empty mask on a rule means the rule applies to every type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u16 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        /// xhr and fetch
        const XHR = 1 << 4;
        /// iframe/frame
        const SUBDOCUMENT = 1 << 5;
        const FONT = 1 << 6;
        const MEDIA = 1 << 7;
        /// top-level document
        const DOCUMENT = 1 << 8;

        /// All resource types
        const ALL = 0x1FF;
    }
}

impl ResourceType {
    /// Parse from a browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "stylesheet" => Self::STYLESHEET,
            "xmlhttprequest" | "xhr" | "fetch" => Self::XHR,
            "subdocument" | "sub_frame" => Self::SUBDOCUMENT,
            "font" => Self::FONT,
            "media" => Self::MEDIA,
            "document" | "main_frame" => Self::DOCUMENT,
            _ => Self::OTHER,
        }
    }

    /// Canonical option name, as written in filter lists.
    pub fn name(self) -> &'static str {
        match self {
            ty if ty == Self::SCRIPT => "script",
            ty if ty == Self::IMAGE => "image",
            ty if ty == Self::STYLESHEET => "stylesheet",
            ty if ty == Self::XHR => "xmlhttprequest",
            ty if ty == Self::SUBDOCUMENT => "subdocument",
            ty if ty == Self::FONT => "font",
            ty if ty == Self::MEDIA => "media",
            ty if ty == Self::DOCUMENT => "document",
            _ => "other",
        }
    }

    /// The single-bit type values, in option-vocabulary order.
    pub const EACH: [ResourceType; 9] = [
        Self::SCRIPT,
        Self::IMAGE,
        Self::STYLESHEET,
        Self::XHR,
        Self::SUBDOCUMENT,
        Self::FONT,
        Self::MEDIA,
        Self::DOCUMENT,
        Self::OTHER,
    ];
}

// =============================================================================
// Party Scope
// =============================================================================

/// Origin-relationship constraint on a rule.
///
/// The variant set is closed: a rule either applies to any request, only to
/// third-party requests, or only to first-party requests. A filter line that
/// demands both exclusive scopes at once is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PartyScope {
    #[default]
    Any = 0,
    FirstParty = 1,
    ThirdParty = 2,
}

impl TryFrom<u8> for PartyScope {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Any),
            1 => Ok(Self::FirstParty),
            2 => Ok(Self::ThirdParty),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Verdicts
// =============================================================================

/// Reference to the rule that decided a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleRef {
    /// Index into the host entry table.
    Host(u32),
    /// Index into the filter rule table.
    Filter(u32),
}

/// Outcome of matching one request against a [`crate::RuleIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A block rule matched and no exception applies.
    Block(RuleRef),
    /// An exception rule matched; exceptions beat blocks from any source.
    Allow(RuleRef),
    /// Nothing matched.
    NoMatch,
}

impl Verdict {
    /// True for `Block`.
    #[inline]
    pub fn is_block(&self) -> bool {
        matches!(self, Verdict::Block(_))
    }
}

// =============================================================================
// User Overrides
// =============================================================================

/// A user-authored per-site decision. Highest precedence, consulted before
/// the compiled index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideAction {
    Allow,
    Deny,
}
