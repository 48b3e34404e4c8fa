//! Siftblock Core Library
//!
//! This crate is the matching half of the Siftblock request filter: the
//! compiled rule index, the binary cache codec, and the match service the
//! embedding browser queries on every outgoing request.
//!
//! # Architecture
//!
//! A compilation pass (see the `sift-compiler` crate) produces an immutable
//! [`RuleIndex`]. The [`MatchService`] holds the currently published index
//! behind an atomically swappable handle, so concurrent request threads
//! never block each other and never observe a half-built index. A reload
//! builds a brand-new index and swaps it in with a single atomic store.
//!
//! # Modules
//!
//! - `hash`: seeded XxHash64 helpers for domains, tokens and fingerprints
//! - `url`: fast URL slicing without allocations
//! - `domain`: registrable-domain heuristic and suffix walking
//! - `rule`: host entries, filter rules and pattern matching
//! - `index`: the compiled, queryable rule index
//! - `codec`: binary cache encode/decode
//! - `service`: the per-request query façade
//! - `types`: shared type definitions

pub mod codec;
pub mod domain;
pub mod hash;
pub mod index;
pub mod rule;
pub mod service;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use codec::{decode, encode, CacheError};
pub use index::RuleIndex;
pub use rule::{FilterRule, HostEntry, Pattern};
pub use service::{BlockDecision, MatchService};
pub use types::{OverrideAction, PartyScope, ResourceType, RuleRef, Verdict};
