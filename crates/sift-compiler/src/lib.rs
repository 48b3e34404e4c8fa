//! Siftblock Filter List Compiler
//!
//! This crate turns raw filter list text (hosts-file or ABP-style syntax)
//! into a compiled [`sift_core::RuleIndex`] and manages the reload pipeline:
//! read sources, parse, de-duplicate, build, atomically publish, write the
//! binary cache through.

pub mod normalizer;
pub mod optimizer;
pub mod parser;
pub mod pipeline;

pub use normalizer::domain_tokens;
pub use optimizer::{dedup_rules, OptimizeStats};
pub use parser::{parse_line, Parsed, ParseError};
pub use pipeline::{CacheStore, CompileReport, Pipeline, PipelineError, Source, SourceFormat};
