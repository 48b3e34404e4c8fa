//! The compilation pipeline: sources in, published index out.
//!
//! One pass reads every source, parses it line by line (bad filter lines
//! are logged and skipped, never fatal), de-duplicates, builds a fresh
//! [`RuleIndex`] and installs it on the match service with a single atomic
//! swap. Queries running concurrently keep the old index until their
//! snapshot drops.
//!
//! Only one pass runs at a time. A reload request arriving mid-pass is
//! coalesced: it becomes the single pending request (latest wins) and the
//! running pass picks it up after publishing, so triggers can never race
//! two compilations.

use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;

use sift_core::codec;
use sift_core::hash::Fingerprint;
use sift_core::index::RuleIndex;
use sift_core::rule::{FilterRule, HostEntry};
use sift_core::service::MatchService;

use crate::normalizer::{domain_tokens, strip_loopback_prefix};
use crate::optimizer::{dedup_hosts, dedup_rules};
use crate::parser::{parse_line, Parsed};

/// Error type for pipeline passes.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A source's bytes could not be read; the previous index keeps serving.
    #[error("source '{name}' unavailable: {reason}")]
    SourceUnavailable { name: String, reason: String },
    /// Allocation failure while collecting the rule set. The engine should
    /// be treated as degraded: the last published index keeps serving.
    #[error("out of memory while compiling rule set")]
    OutOfMemory,
}

/// How a source's text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceFormat {
    /// hosts(5)-style lines.
    Hosts,
    /// ABP-style filter syntax.
    FilterList,
    /// Decide per source: `$`, `##` or `@@` anywhere implies ABP syntax.
    #[default]
    Auto,
}

/// One already-retrieved filter list. Fetching is a collaborator's job;
/// the pipeline only ever sees bytes.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    /// Modification token (etag, mtime, ...) folded into the fingerprint.
    pub revision: Option<String>,
    pub format: SourceFormat,
    pub bytes: Vec<u8>,
}

impl Source {
    pub fn new(name: impl Into<String>, format: SourceFormat, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            revision: None,
            format,
            bytes,
        }
    }

    /// Drain a reader into a source. Read failures surface as
    /// [`PipelineError::SourceUnavailable`].
    pub fn from_reader(
        name: impl Into<String>,
        format: SourceFormat,
        reader: &mut dyn Read,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|err| PipelineError::SourceUnavailable {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            name,
            revision: None,
            format,
            bytes,
        })
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

/// What one pipeline pass produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub host_entries: usize,
    pub filter_rules: usize,
    pub skipped_lines: usize,
    pub deduplicated: usize,
    pub fingerprint: u64,
    /// True when this request merged into a pass already in flight.
    pub coalesced: bool,
    /// True when the published index came from the cache, not a compile.
    pub from_cache: bool,
}

/// Persistence seam for the cache blob. The engine hands bytes out and asks
/// for bytes back; where they live is the embedder's business.
pub trait CacheStore: Send + Sync {
    fn load(&self) -> Option<Vec<u8>>;
    fn store(&self, blob: &[u8]);
}

struct ReloadState {
    running: bool,
    pending: Option<Vec<Source>>,
}

/// Compiles filter lists and publishes the result to a [`MatchService`].
pub struct Pipeline {
    service: Arc<MatchService>,
    cache: Option<Box<dyn CacheStore>>,
    state: Mutex<ReloadState>,
}

impl Pipeline {
    pub fn new(service: Arc<MatchService>) -> Self {
        Self {
            service,
            cache: None,
            state: Mutex::new(ReloadState {
                running: false,
                pending: None,
            }),
        }
    }

    /// Attach a cache store for write-through and warm starts.
    pub fn with_cache(mut self, cache: Box<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start up from the cache when it matches `sources`, otherwise compile.
    ///
    /// A corrupt or stale blob is discarded with a log line and triggers a
    /// full recompilation; it is never an error for the caller.
    pub fn warm_start(&self, sources: Vec<Source>) -> Result<CompileReport, PipelineError> {
        if let Some(blob) = self.cache.as_ref().and_then(|cache| cache.load()) {
            match codec::decode(&blob) {
                Ok(index) if index.fingerprint() == fingerprint_sources(&sources) => {
                    let report = CompileReport {
                        host_entries: index.host_entry_count(),
                        filter_rules: index.filter_rule_count(),
                        fingerprint: index.fingerprint(),
                        from_cache: true,
                        ..CompileReport::default()
                    };
                    self.service.publish(index);
                    log::debug!("warm start served from cache");
                    return Ok(report);
                }
                Ok(_) => log::info!("cache fingerprint stale, recompiling from sources"),
                Err(err) => log::warn!("discarding cache blob: {err}"),
            }
        }
        self.reload(sources)
    }

    /// Run one compilation pass, or coalesce into the pass in flight.
    pub fn reload(&self, sources: Vec<Source>) -> Result<CompileReport, PipelineError> {
        {
            let mut state = self.state.lock();
            if state.running {
                state.pending = Some(sources);
                log::debug!("reload request coalesced into running pass");
                return Ok(CompileReport {
                    coalesced: true,
                    ..CompileReport::default()
                });
            }
            state.running = true;
        }

        let mut sources = sources;
        loop {
            let result = self.compile_and_publish(&sources);
            if let Err(ref err) = result {
                log::error!("compilation pass failed: {err}");
            }

            let mut state = self.state.lock();
            match state.pending.take() {
                Some(next) => sources = next,
                None => {
                    state.running = false;
                    return result;
                }
            }
        }
    }

    fn compile_and_publish(&self, sources: &[Source]) -> Result<CompileReport, PipelineError> {
        let fingerprint = fingerprint_sources(sources);

        let mut hosts: Vec<HostEntry> = Vec::new();
        let mut rules: Vec<FilterRule> = Vec::new();
        let mut skipped = 0usize;

        for source in sources {
            let text = String::from_utf8_lossy(&source.bytes);
            let line_count = text.lines().count();
            try_grow(&mut hosts, line_count)?;
            try_grow(&mut rules, line_count)?;

            let before_hosts = hosts.len();
            let before_rules = rules.len();

            match resolve_format(source.format, &text) {
                SourceFormat::Hosts => {
                    for line in text.lines() {
                        for token in domain_tokens(line) {
                            hosts.push(HostEntry::new(token));
                        }
                    }
                }
                _ => {
                    for (line_no, line) in text.lines().enumerate() {
                        // Real-world subscriptions mix hosts-style lines in.
                        if strip_loopback_prefix(line.trim()).is_some() {
                            for token in domain_tokens(line) {
                                hosts.push(HostEntry::new(token));
                            }
                            continue;
                        }
                        match parse_line(line) {
                            Ok(Parsed::Rule(rule)) => rules.push(rule),
                            Ok(Parsed::Ignored) => {}
                            Err(err) => {
                                skipped += 1;
                                log::warn!(
                                    "{}:{}: skipping malformed rule: {err}",
                                    source.name,
                                    line_no + 1
                                );
                            }
                        }
                    }
                }
            }

            log::debug!(
                "{}: {} host entries, {} filter rules",
                source.name,
                hosts.len() - before_hosts,
                rules.len() - before_rules
            );
        }

        let mut deduplicated = dedup_hosts(&mut hosts);
        deduplicated += dedup_rules(&mut rules).deduped;

        let report = CompileReport {
            host_entries: hosts.len(),
            filter_rules: rules.len(),
            skipped_lines: skipped,
            deduplicated,
            fingerprint,
            coalesced: false,
            from_cache: false,
        };

        let index = RuleIndex::build(hosts, rules, fingerprint);
        let blob = codec::encode(&index);
        self.service.publish(index);
        if let Some(cache) = &self.cache {
            cache.store(&blob);
        }

        log::info!(
            "published {} rules ({} skipped, {} duplicates dropped)",
            report.host_entries + report.filter_rules,
            report.skipped_lines,
            report.deduplicated
        );
        Ok(report)
    }
}

fn try_grow<T>(vec: &mut Vec<T>, additional: usize) -> Result<(), PipelineError> {
    vec.try_reserve(additional)
        .map_err(|_| PipelineError::OutOfMemory)
}

fn resolve_format(format: SourceFormat, text: &str) -> SourceFormat {
    match format {
        SourceFormat::Auto => {
            if text.contains('$') || text.contains("##") || text.contains("@@") {
                SourceFormat::FilterList
            } else {
                SourceFormat::Hosts
            }
        }
        other => other,
    }
}

/// Fingerprint of a source set: names, revisions and bytes, in order.
pub fn fingerprint_sources(sources: &[Source]) -> u64 {
    let mut fingerprint = Fingerprint::new();
    for source in sources {
        fingerprint.update(source.name.as_bytes());
        fingerprint.update(source.revision.as_deref().unwrap_or("").as_bytes());
        fingerprint.update(&source.bytes);
    }
    fingerprint.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use sift_core::types::ResourceType;

    fn hosts_source(text: &str) -> Source {
        Source::new("hosts.txt", SourceFormat::Hosts, text.as_bytes().to_vec())
    }

    fn list_source(text: &str) -> Source {
        Source::new("list.txt", SourceFormat::FilterList, text.as_bytes().to_vec())
    }

    #[derive(Default)]
    struct MemoryCache {
        blob: PlMutex<Option<Vec<u8>>>,
    }

    impl CacheStore for Arc<MemoryCache> {
        fn load(&self) -> Option<Vec<u8>> {
            self.blob.lock().clone()
        }

        fn store(&self, blob: &[u8]) {
            *self.blob.lock() = Some(blob.to_vec());
        }
    }

    #[test]
    fn compiles_and_publishes() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());

        let report = pipeline
            .reload(vec![
                hosts_source("127.0.0.1 ads.example.com\n0.0.0.0 tracker.net pixel.io\n"),
                list_source("||banners.net^$third-party\n@@||banners.net/ok^\n"),
            ])
            .expect("reload succeeds");

        assert_eq!(report.host_entries, 3);
        assert_eq!(report.filter_rules, 2);
        assert_eq!(report.skipped_lines, 0);
        assert_eq!(service.rule_count(), 5);

        assert!(service
            .is_blocked("http://ads.example.com/x", "http://p.com/", ResourceType::IMAGE)
            .blocked);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());

        let report = pipeline
            .reload(vec![list_source(
                "||good.net^\n||bad.net^$third-party,~third-party\n||also-good.net^\n",
            )])
            .expect("pass survives bad lines");

        assert_eq!(report.filter_rules, 2);
        assert_eq!(report.skipped_lines, 1);
    }

    #[test]
    fn auto_format_heuristic() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());

        // No ABP tokens at all: hosts format.
        let report = pipeline
            .reload(vec![Source::new(
                "auto.txt",
                SourceFormat::Auto,
                b"127.0.0.1 ads.example.com\n".to_vec(),
            )])
            .unwrap();
        assert_eq!(report.host_entries, 1);

        // An @@ token flips the whole source to filter syntax.
        let report = pipeline
            .reload(vec![Source::new(
                "auto.txt",
                SourceFormat::Auto,
                b"@@||ok.net^\n||ads.net^\n".to_vec(),
            )])
            .unwrap();
        assert_eq!(report.filter_rules, 2);
    }

    #[test]
    fn hosts_lines_inside_filter_lists_are_accepted() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());

        let report = pipeline
            .reload(vec![list_source("||ads.net^\n0.0.0.0 baked-in.example.com\n")])
            .unwrap();
        assert_eq!(report.host_entries, 1);
        assert_eq!(report.filter_rules, 1);
    }

    #[test]
    fn duplicates_are_counted() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());

        let report = pipeline
            .reload(vec![
                hosts_source("0.0.0.0 ads.example.com\n0.0.0.0 ads.example.com\n"),
                list_source("||t.net^\n||t.net^\n"),
            ])
            .unwrap();
        assert_eq!(report.deduplicated, 2);
        assert_eq!(report.host_entries, 1);
        assert_eq!(report.filter_rules, 1);
    }

    #[test]
    fn reload_replaces_previous_index() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());

        pipeline.reload(vec![hosts_source("0.0.0.0 old.example.com\n")]).unwrap();
        assert!(service
            .is_blocked("http://old.example.com/", "http://p.com/", ResourceType::OTHER)
            .blocked);

        pipeline.reload(vec![hosts_source("0.0.0.0 new.example.com\n")]).unwrap();
        assert!(!service
            .is_blocked("http://old.example.com/", "http://p.com/", ResourceType::OTHER)
            .blocked);
        assert!(service
            .is_blocked("http://new.example.com/", "http://p.com/", ResourceType::OTHER)
            .blocked);
    }

    #[test]
    fn exception_and_party_precedence_end_to_end() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());
        pipeline
            .reload(vec![list_source(
                "||tracker.net^$third-party\n@@||tracker.net/ok^\n",
            )])
            .unwrap();

        // Exception wins even though the block rule matches too.
        let ok = service.is_blocked(
            "http://tracker.net/ok",
            "http://othersite.com/",
            ResourceType::OTHER,
        );
        assert!(!ok.blocked);
        assert_eq!(ok.matched_rule.as_deref(), Some("@@||tracker.net/ok^"));

        let other = service.is_blocked(
            "http://tracker.net/x",
            "http://othersite.com/",
            ResourceType::OTHER,
        );
        assert!(other.blocked);

        // First-party request fails the third-party constraint: no match.
        let first_party = service.is_blocked(
            "http://tracker.net/x",
            "http://tracker.net/",
            ResourceType::OTHER,
        );
        assert!(!first_party.blocked);
        assert!(first_party.matched_rule.is_none());
    }

    #[test]
    fn cache_written_through_and_warm_start_hits() {
        let cache = Arc::new(MemoryCache::default());
        let sources = vec![hosts_source("0.0.0.0 ads.example.com\n")];

        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service).with_cache(Box::new(cache.clone()));
        pipeline.reload(sources.clone()).unwrap();
        assert!(cache.blob.lock().is_some());

        // Fresh service, same sources: served straight from cache.
        let service2 = Arc::new(MatchService::new());
        let pipeline2 = Pipeline::new(service2.clone()).with_cache(Box::new(cache.clone()));
        let report = pipeline2.warm_start(sources).unwrap();
        assert!(report.from_cache);
        assert!(service2
            .is_blocked("http://ads.example.com/", "http://p.com/", ResourceType::OTHER)
            .blocked);
    }

    #[test]
    fn warm_start_recompiles_on_stale_fingerprint() {
        let cache = Arc::new(MemoryCache::default());
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service).with_cache(Box::new(cache.clone()));
        pipeline.reload(vec![hosts_source("0.0.0.0 old.example.com\n")]).unwrap();

        let service2 = Arc::new(MatchService::new());
        let pipeline2 = Pipeline::new(service2.clone()).with_cache(Box::new(cache.clone()));
        let report = pipeline2
            .warm_start(vec![hosts_source("0.0.0.0 new.example.com\n")])
            .unwrap();
        assert!(!report.from_cache);
        assert!(service2
            .is_blocked("http://new.example.com/", "http://p.com/", ResourceType::OTHER)
            .blocked);
    }

    #[test]
    fn warm_start_recompiles_on_corrupt_cache() {
        let cache = Arc::new(MemoryCache::default());
        cache.store(b"definitely not a cache blob");

        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone()).with_cache(Box::new(cache.clone()));
        let report = pipeline
            .warm_start(vec![hosts_source("0.0.0.0 ads.example.com\n")])
            .unwrap();
        assert!(!report.from_cache);
        assert!(service
            .is_blocked("http://ads.example.com/", "http://p.com/", ResourceType::OTHER)
            .blocked);
        // The bad blob was replaced by the recompiled one.
        assert!(codec::decode(&cache.load().unwrap()).is_ok());
    }

    #[test]
    fn warm_start_recompiles_on_truncated_cache() {
        let cache = Arc::new(MemoryCache::default());
        let sources = vec![hosts_source("0.0.0.0 ads.example.com\n")];

        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service).with_cache(Box::new(cache.clone()));
        pipeline.reload(sources.clone()).unwrap();

        // Truncate mid-record.
        let blob = cache.load().unwrap();
        cache.store(&blob[..blob.len() - 3]);

        let service2 = Arc::new(MatchService::new());
        let pipeline2 = Pipeline::new(service2.clone()).with_cache(Box::new(cache.clone()));
        let report = pipeline2.warm_start(sources).unwrap();
        assert!(!report.from_cache);
        assert!(service2
            .is_blocked("http://ads.example.com/", "http://p.com/", ResourceType::OTHER)
            .blocked);
    }

    #[test]
    fn source_from_reader_surfaces_read_failures() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "gone"))
            }
        }

        let err = Source::from_reader("remote.txt", SourceFormat::Auto, &mut FailingReader)
            .expect_err("read failure surfaces");
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    }

    #[test]
    fn invalid_utf8_degrades_instead_of_failing() {
        let service = Arc::new(MatchService::new());
        let pipeline = Pipeline::new(service.clone());

        let mut bytes = b"0.0.0.0 ads.example.com\n".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE, b'\n']);
        let report = pipeline
            .reload(vec![Source::new("mixed.bin", SourceFormat::Hosts, bytes)])
            .expect("pass survives bad bytes");
        assert_eq!(report.host_entries, 1);
    }

    #[test]
    fn fingerprint_tracks_revision_tokens() {
        let base = hosts_source("0.0.0.0 ads.example.com\n");
        let a = fingerprint_sources(&[base.clone().with_revision("etag-1")]);
        let b = fingerprint_sources(&[base.with_revision("etag-2")]);
        assert_ne!(a, b);
    }
}
