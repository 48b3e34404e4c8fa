//! Siftblock CLI
//!
//! Compile filter lists into a cache blob, inspect blobs, and run one-off
//! match queries.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;

use sift_compiler::{CacheStore, Pipeline, Source, SourceFormat};
use sift_core::codec;
use sift_core::service::MatchService;
use sift_core::types::ResourceType;

#[derive(Parser)]
#[command(name = "sift-cli")]
#[command(about = "Siftblock filter list compiler and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists into a cache blob
    Compile {
        /// Input filter list files (hosts or ABP syntax, auto-detected)
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Output cache file
        #[arg(short, long, default_value = "rules.sfb")]
        output: PathBuf,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Dump cache blob info
    Info {
        /// Cache file to inspect
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Query a verdict for one request
    Check {
        /// Compiled cache file to query
        #[arg(short, long)]
        cache: PathBuf,

        /// Request URL
        #[arg(long)]
        url: String,

        /// Page URL the request originates from
        #[arg(long)]
        page: String,

        /// Resource type (script, image, stylesheet, xhr, subdocument,
        /// font, media, document, other)
        #[arg(long, default_value = "other")]
        resource_type: String,

        /// Emit the decision as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            verbose,
        } => cmd_compile(&input, &output, verbose),
        Commands::Info { input } => cmd_info(&input),
        Commands::Check {
            cache,
            url,
            page,
            resource_type,
            json,
        } => cmd_check(&cache, &url, &page, &resource_type, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

struct FileCache {
    path: PathBuf,
}

impl CacheStore for FileCache {
    fn load(&self) -> Option<Vec<u8>> {
        fs::read(&self.path).ok()
    }

    fn store(&self, blob: &[u8]) {
        if let Err(err) = fs::write(&self.path, blob) {
            eprintln!("warning: failed to write '{}': {err}", self.path.display());
        }
    }
}

fn cmd_compile(inputs: &[PathBuf], output: &Path, verbose: bool) -> Result<(), String> {
    let start = Instant::now();

    let mut sources = Vec::new();
    for path in inputs {
        let bytes = fs::read(path).map_err(|e| format!("Failed to read '{}': {e}", path.display()))?;
        if verbose {
            println!(
                "  {} - {} bytes",
                path.file_name().unwrap_or_default().to_string_lossy(),
                bytes.len()
            );
        }
        sources.push(Source::new(path.to_string_lossy(), SourceFormat::Auto, bytes));
    }

    let service = Arc::new(MatchService::new());
    let pipeline = Pipeline::new(service.clone()).with_cache(Box::new(FileCache {
        path: output.to_path_buf(),
    }));
    let report = pipeline.reload(sources).map_err(|e| e.to_string())?;

    // Make sure what we wrote reads back.
    let blob = fs::read(output).map_err(|e| format!("Failed to re-read '{}': {e}", output.display()))?;
    codec::decode(&blob).map_err(|e| format!("Generated cache failed validation: {e}"))?;

    println!(
        "Compiled {} host entries + {} filter rules in {:.1?}",
        report.host_entries,
        report.filter_rules,
        start.elapsed()
    );
    if report.skipped_lines > 0 {
        println!("  {} malformed lines skipped", report.skipped_lines);
    }
    if report.deduplicated > 0 {
        println!("  {} duplicate rules dropped", report.deduplicated);
    }
    println!("  fingerprint {:016x}", report.fingerprint);
    println!("  wrote {} ({} bytes)", output.display(), blob.len());
    Ok(())
}

fn cmd_info(input: &Path) -> Result<(), String> {
    let blob = fs::read(input).map_err(|e| format!("Failed to read '{}': {e}", input.display()))?;
    let index = codec::decode(&blob).map_err(|e| e.to_string())?;

    println!("{}", input.display());
    println!("  format version: {}", codec::CACHE_VERSION);
    println!("  fingerprint:    {:016x}", index.fingerprint());
    println!("  host entries:   {}", index.host_entry_count());
    println!("  filter rules:   {}", index.filter_rule_count());
    println!("  blob size:      {} bytes", blob.len());
    Ok(())
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    blocked: bool,
    matched_rule: Option<&'a str>,
}

fn cmd_check(
    cache: &Path,
    url: &str,
    page: &str,
    resource_type: &str,
    json: bool,
) -> Result<(), String> {
    let blob = fs::read(cache).map_err(|e| format!("Failed to read '{}': {e}", cache.display()))?;
    let index = codec::decode(&blob).map_err(|e| e.to_string())?;
    let service = MatchService::with_index(index);

    let decision = service.is_blocked(url, page, ResourceType::from_str(resource_type));

    if json {
        let out = CheckOutput {
            blocked: decision.blocked,
            matched_rule: decision.matched_rule.as_deref(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?
        );
    } else if decision.blocked {
        match &decision.matched_rule {
            Some(rule) => println!("BLOCK  ({rule})"),
            None => println!("BLOCK"),
        }
    } else {
        match &decision.matched_rule {
            Some(rule) => println!("ALLOW  (exception: {rule})"),
            None => println!("ALLOW  (no match)"),
        }
    }
    Ok(())
}
