//! dirscope - where did the disk space go.
//!
//! Usage:
//!   dirscope [PATH]            Scan a directory and print a summary
//!   dirscope scan [PATH]       Same, with filters and cache options
//!   dirscope volumes           List mounted volumes and their usage
//!   dirscope clear-cache       Remove all cached scans
//!   dirscope --help            Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, OptionExt, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use dirscope_cache::Cache;
use dirscope_core::{Entry, ScanConfig, VolumeEnumerator, VolumeInfo, parse_size_limit};
use dirscope_nav::Navigation;
use dirscope_scan::{FsReader, MountTable, Tree};

#[derive(Parser)]
#[command(
    name = "dirscope",
    version,
    about = "A concurrent disk usage explorer",
    long_about = "dirscope scans a directory tree with a pool of workers and reports \
                  where the space goes: totals, the largest files and the directories \
                  that hold most of their own data.\n\n\
                  Finished scans can be cached and reused on the next run."
)]
struct Cli {
    /// Path to analyze (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and show a summary
    Scan {
        /// Path to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Skip paths containing this text, or this absolute path (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Keep only files within MIN:MAX (e.g. "10mb:1gb", ":500kb")
        #[arg(short = 'l', long)]
        size_limit: Option<String>,

        /// Ignore hidden files
        #[arg(long)]
        no_hidden: bool,

        /// Reuse a cached scan and store the result
        #[arg(short, long)]
        cache: bool,

        /// Number of scanner workers (0 = auto)
        #[arg(short, long, default_value = "0")]
        workers: usize,

        /// Number of top files and directories to show
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List mounted volumes
    Volumes {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove all cached scans
    ClearCache,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    path: String,
    size: u64,
    files: u64,
    dirs: u64,
    elapsed_ms: u128,
    top_files: Vec<ReportEntry>,
    top_dirs: Vec<ReportEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportEntry {
    path: String,
    size: u64,
    modified: Option<String>,
}

impl ReportEntry {
    fn new(entry: &Entry) -> Self {
        Self {
            path: entry.path().to_string(),
            size: entry.size(),
            modified: entry.modified().map(|t| t.to_rfc3339()),
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Scan {
            path,
            exclude,
            size_limit,
            no_hidden,
            cache,
            workers,
            top,
            format,
        }) => {
            let (min, max) = match size_limit.as_deref() {
                Some(raw) => parse_size_limit(raw)?,
                None => (None, None),
            };
            let config = ScanConfig::builder()
                .exclude(exclude)
                .min_file_size(min)
                .max_file_size(max)
                .include_hidden(!no_hidden)
                .use_cache(cache)
                .workers(workers)
                .top_entries(top.max(1))
                .build()
                .context("Invalid scan options")?;
            run_scan(&path, config, top, format)?;
        }
        Some(Command::Volumes { format }) => {
            run_volumes(format)?;
        }
        Some(Command::ClearCache) => {
            let cache = Cache::open_default(true, true).context("Failed to clear cache")?;
            eprintln!("Cleared {}", cache.dir().display());
        }
        None => {
            run_scan(&cli.path, ScanConfig::default(), 10, OutputFormat::Text)?;
        }
    }

    Ok(())
}

/// Scan `path` and print the summary.
fn run_scan(path: &Path, config: ScanConfig, top_n: usize, format: OutputFormat) -> Result<()> {
    let path = path.canonicalize().context("Invalid path")?;
    let root = path
        .to_str()
        .ok_or_eyre("Path is not valid UTF-8")?
        .to_string();

    let cache = if config.use_cache {
        Some(Cache::open_default(false, config.compress_cache).context("Failed to open cache")?)
    } else {
        None
    };

    eprintln!("Scanning {}...", root);
    let started = Instant::now();

    let tree = Arc::new(Tree::new(&config, Arc::new(FsReader::new())));
    let nav = Navigation::new(tree, Box::new(MountTable::new()))
        .with_cache(cache)
        .with_root(&root)
        .context("Scan failed")?;
    let elapsed = started.elapsed();

    nav.persist_cache().context("Failed to write cache")?;

    let entry = nav.entry().ok_or_eyre("Scan produced no tree")?;
    let top = nav.tree().top();

    let report = Report {
        path: root,
        size: entry.size(),
        files: entry.total_files(),
        dirs: entry.total_dirs(),
        elapsed_ms: elapsed.as_millis(),
        top_files: top.files().sorted().iter().take(top_n).map(|e| ReportEntry::new(e)).collect(),
        top_dirs: top.dirs().sorted().iter().take(top_n).map(|e| ReportEntry::new(e)).collect(),
    };

    match format {
        OutputFormat::Text => print_report(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn print_report(report: &Report) {
    println!();
    println!("{}", "─".repeat(70));
    println!(" {} - {}", report.path, format_size(report.size));
    println!(" {} files, {} directories", report.files, report.dirs);
    println!(" Scanned in {:.2}s", report.elapsed_ms as f64 / 1000.0);
    println!("{}", "─".repeat(70));

    print_section("Largest files", &report.top_files, report.size);
    print_section("Largest directories", &report.top_dirs, report.size);
}

fn print_section(title: &str, entries: &[ReportEntry], total: u64) {
    println!();
    println!(" {title}:");

    if entries.is_empty() {
        println!("   (none)");
        return;
    }

    for entry in entries {
        let ratio = if total > 0 {
            entry.size as f64 / total as f64
        } else {
            0.0
        };
        println!(
            "   {:>10} {:>5.1}% {} {}",
            format_size(entry.size),
            ratio * 100.0,
            make_bar(ratio, 10),
            entry.path
        );
    }
}

/// List mounted volumes.
fn run_volumes(format: OutputFormat) -> Result<()> {
    let volumes = MountTable::new()
        .list_volumes()
        .context("Failed to list volumes")?;

    match format {
        OutputFormat::Text => print_volumes(&volumes),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&volumes)?),
    }

    Ok(())
}

fn print_volumes(volumes: &[VolumeInfo]) {
    if volumes.is_empty() {
        println!(" No volumes found.");
        return;
    }

    println!(
        " {:<30} {:<10} {:>10} {:>10} {:>6}",
        "Mount", "Type", "Used", "Total", "Use%"
    );
    for volume in volumes {
        println!(
            " {:<30} {:<10} {:>10} {:>10} {:>5.1}% {}",
            truncate(&volume.path, 30),
            truncate(&volume.fs_name, 10),
            format_size(volume.used_bytes),
            format_size(volume.total_bytes),
            volume.used_percent,
            make_bar(volume.used_percent / 100.0, 10)
        );
    }
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = ((ratio * width as f64).round() as usize).min(width);
    let empty = width - filled;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
