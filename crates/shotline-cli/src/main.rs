//! Shotline CLI
//!
//! Headless front end over the shotline engine: scan a project tree, build
//! review timelines and manage the scan cache from a terminal or script.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use shotline_lib::core::config::{ProjectConfig, ProjectStore};
use shotline_lib::core::media::{FfprobeProbe, FsMediaInspector, LightingScanner};
use shotline_lib::core::scanner::{CancellationToken, ProjectScanner, ScanResult, ScanWarning};
use shotline_lib::core::timeline::{
    BuildOptions, BuildResult, TimelineBuilder, TimelineRequest, VersionPolicy,
};
use shotline_lib::core::ShotRef;
use shotline_lib::logging::init_logging;

#[derive(Parser)]
#[command(name = "shotline-cli", version, about = "Shot scanning and review timeline resolution")]
struct Cli {
    /// Project config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Stored project name, used when no config file is given
    #[arg(long, short, global = true)]
    project: Option<String>,

    /// Also write daily rolling logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored project configs
    Projects,
    /// Validate a config file and store it under its project name
    Import { file: PathBuf },
    /// List episodes
    Episodes,
    /// List sequences of an episode
    Sequences { episode: String },
    /// List shots of a sequence
    Shots { episode: String, sequence: String },
    /// Full scan; prints a JSON summary
    Scan {
        /// Restrict to these episodes (repeatable)
        #[arg(long = "episode")]
        episodes: Vec<String>,
        /// Drop cached entries first
        #[arg(long)]
        refresh: bool,
    },
    /// Resolve a review timeline
    Build {
        #[arg(long)]
        episode: String,
        /// Sequences to include (repeatable); all when omitted
        #[arg(long = "sequence")]
        sequences: Vec<String>,
        #[arg(long)]
        department: Option<String>,
        /// `latest`, `v003` or `specific: v003`
        #[arg(long, default_value = "latest")]
        version: String,
        #[arg(long)]
        include_sub_shots: bool,
        /// Read movie durations with this ffprobe binary
        #[arg(long)]
        ffprobe: Option<PathBuf>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Layers and render passes of a shot's layered department, as JSON
    Lighting {
        episode: String,
        sequence: String,
        shot: String,
        #[arg(long, default_value = "lighting")]
        department: String,
    },
    /// Scan cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Validate config and project structure
    Validate,
    /// Print the version after (or before) the given one
    Version {
        version: String,
        #[arg(long)]
        previous: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached entry
    Clear,
    /// Remove expired entries
    Sweep,
    /// Print cache statistics
    Stats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanSummary<'a> {
    scan_id: &'a str,
    root: &'a std::path::Path,
    episodes: usize,
    sequences: usize,
    shots: usize,
    entries_visited: u64,
    from_cache: u64,
    duration_ms: u64,
    warnings: &'a [ScanWarning],
}

impl<'a> ScanSummary<'a> {
    fn new(scan: &'a ScanResult) -> Self {
        Self {
            scan_id: &scan.scan_id,
            root: &scan.root,
            episodes: scan.episodes.len(),
            sequences: scan.episodes.values().map(|s| s.len()).sum(),
            shots: scan.shot_count(),
            entries_visited: scan.entries_visited,
            from_cache: scan.from_cache,
            duration_ms: scan.duration_ms,
            warnings: &scan.warnings,
        }
    }
}

fn load_config(cli: &Cli) -> Result<ProjectConfig> {
    match (&cli.config, &cli.project) {
        (Some(path), _) => ProjectConfig::load(path)
            .with_context(|| format!("Failed to load project config {}", path.display())),
        (None, name) => {
            let name = name.as_deref().unwrap_or("default");
            ProjectStore::default_location()
                .load(name)
                .with_context(|| format!("Failed to load stored project '{name}'"))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_timeline(result: &BuildResult) {
    println!("{}", result.name);
    for entry in &result.entries {
        let media = entry
            .media
            .as_ref()
            .map(|m| m.primary_path().display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<28} {:<10} {:<6} {:>6}-{:<6} {}",
            entry.full_name(),
            entry.department,
            entry.version,
            entry.record_in.unwrap_or_default(),
            entry.record_out.unwrap_or_default(),
            media
        );
    }
    for skipped in &result.skipped {
        println!(
            "  skipped {}_{}_{}: {}",
            skipped.episode, skipped.sequence, skipped.shot, skipped.reason
        );
    }
    for warning in &result.warnings {
        match &warning.shot {
            Some(shot) => println!("  warning {shot}: {}", warning.message),
            None => println!("  warning: {}", warning.message),
        }
    }
}

/// Cancels the token on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling scan...");
            handle.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Projects => {
            let store = ProjectStore::default_location();
            for name in store.list()? {
                println!("{name}");
            }
            return Ok(());
        }
        Command::Import { file } => {
            let config = ProjectConfig::load(file)
                .with_context(|| format!("Invalid project config {}", file.display()))?;
            let path = ProjectStore::default_location().save(&config)?;
            println!("Stored {} at {}", config.project_name, path.display());
            return Ok(());
        }
        _ => {}
    }

    let config = Arc::new(load_config(&cli)?);
    debug!(project = %config.project_name, "Config loaded");

    if let Command::Version { version, previous } = &cli.command {
        let settings = &config.settings;
        let neighbour = if *previous {
            settings.decrement(version)?
        } else {
            settings.increment(version)?
        };
        println!("{neighbour}");
        return Ok(());
    }
    let scanner = ProjectScanner::from_config(Arc::clone(&config))
        .context("Failed to initialise scanner")?;

    match cli.command {
        Command::Projects | Command::Import { .. } | Command::Version { .. } => {}
        Command::Episodes => {
            for episode in scanner.scan_episodes().await? {
                println!("{episode}");
            }
        }
        Command::Sequences { episode } => {
            for sequence in scanner.scan_sequences(&episode).await? {
                println!("{sequence}");
            }
        }
        Command::Shots { episode, sequence } => {
            for shot in scanner.scan_shots(&episode, &sequence).await? {
                println!("{shot}");
            }
        }
        Command::Scan { episodes, refresh } => {
            let scanner = scanner.with_progress(Arc::new(
                |message: &str, current: usize, total: usize| {
                    eprintln!("[{current}/{total}] {message}");
                },
            ));
            let filter = (!episodes.is_empty()).then_some(episodes.as_slice());
            let cancel = cancel_on_interrupt();
            let scan = scanner
                .scan_full_with(filter, refresh, &cancel)
                .await
                .context("Scan failed")?;
            print_json(&ScanSummary::new(&scan))?;
        }
        Command::Build {
            episode,
            sequences,
            department,
            version,
            include_sub_shots,
            ffprobe,
            json,
        } => {
            let policy: VersionPolicy = version
                .parse()
                .with_context(|| format!("Invalid version policy '{version}'"))?;
            if let Some(name) = &department {
                if config.find_department(name).is_none() {
                    bail!(
                        "Unknown department '{name}' (configured: {})",
                        config.departments.join(", ")
                    );
                }
            }

            let mut builder =
                TimelineBuilder::new(scanner).with_options(BuildOptions { include_sub_shots });
            if let Some(binary) = ffprobe {
                let probe = FfprobeProbe::new(binary);
                if !probe.is_available().await {
                    bail!("ffprobe is not runnable");
                }
                let inspector = FsMediaInspector::from_config(&config).with_probe(probe);
                builder = builder.with_inspector(Arc::new(inspector));
            }
            let result = builder
                .build_sequences(&TimelineRequest {
                    episode,
                    sequences,
                    department,
                    policy,
                })
                .await
                .context("Timeline build failed")?;

            if json {
                print_json(&result)?;
            } else {
                print_timeline(&result);
            }
        }
        Command::Lighting {
            episode,
            sequence,
            shot,
            department,
        } => {
            let shot = ShotRef::new(episode, sequence, shot);
            let lighting = LightingScanner::from_config(&config);
            let scan = lighting
                .scan_shot(&shot, &department)
                .await
                .context("Lighting scan failed")?;
            if !scan.has_data() {
                eprintln!(
                    "No layered versions under {}",
                    lighting.version_root(&shot, &department).display()
                );
            }
            print_json(&scan)?;
        }
        Command::Cache { action } => {
            let cache = scanner.cache();
            match action {
                CacheAction::Clear => {
                    cache.clear().await.context("Failed to clear cache")?;
                    println!("Cache cleared: {}", config.cache_dir().display());
                }
                CacheAction::Sweep => {
                    let removed = cache.sweep_expired().await.context("Cache sweep failed")?;
                    println!("Removed {removed} expired entries");
                }
                CacheAction::Stats => print_json(&cache.stats())?,
            }
        }
        Command::Validate => {
            println!("Config OK: {}", config.project_name);
            let report = scanner
                .validate_structure()
                .await
                .context("Structure validation failed")?;
            print_json(&report)?;
            if !report.is_valid() {
                bail!("{} structure warnings", report.warnings.len());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref());
    run(cli).await
}
