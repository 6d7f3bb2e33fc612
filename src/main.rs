use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cuewheel::analyzer;
use cuewheel::config::AppConfig;
use cuewheel::db::Database;
use cuewheel::db::models::{AnalysisStatus, Track};
use cuewheel::jobs::AnalysisOrchestrator;
use cuewheel::ranking::{self, Suggestion};
use cuewheel::scoring::{TrackDjData, calculate_compatibility};
use cuewheel::worker::sizing::{PoolProfile, resolve_pool_size};
use cuewheel::worker::{PoolSettings, WorkerCommand, WorkerPool};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(name = "cuewheel", version, about = "DJ library analyzer and harmonic mixing assistant")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for audio files and add them to the library
    Scan {
        /// Directories to scan (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Force re-scan even if files haven't changed
        #[arg(long)]
        force: bool,
    },

    /// Extract BPM, key, energy and danceability for pending tracks
    Analyze {
        /// Number of worker processes (0 = auto-detect)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Also retry tracks whose analysis failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Suggest the next track to mix into
    Suggest {
        /// Track id, file path, or title
        track: String,

        /// Number of suggestions (defaults to config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Minimum overall score 0-100 (defaults to config)
        #[arg(long)]
        min_score: Option<u8>,

        /// Score the whole library instead of BPM/key-compatible tracks only
        #[arg(long)]
        all: bool,

        /// Print suggestions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the full compatibility breakdown for a transition from A to B
    Score {
        /// Source track (id, path, or title)
        from: String,
        /// Target track (id, path, or title)
        to: String,
    },

    /// Show library and analysis statistics
    Stats,

    /// Analysis worker process (spawned by `analyze`)
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Workers never touch the database; stdout belongs to the protocol
    if let Commands::Worker = cli.command {
        if let Err(e) = cuewheel::worker::process::run(&config) {
            log::error!("Worker failed: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(cuewheel::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Scan { paths, force } => {
            // Resolve scan paths: CLI args > config music_dirs
            let scan_paths = if !paths.is_empty() {
                paths
            } else if !config.music_dirs.is_empty() {
                config.music_dirs.clone()
            } else {
                anyhow::bail!(
                    "No directories to scan. Pass paths as arguments or set music_dirs in config."
                );
            };

            let result = cuewheel::scanner::scan(&db, &scan_paths, force).context("Scan failed")?;
            println!(
                "Scan complete: {} scanned, {} new, {} updated, {} skipped, {} errors",
                result.scanned, result.new, result.updated, result.skipped, result.errors
            );
        }

        Commands::Analyze { jobs, retry_failed } => {
            run_analysis(db, &config, jobs, retry_failed, cli.verbose)?;
        }

        Commands::Suggest {
            track,
            limit,
            min_score,
            all,
            json,
        } => {
            let (source_track, source) = resolve_analyzed(&db, &track)?;

            let mut scoring = config.scoring.clone();
            if let Some(min) = min_score {
                scoring.min_score = min.min(100);
            }
            let limit = limit.unwrap_or(scoring.default_limit);

            let library = db.completed_candidates().context("Query failed")?;
            let suggestions = if all {
                let others: Vec<TrackDjData> = library
                    .into_iter()
                    .filter(|c| c.track_id != source.track_id)
                    .collect();
                ranking::rank_candidates(&source, &others, &scoring, scoring.min_score, limit)
            } else {
                ranking::suggest(&source, &library, &scoring, limit)
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
                return Ok(());
            }

            if suggestions.is_empty() {
                println!(
                    "No compatible tracks for \"{}\" (min score {}).",
                    source_track.display_name(),
                    scoring.min_score
                );
                return Ok(());
            }

            println!(
                "Next tracks for \"{}\" ({}, {}):",
                source_track.display_name(),
                format_bpm(source.bpm),
                source.camelot_key.as_deref().unwrap_or("?")
            );
            println!();
            print_suggestions(&db, &suggestions)?;
        }

        Commands::Score { from, to } => {
            let (from_track, source) = resolve_analyzed(&db, &from)?;
            let (to_track, target) = resolve_analyzed(&db, &to)?;
            let score = calculate_compatibility(&source, &target, &config.scoring);

            println!("{}  ->  {}", from_track.display_name(), to_track.display_name());
            println!();
            println!("  Overall:        {:>3}/100", score.overall);
            println!(
                "  Key:            {:>5.1}  {} -> {} ({})",
                score.key_score,
                source.camelot_key.as_deref().unwrap_or("?"),
                target.camelot_key.as_deref().unwrap_or("?"),
                score.key_compatibility.as_str()
            );
            println!(
                "  Tempo:          {:>5.1}  {} -> {} (diff {}, {})",
                score.bpm_score,
                format_bpm(source.bpm),
                format_bpm(target.bpm),
                score
                    .bpm_diff_percent
                    .map(|d| format!("{:.1}%", d))
                    .unwrap_or_else(|| "?".into()),
                if score.can_beatmatch { "beatmatchable" } else { "too far to beatmatch" }
            );
            println!(
                "  Energy:         {:>5.1}  {} -> {}",
                score.energy_score,
                format_unit(source.energy),
                format_unit(target.energy)
            );
            if let Some(dance) = score.danceability_score {
                println!(
                    "  Danceability:   {:>5.1}  {} -> {}",
                    dance,
                    format_unit(source.danceability),
                    format_unit(target.danceability)
                );
            }
            println!("  Transition:     {}", score.suggested_transition.as_str());
        }

        Commands::Stats => {
            let stats = db.stats().context("Query failed")?;
            println!("Library: {} tracks", stats.total_tracks);
            println!("  pending:   {:>6}", stats.pending);
            println!("  analyzing: {:>6}", stats.analyzing);
            println!("  completed: {:>6}", stats.completed);
            println!("  failed:    {:>6}", stats.failed);
        }

        Commands::Worker => unreachable!("handled before opening the database"),
    }

    Ok(())
}

/// Start the worker pool, run every pending track through it, shut down.
fn run_analysis(
    db: Database,
    config: &AppConfig,
    jobs: usize,
    retry_failed: bool,
    verbose: u8,
) -> Result<()> {
    let configured = if jobs > 0 { jobs } else { config.pool.workers };
    let size = resolve_pool_size(
        PoolProfile::Features,
        configured,
        config.pool.memory_per_worker_mb,
    );
    let settings = PoolSettings::from_config(&config.pool, size);
    let command = WorkerCommand::current_exe(verbose).context("Cannot locate own executable")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(async {
        let pool = WorkerPool::start(settings, command).await;
        if !pool.is_available() {
            log::warn!("No analysis workers started; falling back to loudness-only analysis");
        }

        let store = Arc::new(Mutex::new(db));
        let orchestrator = AnalysisOrchestrator::new(store, pool.clone())
            .with_fallback(analyzer::loudness_fallback(config));
        let result = orchestrator.analyze_pending(retry_failed).await;

        pool.shutdown().await;
        result
    });

    let result = result.context("Analysis failed")?;
    println!(
        "Analysis complete: {} analyzed, {} coarse, {} failed, {} skipped",
        result.analyzed, result.degraded, result.failed, result.skipped
    );
    Ok(())
}

/// Look up a track and its completed analysis.
fn resolve_analyzed(db: &Database, query: &str) -> Result<(Track, TrackDjData)> {
    let track = db
        .find_track(query)
        .context("Search failed")?
        .ok_or_else(|| anyhow::anyhow!("No track matching \"{}\"", query))?;

    let features = db
        .analysis_for_track(track.id)
        .context("Query failed")?
        .filter(|f| f.status == AnalysisStatus::Completed)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "\"{}\" has not been analyzed yet. Run `cuewheel analyze` first.",
                track.display_name()
            )
        })?;

    Ok((track, features.to_dj_data()))
}

fn print_suggestions(db: &Database, suggestions: &[Suggestion]) -> Result<()> {
    println!(
        "{:<40} {:>6} {:>4}  {:>4} {:>4} {:>4} {:>4}  {:<12}",
        "Track", "BPM", "Key", "All", "Key", "BPM", "Eng", "Transition"
    );
    println!("{}", "-".repeat(92));

    for s in suggestions {
        let name = db
            .track_by_id(s.candidate.track_id)
            .context("Query failed")?
            .map(|t| t.display_name())
            .unwrap_or_else(|| format!("#{}", s.candidate.track_id));
        let name_display: String = if name.chars().count() > 40 {
            format!("{}...", name.chars().take(37).collect::<String>())
        } else {
            name
        };

        println!(
            "{:<40} {:>6} {:>4}  {:>4} {:>4.0} {:>4.0} {:>4.0}  {:<12}",
            name_display,
            format_bpm(s.candidate.bpm),
            s.candidate.camelot_key.as_deref().unwrap_or("?"),
            s.score.overall,
            s.score.key_score,
            s.score.bpm_score,
            s.score.energy_score,
            s.score.suggested_transition.as_str(),
        );
    }
    Ok(())
}

fn format_bpm(bpm: Option<f64>) -> String {
    bpm.filter(|b| *b > 0.0)
        .map(|b| format!("{:.1}", b))
        .unwrap_or_else(|| "?".into())
}

fn format_unit(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "?".into())
}
