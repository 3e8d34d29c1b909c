use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use taskboard::config::{BoardSettings, ConfigStore};
use taskboard::model::StatsSnapshot;
use taskboard::{Board, CsvFileSource, ReferenceDate, project_source};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "taskboard",
    about = "Turn a project board CSV export into a report-ready board model",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the board and print it as JSON.
    Build(BuildArgs),

    /// Print completion and breakdown counts.
    Stats(CommonArgs),

    /// Report data-quality diagnostics without building output.
    Check(CommonArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// CSV export to read. Defaults to `csv_path` from the config.
    csv: Option<PathBuf>,
    /// Settings file (`key = value` lines).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Reference date for overdue and progress math (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long)]
    today: Option<NaiveDate>,
}

#[derive(Debug, Args)]
struct BuildArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Build(args) => handle_build(args),
        Commands::Stats(args) => handle_stats(args),
        Commands::Check(args) => handle_check(args),
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_board(args: &CommonArgs) -> Board {
    let store = args.config.as_deref().map(ConfigStore::open);
    let settings = store
        .as_ref()
        .map(|store| store.settings().clone())
        .unwrap_or_default();
    let csv = resolve_csv_path(
        args.csv.as_deref(),
        store.as_ref().map(ConfigStore::path),
        &settings,
    );
    let today = args
        .today
        .map(ReferenceDate::from)
        .unwrap_or_else(ReferenceDate::today_utc);
    tracing::debug!(csv = %csv.display(), today = %today.date(), "building board");
    project_source(&CsvFileSource, &csv, today, settings)
}

/// Explicit argument first; a relative `csv_path` from the config is taken
/// relative to the config file's directory.
fn resolve_csv_path(explicit: Option<&Path>, config: Option<&Path>, settings: &BoardSettings) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let configured = &settings.csv_path;
    match config.and_then(Path::parent) {
        Some(dir) if configured.is_relative() => dir.join(configured),
        _ => configured.clone(),
    }
}

fn report_failure(board: &Board) {
    if let Some(failure) = &board.error {
        eprintln!("error: {}", failure.message);
        eprintln!("hint: {}", failure.hint);
    }
}

fn handle_build(args: BuildArgs) -> Result<()> {
    let board = load_board(&args.common);
    report_failure(&board);
    let view = board.view();
    let json = if args.pretty {
        serde_json::to_string_pretty(&view)
    } else {
        serde_json::to_string(&view)
    }
    .context("serializing board")?;
    println!("{json}");
    Ok(())
}

fn handle_stats(args: CommonArgs) -> Result<()> {
    let board = load_board(&args);
    if let Some(failure) = &board.error {
        report_failure(&board);
        anyhow::bail!("cannot compute stats: {}", failure.message);
    }
    print!("{}", render_stats(&board.settings.title, &board.stats));
    Ok(())
}

fn handle_check(args: CommonArgs) -> Result<()> {
    let board = load_board(&args);
    if let Some(failure) = &board.error {
        report_failure(&board);
        anyhow::bail!("{}", failure.message);
    }
    if board.diagnostics.is_empty() {
        println!("{} tasks, no issues found", board.stats.total);
        return Ok(());
    }
    println!(
        "{} tasks, {} issue(s):",
        board.stats.total,
        board.diagnostics.len()
    );
    for line in &board.diagnostics {
        println!("  {line}");
    }
    Ok(())
}

fn render_stats(title: &str, stats: &StatsSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{title}");
    let _ = writeln!(
        out,
        "{} tasks, {} done ({}%), {} overdue",
        stats.total, stats.done, stats.completion_percent, stats.overdue
    );
    for (label, breakdown) in stats.breakdowns() {
        if breakdown.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\nby {label}:");
        for (key, count) in breakdown {
            let _ = writeln!(out, "  {key:<24} {count}");
        }
    }
    out
}
