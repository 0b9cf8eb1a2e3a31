use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use env_logger::Builder;
use log::{info, warn, Level, LevelFilter};
use search_apply::{
    commit_synthesis, delete_lines, insert_marker_above, insert_marker_below, synthesize_edits,
    ApplyMode, ApplyOptions, ChangeLog, FsDocumentStore, MarkerInsertion, ReportLocation,
    WorkspaceResolver, WorkspaceRoot, DEFAULT_MAX_LINE_LENGTH,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// --- Main Application Entry Point ---

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        // Using {:?} prints the full error chain from `anyhow`.
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Apply(args) => run_apply(args),
        Command::InsertAbove(args) => run_report_command(args, |text, lines| {
            let inserted = insert_marker_above(text, lines);
            log_cursors("↑", &inserted);
            inserted.text
        }),
        Command::InsertBelow(args) => run_report_command(args, |text, lines| {
            let inserted = insert_marker_below(text, lines);
            log_cursors("↓", &inserted);
            inserted.text
        }),
        Command::DeleteLine(args) => run_report_command(args, delete_lines),
    }
}

/// Synthesizes the report's edits and writes them to disk.
fn run_apply(args: ApplyArgs) -> Result<()> {
    let report_text = fs::read_to_string(&args.report)
        .with_context(|| format!("Failed to read report '{}'", args.report.display()))?;
    let report_path = fs::canonicalize(&args.report).unwrap_or_else(|_| args.report.clone());
    let report = ReportLocation::saved(report_path);

    let resolver = WorkspaceResolver::new(parse_roots(&args.roots)?);
    let options = ApplyOptions::builder()
        .mode(if args.log_only {
            ApplyMode::LogOnly
        } else {
            ApplyMode::Apply
        })
        .max_line_length(args.max_line_length)
        .dry_run(args.dry_run)
        .build();
    let mut store = FsDocumentStore::new();

    let synthesis = synthesize_edits(&report_text, &report, &resolver, &store, &options)
        .with_context(|| format!("Failed to read changes from '{}'", args.report.display()))?;

    info!(
        "Found {} edit(s) across {} file(s).",
        synthesis.batch.len(),
        synthesis.batch.files().count()
    );

    // The change log is shown before anything is written.
    if let Some(log) = synthesis.change_log.as_ref().filter(|log| !log.is_empty()) {
        print!("{}", log);
        if let Some(path) = &args.change_log {
            append_change_log(path, log)?;
        }
    }

    if args.dry_run {
        for preview in store.preview_batch(&synthesis.batch)? {
            println!("----- Proposed Changes for {} -----", preview.path.display());
            print!("{}", preview.diff);
            println!("------------------------------------");
        }
    }

    let outcome = commit_synthesis(synthesis, &report, &mut store, &options)
        .with_context(|| format!("Failed to apply changes from '{}'", args.report.display()))?;

    // --- Final Summary ---
    let synthesis = &outcome.synthesis;
    let skipped_sections = synthesis.unresolved_paths.len() + synthesis.unloadable_files.len();
    if skipped_sections > 0 {
        warn!(
            "Skipped {} file section(s) whose file could not be found.",
            skipped_sections
        );
    }
    if synthesis.out_of_range_lines > 0 {
        warn!(
            "Skipped {} line(s) past the end of their file.",
            synthesis.out_of_range_lines
        );
    }
    if synthesis.conflicts > 0 {
        warn!("Dropped {} overlapping edit(s).", synthesis.conflicts);
    }
    if outcome.applied {
        info!("Applied {} edit(s).", synthesis.batch.len());
    } else {
        info!("DRY RUN completed. No files were modified.");
    }

    Ok(())
}

/// Rewrites the report in place after a marker or deletion command.
fn run_report_command<F>(args: SelectionArgs, edit: F) -> Result<()>
where
    F: FnOnce(&str, &[usize]) -> String,
{
    if args.lines.contains(&0) {
        return Err(anyhow!("Report line numbers start at 1."));
    }
    let text = fs::read_to_string(&args.report)
        .with_context(|| format!("Failed to read report '{}'", args.report.display()))?;
    let selected: Vec<usize> = args.lines.iter().map(|line| line - 1).collect();

    let new_text = edit(&text, &selected);
    fs::write(&args.report, new_text)
        .with_context(|| format!("Failed to write report '{}'", args.report.display()))?;
    Ok(())
}

fn log_cursors(marker: &str, inserted: &MarkerInsertion) {
    if inserted.cursors.is_empty() {
        warn!("No result lines were selected. The report is unchanged.");
        return;
    }
    for cursor in &inserted.cursors {
        info!("Inserted {} marker, cursor on line {}", marker, cursor + 1);
    }
}

/// Parses `[NAME=]PATH` root arguments. Without any, the current directory is the
/// only root.
fn parse_roots(args: &[String]) -> Result<Vec<WorkspaceRoot>> {
    if args.is_empty() {
        let cwd = std::env::current_dir().context("Failed to read the current directory")?;
        return Ok(vec![WorkspaceRoot::from_path(cwd)]);
    }

    args.iter()
        .map(|arg| {
            let (name, path) = match arg.split_once('=') {
                Some((name, path)) if !name.is_empty() => (Some(name), path),
                _ => (None, arg.as_str()),
            };
            let path = fs::canonicalize(path)
                .with_context(|| format!("Workspace root '{}' not found.", path))?;
            if !path.is_dir() {
                return Err(anyhow!(
                    "Workspace root '{}' is not a directory.",
                    path.display()
                ));
            }
            Ok(match name {
                Some(name) => WorkspaceRoot::new(name, path),
                None => WorkspaceRoot::from_path(path),
            })
        })
        .collect()
}

fn append_change_log(path: &Path, log: &ChangeLog) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open change log '{}'", path.display()))?;
    write!(file, "{}", log)
        .with_context(|| format!("Failed to write change log '{}'", path.display()))?;
    Ok(())
}

// --- Command Line ---

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Write hand-edited search results back to the files they came from.",
    long_about = "Reads a search report (file headers followed by numbered result lines), finds the lines you edited, and applies them to the original files. Lines numbered with ↑ or ↓ are inserted above or below their neighbours."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Increase logging verbosity. Can be used multiple times.
    #[arg(short, long, global = true, action = clap::ArgAction::Count, long_help = "Increase logging verbosity.\n-v for info, -vv for debug, -vvv for trace.")]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the edits in a report to its files.
    Apply(ApplyArgs),
    /// Insert an empty ↑ marker line above each selected result line.
    InsertAbove(SelectionArgs),
    /// Insert an empty ↓ marker line below each selected result line.
    InsertBelow(SelectionArgs),
    /// Delete the selected lines from the report.
    DeleteLine(SelectionArgs),
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Path to the edited report.
    report: PathBuf,
    /// A workspace root, optionally named (`proj=/path/to/proj`). Repeatable.
    #[arg(long = "root", value_name = "[NAME=]PATH")]
    roots: Vec<String>,
    /// Ignore ↑/↓ markers and print a log of every replaced line.
    #[arg(long)]
    log_only: bool,
    /// Lines longer than this in the original file are never edited.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,
    /// Also append the change log to this file (with --log-only).
    #[arg(long, value_name = "FILE")]
    change_log: Option<PathBuf>,
    /// Show what would be done, but don't modify files.
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// Path to the report to edit in place.
    report: PathBuf,
    /// A 1-based report line to act on. Repeatable.
    #[arg(short, long = "line", value_name = "LINE", required = true)]
    lines: Vec<usize>,
}

// --- Logging ---

fn setup_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}
