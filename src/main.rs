//! shuttle - cancellable bulk file transfers.
//!
//! Usage:
//!   shuttle copy SRC... DEST      Copy sources into a directory
//!   shuttle move SRC... DEST      Move sources into a directory
//!   shuttle restore SRC... DEST   Move sources back out of a holding area
//!   shuttle trash PATH...         Send paths to the system trash
//!   shuttle delete PATH...        Delete paths permanently
//!   shuttle --help                Show help

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use shuttle_core::{
    ConflictChoice, ConflictDecision, ConflictInfo, ErrorAction, ErrorInfo, JobOptions,
    JobOutcome, JobReport, JobSpec, ProgressSnapshot, VerifyMode,
};
use shuttle_jobs::{ChannelDecisions, DecisionRequest, Engine, JobEvent, JobHandle};

#[derive(Parser)]
#[command(
    name = "shuttle",
    version,
    about = "Cancellable bulk copy, move, delete, trash and restore",
    long_about = "shuttle runs one file job at a time and asks before it overwrites anything.\n\n\
                  Defaults for every option can be set in config.toml under the user \
                  config directory (e.g. ~/.config/shuttle/config.toml)."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: OptionArgs,

    /// Read option defaults from this file instead of the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the final report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Do not draw the progress line
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Copy sources into a target directory
    Copy {
        /// Sources followed by the target directory
        #[arg(required = true, num_args = 2.., value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Move sources into a target directory
    Move {
        /// Sources followed by the target directory
        #[arg(required = true, num_args = 2.., value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Move sources back into a directory; every source must still exist
    Restore {
        /// Sources followed by the target directory
        #[arg(required = true, num_args = 2.., value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Send paths to the system trash
    Trash {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Delete paths permanently
    Delete {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },
}

/// Flags that override the configured job options.
#[derive(Args)]
struct OptionArgs {
    /// Answer destination conflicts without asking
    #[arg(long, global = true, value_name = "CHOICE")]
    on_conflict: Option<ConflictArg>,

    /// Answer failures without asking
    #[arg(long, global = true, value_name = "ACTION")]
    on_error: Option<ErrorArg>,

    /// Reuse the first conflict answer for the rest of the job
    #[arg(long, global = true)]
    apply_to_all: bool,

    /// Copy what symbolic links point to instead of the links
    #[arg(long, global = true)]
    follow_symlinks: bool,

    /// Leave permission bits of created entries at their defaults
    #[arg(long, global = true)]
    no_permissions: bool,

    /// Leave timestamps of created entries at their defaults
    #[arg(long, global = true)]
    no_timestamps: bool,

    /// How written files are checked
    #[arg(long, global = true)]
    verify: Option<VerifyArg>,

    /// Read/write chunk size (e.g., "64K", "1M")
    #[arg(long, global = true)]
    chunk_size: Option<String>,

    /// Minimum milliseconds between progress updates
    #[arg(long, global = true, value_name = "MS")]
    progress_interval: Option<u64>,

    /// Word used in "keep both" names
    #[arg(long, global = true, value_name = "WORD")]
    copy_marker: Option<String>,

    /// Treat this directory as limited to 4 GiB files (repeatable)
    #[arg(long = "capped", global = true, value_name = "DIR")]
    capped_targets: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictArg {
    Ask,
    Skip,
    Replace,
    Merge,
    KeepBoth,
}

impl ConflictArg {
    fn policy(self) -> Option<ConflictChoice> {
        match self {
            Self::Ask => None,
            Self::Skip => Some(ConflictChoice::Skip),
            Self::Replace => Some(ConflictChoice::Replace),
            Self::Merge => Some(ConflictChoice::Merge),
            Self::KeepBoth => Some(ConflictChoice::KeepBoth),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ErrorArg {
    Ask,
    Retry,
    Skip,
    Cancel,
}

impl ErrorArg {
    fn policy(self) -> Option<ErrorAction> {
        match self {
            Self::Ask => None,
            Self::Retry => Some(ErrorAction::Retry),
            Self::Skip => Some(ErrorAction::Skip),
            Self::Cancel => Some(ErrorAction::Cancel),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VerifyArg {
    Size,
    Checksum,
}

impl From<VerifyArg> for VerifyMode {
    fn from(arg: VerifyArg) -> Self {
        match arg {
            VerifyArg::Size => VerifyMode::Size,
            VerifyArg::Checksum => VerifyMode::Checksum,
        }
    }
}

impl OptionArgs {
    /// Layer the flags over `base` and validate the result.
    fn apply(&self, base: JobOptions) -> Result<JobOptions> {
        let chunk_size = match &self.chunk_size {
            Some(size) => parse_size(size)?,
            None => base.chunk_size,
        };
        let mut capped = base.capped_targets;
        capped.extend(self.capped_targets.iter().cloned());

        let mut builder = JobOptions::builder();
        builder
            .follow_symlinks(self.follow_symlinks || base.follow_symlinks)
            .preserve_permissions(base.preserve_permissions && !self.no_permissions)
            .preserve_timestamps(base.preserve_timestamps && !self.no_timestamps)
            .apply_to_all_conflicts(self.apply_to_all || base.apply_to_all_conflicts)
            .verify(self.verify.map_or(base.verify, VerifyMode::from))
            .chunk_size(chunk_size)
            .progress_interval_ms(self.progress_interval.unwrap_or(base.progress_interval_ms))
            .copy_marker(self.copy_marker.clone().unwrap_or(base.copy_marker))
            .keep_both_attempts(base.keep_both_attempts)
            .capped_targets(capped);

        let conflict = match self.on_conflict {
            Some(arg) => arg.policy(),
            None => base.conflict_policy,
        };
        if let Some(choice) = conflict {
            builder.conflict_policy(choice);
        }
        let error = match self.on_error {
            Some(arg) => arg.policy(),
            None => base.error_policy,
        };
        if let Some(action) = error {
            builder.error_policy(action);
        }

        builder.build().context("Invalid options")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SHUTTLE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let base = load_options(cli.config.as_deref())?;
    let options = cli.options.apply(base)?;

    let spec = match cli.command {
        Command::Copy { paths } => {
            let (sources, target) = split_target(paths)?;
            JobSpec::copy(sources, target)
        }
        Command::Move { paths } => {
            let (sources, target) = split_target(paths)?;
            JobSpec::move_to(sources, target)
        }
        Command::Restore { paths } => {
            let (sources, target) = split_target(paths)?;
            JobSpec::restore(sources, target)
        }
        Command::Trash { paths } => JobSpec::trash(paths),
        Command::Delete { paths } => JobSpec::delete(paths),
    }
    .with_options(options);

    let (decisions, requests) = ChannelDecisions::new();
    let engine = Engine::new();
    let handle = engine
        .submit(spec, Arc::new(decisions))
        .context("Could not start job")?;

    let report = drive(handle, requests, cli.quiet).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    match report.outcome {
        JobOutcome::Completed => Ok(()),
        JobOutcome::Cancelled => bail!("Job cancelled"),
        JobOutcome::Failed(err) => Err(eyre!(err).wrap_err("Job failed")),
    }
}

/// Default config file location.
fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("shuttle").join("config.toml"))
}

/// Load option defaults. A missing default file is fine; a missing
/// explicit one is not.
fn load_options(explicit: Option<&Path>) -> Result<JobOptions> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(JobOptions::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    let options: JobOptions = toml::from_str(&content)
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    options
        .validate()
        .map_err(|e| eyre!(e))
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(options)
}

fn split_target(mut paths: Vec<PathBuf>) -> Result<(Vec<PathBuf>, PathBuf)> {
    let target = paths.pop().ok_or_else(|| eyre!("Missing target directory"))?;
    if paths.is_empty() {
        bail!("Missing source paths");
    }
    Ok((paths, target))
}

/// Pump events and decision requests until the job ends.
async fn drive(
    mut handle: JobHandle,
    mut requests: mpsc::Receiver<DecisionRequest>,
    quiet: bool,
) -> Result<JobReport> {
    let mut requests_open = true;
    let mut line_drawn = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(JobEvent::Progress(snapshot)) if !quiet => {
                    draw_progress(&snapshot);
                    line_drawn = true;
                }
                Some(JobEvent::Progress(_)) => {}
                Some(JobEvent::State(state)) => tracing::debug!(%state, "job state"),
                Some(JobEvent::ItemFailed(err)) => {
                    clear_line(&mut line_drawn);
                    eprintln!("error: {err}");
                }
                Some(JobEvent::Finished(_)) | None => break,
            },
            request = requests.recv(), if requests_open => match request {
                Some(request) => {
                    clear_line(&mut line_drawn);
                    answer(request).await?;
                }
                None => requests_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                clear_line(&mut line_drawn);
                eprintln!("Cancelling...");
                handle.cancel();
            }
        }
    }

    clear_line(&mut line_drawn);
    Ok(handle.join().await)
}

async fn answer(request: DecisionRequest) -> Result<()> {
    match request {
        DecisionRequest::Conflict { conflict, reply } => {
            let decision = tokio::task::spawn_blocking(move || ask_conflict(&conflict)).await??;
            let _ = reply.send(decision);
        }
        DecisionRequest::Error { error, reply } => {
            let action = tokio::task::spawn_blocking(move || ask_error(&error)).await??;
            let _ = reply.send(action);
        }
    }
    Ok(())
}

/// Ask about an existing destination. An upper-case answer applies to all
/// remaining conflicts.
fn ask_conflict(conflict: &ConflictInfo) -> io::Result<ConflictDecision> {
    let newer = if conflict.destination_is_newer() {
        ", newer than the source"
    } else {
        ""
    };
    eprintln!(
        "{} already exists ({}{})",
        conflict.destination.display(),
        format_size(conflict.destination_size),
        newer
    );

    let mut choices = vec![('s', ConflictChoice::Skip), ('r', ConflictChoice::Replace)];
    if conflict.can_merge() {
        choices.push(('m', ConflictChoice::Merge));
    }
    choices.push(('k', ConflictChoice::KeepBoth));
    choices.push(('c', ConflictChoice::Cancel));

    let menu = menu(choices.iter().map(|(key, choice)| (*key, choice.to_string())));
    loop {
        let Some(line) = prompt(&format!("{menu} (upper case = all): "))? else {
            return Ok(ConflictDecision::once(ConflictChoice::Cancel));
        };
        let Some(key) = line.chars().next() else {
            continue;
        };
        let lower = key.to_ascii_lowercase();
        if let Some((_, choice)) = choices.iter().find(|(k, _)| *k == lower) {
            return Ok(if key.is_ascii_uppercase() {
                ConflictDecision::for_all(*choice)
            } else {
                ConflictDecision::once(*choice)
            });
        }
    }
}

fn ask_error(info: &ErrorInfo) -> io::Result<ErrorAction> {
    eprintln!("{}", info.error);

    let actions = info.allowed_actions();
    let menu = menu(actions.iter().map(|action| {
        let key = action.to_string().chars().next().unwrap_or('?').to_ascii_lowercase();
        (key, action.to_string())
    }));
    loop {
        let Some(line) = prompt(&format!("{menu}: "))? else {
            return Ok(ErrorAction::Cancel);
        };
        let Some(key) = line.chars().next().map(|c| c.to_ascii_lowercase()) else {
            continue;
        };
        if let Some(action) = actions
            .iter()
            .find(|a| a.to_string().to_ascii_lowercase().starts_with(key))
        {
            return Ok(*action);
        }
    }
}

/// "[s]kip, [r]eplace" style menu text.
fn menu(entries: impl Iterator<Item = (char, String)>) -> String {
    entries
        .map(|(key, label)| {
            let rest: String = label.chars().skip(1).collect();
            format!("[{}]{}", key, rest.to_lowercase())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print a question on stderr and read one trimmed line. `None` on EOF.
fn prompt(question: &str) -> io::Result<Option<String>> {
    let mut stderr = io::stderr();
    write!(stderr, "{question}")?;
    stderr.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn draw_progress(snapshot: &ProgressSnapshot) {
    let eta = snapshot
        .eta_seconds
        .map(|s| format!(" eta {}:{:02}", s / 60, s % 60))
        .unwrap_or_default();
    let current = snapshot
        .current_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    eprint!(
        "\r\x1b[2K{:>5.1}% {}/{} {}/{} items {}/s{} {}",
        snapshot.percentage(),
        format_size(snapshot.bytes_done),
        format_size(snapshot.bytes_total),
        snapshot.items_done,
        snapshot.items_total,
        format_size(snapshot.bytes_per_second as u64),
        eta,
        truncate(&current, 40)
    );
    let _ = io::stderr().flush();
}

fn clear_line(drawn: &mut bool) {
    if *drawn {
        eprint!("\r\x1b[2K");
        *drawn = false;
    }
}

fn print_report(report: &JobReport) {
    println!("{}", report.summary());
    println!(" {} processed", format_size(report.bytes_processed));

    if !report.errors.is_empty() {
        println!();
        println!("{} error(s):", report.errors.len());
        for err in &report.errors {
            println!("  {err}");
        }
    }
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

/// Parse a size string (e.g., "4K", "64KB", "1M").
fn parse_size(s: &str) -> Result<usize> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    let unit = &s[digits.len()..];

    let multiplier: f64 = match unit {
        "" | "B" => 1.0,
        "K" | "KB" => 1024.0,
        "M" | "MB" => 1024.0 * 1024.0,
        "G" | "GB" => 1024.0 * 1024.0 * 1024.0,
        other => bail!("Unknown size unit: {other}"),
    };
    let num: f64 = digits
        .parse()
        .with_context(|| format!("Invalid size: {s}"))?;
    Ok((num * multiplier) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1MB").unwrap(), 1024 * 1024);
        assert!(parse_size("3 parsecs").is_err());
    }

    #[test]
    fn test_config_marker_with_separator_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "copy_marker = \"x/y\"\n").unwrap();
        let err = load_options(Some(&path)).unwrap_err();
        assert!(err.chain().any(|cause| cause.to_string().contains("path separator")));

        std::fs::write(&path, "copy_marker = \"kopie\"\n").unwrap();
        assert_eq!(load_options(Some(&path)).unwrap().copy_marker, "kopie");
    }

    #[test]
    fn test_menu() {
        let text = menu([('s', "Skip".to_string()), ('k', "Keep both".to_string())].into_iter());
        assert_eq!(text, "[s]kip, [k]eep both");
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "shuttle",
            "copy",
            "a",
            "b",
            "--on-conflict",
            "keep-both",
            "--chunk-size",
            "4K",
        ]);
        let base = JobOptions {
            copy_marker: "kopie".to_string(),
            conflict_policy: Some(ConflictChoice::Skip),
            ..JobOptions::default()
        };
        let options = cli.options.apply(base).unwrap();

        assert_eq!(options.conflict_policy, Some(ConflictChoice::KeepBoth));
        assert_eq!(options.chunk_size, 4096);
        assert_eq!(options.copy_marker, "kopie");
    }

    #[test]
    fn test_ask_clears_configured_policy() {
        let cli = Cli::parse_from(["shuttle", "delete", "x", "--on-error", "ask"]);
        let base = JobOptions {
            error_policy: Some(ErrorAction::Skip),
            ..JobOptions::default()
        };
        assert_eq!(cli.options.apply(base).unwrap().error_policy, None);
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let cli = Cli::parse_from(["shuttle", "trash", "x", "--chunk-size", "0"]);
        assert!(cli.options.apply(JobOptions::default()).is_err());
    }

    #[test]
    fn test_split_target() {
        let (sources, target) =
            split_target(vec!["a".into(), "b".into(), "dest".into()]).unwrap();
        assert_eq!(sources, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(target, PathBuf::from("dest"));
    }
}
