//! Tracing setup for the `segmask` binary.
//!
//! Every run appends to its own file under `<app root>/logs`, named after the
//! launch time so that lexical order is chronological. Events are mirrored to
//! stderr; stdout carries command output only.

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use time::{OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, filter::ParseError, fmt, prelude::*};

use crate::app_dirs::{AppDirError, AppHome};

/// Environment variable holding `EnvFilter` directives, e.g. `segmask=debug`.
pub const LOG_ENV: &str = "SEGMASK_LOG";

const DEFAULT_DIRECTIVES: &str = "segmask=info";
const RUN_FILE_PREFIX: &str = "segmask_";
const RUN_FILE_EXTENSION: &str = "log";
/// Run logs kept after pruning, the current one included.
const RETAINED_RUNS: usize = 10;

static SESSION: OnceLock<LogSession> = OnceLock::new();

/// The installed subscriber's file sink; flushing stops when it is dropped.
#[derive(Debug)]
struct LogSession {
    log_path: PathBuf,
    _guard: WorkerGuard,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    AppDir(#[from] AppDirError),
    #[error("Failed to format the run timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("Failed to manage log file {path}: {source}")]
    File { path: PathBuf, source: io::Error },
    #[error("Invalid SEGMASK_LOG directives: {0}")]
    Filter(#[from] ParseError),
    #[error("Another tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber and return this run's log file.
///
/// Later calls return the same path without reinstalling anything.
pub fn init() -> Result<&'static Path, LoggingError> {
    if let Some(session) = SESSION.get() {
        return Ok(&session.log_path);
    }

    let home = AppHome::resolve()?;
    let dir = home.logs_dir()?;
    let started = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let file_name = run_file_name(started)?;
    let log_path = dir.join(&file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|source| LoggingError::File {
            path: log_path.clone(),
            source,
        })?;
    retain_newest_runs(&dir, RETAINED_RUNS)?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(&dir, &file_name));
    let timer = local_timer();
    let subscriber = Registry::default()
        .with(env_filter()?)
        .with(
            fmt::layer()
                .with_timer(timer.clone())
                .with_writer(io::stderr),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;

    let session = SESSION.get_or_init(|| LogSession {
        log_path,
        _guard: guard,
    });
    tracing::debug!(
        path = %session.log_path.display(),
        home_source = ?home.source,
        "Run log opened"
    );
    Ok(&session.log_path)
}

fn env_filter() -> Result<EnvFilter, LoggingError> {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => Ok(EnvFilter::try_new(directives)?),
        _ => Ok(EnvFilter::new(DEFAULT_DIRECTIVES)),
    }
}

fn local_timer() -> fmt::time::OffsetTime<&'static [BorrowedFormatItem<'static>]> {
    const STAMP: &[BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, STAMP)
}

fn run_file_name(started: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME: &[BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    Ok(format!(
        "{RUN_FILE_PREFIX}{}.{RUN_FILE_EXTENSION}",
        started.format(NAME)?
    ))
}

fn is_run_file(name: &str) -> bool {
    name.starts_with(RUN_FILE_PREFIX)
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext == RUN_FILE_EXTENSION)
}

/// Delete all but the `keep` lexically newest run logs in `dir`.
fn retain_newest_runs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let entries = fs::read_dir(dir).map_err(|source| LoggingError::File {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut runs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .filter(|entry| entry.file_name().to_str().is_some_and(is_run_file))
        .map(|entry| entry.path())
        .collect();
    runs.sort();
    let stale = runs.len().saturating_sub(keep);
    for path in &runs[..stale] {
        fs::remove_file(path).map_err(|source| LoggingError::File {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}
