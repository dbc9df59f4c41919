//! Failure sinks: where per-record failures are recorded.
//!
//! The batch dispatcher calls [`FailureSink::record`] once per failed record,
//! in submission order, from a single task.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::batch::Failure;

/// Append-only destination for failures.
pub trait FailureSink: Send {
    fn record(&mut self, failure: &Failure) -> Result<()>;
}

/// Appends one line per failure to a text file.
///
/// Line format: `[<RFC 3339 UTC>] Error processing '<name>': <message>`.
#[derive(Debug)]
pub struct FileFailureLog {
    path: PathBuf,
    file: File,
}

impl FileFailureLog {
    /// Open (or create) the log for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create error log directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open error log {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FailureSink for FileFailureLog {
    fn record(&mut self, failure: &Failure) -> Result<()> {
        writeln!(self.file, "{}", format_line(failure))
            .and_then(|()| self.file.flush())
            .with_context(|| format!("failed to append to error log {}", self.path.display()))
    }
}

fn format_line(failure: &Failure) -> String {
    // Keep one failure per line even when the message carries stderr.
    let message = failure
        .message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "[{}] Error processing '{}': {message}",
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        failure.record.name
    )
}

/// Keeps failures in memory.
#[derive(Debug, Default)]
pub struct MemoryFailureSink {
    failures: Vec<Failure>,
}

impl MemoryFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl FailureSink for MemoryFailureSink {
    fn record(&mut self, failure: &Failure) -> Result<()> {
        self.failures.push(failure.clone());
        Ok(())
    }
}
