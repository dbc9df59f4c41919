//! Pre-dispatch checks. Any error here aborts the run before a single record
//! is processed.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::failure_log::FileFailureLog;
use crate::record::{self, RecordSet, SourceError};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Input(#[from] SourceError),

    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open error log {}: {reason}", path.display())]
    ErrorLog { path: PathBuf, reason: String },
}

/// Everything a batch run needs from the filesystem.
#[derive(Debug)]
pub struct Prepared {
    pub records: RecordSet,
    pub error_log: FileFailureLog,
}

/// Read the input, make sure the output directory exists, and open the
/// error log.
pub fn prepare(input: &Path, output_dir: &Path, error_log: &Path) -> Result<Prepared, SetupError> {
    let records = record::load_records(input)?;

    std::fs::create_dir_all(output_dir).map_err(|source| SetupError::OutputDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let error_log = FileFailureLog::open(error_log).map_err(|e| SetupError::ErrorLog {
        path: error_log.to_path_buf(),
        reason: format!("{e:#}"),
    })?;

    Ok(Prepared { records, error_log })
}
