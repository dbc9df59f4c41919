//! Plan writer: persists completions as text files.
//!
//! File names are `<slug>_<YYYY-MM-DD_HH-MM-SS-mmm>_<seq>.txt`. Files are
//! opened create-new, and an existing name bumps `seq`, so concurrent workers
//! and repeated runs never overwrite each other.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::record::BusinessRecord;

/// Upper bound on create-new attempts for a single document.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A generated plan, ready to be written.
#[derive(Debug, Clone)]
pub struct PlanDocument {
    pub content: String,
    pub record: BusinessRecord,
    pub created_at: DateTime<Utc>,
}

impl PlanDocument {
    pub fn new(record: BusinessRecord, content: String) -> Self {
        Self {
            content,
            record,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for generated plans.
#[async_trait]
pub trait PlanWriter: Send + Sync {
    /// Persist the document and return where it went.
    async fn write(&self, plan: &PlanDocument) -> Result<PathBuf, WriteError>;
}

/// Writes each plan to its own file under a directory.
#[derive(Debug)]
pub struct FsPlanWriter {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FsPlanWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    fn candidate(&self, plan: &PlanDocument) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(file_name(&plan.record.name, &plan.created_at, seq))
    }
}

#[async_trait]
impl PlanWriter for FsPlanWriter {
    async fn write(&self, plan: &PlanDocument) -> Result<PathBuf, WriteError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| WriteError::WriteFailure {
                path: self.dir.clone(),
                source,
            })?;

        let mut attempts = 0;
        let (path, mut file) = loop {
            let path = self.candidate(plan);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempts < MAX_NAME_ATTEMPTS => {
                    attempts += 1;
                    tracing::debug!(path = %path.display(), "plan file exists, trying next name");
                }
                Err(source) => return Err(WriteError::WriteFailure { path, source }),
            }
        };

        let written = async {
            file.write_all(plan.content.as_bytes()).await?;
            file.flush().await
        }
        .await;
        written.map_err(|source| WriteError::WriteFailure {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), bytes = plan.content.len(), "plan written");
        Ok(path)
    }
}

/// Build a file name for a plan. Public so callers can predict the pattern.
pub fn file_name(business_name: &str, created_at: &DateTime<Utc>, seq: u64) -> String {
    format!(
        "{}_{}_{seq}.txt",
        slug(business_name),
        created_at.format("%Y-%m-%d_%H-%M-%S-%3f")
    )
}

/// Upper bound on the slug, in bytes. Leaves room for the timestamp and
/// sequence under the common 255-byte file name limit.
pub const MAX_SLUG_BYTES: usize = 100;

/// Lowercase the name and collapse anything that is not alphanumeric or `-`
/// into `_`. Non-ASCII letters are kept.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_SLUG_BYTES));
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        let next = if c.is_alphanumeric() || c == '-' {
            c
        } else if out.ends_with('_') {
            continue;
        } else {
            '_'
        };
        if out.len() + next.len_utf8() > MAX_SLUG_BYTES {
            break;
        }
        out.push(next);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "business".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(name: &str, content: &str) -> PlanDocument {
        PlanDocument::new(
            BusinessRecord::new(name, "p", "s", "example.com"),
            content.to_string(),
        )
    }

    #[test]
    fn slug_lowercases_and_replaces_spaces() {
        assert_eq!(slug("Acme Widgets"), "acme_widgets");
        assert_eq!(slug("  Foo / Bar: Baz!  "), "foo_bar_baz");
        assert_eq!(slug("../../etc/passwd"), "etc_passwd");
        assert_eq!(slug("Zoë-Co"), "zoë-co");
        assert_eq!(slug("株式会社"), "株式会社");
        assert_eq!(slug("***"), "business");
    }

    #[test]
    fn slug_is_capped_on_a_char_boundary() {
        let long = slug(&"Acme Global Logistics ".repeat(14));
        assert!(long.len() <= MAX_SLUG_BYTES);
        assert!(long.starts_with("acme_global_logistics_acme"));
        assert!(!long.ends_with('_'));

        let wide = slug(&"株".repeat(60));
        assert!(wide.len() <= MAX_SLUG_BYTES);
        assert_eq!(wide.chars().count(), MAX_SLUG_BYTES / "株".len());
    }

    #[tokio::test]
    async fn long_business_name_still_writes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let writer = FsPlanWriter::new(tmp.path());
        let name = "Acme Global Logistics ".repeat(14);

        let path = writer.write(&doc(&name, "PLAN_TEXT")).await.unwrap();
        assert!(path.file_name().unwrap().len() < 255);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "PLAN_TEXT");
    }

    #[test]
    fn file_name_has_timestamp_and_seq() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            file_name("Acme", &at, 12),
            "acme_2024-03-09_14-05-07-000_12.txt"
        );
    }

    #[tokio::test]
    async fn writes_content_and_creates_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("plans");
        let writer = FsPlanWriter::new(&dir);

        let path = writer.write(&doc("Acme", "PLAN_TEXT")).await.unwrap();
        assert!(path.starts_with(&dir));
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("acme_"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "PLAN_TEXT");
    }

    #[tokio::test]
    async fn identical_documents_get_distinct_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let writer = FsPlanWriter::new(tmp.path());
        let plan = doc("Acme", "one");

        let a = writer.write(&plan).await.unwrap();
        let b = writer.write(&plan).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn existing_file_is_never_overwritten() {
        let tmp = tempfile::TempDir::new().unwrap();
        let plan = doc("Acme", "new");

        // A second writer restarts its sequence at 0, as a re-run would.
        let first = FsPlanWriter::new(tmp.path()).write(&plan).await.unwrap();
        let second = FsPlanWriter::new(tmp.path()).write(&plan).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "new");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "new");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn uncreatable_directory_is_write_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "not a dir").unwrap();
        let writer = FsPlanWriter::new(blocker.join("plans"));

        let err = writer.write(&doc("Acme", "x")).await.unwrap_err();
        assert!(matches!(err, WriteError::WriteFailure { .. }));
    }
}
