//! Temporary artifact storage for conversion jobs.
//!
//! Every file a job touches on disk (the uploaded source, the file the
//! office toolchain writes next to it) is an [`Artifact`]. An artifact owns
//! its path through a [`tempfile::TempPath`], which gives the lifecycle the
//! dispatcher relies on:
//!
//! * [`Artifact::delete`] consumes the artifact, so a second delete does not
//!   compile;
//! * if nobody calls it (early return, panic, a caller that never reads the
//!   result), dropping the artifact removes the file;
//! * deleting a file that is already gone is `Ok(())`.
//!
//! Storage names are `<arrival millis>-<random>-<sanitized original name>`.
//! The random part keeps simultaneous uploads of the same file apart; the
//! original name is kept last so the office toolchain, which derives its
//! output name from the input's stem, produces a predictable file.

use crate::error::ConversionError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempPath;
use tracing::{debug, warn};

/// Identifier of one conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Allocate the next process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        JobId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A temporary file owned by one job.
#[derive(Debug)]
pub struct Artifact {
    path: TempPath,
    job: JobId,
    original_name: String,
    created_at: SystemTime,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    /// The name the file had on the client, before sanitising.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the file. A file that is already gone counts as removed.
    pub fn delete(self) -> io::Result<()> {
        let job = self.job;
        let shown = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => {
                debug!(%job, path = %shown.display(), "artifact deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(%job, path = %shown.display(), error = %e, "artifact delete failed");
                Err(e)
            }
        }
    }
}

/// Root directory for all job artifacts, shared by concurrent jobs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the artifact directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConversionError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ConversionError::Storage {
            detail: format!("cannot create artifact directory '{}': {e}", root.display()),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store uploaded bytes under a fresh unique name.
    pub async fn intake(
        &self,
        job: JobId,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<Artifact, ConversionError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let prefix = format!("{millis}-");
        let suffix = format!("-{}", sanitize_file_name(original_name));

        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .rand_bytes(8)
            .tempfile_in(&self.root)
            .map_err(ConversionError::storage)?;
        // From here on the path is owned; an early return removes the file.
        let path = file.into_temp_path();

        tokio::fs::write(&path, bytes)
            .await
            .map_err(ConversionError::storage)?;

        debug!(%job, path = %path.display(), bytes = bytes.len(), "artifact stored");
        Ok(Artifact {
            path,
            job,
            original_name: original_name.to_string(),
            created_at: SystemTime::now(),
        })
    }

    /// Take ownership of a file a backend wrote, so its removal goes
    /// through the same exactly-once path as uploads.
    pub fn adopt(&self, job: JobId, path: PathBuf, original_name: &str) -> Artifact {
        Artifact {
            path: TempPath::from_path(path),
            job,
            original_name: original_name.to_string(),
            created_at: SystemTime::now(),
        }
    }
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Make a client-supplied file name safe to embed in a storage name.
///
/// Directory components are dropped, whitespace runs become `_`, and any
/// character outside `[A-Za-z0-9._-]` becomes `_`. Leading dots are
/// stripped so the result is never hidden or a `..` component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let spaced = RE_WHITESPACE.replace_all(base.trim(), "_");
    let safe = RE_UNSAFE.replace_all(&spaced, "_");
    let safe = safe.trim_start_matches('.');
    if safe.is_empty() {
        "upload".to_string()
    } else {
        safe.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_whitespace_and_strips_dirs() {
        assert_eq!(sanitize_file_name("my report.docx"), "my_report.docx");
        assert_eq!(sanitize_file_name("a \t b.txt"), "a_b.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\x\\Budget 2024.xlsx"), "Budget_2024.xlsx");
        assert_eq!(sanitize_file_name("rés umé.pdf"), "r_s_um_.pdf");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn job_ids_are_unique() {
        let a = JobId::next();
        let b = JobId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("job-"));
    }

    #[tokio::test]
    async fn intake_keeps_extension_and_delete_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let a = store
            .intake(JobId::next(), "Quarterly report.docx", b"PK\x03\x04")
            .await
            .unwrap();
        let name = a.path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.ends_with("-Quarterly_report.docx"), "got {name}");
        assert!(a.exists());
        assert_eq!(a.original_name(), "Quarterly report.docx");

        let path = a.path().to_path_buf();
        a.delete().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn concurrent_intake_of_same_name_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let job = JobId::next();
        let (a, b) = tokio::join!(
            store.intake(job, "same.txt", b"one"),
            store.intake(job, "same.txt", b"two")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read(a.path()).unwrap(), b"one");
        assert_eq!(std::fs::read(b.path()).unwrap(), b"two");
    }

    #[tokio::test]
    async fn drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let a = store.intake(JobId::next(), "x.txt", b"x").await.unwrap();
        let path = a.path().to_path_buf();
        drop(a);
        assert!(!path.exists());
    }

    #[test]
    fn deleting_a_vanished_file_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let path = dir.path().join("gone.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let a = store.adopt(JobId::next(), path.clone(), "gone.pdf");
        std::fs::remove_file(&path).unwrap();
        assert!(a.delete().is_ok());
    }
}
