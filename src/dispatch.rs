//! Conversion job orchestration.
//!
//! ## Job lifecycle
//!
//! ```text
//! submit(upload)
//!   ├─ route lookup      ──✗──▶ UnsupportedConversion   (nothing stored)
//!   ├─ upload check      ──✗──▶ InvalidInput            (nothing stored)
//!   ├─ intake            ──▶ source Artifact
//!   └─ convert
//!        Received ──▶ Running ──▶ Succeeded | Failed | TimedOut
//!        source Artifact deleted on every path
//!        output Artifact handed to the caller inside ConvertedDocument
//! ```
//!
//! Every file the dispatcher touches is an [`Artifact`], so removal is tied
//! to ownership. The source is deleted as soon as the backend is done with
//! it. The output belongs to the returned [`ConvertedDocument`] and is
//! deleted once [`deliver`](ConvertedDocument::deliver) or
//! [`into_bytes`](ConvertedDocument::into_bytes) has read all of it, or when
//! the document is dropped unread. A job future dropped mid-flight drops its
//! artifacts too, and `kill_on_drop` takes the toolchain process with it.
//!
//! ## Deadlines
//!
//! The local backend enforces its own deadline and kills its subprocess.
//! The dispatcher wraps the call in a second, slightly longer
//! `tokio::time::timeout` so a backend that ignores its deadline still
//! cannot hold a job forever.

use crate::artifact::{sanitize_file_name, Artifact, ArtifactStore, JobId};
use crate::backend::{
    BackendKind, LocalBackend, LocalToolchain, RemoteBackend, RemoteService,
};
use crate::config::ServiceConfig;
use crate::error::{whole_secs, ConversionError, ToolchainError};
use crate::format::{output_file_name, Format};
use crate::progress::ProgressReporter;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

// ── Route table ──────────────────────────────────────────────────────────

/// One supported conversion and the backend that performs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub from: Format,
    pub to: Format,
    pub via: BackendKind,
}

/// Every conversion the dispatcher performs.
pub const ROUTES: &[Route] = &[
    Route {
        from: Format::WordProcessor,
        to: Format::Pdf,
        via: BackendKind::LocalToolchain,
    },
    Route {
        from: Format::Spreadsheet,
        to: Format::Pdf,
        via: BackendKind::LocalToolchain,
    },
    Route {
        from: Format::Pdf,
        to: Format::WordProcessor,
        via: BackendKind::RemoteService,
    },
    Route {
        from: Format::Pdf,
        to: Format::Spreadsheet,
        via: BackendKind::RemoteService,
    },
];

pub fn route_for(from: Format, to: Format) -> Option<&'static Route> {
    ROUTES.iter().find(|r| r.from == from && r.to == to)
}

// ── Upload ───────────────────────────────────────────────────────────────

/// A document as received from a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Sanity-check the upload against the format the client claims.
    ///
    /// A recognised extension must name `declared`; the content type must
    /// be plausible; the leading bytes must look like `declared`.
    pub fn validate(&self, declared: Format) -> Result<(), ConversionError> {
        let invalid = |reason: String| Err(ConversionError::InvalidInput { reason });

        if self.bytes.is_empty() {
            return invalid(format!("'{}' is empty", self.file_name));
        }
        if let Some(by_name) = Format::from_file_name(&self.file_name) {
            if by_name != declared {
                return invalid(format!(
                    "'{}' looks like {by_name}, not {declared}",
                    self.file_name
                ));
            }
        }
        if !declared.accepts_content_type(&self.content_type) {
            return invalid(format!(
                "content type '{}' does not match {declared}",
                self.content_type
            ));
        }
        if !declared.matches_content(&self.bytes) {
            return invalid(format!(
                "'{}' does not contain {declared} data",
                self.file_name
            ));
        }
        Ok(())
    }
}

/// One entry of [`JobDispatcher::submit_batch`].
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub upload: Upload,
    pub source: Format,
    pub target: Format,
}

// ── Jobs ─────────────────────────────────────────────────────────────────

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Received,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    fn can_become(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Received => next == JobStatus::Running || next == JobStatus::Failed,
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// One conversion request, from receipt to a terminal status.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: JobId,
    pub source_path: PathBuf,
    pub source_format: Format,
    pub target_format: Format,
    pub created_at: SystemTime,
    pub deadline: Duration,
    status: JobStatus,
}

impl ConversionJob {
    fn new(source: &Artifact, source_format: Format, target_format: Format, deadline: Duration) -> Self {
        Self {
            id: source.job(),
            source_path: source.path().to_path_buf(),
            source_format,
            target_format,
            created_at: source.created_at(),
            deadline,
            status: JobStatus::Received,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    fn advance(&mut self, next: JobStatus) {
        debug_assert!(
            self.status.can_become(next),
            "illegal job transition {:?} -> {:?}",
            self.status,
            next
        );
        debug!(job = %self.id, from = ?self.status, to = ?next, "job status");
        self.status = next;
    }
}

/// Outcome class written to the per-job log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure,
    Timeout,
}

impl JobOutcome {
    pub fn of<T>(result: &Result<T, ConversionError>) -> Self {
        match result {
            Ok(_) => JobOutcome::Success,
            Err(ConversionError::Timeout { .. }) => JobOutcome::Timeout,
            Err(_) => JobOutcome::Failure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failure => "failure",
            JobOutcome::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Result ───────────────────────────────────────────────────────────────

enum Body {
    File(Artifact),
    Memory(Vec<u8>),
}

/// A finished conversion, ready to hand to the client.
///
/// The output file (local toolchain routes) is deleted after a complete
/// [`deliver`](Self::deliver) / [`into_bytes`](Self::into_bytes), or when
/// the value is dropped.
pub struct ConvertedDocument {
    job_id: JobId,
    file_name: String,
    mime_type: &'static str,
    body: Body,
}

impl ConvertedDocument {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Download name, e.g. `report.pdf`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Path of the output file while it is still on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.body {
            Body::File(a) => Some(a.path()),
            Body::Memory(_) => None,
        }
    }

    /// Stream the document into `writer`, then release the output file.
    ///
    /// Returns the number of bytes written. On a write error the file is
    /// still removed (by drop) and the error is returned.
    pub async fn deliver<W>(self, writer: &mut W) -> Result<u64, ConversionError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let job = self.job_id;
        let written = match self.body {
            Body::Memory(bytes) => {
                writer
                    .write_all(&bytes)
                    .await
                    .map_err(ConversionError::storage)?;
                bytes.len() as u64
            }
            Body::File(artifact) => {
                let mut file = tokio::fs::File::open(artifact.path())
                    .await
                    .map_err(ConversionError::storage)?;
                let n = tokio::io::copy(&mut file, writer)
                    .await
                    .map_err(ConversionError::storage)?;
                drop(file);
                release(artifact);
                n
            }
        };
        writer.flush().await.map_err(ConversionError::storage)?;
        debug!(%job, bytes = written, "document delivered");
        Ok(written)
    }

    /// Read the whole document into memory, releasing the output file.
    pub async fn into_bytes(self) -> Result<Vec<u8>, ConversionError> {
        match self.body {
            Body::Memory(bytes) => Ok(bytes),
            Body::File(artifact) => {
                let bytes = tokio::fs::read(artifact.path())
                    .await
                    .map_err(ConversionError::storage)?;
                release(artifact);
                Ok(bytes)
            }
        }
    }
}

impl fmt::Debug for ConvertedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertedDocument")
            .field("job_id", &self.job_id)
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("path", &self.path())
            .finish()
    }
}

/// What this process can convert right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub status: String,
    pub local_toolchain: bool,
    pub remote_service: bool,
    pub pdf_engine: bool,
    pub routes: Vec<Route>,
}

// ── Dispatcher ───────────────────────────────────────────────────────────

/// Selects a backend per job, enforces deadlines, and owns cleanup.
///
/// `Send + Sync`; share it by reference (or `Arc`) between request handlers.
pub struct JobDispatcher {
    store: ArtifactStore,
    local: Arc<dyn LocalBackend>,
    remote: Arc<dyn RemoteBackend>,
    local_deadline: Duration,
    deadline_grace: Duration,
}

impl JobDispatcher {
    /// Build a dispatcher with the real backends described by `config`.
    pub fn new(config: ServiceConfig) -> Result<Self, ConversionError> {
        let store = ArtifactStore::open(&config.artifact_dir)?;
        let local = match config.toolchain_path {
            Some(exe) => LocalToolchain::new(Some(exe)),
            None => LocalToolchain::discover(),
        };
        let remote = RemoteService::new(
            config.remote_endpoint,
            config.remote_api_key,
            config.remote_timeout,
        )?;
        info!(
            artifact_dir = %store.root().display(),
            deadline_secs = config.local_deadline.as_secs(),
            "Dispatcher ready"
        );
        Ok(Self {
            store,
            local: Arc::new(local),
            remote: Arc::new(remote),
            local_deadline: config.local_deadline,
            deadline_grace: config.deadline_grace,
        })
    }

    /// Replace the local toolchain backend.
    pub fn with_local_backend(mut self, backend: impl LocalBackend + 'static) -> Self {
        self.local = Arc::new(backend);
        self
    }

    /// Replace the remote service backend.
    pub fn with_remote_backend(mut self, backend: impl RemoteBackend + 'static) -> Self {
        self.remote = Arc::new(backend);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            status: "ok".to_string(),
            local_toolchain: self.local.is_available(),
            remote_service: self.remote.is_configured(),
            pdf_engine: crate::pdf::engine_available(),
            routes: ROUTES.to_vec(),
        }
    }

    /// Validate, store and convert one upload.
    pub async fn submit(
        &self,
        upload: Upload,
        source_format: Format,
        target_format: Format,
    ) -> Result<ConvertedDocument, ConversionError> {
        let job = JobId::next();
        let started = Instant::now();
        let result: Result<ConvertedDocument, ConversionError> = async {
            route_for(source_format, target_format).ok_or(
                ConversionError::UnsupportedConversion {
                    from: source_format,
                    to: target_format,
                },
            )?;
            upload.validate(source_format)?;
            let source = self
                .store
                .intake(job, &upload.file_name, &upload.bytes)
                .await?;
            drop(upload);
            self.execute(source, source_format, target_format, None, &ProgressReporter::noop())
                .await
        }
        .await;
        log_outcome(job, source_format, target_format, started, &result);
        result
    }

    /// Submit many uploads, at most `concurrency` in flight. Results come
    /// back in request order.
    pub async fn submit_batch(
        &self,
        requests: Vec<BatchRequest>,
        concurrency: usize,
    ) -> Vec<Result<ConvertedDocument, ConversionError>> {
        let mut results: Vec<(usize, Result<ConvertedDocument, ConversionError>)> =
            stream::iter(requests.into_iter().enumerate())
                .map(|(i, req)| async move {
                    (i, self.submit(req.upload, req.source, req.target).await)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Convert an already-stored source artifact. The artifact is consumed
    /// and deleted whatever the outcome.
    pub async fn convert(
        &self,
        source: Artifact,
        source_format: Format,
        target_format: Format,
        deadline: Option<Duration>,
    ) -> Result<ConvertedDocument, ConversionError> {
        self.convert_with_progress(
            source,
            source_format,
            target_format,
            deadline,
            &ProgressReporter::noop(),
        )
        .await
    }

    /// [`convert`](Self::convert) with progress; the last event is 100.
    pub async fn convert_with_progress(
        &self,
        source: Artifact,
        source_format: Format,
        target_format: Format,
        deadline: Option<Duration>,
        progress: &ProgressReporter,
    ) -> Result<ConvertedDocument, ConversionError> {
        let job = source.job();
        let started = Instant::now();
        let result = self
            .execute(source, source_format, target_format, deadline, progress)
            .await;
        log_outcome(job, source_format, target_format, started, &result);
        result
    }

    async fn execute(
        &self,
        source: Artifact,
        source_format: Format,
        target_format: Format,
        deadline: Option<Duration>,
        progress: &ProgressReporter,
    ) -> Result<ConvertedDocument, ConversionError> {
        let deadline = deadline.unwrap_or(self.local_deadline);
        let mut job = ConversionJob::new(&source, source_format, target_format, deadline);
        let file_name = output_file_name(source.original_name(), target_format);

        let Some(route) = route_for(source_format, target_format) else {
            job.advance(JobStatus::Failed);
            release(source);
            progress.finish("Unsupported conversion");
            return Err(ConversionError::UnsupportedConversion {
                from: source_format,
                to: target_format,
            });
        };

        job.advance(JobStatus::Running);
        progress.report(10.0, format!("Converting with {}", route.via));

        let body = match route.via {
            BackendKind::LocalToolchain => self.run_local(&source, target_format, deadline).await,
            BackendKind::RemoteService => {
                self.run_remote(&source, source_format, target_format).await
            }
        };
        release(source);

        job.advance(match &body {
            Ok(_) => JobStatus::Succeeded,
            Err(ConversionError::Timeout { .. }) => JobStatus::TimedOut,
            Err(_) => JobStatus::Failed,
        });
        progress.finish(match &body {
            Ok(_) => "Conversion complete",
            Err(_) => "Conversion failed",
        });

        Ok(ConvertedDocument {
            job_id: job.id,
            file_name,
            mime_type: target_format.mime_type(),
            body: body?,
        })
    }

    async fn run_local(
        &self,
        source: &Artifact,
        target: Format,
        deadline: Duration,
    ) -> Result<Body, ConversionError> {
        if !self.local.is_available() {
            return Err(ToolchainError::NotConfigured.into());
        }
        let job = source.job();
        let expected = self.local.expected_output(source.path(), target);
        // Owns the output path from before the run, so a partial file is
        // removed on failure, timeout, or cancellation alike.
        let output = self.store.adopt(job, expected, source.original_name());

        let run = self.local.run(source.path(), target, deadline);
        match tokio::time::timeout(deadline.saturating_add(self.deadline_grace), run).await {
            Ok(Ok(path)) if path == output.path() => Ok(Body::File(output)),
            Ok(Ok(path)) => {
                release(output);
                Ok(Body::File(self.store.adopt(job, path, source.original_name())))
            }
            Ok(Err(e)) => {
                release(output);
                Err(e.into())
            }
            Err(_elapsed) => {
                warn!(%job, "Local backend ignored its deadline; abandoned");
                release(output);
                Err(ConversionError::Timeout {
                    deadline_secs: whole_secs(deadline),
                })
            }
        }
    }

    async fn run_remote(
        &self,
        source: &Artifact,
        source_format: Format,
        target_format: Format,
    ) -> Result<Body, ConversionError> {
        if !self.remote.is_configured() {
            return Err(ConversionError::BackendUnavailable {
                backend: BackendKind::RemoteService.to_string(),
                hint: "Set CLOUDMERSIVE_API_KEY (or --api-key) to enable PDF → word/spreadsheet."
                    .to_string(),
            });
        }
        let bytes = tokio::fs::read(source.path())
            .await
            .map_err(ConversionError::storage)?;
        let out = self
            .remote
            .run(
                bytes,
                &sanitize_file_name(source.original_name()),
                source_format,
                target_format,
            )
            .await?;
        Ok(Body::Memory(out))
    }
}

/// Delete an artifact; a failure is logged, never propagated.
fn release(artifact: Artifact) {
    let _ = artifact.delete();
}

fn log_outcome<T>(
    job: JobId,
    from: Format,
    to: Format,
    started: Instant,
    result: &Result<T, ConversionError>,
) {
    let outcome = JobOutcome::of(result);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => info!(%job, %from, %to, %outcome, elapsed_ms, "conversion finished"),
        Err(e) => warn!(%job, %from, %to, %outcome, elapsed_ms, error = %e, "conversion finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_table_covers_the_four_server_conversions() {
        assert_eq!(
            route_for(Format::WordProcessor, Format::Pdf).map(|r| r.via),
            Some(BackendKind::LocalToolchain)
        );
        assert_eq!(
            route_for(Format::Spreadsheet, Format::Pdf).map(|r| r.via),
            Some(BackendKind::LocalToolchain)
        );
        assert_eq!(
            route_for(Format::Pdf, Format::WordProcessor).map(|r| r.via),
            Some(BackendKind::RemoteService)
        );
        assert_eq!(
            route_for(Format::Pdf, Format::Spreadsheet).map(|r| r.via),
            Some(BackendKind::RemoteService)
        );
        assert!(route_for(Format::Image, Format::Spreadsheet).is_none());
        assert!(route_for(Format::Pdf, Format::Pdf).is_none());
    }

    #[test]
    fn upload_validation() {
        let docx = Upload::new("a.docx", "", b"PK\x03\x04rest".to_vec());
        assert!(docx.validate(Format::WordProcessor).is_ok());

        let renamed = Upload::new("a.pdf", "", b"PK\x03\x04rest".to_vec());
        assert!(renamed.validate(Format::WordProcessor).is_err());

        let wrong_bytes = Upload::new("a.docx", "", b"hello".to_vec());
        assert!(wrong_bytes.validate(Format::WordProcessor).is_err());

        let wrong_type = Upload::new("a.pdf", "image/png", b"%PDF-1.4".to_vec());
        assert!(wrong_type.validate(Format::Pdf).is_err());

        let no_ext = Upload::new("scan", "application/pdf", b"%PDF-1.4".to_vec());
        assert!(no_ext.validate(Format::Pdf).is_ok());

        let empty = Upload::new("a.pdf", "application/pdf", Vec::new());
        assert!(matches!(
            empty.validate(Format::Pdf),
            Err(ConversionError::InvalidInput { .. })
        ));
    }

    #[test]
    fn status_transitions() {
        use JobStatus::*;
        assert!(Received.can_become(Running));
        assert!(Received.can_become(Failed));
        assert!(Running.can_become(TimedOut));
        assert!(!Succeeded.can_become(Running));
        assert!(!Received.can_become(Succeeded));
    }

    #[test]
    fn outcome_classification() {
        let ok: Result<(), ConversionError> = Ok(());
        assert_eq!(JobOutcome::of(&ok), JobOutcome::Success);
        let timeout: Result<(), _> = Err(ConversionError::Timeout { deadline_secs: 60 });
        assert_eq!(JobOutcome::of(&timeout), JobOutcome::Timeout);
        let failed: Result<(), _> = Err(ConversionError::InvalidConfig("x".into()));
        assert_eq!(JobOutcome::of(&failed).to_string(), "failure");
    }
}
