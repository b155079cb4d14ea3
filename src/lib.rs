//! # docshift
//!
//! Document conversion between plain text, HTML, PDF, word-processor and
//! spreadsheet formats.
//!
//! Two engines carry the work:
//!
//! - **Job orchestration** ([`dispatch`]): route a conversion to a backend
//!   (LibreOffice run as a subprocess, or a remote conversion service), run
//!   it under a deadline, and delete every temporary file exactly once
//!   whatever the outcome.
//! - **Pagination and reflow** ([`layout`]): lay flowing text out into
//!   fixed-size pages, and turn per-page text back into one continuous
//!   text or HTML document with the page boundaries kept.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload ──▶ JobDispatcher ──┬─ word / spreadsheet → PDF ──▶ LocalToolchain (soffice)
//!                            └─ PDF → word / spreadsheet ──▶ RemoteService (HTTP)
//!
//! text ──▶ paginate ──▶ PaginationResult ──▶ pdf::render_pages ──▶ PDF
//! PDF  ──▶ pdf::extract_text ──▶ PaginationResult ──▶ reflow ──▶ text | HTML
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docshift::{Format, JobDispatcher, ServiceConfig, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env()?;
//!     let dispatcher = JobDispatcher::new(config)?;
//!
//!     let bytes = std::fs::read("budget.xlsx")?;
//!     let upload = Upload::new("budget.xlsx", Format::Spreadsheet.mime_type(), bytes);
//!     let document = dispatcher
//!         .submit(upload, Format::Spreadsheet, Format::Pdf)
//!         .await?;
//!
//!     let mut out = tokio::fs::File::create(document.file_name()).await?;
//!     document.deliver(&mut out).await?;
//!     Ok(())
//! }
//! ```
//!
//! Pagination needs no runtime:
//!
//! ```rust
//! use docshift::{paginate, reflow, HelveticaMetrics, OutputKind, PageGeometry, ProgressReporter};
//!
//! let pages = paginate(
//!     "first line\n\nthird line",
//!     &PageGeometry::a4(),
//!     &HelveticaMetrics,
//!     &ProgressReporter::noop(),
//! )
//! .unwrap();
//! assert_eq!(pages.total_pages(), 1);
//! assert!(reflow(&pages, OutputKind::PlainText).starts_with("--- Page 1 ---\n"));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docshift` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docshift = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod backend;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod layout;
pub mod pdf;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{Artifact, ArtifactStore, JobId};
pub use backend::{BackendKind, LocalBackend, LocalToolchain, RemoteBackend, RemoteService};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use convert::{
    convert_file, html_to_pdf, html_to_text, pdf_pages, pdf_to_html, pdf_to_text, text_to_pdf,
};
pub use dispatch::{
    route_for, BatchRequest, Capabilities, ConversionJob, ConvertedDocument, JobDispatcher,
    JobOutcome, JobStatus, Route, Upload, ROUTES,
};
pub use error::{ConversionError, RemoteError, RemoteErrorKind, ToolchainError};
pub use format::{output_file_name, Format};
pub use layout::{
    paginate, paginate_cooperative, reflow, reflow_with, split_pages, HelveticaMetrics,
    MonospaceMetrics, OutputKind, Page, PageGeometry, PaginationResult, ReflowOptions,
    TextMeasurer,
};
pub use progress::{progress_channel, ProgressEvent, ProgressReporter, ProgressSink};
