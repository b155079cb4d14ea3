//! Error types for the docshift library.
//!
//! Three error types reflect three layers:
//!
//! * [`ConversionError`]: the structured result every public entry point
//!   returns. Its variants are the taxonomy callers branch on, e.g. retry
//!   or tell the user the file is wrong.
//!
//! * [`ToolchainError`] and [`RemoteError`]: what the two backends report.
//!   They carry enough detail for logs and are mapped into
//!   [`ConversionError`] at the dispatcher boundary, so `io::Error` and
//!   `reqwest::Error` values never leak past it.

use crate::format::Format;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the docshift library.
#[derive(Debug, Error)]
pub enum ConversionError {
    // ── Routing ───────────────────────────────────────────────────────────
    /// No backend is registered for the requested format pair.
    #[error("Conversion from {from} to {to} is not supported")]
    UnsupportedConversion { from: Format, to: Format },

    // ── Input ─────────────────────────────────────────────────────────────
    /// The upload failed the format sanity check; nothing was stored.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The document could be read but not parsed (corrupt PDF etc.).
    #[error("Document could not be read: {detail}")]
    Unreadable { detail: String },

    // ── Backends ──────────────────────────────────────────────────────────
    /// A required backend is not installed or not configured.
    #[error("Backend '{backend}' is unavailable.\n{hint}")]
    BackendUnavailable { backend: String, hint: String },

    /// The local toolchain ran past its deadline and was terminated.
    #[error("Conversion timed out after {deadline_secs}s and was terminated; try again")]
    Timeout { deadline_secs: u64 },

    /// The toolchain exited cleanly but the expected file is missing.
    #[error("Conversion produced no output (expected '{expected}')")]
    ConversionProducedNoOutput { expected: PathBuf },

    /// The toolchain reported a failure.
    #[error("Backend '{backend}' failed: {detail}")]
    BackendFailed { backend: String, detail: String },

    /// The remote conversion service failed.
    #[error("Remote conversion failed ({kind}): {detail}")]
    Remote { kind: RemoteErrorKind, detail: String },

    // ── Storage ───────────────────────────────────────────────────────────
    /// Temporary artifact storage failed.
    #[error("Artifact storage error: {detail}")]
    Storage { detail: String },

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder or geometry validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConversionError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConversionError::Timeout { .. }
                | ConversionError::Remote {
                    kind: RemoteErrorKind::Transport,
                    ..
                }
        )
    }

    pub(crate) fn storage(e: impl fmt::Display) -> Self {
        ConversionError::Storage {
            detail: e.to_string(),
        }
    }
}

/// Distinguishes the two ways a remote conversion can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Network, timeout, or authentication failure; the service never
    /// judged the document.
    Transport,
    /// The service received the document and refused or failed to convert it.
    Rejected,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Transport => f.write_str("transport"),
            RemoteErrorKind::Rejected => f.write_str("rejected by service"),
        }
    }
}

/// Failures reported by the local office toolchain.
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// No executable was resolved at construction.
    #[error("no office toolchain executable configured")]
    NotConfigured,

    /// The executable could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process ran past its deadline and was killed.
    #[error("toolchain exceeded its {}ms deadline", .deadline.as_millis())]
    Timeout { deadline: std::time::Duration },

    /// The process exited with a failure status.
    #[error("toolchain exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The process exited cleanly but the expected file does not exist.
    #[error("expected output '{}' was not produced", .expected.display())]
    NoOutput { expected: PathBuf },

    /// Waiting on the process failed.
    #[error("toolchain I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by the remote conversion service.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub detail: String,
}

impl RemoteError {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transport,
            detail: detail.into(),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Rejected,
            detail: detail.into(),
        }
    }
}

/// Seconds in `d`, rounded up, so a sub-second deadline never reads as 0s.
pub(crate) fn whole_secs(d: std::time::Duration) -> u64 {
    d.as_secs()
        .saturating_add(u64::from(d.subsec_nanos() > 0))
}

impl From<ToolchainError> for ConversionError {
    fn from(e: ToolchainError) -> Self {
        const BACKEND: &str = "local toolchain";
        match e {
            ToolchainError::NotConfigured => ConversionError::BackendUnavailable {
                backend: BACKEND.to_string(),
                hint: "Install LibreOffice or set DOCSHIFT_SOFFICE to the soffice executable."
                    .to_string(),
            },
            ToolchainError::Spawn { program, .. } => ConversionError::BackendUnavailable {
                backend: BACKEND.to_string(),
                hint: format!("'{}' could not be started.", program.display()),
            },
            ToolchainError::Timeout { deadline } => ConversionError::Timeout {
                deadline_secs: whole_secs(deadline),
            },
            ToolchainError::NoOutput { expected } => {
                ConversionError::ConversionProducedNoOutput { expected }
            }
            ToolchainError::Failed { status, stderr } => ConversionError::BackendFailed {
                backend: BACKEND.to_string(),
                detail: if stderr.is_empty() {
                    status
                } else {
                    format!("{status}: {stderr}")
                },
            },
            ToolchainError::Io(e) => ConversionError::BackendFailed {
                backend: BACKEND.to_string(),
                detail: e.kind().to_string(),
            },
        }
    }
}

impl From<RemoteError> for ConversionError {
    fn from(e: RemoteError) -> Self {
        ConversionError::Remote {
            kind: e.kind,
            detail: e.detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unsupported_display_names_both_formats() {
        let e = ConversionError::UnsupportedConversion {
            from: Format::Image,
            to: Format::Spreadsheet,
        };
        let msg = e.to_string();
        assert!(msg.contains("image"), "got: {msg}");
        assert!(msg.contains("spreadsheet"), "got: {msg}");
    }

    #[test]
    fn toolchain_timeout_maps_to_retryable_timeout() {
        let e: ConversionError = ToolchainError::Timeout {
            deadline: Duration::from_secs(60),
        }
        .into();
        assert!(matches!(e, ConversionError::Timeout { deadline_secs: 60 }));

        let short: ConversionError = ToolchainError::Timeout {
            deadline: Duration::from_millis(300),
        }
        .into();
        assert!(matches!(short, ConversionError::Timeout { deadline_secs: 1 }));
        assert!(short.to_string().contains("after 1s"), "got: {short}");
        assert_eq!(whole_secs(Duration::MAX), u64::MAX);
        assert!(e.is_retryable());
    }

    #[test]
    fn not_configured_maps_to_unavailable() {
        let e: ConversionError = ToolchainError::NotConfigured.into();
        assert!(matches!(e, ConversionError::BackendUnavailable { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn remote_kinds_survive_mapping() {
        let e: ConversionError = RemoteError::rejected("HTTP 500").into();
        assert!(matches!(
            e,
            ConversionError::Remote {
                kind: RemoteErrorKind::Rejected,
                ..
            }
        ));
        assert!(!e.is_retryable());

        let e: ConversionError = RemoteError::transport("connection refused").into();
        assert!(e.is_retryable());
        assert!(e.to_string().contains("transport"));
    }

    #[test]
    fn io_detail_is_reduced_to_kind() {
        let raw = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "fd 7 /secret/path");
        let e: ConversionError = ToolchainError::Io(raw).into();
        assert!(!e.to_string().contains("/secret/path"));
    }
}
