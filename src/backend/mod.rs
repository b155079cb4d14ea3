//! Conversion backends.
//!
//! A backend executes exactly one format transformation. There are two
//! kinds, tagged by [`BackendKind`] in the dispatcher's route table:
//!
//! ```text
//! LocalToolchain  input file ──▶ office suite subprocess ──▶ output file
//! RemoteService   input bytes ──▶ HTTP conversion API   ──▶ output bytes
//! ```
//!
//! 1. [`toolchain`]: runs the office suite headless under a deadline and
//!    verifies the file it was supposed to write
//! 2. [`remote`]: one request/response against the conversion API. The
//!    only backend with network I/O
//!
//! The dispatcher talks to both through the [`LocalBackend`] and
//! [`RemoteBackend`] traits so tests can put fakes in their place.

pub mod remote;
pub mod toolchain;

use crate::error::{RemoteError, ToolchainError};
use crate::format::Format;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use remote::RemoteService;
pub use toolchain::LocalToolchain;

/// Which kind of backend a route uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LocalToolchain,
    RemoteService,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::LocalToolchain => "local toolchain",
            BackendKind::RemoteService => "remote service",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend that converts a file on disk into a sibling file.
#[async_trait]
pub trait LocalBackend: Send + Sync {
    /// Capability check: can [`run`](Self::run) be attempted at all?
    fn is_available(&self) -> bool;

    /// Convert `input` to `target`, returning the path of the file written.
    ///
    /// Must not outlive `deadline`; on expiry the backend terminates
    /// whatever it started and returns [`ToolchainError::Timeout`].
    async fn run(
        &self,
        input: &Path,
        target: Format,
        deadline: Duration,
    ) -> Result<PathBuf, ToolchainError>;

    /// Where [`run`](Self::run) writes its output for `input`.
    ///
    /// The dispatcher removes this path on failure paths, in case the
    /// backend left a partial file behind.
    fn expected_output(&self, input: &Path, target: Format) -> PathBuf {
        toolchain::expected_output(input, target)
    }
}

/// A backend that converts bytes in memory, without touching the disk.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Capability check: are credentials configured?
    fn is_configured(&self) -> bool;

    /// Convert `input` (named `file_name`) from `source` to `target`.
    async fn run(
        &self,
        input: Vec<u8>,
        file_name: &str,
        source: Format,
        target: Format,
    ) -> Result<Vec<u8>, RemoteError>;
}
