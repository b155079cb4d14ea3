//! Local office toolchain backend (LibreOffice `soffice --headless`).
//!
//! ## Invoke, then verify
//!
//! `soffice` exits 0 in several situations where it wrote nothing (another
//! instance holds the profile lock, the filter refused the document). The
//! exit status therefore proves nothing; the output file does. A run is two
//! steps, and the types make the second one impossible to skip:
//!
//! ```text
//! invoke() ──▶ PendingVerification { expected } ──verify()──▶ PathBuf
//! ```
//!
//! `invoke` never hands out a path. Only `verify`, which checks the file
//! exists, does.
//!
//! ## Deadline
//!
//! `soffice` is a launcher: on Linux a shell script execs `oosplash`, which
//! forks `soffice.bin`. Killing the launcher alone would orphan the real
//! converter, still holding the profile lock. On Unix the child therefore
//! leads its own process group, and the whole group is killed:
//!
//! * on expiry of `tokio::time::timeout`, before the leader is reaped and
//!   `run` returns;
//! * when the `run` future is dropped mid-flight ([`GroupKill`] guard).
//!
//! `kill_on_drop(true)` stays set for platforms without process groups.

use super::LocalBackend;
use crate::error::ToolchainError;
use crate::format::Format;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Environment variable naming the toolchain executable.
pub const SOFFICE_ENV: &str = "DOCSHIFT_SOFFICE";

/// Install locations searched by [`LocalToolchain::discover`], in order.
const KNOWN_LOCATIONS: &[&str] = &[
    r"C:\Program Files\LibreOffice\program\soffice.exe",
    r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
    "/usr/bin/soffice",
    "/usr/bin/libreoffice",
    "/usr/local/bin/soffice",
    "/opt/libreoffice/program/soffice",
    "/snap/bin/libreoffice",
];

const PATH_NAMES: &[&str] = &["soffice", "libreoffice"];

/// Bytes of stderr kept for error messages.
const STDERR_TAIL: usize = 512;

/// The office suite, run as a subprocess.
#[derive(Debug, Clone, Default)]
pub struct LocalToolchain {
    executable: Option<PathBuf>,
}

impl LocalToolchain {
    /// Use `executable`, or nothing (every run then fails as unavailable).
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }

    /// Resolve the executable from `DOCSHIFT_SOFFICE`, known install
    /// locations, then `PATH`.
    pub fn discover() -> Self {
        let from_env = std::env::var_os(SOFFICE_ENV)
            .map(PathBuf::from)
            .filter(|p| p.is_file());
        let found = from_env
            .or_else(|| {
                KNOWN_LOCATIONS
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.is_file())
            })
            .or_else(search_path);

        match &found {
            Some(p) => info!("Office toolchain found: {}", p.display()),
            None => warn!("No office toolchain found; word/spreadsheet → PDF is unavailable"),
        }
        Self { executable: found }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    /// Step one: start the converter and wait for it within `deadline`.
    pub async fn invoke(
        &self,
        input: &Path,
        target: Format,
        deadline: Duration,
    ) -> Result<PendingVerification, ToolchainError> {
        let program = self.executable.as_ref().ok_or(ToolchainError::NotConfigured)?;
        let out_dir = input.parent().unwrap_or_else(|| Path::new("."));

        debug!(
            "Converting {} -> {}",
            input.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            target.extension()
        );

        let mut command = Command::new(program);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg(target.extension())
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ToolchainError::Spawn {
            program: program.clone(),
            source,
        })?;
        // A group outlives its leader while any member runs, so the id stays
        // valid for killpg even after the leader has been reaped.
        let mut group = GroupKill::new(child.id());

        let mut stderr = child.stderr.take();
        let waited = tokio::time::timeout(deadline, async {
            let mut captured = Vec::new();
            let drain = async {
                if let Some(pipe) = stderr.as_mut() {
                    let _ = pipe.read_to_end(&mut captured).await;
                }
            };
            let (status, ()) = tokio::join!(child.wait(), drain);
            status.map(|s| (s, captured))
        })
        .await;

        if waited.is_ok() {
            group.disarm();
        }
        match waited {
            Ok(Ok((status, _))) if status.success() => Ok(PendingVerification {
                expected: expected_output(input, target),
            }),
            Ok(Ok((status, captured))) => Err(ToolchainError::Failed {
                status: status.to_string(),
                stderr: stderr_tail(&captured),
            }),
            Ok(Err(e)) => Err(ToolchainError::Io(e)),
            Err(_elapsed) => {
                warn!(
                    "Toolchain exceeded {}ms deadline; killing pid {:?}",
                    deadline.as_millis(),
                    child.id()
                );
                group.kill();
                // kill() also waits, so the leader is reaped when we return.
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill toolchain process: {}", e);
                }
                Err(ToolchainError::Timeout { deadline })
            }
        }
    }
}

/// Kills the converter's process group on drop unless disarmed.
///
/// The group id is the leader's pid (`process_group(0)`).
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; `pgid` is a group this process
    // created.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "killpg({}) failed: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// A finished invocation whose output has not been checked yet.
#[must_use = "the toolchain may exit 0 without writing anything; call verify()"]
#[derive(Debug)]
pub struct PendingVerification {
    expected: PathBuf,
}

impl PendingVerification {
    pub fn expected(&self) -> &Path {
        &self.expected
    }

    /// Step two: the output exists, or the run failed.
    pub async fn verify(self) -> Result<PathBuf, ToolchainError> {
        match tokio::fs::metadata(&self.expected).await {
            Ok(meta) if meta.is_file() => Ok(self.expected),
            _ => Err(ToolchainError::NoOutput {
                expected: self.expected,
            }),
        }
    }
}

#[async_trait]
impl LocalBackend for LocalToolchain {
    fn is_available(&self) -> bool {
        self.executable.as_deref().is_some_and(Path::is_file)
    }

    async fn run(
        &self,
        input: &Path,
        target: Format,
        deadline: Duration,
    ) -> Result<PathBuf, ToolchainError> {
        self.invoke(input, target, deadline).await?.verify().await
    }
}

/// The file the toolchain writes for `input`: same directory, same stem,
/// target extension.
pub fn expected_output(input: &Path, target: Format) -> PathBuf {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{}.{}", stem, target.extension()))
}

fn search_path() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| PATH_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut cut = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    format!("\u{2026}{}", &text[cut..])
}
