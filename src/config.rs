//! Service configuration.
//!
//! Everything the dispatcher needs from its environment (where artifacts
//! live, which office executable to run, how long it may run, how to reach
//! the remote service) is an explicit [`ServiceConfig`] injected into
//! [`JobDispatcher::new`](crate::dispatch::JobDispatcher::new). Nothing in the
//! library reads environment variables on its own except
//! [`ServiceConfig::from_env`], which the binary calls once at start-up.
//!
//! # Example
//! ```rust
//! use docshift::ServiceConfig;
//! use std::time::Duration;
//!
//! let config = ServiceConfig::builder()
//!     .artifact_dir(std::env::temp_dir().join("docshift-example"))
//!     .local_deadline(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.local_deadline, Duration::from_secs(30));
//! ```

use crate::backend::remote::DEFAULT_ENDPOINT;
use crate::backend::toolchain::SOFFICE_ENV;
use crate::error::ConversionError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const ARTIFACT_DIR_ENV: &str = "DOCSHIFT_ARTIFACT_DIR";
pub const DEADLINE_ENV: &str = "DOCSHIFT_DEADLINE_SECS";
pub const REMOTE_ENDPOINT_ENV: &str = "DOCSHIFT_REMOTE_ENDPOINT";
pub const API_KEY_ENV: &str = "CLOUDMERSIVE_API_KEY";

const MIN_DEADLINE: Duration = Duration::from_secs(1);
const MAX_DEADLINE: Duration = Duration::from_secs(3600);

/// Configuration for a [`JobDispatcher`](crate::dispatch::JobDispatcher).
#[derive(Clone)]
pub struct ServiceConfig {
    /// Directory holding every job's temporary files. Default:
    /// `<system temp>/docshift`. Shared by concurrent jobs.
    pub artifact_dir: PathBuf,

    /// Office toolchain executable. `None` means discover it
    /// (`DOCSHIFT_SOFFICE`, install locations, `PATH`).
    pub toolchain_path: Option<PathBuf>,

    /// Wall-clock budget for one local toolchain run. Default: 60 s.
    pub local_deadline: Duration,

    /// Extra time the dispatcher waits past `local_deadline` before it
    /// abandons a backend that ignored its own deadline. Default: 5 s.
    pub deadline_grace: Duration,

    /// Remote conversion service base URL.
    pub remote_endpoint: String,

    /// API key for the remote service. Remote routes are unavailable without it.
    pub remote_api_key: Option<String>,

    /// Per-request timeout for the remote service. Default: 120 s.
    pub remote_timeout: Duration,

    /// Jobs in flight at once in [`submit_batch`](crate::dispatch::JobDispatcher::submit_batch). Default: 4.
    pub batch_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            artifact_dir: std::env::temp_dir().join("docshift"),
            toolchain_path: None,
            local_deadline: Duration::from_secs(60),
            deadline_grace: Duration::from_secs(5),
            remote_endpoint: DEFAULT_ENDPOINT.to_string(),
            remote_api_key: None,
            remote_timeout: Duration::from_secs(120),
            batch_concurrency: 4,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("artifact_dir", &self.artifact_dir)
            .field("toolchain_path", &self.toolchain_path)
            .field("local_deadline", &self.local_deadline)
            .field("deadline_grace", &self.deadline_grace)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("remote_api_key", &self.remote_api_key.as_ref().map(|_| "***"))
            .field("remote_timeout", &self.remote_timeout)
            .field("batch_concurrency", &self.batch_concurrency)
            .finish()
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by the `DOCSHIFT_*` / `CLOUDMERSIVE_API_KEY`
    /// environment variables.
    pub fn from_env() -> Result<Self, ConversionError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConversionError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(dir) = get(ARTIFACT_DIR_ENV) {
            builder = builder.artifact_dir(dir);
        }
        if let Some(exe) = get(SOFFICE_ENV) {
            builder = builder.toolchain_path(exe);
        }
        if let Some(secs) = get(DEADLINE_ENV) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ConversionError::InvalidConfig(format!(
                    "{DEADLINE_ENV} must be a whole number of seconds, got '{secs}'"
                ))
            })?;
            builder = builder.local_deadline(Duration::from_secs(secs));
        }
        if let Some(url) = get(REMOTE_ENDPOINT_ENV) {
            builder = builder.remote_endpoint(url);
        }
        if let Some(key) = get(API_KEY_ENV) {
            builder = builder.remote_api_key(key);
        }
        builder.build()
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.artifact_dir = dir.into();
        self
    }

    pub fn toolchain_path(mut self, exe: impl Into<PathBuf>) -> Self {
        self.config.toolchain_path = Some(exe.into());
        self
    }

    /// Clamped to 1 s – 1 h.
    pub fn local_deadline(mut self, deadline: Duration) -> Self {
        self.config.local_deadline = deadline.clamp(MIN_DEADLINE, MAX_DEADLINE);
        self
    }

    pub fn deadline_grace(mut self, grace: Duration) -> Self {
        self.config.deadline_grace = grace;
        self
    }

    pub fn remote_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.remote_endpoint = url.into();
        self
    }

    pub fn remote_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote_api_key = Some(key.into());
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.config.remote_timeout = timeout.max(MIN_DEADLINE);
        self
    }

    pub fn batch_concurrency(mut self, n: usize) -> Self {
        self.config.batch_concurrency = n.max(1);
        self
    }

    pub fn build(self) -> Result<ServiceConfig, ConversionError> {
        let c = &self.config;
        if c.artifact_dir.as_os_str().is_empty() {
            return Err(ConversionError::InvalidConfig(
                "Artifact directory must not be empty".into(),
            ));
        }
        let endpoint = c.remote_endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConversionError::InvalidConfig(format!(
                "Remote endpoint must be an http(s) URL, got '{}'",
                c.remote_endpoint
            )));
        }
        Ok(self.config)
    }
}
