/*============================================================
  Project: appleloops
  Module: appleloops::config
  ------------------------------------------------------------
  Purpose:
    Load the optional TOML configuration file and describe the
    explicit run configuration threaded through package record
    construction, installed-state checks and deployment.

  Security / Safety Notes:
    Configuration is read from operator-controlled paths only.
    No values are written back to disk.

  Dependencies:
    serde + toml for parsing, dirs for platform directories.

  Operational Scope:
    Built once in `main` and passed by reference everywhere
    else; no module consults process-wide state.

  Revision History:
    2026-10-18 CW  Replaced ambient globals with RunConfig.
  ------------------------------------------------------------
  Principles Observed:
    - Explicit configuration, no global mutable state
    - Sensible defaults when no file is present
============================================================*/

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LoopsError, Result};

/// Vendor content host.
pub const AUDIOCONTENT_URL: &str = "https://audiocontentdownload.apple.com";
/// Mirror host used when the vendor host rejects a manifest request.
pub const AUDIOCONTENT_FAILOVER_URL: &str =
    "https://raw.githubusercontent.com/carlashley/appleloops/master";
/// Content path used by current manifests.
pub const LP10_MS3_CONTENT: &str = "lp10_ms3_content_2016";
/// Content path used by legacy package entries.
pub const LP10_MS3_CONTENT_LEGACY: &str = "lp10_ms3_content_2013";
/// Identifier used for temporary and configuration directories.
pub const BUNDLE_ID: &str = "com.github.carlashley.appleloops";
/// HTTP statuses treated as a usable response.
pub const HTTP_OK_STATUS: [u16; 6] = [200, 301, 302, 303, 307, 308];
/// Log file name inside the log directory.
pub const LOG_FILE: &str = "appleloops.log";

/// File-backed configuration for appleloops.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoopsConfig {
    pub content: ContentConfig,
    pub http: HttpConfig,
    pub paths: PathsConfig,
}

/// Content host settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub base_url: String,
    pub failover_url: String,
    pub content_path: String,
    pub accepted_statuses: Vec<u16>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            base_url: AUDIOCONTENT_URL.to_string(),
            failover_url: AUDIOCONTENT_FAILOVER_URL.to_string(),
            content_path: LP10_MS3_CONTENT.to_string(),
            accepted_statuses: HTTP_OK_STATUS.to_vec(),
        }
    }
}

impl ContentConfig {
    /// Canonical URL of a manifest on the vendor host.
    pub fn manifest_url(&self, manifest: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.content_path,
            manifest
        )
    }

    /// URL of a manifest on the mirror host.
    pub fn failover_manifest_url(&self, manifest: &str) -> String {
        format!(
            "{}/{}/{}",
            self.failover_url.trim_end_matches('/'),
            LP10_MS3_CONTENT,
            manifest
        )
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.accepted_statuses.contains(&status)
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds; `0` disables the timeout.
    pub timeout: u64,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub allow_insecure: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 0,
            user_agent: format!("appleloops/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            allow_insecure: false,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub applications_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub default_destination: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            applications_dir: PathBuf::from("/Applications"),
            log_dir: None,
            default_destination: PathBuf::from("/tmp/appleloops"),
        }
    }
}

impl LoopsConfig {
    /// Load configuration from an explicit path or the default location.
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::load(explicit),
            None => match Self::default_path() {
                Some(default) if default.is_file() => Self::load(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            LoopsError::Config(format!(
                "Failed to read configuration {}: {err}",
                path.display()
            ))
        })?;
        Self::from_toml(&raw).map_err(|err| match err {
            LoopsError::Config(reason) => {
                LoopsError::Config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| LoopsError::Config(err.to_string()))
    }

    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("appleloops").join("config.toml"))
    }

    /// Directory for the session log. Root logs to `/var/log`.
    pub fn log_dir(&self) -> PathBuf {
        if let Some(dir) = &self.paths.log_dir {
            return dir.clone();
        }
        if crate::pkgutil::is_root() {
            return PathBuf::from("/var/log");
        }
        dirs::home_dir()
            .map(|home| home.join("Library").join("Logs"))
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir().join(LOG_FILE)
    }
}

/// How packages are handled once downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    /// Download only; installed state is never queried.
    Download,
    /// Install packages that are not already installed.
    Deploy,
    /// Install everything regardless of installed state.
    ForceDeploy,
}

/// Explicit configuration for a single run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub content: ContentConfig,
    pub mode: DeployMode,
    pub mandatory: bool,
    pub optional: bool,
    pub dry_run: bool,
    pub force_download: bool,
    pub destination: PathBuf,
    pub local_mirror: Option<String>,
    pub caching_server: Option<String>,
    pub install_target: PathBuf,
    pub allow_untrusted: bool,
    pub real_download_size: bool,
    pub applications_dir: PathBuf,
}

impl RunConfig {
    /// Run configuration seeded from file configuration.
    pub fn new(file: &LoopsConfig) -> Self {
        Self {
            content: file.content.clone(),
            mode: DeployMode::Download,
            mandatory: false,
            optional: false,
            dry_run: false,
            force_download: false,
            destination: file.paths.default_destination.clone(),
            local_mirror: None,
            caching_server: None,
            install_target: PathBuf::from("/"),
            allow_untrusted: false,
            real_download_size: false,
            applications_dir: file.paths.applications_dir.clone(),
        }
    }

    /// True when packages are installed after download.
    pub fn is_deploying(&self) -> bool {
        matches!(self.mode, DeployMode::Deploy | DeployMode::ForceDeploy)
    }

    /// True when installer receipts decide installed state.
    pub fn checks_receipts(&self) -> bool {
        self.mode == DeployMode::Deploy
    }
}
