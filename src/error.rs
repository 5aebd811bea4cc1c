/*============================================================
  Project: appleloops
  Module: appleloops::error
  ------------------------------------------------------------
  Purpose:
    Centralise appleloops error types to provide consistent
    diagnostics and exit semantics.

  Security / Safety Notes:
    Error contexts expose URLs and file paths only; proxy
    credentials are never included in messages.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate failures and consolidate
    exit codes for the binary entry point.

  Revision History:
    2026-10-18 CW  Established shared error definitions.
  ------------------------------------------------------------
  Principles Observed:
    - Explicit error taxonomy with actionable context
    - Benign outcomes are values, not errors
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for appleloops operations.
pub type Result<T> = std::result::Result<T, LoopsError>;

/// Enumerates high-level error domains surfaced by appleloops.
#[derive(Debug, Error)]
pub enum LoopsError {
    #[error("Required command `{command}` not found")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Manifest {manifest}: {reason}")]
    Manifest { manifest: String, reason: String },
    #[error("No manifest could be located for {app}")]
    ManifestNotFound { app: String },
    #[error("Insufficient space: {required} required, {available} available on {path}")]
    InsufficientSpace {
        path: String,
        required: String,
        available: String,
    },
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoopsError {
    /// Build a manifest error for the named manifest.
    pub fn manifest<M: Into<String>, R: Into<String>>(manifest: M, reason: R) -> Self {
        LoopsError::Manifest {
            manifest: manifest.into(),
            reason: reason.into(),
        }
    }

    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            LoopsError::CommandMissing { .. } => ExitCode::from(10),
            LoopsError::CommandFailure { .. } => ExitCode::from(11),
            LoopsError::Config(_) => ExitCode::from(20),
            LoopsError::Network(_) => ExitCode::from(30),
            LoopsError::Serialization(_) => ExitCode::from(31),
            LoopsError::Manifest { .. } => ExitCode::from(32),
            LoopsError::ManifestNotFound { .. } => ExitCode::from(33),
            LoopsError::Filesystem(_) => ExitCode::from(40),
            LoopsError::Io(_) => ExitCode::from(41),
            LoopsError::InsufficientSpace { .. } => ExitCode::from(42),
            LoopsError::Runtime(_) => ExitCode::from(50),
        }
    }
}
