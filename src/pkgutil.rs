/*============================================================
  Project: appleloops
  Module: appleloops::pkgutil
  ------------------------------------------------------------
  Purpose:
    Interface with macOS system utilities: installer receipts
    via `pkgutil`, package installation via `installer`, free
    space and effective user checks.

  Security / Safety Notes:
    `installer` runs only in deployment mode, which requires
    root. Receipt queries are read-only.

  Dependencies:
    tokio::process for command execution, plist for receipt
    output, chrono for install timestamps, libc for statvfs
    and geteuid.

  Operational Scope:
    Supplies installed-state evidence before reconciliation
    and executes installs for the deployment driver.

  Revision History:
    2026-10-18 CW  Crafted pkgutil/installer integration layer.
  ------------------------------------------------------------
  Principles Observed:
    - Deterministic command invocation with explicit checks
    - "Not found" is a value, not an error
    - Reusable helpers for external command diagnostics
============================================================*/

use std::collections::BTreeSet;
use std::ffi::CString;
use std::io::{self, Cursor};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::Stdio;

use chrono::{DateTime, Local};
use plist::Value;
use tokio::process::Command;

use crate::error::{LoopsError, Result};
use crate::logger::Logger;
use crate::package::{PackageRecord, Receipt, ReceiptIndex};
use crate::size::bytes2hr;
use crate::version::LooseVersion;

const PKGUTIL: &str = "/usr/sbin/pkgutil";
const INSTALLER: &str = "/usr/sbin/installer";

/// Query the installer receipt for a package identifier.
///
/// A non-zero exit from `pkgutil` means the package is not installed.
pub async fn query_receipt(package_id: &str) -> Result<Option<Receipt>> {
    let output = Command::new(PKGUTIL)
        .arg("--pkg-info-plist")
        .arg(package_id)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| map_spawn_error(err, PKGUTIL))?;

    if !output.status.success() {
        return Ok(None);
    }

    parse_receipt(package_id, &output.stdout)
}

fn parse_receipt(package_id: &str, raw: &[u8]) -> Result<Option<Receipt>> {
    let value = Value::from_reader(Cursor::new(raw)).map_err(|err| {
        LoopsError::Serialization(format!("pkgutil emitted an invalid plist for {package_id}: {err}"))
    })?;
    let Some(dict) = value.as_dictionary() else {
        return Ok(None);
    };

    let pkgid = dict.get("pkgid").and_then(Value::as_string).unwrap_or_default();
    if pkgid != package_id {
        return Ok(None);
    }

    let version = dict
        .get("pkg-version")
        .and_then(Value::as_string)
        .map(LooseVersion::parse)
        .unwrap_or_default();
    let install_time = dict
        .get("install-time")
        .and_then(Value::as_signed_integer)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|stamp| {
            stamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        });

    Ok(Some(Receipt {
        package_id: pkgid.to_string(),
        version,
        install_time,
    }))
}

/// Collect receipts for every distinct package identifier, one at a time.
pub async fn gather_receipts<'a, I>(records: I, index: &mut ReceiptIndex, logger: &Logger) -> Result<()>
where
    I: IntoIterator<Item = &'a PackageRecord>,
{
    let ids: BTreeSet<&str> = records
        .into_iter()
        .map(PackageRecord::package_id)
        .filter(|id| !id.is_empty())
        .collect();

    for id in ids {
        match query_receipt(id).await? {
            Some(receipt) => {
                logger.debug(
                    "RECEIPT",
                    format!(
                        "{id} {} installed {}",
                        receipt.version,
                        receipt.install_time.as_deref().unwrap_or("unknown")
                    ),
                );
                index.insert(receipt);
            }
            None => logger.debug("RECEIPT", format!("{id} not installed")),
        }
    }
    Ok(())
}

/// Install a package file with `installer`.
pub async fn install(package: &Path, target: &Path, allow_untrusted: bool) -> Result<()> {
    let mut command = Command::new(INSTALLER);
    if allow_untrusted {
        command.arg("-allowUntrusted");
    }
    let output = command
        .arg("-pkg")
        .arg(package)
        .arg("-target")
        .arg(target)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| map_spawn_error(err, INSTALLER))?;

    if !output.status.success() {
        return Err(LoopsError::CommandFailure {
            command: install_command_line(package, target, allow_untrusted),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Printable form of the install command.
pub fn install_command_line(package: &Path, target: &Path, allow_untrusted: bool) -> String {
    let mut parts = vec![INSTALLER.to_string()];
    if allow_untrusted {
        parts.push("-allowUntrusted".into());
    }
    parts.push("-pkg".into());
    parts.push(package.display().to_string());
    parts.push("-target".into());
    parts.push(target.display().to_string());
    parts.join(" ")
}

/// Free bytes available to unprivileged writers on the volume holding `path`.
pub fn free_space(path: &Path) -> Result<u64> {
    let existing = path
        .ancestors()
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| Path::new("/"));
    let c_path = CString::new(existing.as_os_str().as_bytes()).map_err(|err| {
        LoopsError::Filesystem(format!("Invalid path {}: {err}", existing.display()))
    })?;

    // SAFETY: `stat` is plain old data and `c_path` is NUL-terminated.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(LoopsError::Filesystem(format!(
            "statvfs {} failed: {}",
            existing.display(),
            io::Error::last_os_error()
        )));
    }

    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

/// Refuse to continue when `required` bytes do not fit on `path`.
pub fn ensure_space(path: &Path, required: u64, logger: &Logger) -> Result<()> {
    let available = free_space(path)?;
    logger.debug(
        "DISK",
        format!(
            "{}: required {} ({}), free {} ({})",
            path.display(),
            required,
            bytes2hr(required),
            available,
            bytes2hr(available)
        ),
    );
    if required < available {
        Ok(())
    } else {
        Err(LoopsError::InsufficientSpace {
            path: path.display().to_string(),
            required: bytes2hr(required),
            available: bytes2hr(available),
        })
    }
}

/// True when running with an effective uid of 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn map_spawn_error(err: io::Error, command: &str) -> LoopsError {
    if err.kind() == io::ErrorKind::NotFound {
        LoopsError::CommandMissing {
            command: command.into(),
        }
    } else {
        LoopsError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIPT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>install-location</key>
    <string>/</string>
    <key>install-time</key>
    <integer>1594000000</integer>
    <key>pkg-version</key>
    <string>1.0.0.0.1.1447702152</string>
    <key>pkgid</key>
    <string>com.apple.pkg.MAContent10_AssetPack_0491</string>
    <key>volume</key>
    <string>/</string>
</dict>
</plist>"#;

    #[test]
    fn parses_receipt_plist() {
        let receipt = parse_receipt("com.apple.pkg.MAContent10_AssetPack_0491", RECEIPT.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(receipt.version.as_str(), "1.0.0.0.1.1447702152");
        assert!(receipt.install_time.is_some());
    }

    #[test]
    fn mismatched_receipt_is_not_installed() {
        let receipt = parse_receipt("com.apple.pkg.Other", RECEIPT.as_bytes()).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn install_command_line_places_untrusted_flag_first() {
        let line = install_command_line(Path::new("/tmp/a.pkg"), Path::new("/"), true);
        assert_eq!(line, "/usr/sbin/installer -allowUntrusted -pkg /tmp/a.pkg -target /");
    }

    #[test]
    fn free_space_walks_up_to_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not").join("yet");
        assert!(free_space(&missing).is_ok());
    }

    #[test]
    fn impossible_requirement_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_space(dir.path(), u64::MAX, &Logger::disabled()).unwrap_err();
        assert!(matches!(err, LoopsError::InsufficientSpace { .. }));
    }
}
