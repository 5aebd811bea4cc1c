/*============================================================
  Project: appleloops
  Module: appleloops::package
  ------------------------------------------------------------
  Purpose:
    Normalised package records built from patched manifest
    entries, their resolved download locations and the
    installed-state oracle used during reconciliation.

  Security / Safety Notes:
    Records are immutable after construction. Installed state
    is derived from receipts gathered up front, so queries do
    not spawn processes.

  Dependencies:
    plist for raw entries, reqwest::Url for URL rewriting,
    urlencoding for cache-server query values, serde for
    report output.

  Operational Scope:
    Owned by the source that built them; shared by reference
    with the reconciled package set.

  Revision History:
    2026-10-18 CW  Authored package record and receipt index.
  ------------------------------------------------------------
  Principles Observed:
    - Identity is the download name, fixed at construction
    - Installed state fails open to "not installed"
    - Explicit schema; unknown manifest fields are ignored
============================================================*/

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};
use reqwest::Url;
use serde::Serialize;

use crate::config::{DeployMode, RunConfig, LP10_MS3_CONTENT_LEGACY};
use crate::error::{LoopsError, Result};
use crate::size::bytes2hr;
use crate::version::LooseVersion;

const LEGACY_PREFIX: &str = "../lp10_ms3_content_2013/";

/// Resolved download locations, in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageUrls {
    pub canonical: String,
    pub local_mirror: Option<String>,
    pub cache: Option<String>,
}

impl PackageUrls {
    fn resolve(canonical: String, config: &RunConfig) -> Result<Self> {
        let local_mirror = config.local_mirror.as_ref().map(|mirror| {
            canonical.replacen(
                config.content.base_url.trim_end_matches('/'),
                mirror.trim_end_matches('/'),
                1,
            )
        });

        let cache = match &config.caching_server {
            Some(server) => {
                let parsed = Url::parse(&canonical).map_err(|err| {
                    LoopsError::Config(format!("Invalid content URL {canonical}: {err}"))
                })?;
                let mut netloc = parsed.host_str().unwrap_or_default().to_string();
                if let Some(port) = parsed.port() {
                    netloc.push_str(&format!(":{port}"));
                }
                Some(format!(
                    "{}{}?source={}",
                    server.trim_end_matches('/'),
                    parsed.path(),
                    urlencoding::encode(&netloc)
                ))
            }
            None => None,
        };

        Ok(Self {
            canonical,
            local_mirror,
            cache,
        })
    }

    /// URLs to try: local mirror, then cache server, then canonical.
    pub fn candidates(&self) -> Vec<&str> {
        let mut urls = Vec::with_capacity(3);
        if let Some(local) = &self.local_mirror {
            urls.push(local.as_str());
        }
        if let Some(cache) = &self.cache {
            urls.push(cache.as_str());
        }
        urls.push(self.canonical.as_str());
        urls
    }

    /// First URL to try.
    pub fn preferred(&self) -> &str {
        self.local_mirror
            .as_deref()
            .or(self.cache.as_deref())
            .unwrap_or(&self.canonical)
    }
}

/// Content flags carried through from the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentFlags {
    pub contains_alchemy_files: bool,
    pub contains_apple_loops: bool,
    pub contains_garageband_legacy_instruments: bool,
    pub missing_content_only: bool,
    pub missing_download_only: bool,
    pub never_update_legacy: bool,
}

/// One downloadable, installable package.
///
/// Equality, ordering and hashing use `download_name` only.
#[derive(Debug, Clone, Serialize)]
pub struct PackageRecord {
    name: String,
    download_name: String,
    package_id: String,
    download_size: u64,
    installed_size: u64,
    version: LooseVersion,
    is_mandatory: bool,
    bad_wolf_ignore: bool,
    file_check: Vec<PathBuf>,
    flags: ContentFlags,
    upgrade_package: Option<String>,
    comment: Option<String>,
    urls: PackageUrls,
    download_path: PathBuf,
}

impl PackageRecord {
    /// Build a record from a patched manifest entry.
    pub fn from_entry(
        manifest: &str,
        name: &str,
        entry: &Dictionary,
        config: &RunConfig,
    ) -> Result<Self> {
        let field_error =
            |field: &str| LoopsError::manifest(manifest, format!("`{name}` has invalid `{field}`"));

        let raw_download_name = match entry.get("DownloadName") {
            Some(value) => value
                .as_string()
                .ok_or_else(|| field_error("DownloadName"))?,
            None => {
                return Err(LoopsError::manifest(
                    manifest,
                    format!("`{name}` has no `DownloadName`"),
                ))
            }
        };

        let (content_path, download_name) = match raw_download_name.find(LEGACY_PREFIX) {
            Some(_) => (
                LP10_MS3_CONTENT_LEGACY.to_string(),
                raw_download_name.replace(LEGACY_PREFIX, ""),
            ),
            None => (
                config.content.content_path.clone(),
                raw_download_name.to_string(),
            ),
        };
        let basename = raw_download_name
            .rsplit('/')
            .next()
            .unwrap_or(raw_download_name);
        let canonical = format!(
            "{}/{}/{}",
            config.content.base_url.trim_end_matches('/'),
            content_path,
            basename
        );

        let package_id = optional_string(entry, "PackageID")
            .map(|id| id.replace(". ", "."))
            .unwrap_or_default();
        let version = match entry.get("PackageVersion") {
            Some(Value::String(text)) => LooseVersion::parse(text),
            Some(Value::Integer(number)) => LooseVersion::parse(&number.to_string()),
            Some(Value::Real(number)) => LooseVersion::parse(&number.to_string()),
            Some(_) => return Err(field_error("PackageVersion")),
            None => LooseVersion::default(),
        };

        let download_size = size_field(entry, "DownloadSize").ok_or_else(|| field_error("DownloadSize"))?;
        let installed_size =
            size_field(entry, "InstalledSize").ok_or_else(|| field_error("InstalledSize"))?;

        let file_check = match entry.get("FileCheck") {
            Some(Value::String(path)) => vec![PathBuf::from(path)],
            Some(Value::Array(paths)) => paths
                .iter()
                .filter_map(Value::as_string)
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        };

        let flags = ContentFlags {
            contains_alchemy_files: bool_field(entry, "ContainsAlchemyFiles"),
            contains_apple_loops: bool_field(entry, "ContainsAppleLoops"),
            contains_garageband_legacy_instruments: bool_field(
                entry,
                "ContainsGarageBandLegacyInstruments",
            ),
            missing_content_only: bool_field(entry, "MissingContentOnly"),
            missing_download_only: bool_field(entry, "MissingDownloadOnly"),
            never_update_legacy: bool_field(entry, "NeverUpdateLegacy"),
        };

        let download_path = config.destination.join(&content_path).join(&download_name);
        let urls = PackageUrls::resolve(canonical, config)?;

        Ok(Self {
            name: name.to_string(),
            download_name,
            package_id,
            download_size,
            installed_size,
            version,
            is_mandatory: bool_field(entry, "IsMandatory"),
            bad_wolf_ignore: bool_field(entry, "BadWolfIgnore"),
            file_check,
            flags,
            upgrade_package: optional_string(entry, "UpgradePackage").map(str::to_string),
            comment: optional_string(entry, "Comment").map(str::to_string),
            urls,
            download_path,
        })
    }

    /// Manifest key of this package.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn download_name(&self) -> &str {
        &self.download_name
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn download_size(&self) -> u64 {
        self.download_size
    }

    pub fn installed_size(&self) -> u64 {
        self.installed_size
    }

    pub fn human_download_size(&self) -> String {
        bytes2hr(self.download_size)
    }

    pub fn human_installed_size(&self) -> String {
        bytes2hr(self.installed_size)
    }

    pub fn version(&self) -> &LooseVersion {
        &self.version
    }

    pub fn is_mandatory(&self) -> bool {
        self.is_mandatory
    }

    pub fn bad_wolf_ignore(&self) -> bool {
        self.bad_wolf_ignore
    }

    pub fn file_check(&self) -> &[PathBuf] {
        &self.file_check
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn urls(&self) -> &PackageUrls {
        &self.urls
    }

    pub fn download_path(&self) -> &Path {
        &self.download_path
    }
}

impl PartialEq for PackageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.download_name == other.download_name
    }
}

impl Eq for PackageRecord {}

impl Hash for PackageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.download_name.hash(state);
    }
}

impl PartialOrd for PackageRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.download_name.cmp(&other.download_name)
    }
}

fn optional_string<'a>(entry: &'a Dictionary, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_string)
}

fn bool_field(entry: &Dictionary, key: &str) -> bool {
    match entry.get(key) {
        Some(Value::Boolean(flag)) => *flag,
        Some(Value::Integer(number)) => number.as_signed() != Some(0),
        Some(Value::String(text)) => matches!(text.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

/// Missing sizes are zero; present but unusable sizes are rejected.
fn size_field(entry: &Dictionary, key: &str) -> Option<u64> {
    match entry.get(key) {
        None => Some(0),
        Some(Value::Integer(number)) => number.as_unsigned(),
        Some(Value::Real(number)) if *number >= 0.0 && number.is_finite() => {
            Some(number.round() as u64)
        }
        Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
        Some(_) => None,
    }
}

/// An installer receipt for a package identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub package_id: String,
    pub version: LooseVersion,
    pub install_time: Option<String>,
}

/// Decides whether a record still needs processing.
pub trait InstallOracle {
    fn is_installed(&self, record: &PackageRecord) -> bool;
}

/// Installer receipts gathered before reconciliation, combined with the
/// run mode.
#[derive(Debug, Clone)]
pub struct ReceiptIndex {
    mode: DeployMode,
    receipts: HashMap<String, Receipt>,
}

impl ReceiptIndex {
    pub fn new(mode: DeployMode) -> Self {
        Self {
            mode,
            receipts: HashMap::new(),
        }
    }

    /// Index for runs that never consult receipts.
    pub fn for_config(config: &RunConfig) -> Self {
        Self::new(config.mode)
    }

    pub fn insert(&mut self, receipt: Receipt) {
        self.receipts.insert(receipt.package_id.clone(), receipt);
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn receipt(&self, record: &PackageRecord) -> Option<&Receipt> {
        self.receipts.get(record.package_id())
    }

    pub fn installed_version(&self, record: &PackageRecord) -> Option<&LooseVersion> {
        self.receipt(record).map(|receipt| &receipt.version)
    }

    /// True when an installed receipt is older than the manifest version.
    pub fn needs_upgrade(&self, record: &PackageRecord) -> bool {
        self.is_installed(record)
            && self
                .installed_version(record)
                .map(|installed| installed < record.version())
                .unwrap_or(false)
    }
}

impl InstallOracle for ReceiptIndex {
    fn is_installed(&self, record: &PackageRecord) -> bool {
        match self.mode {
            DeployMode::Download | DeployMode::ForceDeploy => false,
            DeployMode::Deploy => {
                let files = record.file_check();
                self.receipt(record).is_some()
                    && !files.is_empty()
                    && files.iter().all(|path| path.exists())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    use super::*;
    use crate::manifest::tests::{package_entry, run_config};

    fn record(name: &str, entry: &Dictionary, config: &RunConfig) -> PackageRecord {
        PackageRecord::from_entry("garageband1021.plist", name, entry, config).unwrap()
    }

    fn hash_of(record: &PackageRecord) -> u64 {
        let mut hasher = DefaultHasher::new();
        record.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn identity_is_download_name() {
        let config = run_config();
        let a = record("A", &package_entry("Same.pkg", true, 1), &config);
        let b = record("B", &package_entry("Same.pkg", false, 99), &config);
        let c = record("A", &package_entry("Other.pkg", true, 1), &config);

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);

        let set: HashSet<PackageRecord> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn canonical_url_uses_current_content_path() {
        let config = run_config();
        let pkg = record("A", &package_entry("MAContent10_Loops.pkg", true, 1), &config);
        assert_eq!(
            pkg.urls().canonical,
            "https://audiocontentdownload.apple.com/lp10_ms3_content_2016/MAContent10_Loops.pkg"
        );
        assert_eq!(
            pkg.download_path(),
            Path::new("/tmp/appleloops/lp10_ms3_content_2016/MAContent10_Loops.pkg")
        );
        assert_eq!(pkg.urls().candidates().len(), 1);
    }

    #[test]
    fn legacy_entries_rewrite_path_and_name() {
        let config = run_config();
        let pkg = record(
            "A",
            &package_entry("../lp10_ms3_content_2013/JamPack4.pkg", true, 1),
            &config,
        );
        assert_eq!(pkg.download_name(), "JamPack4.pkg");
        assert_eq!(
            pkg.urls().canonical,
            "https://audiocontentdownload.apple.com/lp10_ms3_content_2013/JamPack4.pkg"
        );
        assert_eq!(
            pkg.download_path(),
            Path::new("/tmp/appleloops/lp10_ms3_content_2013/JamPack4.pkg")
        );
    }

    #[test]
    fn mirror_and_cache_urls_precede_canonical() {
        let mut config = run_config();
        config.local_mirror = Some("https://loops.example.org/appleloops/".into());
        config.caching_server = Some("http://cache.example.org:49672".into());
        let pkg = record("A", &package_entry("Loop.pkg", true, 1), &config);

        assert_eq!(
            pkg.urls().candidates(),
            vec![
                "https://loops.example.org/appleloops/lp10_ms3_content_2016/Loop.pkg",
                "http://cache.example.org:49672/lp10_ms3_content_2016/Loop.pkg?source=audiocontentdownload.apple.com",
                "https://audiocontentdownload.apple.com/lp10_ms3_content_2016/Loop.pkg",
            ]
        );
        assert_eq!(
            pkg.urls().preferred(),
            "https://loops.example.org/appleloops/lp10_ms3_content_2016/Loop.pkg"
        );
    }

    #[test]
    fn package_id_spaces_are_normalised_and_version_defaults() {
        let config = run_config();
        let mut entry = package_entry("Loop.pkg", true, 1);
        entry.insert("PackageID".into(), Value::String("com.apple. pkg. Loop".into()));
        entry.remove("PackageVersion");
        let pkg = record("A", &entry, &config);
        assert_eq!(pkg.package_id(), "com.apple.pkg.Loop");
        assert_eq!(pkg.version().as_str(), "0.0.0");
    }

    #[test]
    fn missing_download_name_is_rejected() {
        let config = run_config();
        let mut entry = package_entry("Loop.pkg", true, 1);
        entry.remove("DownloadName");
        assert!(PackageRecord::from_entry("x.plist", "A", &entry, &config).is_err());
    }

    #[test]
    fn installed_state_fails_open_outside_deploy_mode() {
        let config = run_config();
        let pkg = record("A", &package_entry("Loop.pkg", true, 1), &config);
        let receipt = Receipt {
            package_id: pkg.package_id().to_string(),
            version: LooseVersion::parse("1.0.0"),
            install_time: None,
        };

        let mut download = ReceiptIndex::new(DeployMode::Download);
        download.insert(receipt.clone());
        assert!(!download.is_installed(&pkg));

        let mut forced = ReceiptIndex::new(DeployMode::ForceDeploy);
        forced.insert(receipt.clone());
        assert!(!forced.is_installed(&pkg));

        let mut deploy = ReceiptIndex::new(DeployMode::Deploy);
        assert!(!deploy.is_installed(&pkg));
        deploy.insert(receipt);
        assert!(!deploy.is_installed(&pkg));
        assert!(!deploy.needs_upgrade(&pkg));
    }

    #[test]
    fn receipt_without_file_checks_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let config = run_config();
        let bare = record("A", &package_entry("Loop.pkg", true, 1), &config);

        let mut checked = package_entry("Loop.pkg", true, 1);
        let present = dir.path().join("Loop.caf");
        std::fs::write(&present, b"x").unwrap();
        checked.insert(
            "FileCheck".into(),
            Value::Array(vec![Value::String(present.display().to_string())]),
        );
        let checked = record("A", &checked, &config);

        let mut deploy = ReceiptIndex::new(DeployMode::Deploy);
        deploy.insert(Receipt {
            package_id: bare.package_id().to_string(),
            version: LooseVersion::parse("1.0.0"),
            install_time: None,
        });
        assert!(bare.file_check().is_empty());
        assert!(!deploy.is_installed(&bare));
        assert!(deploy.is_installed(&checked));
    }

    #[test]
    fn file_checks_must_all_exist() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.caf");
        std::fs::write(&present, b"x").unwrap();

        let config = run_config();
        let mut entry = package_entry("Loop.pkg", true, 1);
        entry.insert(
            "FileCheck".into(),
            Value::Array(vec![
                Value::String(present.display().to_string()),
                Value::String(dir.path().join("absent.caf").display().to_string()),
            ]),
        );
        let pkg = record("A", &entry, &config);

        let mut deploy = ReceiptIndex::new(DeployMode::Deploy);
        deploy.insert(Receipt {
            package_id: pkg.package_id().to_string(),
            version: LooseVersion::parse("0.9"),
            install_time: None,
        });
        assert!(!deploy.is_installed(&pkg));

        std::fs::write(dir.path().join("absent.caf"), b"x").unwrap();
        assert!(deploy.is_installed(&pkg));
        assert!(deploy.needs_upgrade(&pkg));
    }
}
