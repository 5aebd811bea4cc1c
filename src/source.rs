/*============================================================
  Project: appleloops
  Module: appleloops::source
  ------------------------------------------------------------
  Purpose:
    Resolve manifest sources: installed applications (local
    manifest or version-inferred remote manifest) and named
    remote manifests.

  Security / Safety Notes:
    Reads application bundles under the configured applications
    directory only. Fetched manifests are discarded after parsing.

  Dependencies:
    glob for resource discovery, plist for Info.plist metadata.

  Operational Scope:
    Produces one catalog per source for the reconciliation
    engine; applications that are not installed are skipped.

  Revision History:
    2026-10-18 CW  Authored source resolver and location strategies.
  ------------------------------------------------------------
  Principles Observed:
    - Ordered location strategies, first hit wins
    - One parse/patch path for every source kind
    - Absent applications are benign, missing manifests are not
============================================================*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{glob, Pattern};
use plist::Value;
use serde::Serialize;

use crate::config::RunConfig;
use crate::content::ContentClient;
use crate::error::{LoopsError, Result};
use crate::logger::Logger;
use crate::manifest::{Catalog, ManifestDocument};
use crate::option_packs::OptionPack;
use crate::package::PackageRecord;
use crate::supported::{self, AppSpec, APPS};
use crate::version::LooseVersion;

/// Metadata of an installed application bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledApplication {
    pub key: String,
    pub name: String,
    pub bundle_id: Option<String>,
    pub minimum_os: Option<String>,
    pub version: LooseVersion,
    pub path: PathBuf,
}

impl InstalledApplication {
    /// Inspect `applications_dir` for the application's bundle.
    ///
    /// Returns `Ok(None)` when the bundle is absent.
    pub fn discover(app: &AppSpec, applications_dir: &Path) -> Result<Option<Self>> {
        let path = applications_dir.join(app.bundle);
        if !path.is_dir() {
            return Ok(None);
        }

        let info_path = path.join("Contents").join("Info.plist");
        let info = Value::from_file(&info_path).map_err(|err| {
            LoopsError::Filesystem(format!("Failed to read {}: {err}", info_path.display()))
        })?;
        let info = info.as_dictionary().ok_or_else(|| {
            LoopsError::Serialization(format!("{} is not a dictionary", info_path.display()))
        })?;
        let text = |key: &str| info.get(key).and_then(Value::as_string).map(str::to_string);

        Ok(Some(Self {
            key: app.key.to_string(),
            name: text("CFBundleName").unwrap_or_else(|| app.bundle.trim_end_matches(".app").to_string()),
            bundle_id: text("CFBundleIdentifier"),
            minimum_os: text("LSMinimumSystemVersion"),
            version: text("CFBundleShortVersionString")
                .map(|version| LooseVersion::parse(&version))
                .unwrap_or_default(),
            path,
        }))
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.path.join("Contents").join("Resources")
    }
}

/// Where a manifest for an installed application was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
    Local(PathBuf),
    Remote(String),
}

type LocateStrategy = fn(&InstalledApplication) -> Result<Option<ManifestLocation>>;

const LOCATE_STRATEGIES: &[(&str, LocateStrategy)] = &[
    ("resource glob", locate_in_resources),
    ("version range", locate_by_version),
];

/// Try each location strategy in order.
pub fn locate_manifest(app: &InstalledApplication, logger: &Logger) -> Result<ManifestLocation> {
    for (label, strategy) in LOCATE_STRATEGIES {
        if let Some(location) = strategy(app)? {
            logger.debug("SOURCE", format!("{}: manifest found by {label}: {location:?}", app.name));
            return Ok(location);
        }
    }
    Err(LoopsError::ManifestNotFound {
        app: app.name.clone(),
    })
}

/// Lexicographically last `{app}<digits>.plist` in the bundle resources.
fn locate_in_resources(app: &InstalledApplication) -> Result<Option<ManifestLocation>> {
    let resources = app.resources_dir();
    let pattern = format!(
        "{}/{}*.plist",
        Pattern::escape(&resources.to_string_lossy()),
        app.key
    );
    let entries = glob(&pattern)
        .map_err(|err| LoopsError::Runtime(format!("Invalid glob pattern {pattern}: {err}")))?;

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| is_versioned_manifest(&app.key, path))
        .collect();
    matches.sort();
    Ok(matches.pop().map(ManifestLocation::Local))
}

fn is_versioned_manifest(key: &str, path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(key))
        .and_then(|rest| rest.strip_suffix(".plist"))
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn locate_by_version(app: &InstalledApplication) -> Result<Option<ManifestLocation>> {
    Ok(supported::manifest_for_version(&app.key, &app.version).map(ManifestLocation::Remote))
}

/// What a source was resolved from.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceOrigin {
    Application(InstalledApplication),
    Remote { manifest: String },
}

/// One resolved source and its patched catalog.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    pub origin: SourceOrigin,
    pub catalog: Catalog,
}

impl ManifestSource {
    /// Build a source for an installed application.
    pub async fn from_application(
        app: InstalledApplication,
        client: &ContentClient,
        config: &RunConfig,
        logger: &Logger,
    ) -> Result<Self> {
        let document = match locate_manifest(&app, logger)? {
            ManifestLocation::Local(path) => ManifestDocument::from_path(&path)?,
            ManifestLocation::Remote(manifest) => client.fetch_manifest(&manifest, logger).await?,
        };
        let catalog = document.into_catalog(config, logger)?;
        Ok(Self {
            origin: SourceOrigin::Application(app),
            catalog,
        })
    }

    /// Build a source for a named remote manifest.
    pub async fn from_remote(
        manifest: &str,
        client: &ContentClient,
        config: &RunConfig,
        logger: &Logger,
    ) -> Result<Self> {
        let document = client.fetch_manifest(manifest, logger).await?;
        let catalog = document.into_catalog(config, logger)?;
        Ok(Self {
            origin: SourceOrigin::Remote {
                manifest: manifest.to_string(),
            },
            catalog,
        })
    }

    pub fn label(&self) -> String {
        match &self.origin {
            SourceOrigin::Application(app) => format!("{} {} ({})", app.name, app.version, self.catalog.manifest),
            SourceOrigin::Remote { manifest } => manifest.clone(),
        }
    }

    pub fn mandatory_pkgs(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.catalog.mandatory()
    }

    pub fn optional_pkgs(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.catalog.optional()
    }

    pub fn option_packs(&self) -> &[OptionPack] {
        &self.catalog.option_packs
    }

    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.catalog.records.values().map(Arc::as_ref)
    }
}

/// The sources an operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
    /// Discover every supported application that is installed.
    Discover,
    /// Named application keys, `all` expands to every application.
    Applications(Vec<String>),
    /// Named manifests, `all` expands to the latest per application.
    Manifests(Vec<String>),
}

impl SourceRequest {
    /// Application keys to inspect, in table order for `all`.
    fn application_keys(keys: &[String]) -> Vec<&'static AppSpec> {
        let mut specs: Vec<&'static AppSpec> = Vec::new();
        for key in keys {
            let expanded: Vec<&'static AppSpec> = if key == "all" {
                APPS.iter().collect()
            } else {
                supported::app_spec(key).into_iter().collect()
            };
            for spec in expanded {
                if !specs.contains(&spec) {
                    specs.push(spec);
                }
            }
        }
        specs
    }

    fn manifest_names(names: &[String]) -> Vec<String> {
        let mut manifests: Vec<String> = Vec::new();
        for name in names {
            let expanded = if name == "all" {
                supported::all_latest_manifests()
            } else {
                supported::supported_manifest(name).into_iter().collect()
            };
            for manifest in expanded {
                if !manifests.contains(&manifest) {
                    manifests.push(manifest);
                }
            }
        }
        manifests
    }
}

/// Resolve every requested source, one at a time.
pub async fn resolve_sources(
    request: &SourceRequest,
    client: &ContentClient,
    config: &RunConfig,
    logger: &Logger,
) -> Result<Vec<ManifestSource>> {
    let mut sources = Vec::new();

    match request {
        SourceRequest::Manifests(names) => {
            for manifest in SourceRequest::manifest_names(names) {
                logger.info("SOURCE", format!("Resolving manifest {manifest}"));
                sources.push(ManifestSource::from_remote(&manifest, client, config, logger).await?);
            }
        }
        SourceRequest::Applications(_) | SourceRequest::Discover => {
            let specs: Vec<&AppSpec> = match request {
                SourceRequest::Applications(keys) => SourceRequest::application_keys(keys),
                _ => APPS.iter().collect(),
            };
            for spec in specs {
                match InstalledApplication::discover(spec, &config.applications_dir)? {
                    Some(app) => {
                        logger.info(
                            "SOURCE",
                            format!("Found {} {} at {}", app.name, app.version, app.path.display()),
                        );
                        sources.push(ManifestSource::from_application(app, client, config, logger).await?);
                    }
                    None => logger.info("SOURCE", format!("{} is not installed", spec.bundle)),
                }
            }
        }
    }

    Ok(sources)
}
