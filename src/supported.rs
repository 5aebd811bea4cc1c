/*============================================================
  Project: appleloops
  Module: appleloops::supported
  ------------------------------------------------------------
  Purpose:
    Supported manifest releases and application bundles, and
    inference of a manifest release from an application version.

  Security / Safety Notes:
    Compile-time data; no I/O performed in this module.

  Dependencies:
    None beyond std.

  Operational Scope:
    CLI validation, `all` expansion and the version-range
    manifest location strategy.

  Revision History:
    2026-10-18 CW  Introduced supported release tables.
  ------------------------------------------------------------
  Principles Observed:
    - Tables sorted by release
    - Overflowing versions map to no release
============================================================*/

use crate::version::LooseVersion;

/// Supported manifest releases, sorted.
pub const SUPPORTED_MANIFESTS: &[&str] = &[
    "garageband1011",
    "garageband1012",
    "garageband1015",
    "garageband1016",
    "garageband1020",
    "garageband1021",
    "garageband1040",
    "logicpro1021",
    "logicpro1022",
    "logicpro1023",
    "logicpro1030",
    "logicpro1032",
    "logicpro1040",
    "logicpro1042",
    "logicpro1050",
    "mainstage323",
    "mainstage324",
    "mainstage330",
    "mainstage340",
    "mainstage350",
];

/// An application whose loops can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppSpec {
    /// Short name, also the manifest file prefix.
    pub key: &'static str,
    pub bundle: &'static str,
}

pub const APPS: &[AppSpec] = &[
    AppSpec {
        key: "garageband",
        bundle: "GarageBand.app",
    },
    AppSpec {
        key: "logicpro",
        bundle: "Logic Pro X.app",
    },
    AppSpec {
        key: "mainstage",
        bundle: "MainStage 3.app",
    },
];

pub fn app_spec(key: &str) -> Option<&'static AppSpec> {
    APPS.iter().find(|app| app.key == key)
}

/// Manifest file name for a release key (`garageband1021.plist`).
pub fn manifest_file(release: &str) -> String {
    format!("{release}.plist")
}

/// Normalise a release key or manifest file name to a supported file name.
pub fn supported_manifest(name: &str) -> Option<String> {
    let key = name.strip_suffix(".plist").unwrap_or(name);
    SUPPORTED_MANIFESTS
        .iter()
        .find(|release| **release == key)
        .map(|release| manifest_file(release))
}

fn release_number(app: &str, release: &str) -> Option<u32> {
    release.strip_prefix(app)?.parse::<u32>().ok()
}

/// Supported releases for an application, ordered by release number.
pub fn releases_for(app: &str) -> Vec<(&'static str, u32)> {
    let mut releases: Vec<(&'static str, u32)> = SUPPORTED_MANIFESTS
        .iter()
        .filter_map(|release| release_number(app, release).map(|number| (*release, number)))
        .collect();
    releases.sort_by_key(|(_, number)| *number);
    releases
}

/// Most recent manifest file for an application.
pub fn latest_manifest(app: &str) -> Option<String> {
    releases_for(app)
        .last()
        .map(|(release, _)| manifest_file(release))
}

/// Latest manifest for every application.
pub fn all_latest_manifests() -> Vec<String> {
    APPS.iter()
        .filter_map(|app| latest_manifest(app.key))
        .collect()
}

/// Release number encoded by an application version (`10.4.8` → 1048).
pub fn version_number(version: &LooseVersion) -> Option<u32> {
    let numbers = version.numbers();
    let major = *numbers.first()?;
    let minor = numbers.get(1).copied().unwrap_or(0).min(9);
    let patch = numbers.get(2).copied().unwrap_or(0).min(9);
    let number = major
        .checked_mul(100)?
        .checked_add(minor * 10 + patch)?;
    u32::try_from(number).ok()
}

/// Pick the supported manifest whose release range brackets `version`.
///
/// Each release covers versions from its own number up to the next
/// release; versions older than the first release have no manifest.
pub fn manifest_for_version(app: &str, version: &LooseVersion) -> Option<String> {
    let wanted = version_number(version)?;
    let mut selected = None;
    for (release, number) in releases_for(app) {
        if number > wanted {
            break;
        }
        selected = Some(release);
    }
    selected.map(manifest_file)
}

/// Print the supported manifest list.
pub fn show_supported() {
    println!("Supported plist files are:");
    for release in SUPPORTED_MANIFESTS {
        println!("  {}", manifest_file(release));
    }
}
