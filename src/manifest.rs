/*============================================================
  Project: appleloops
  Module: appleloops::manifest
  ------------------------------------------------------------
  Purpose:
    Parse vendor manifests (property lists) into patched
    package records and the display grouping structure used
    for option packs.

  Security / Safety Notes:
    Manifests are untrusted input; unknown fields are ignored
    and malformed documents are rejected, never guessed at.

  Dependencies:
    plist for XML and binary property list decoding.

  Operational Scope:
    Shared by installed-application and remote-manifest
    sources so both follow one parse/patch path.

  Revision History:
    2026-10-18 CW  Authored manifest model.
  ------------------------------------------------------------
  Principles Observed:
    - Parse failure is fatal for the source
    - Corrections applied before records are built
    - Deterministic ordering of package entries
============================================================*/

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use plist::{Dictionary, Value};

use crate::config::RunConfig;
use crate::error::{LoopsError, Result};
use crate::logger::Logger;
use crate::option_packs::{build_option_packs, OptionPack};
use crate::package::PackageRecord;
use crate::patches;

const ENGLISH_KEYS: [&str; 3] = ["en", "English", "en_US"];

/// A display grouping from the manifest `Content` structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentEntry {
    pub name: Option<String>,
    pub description: Option<String>,
    pub packages: Vec<String>,
    pub sub_content: Vec<ContentEntry>,
}

impl ContentEntry {
    fn from_dictionary(dict: &Dictionary) -> Self {
        let name = dict
            .get("Name")
            .and_then(Value::as_string)
            .map(str::to_string);
        let packages = dict
            .get("Packages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_string)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let sub_content = dict
            .get("SubContent")
            .map(parse_entries)
            .unwrap_or_default();

        Self {
            name,
            description: localized_description(dict.get("_LOCALIZABLE_")),
            packages,
            sub_content,
        }
    }
}

fn localized_description(localizable: Option<&Value>) -> Option<String> {
    let items: Vec<&Value> = match localizable? {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(Value::as_dictionary)
        .find_map(|locale| locale.get("Description").and_then(Value::as_string))
        .map(|text| text.trim().to_string())
}

fn parse_entries(value: &Value) -> Vec<ContentEntry> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_dictionary)
            .map(ContentEntry::from_dictionary)
            .collect(),
        Value::Dictionary(dict) => {
            if let Some(english) = ENGLISH_KEYS.iter().find_map(|key| dict.get(key)) {
                parse_entries(english)
            } else if dict.contains_key("Packages") || dict.contains_key("SubContent") {
                vec![ContentEntry::from_dictionary(dict)]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

/// A parsed, unpatched manifest document.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    /// Manifest file name, used as the correction lookup key.
    pub name: String,
    pub packages: BTreeMap<String, Dictionary>,
    pub content: Vec<ContentEntry>,
}

impl ManifestDocument {
    /// Read a manifest from disk. The file name becomes the manifest name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = manifest_name(path);
        let root = Value::from_file(path)
            .map_err(|err| LoopsError::manifest(&name, format!("unreadable: {err}")))?;
        Self::from_value(&name, root)
    }

    /// Parse a manifest from raw XML or binary property list bytes.
    #[cfg(test)]
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self> {
        let root = Value::from_reader(std::io::Cursor::new(bytes))
            .map_err(|err| LoopsError::manifest(name, format!("unreadable: {err}")))?;
        Self::from_value(name, root)
    }

    /// Build a manifest from an already decoded property list root.
    pub fn from_value(name: &str, root: Value) -> Result<Self> {
        let mut root = match root {
            Value::Dictionary(dict) => dict,
            _ => return Err(LoopsError::manifest(name, "root is not a dictionary")),
        };

        let packages = match root.remove("Packages") {
            Some(Value::Dictionary(dict)) => dict,
            Some(_) => return Err(LoopsError::manifest(name, "`Packages` is not a dictionary")),
            None => return Err(LoopsError::manifest(name, "missing `Packages`")),
        };

        let mut entries = BTreeMap::new();
        for (package, attributes) in packages {
            match attributes {
                Value::Dictionary(dict) => {
                    entries.insert(package, dict);
                }
                _ => {
                    return Err(LoopsError::manifest(
                        name,
                        format!("package `{package}` is not a dictionary"),
                    ))
                }
            }
        }

        let content = root.get("Content").map(parse_entries).unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            packages: entries,
            content,
        })
    }

    /// Apply corrections, build package records and option packs.
    ///
    /// Records flagged `BadWolfIgnore` are dropped here and never
    /// reach any downstream set.
    pub fn into_catalog(self, config: &RunConfig, logger: &Logger) -> Result<Catalog> {
        let mut records = BTreeMap::new();
        let mut optional_names = BTreeSet::new();

        for (package, mut entry) in self.packages {
            if patches::apply_registered(&self.name, &package, &mut entry) {
                logger.debug("PATCH", format!("{}: corrected {package}", self.name));
            }

            let record = PackageRecord::from_entry(&self.name, &package, &entry, config)?;
            if record.bad_wolf_ignore() {
                logger.debug("PATCH", format!("{}: ignoring {package}", self.name));
                continue;
            }
            if let Some(comment) = record.comment() {
                logger.debug("MANIFEST", format!("{}: {package}: {comment}", self.name));
            }
            if !record.is_mandatory() {
                optional_names.insert(package.clone());
            }
            records.insert(package, Arc::new(record));
        }

        let option_packs = build_option_packs(&self.content, &optional_names);

        Ok(Catalog {
            manifest: self.name,
            records,
            option_packs,
        })
    }
}

/// Patched package records and option packs of one manifest.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub manifest: String,
    /// Keyed by manifest package name.
    pub records: BTreeMap<String, Arc<PackageRecord>>,
    pub option_packs: Vec<OptionPack>,
}

impl Catalog {
    pub fn mandatory(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.records.values().filter(|record| record.is_mandatory())
    }

    pub fn optional(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.records.values().filter(|record| !record.is_mandatory())
    }
}

fn manifest_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::LoopsConfig;

    pub(crate) fn package_entry(download: &str, mandatory: bool, size: u64) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("DownloadName".into(), Value::String(download.into()));
        dict.insert(
            "PackageID".into(),
            Value::String(format!("com.apple.pkg.{}", download.trim_end_matches(".pkg"))),
        );
        dict.insert("DownloadSize".into(), Value::from(size));
        dict.insert("InstalledSize".into(), Value::from(size * 2));
        dict.insert("IsMandatory".into(), Value::Boolean(mandatory));
        dict.insert("PackageVersion".into(), Value::String("1.0.0".into()));
        dict
    }

    pub(crate) fn document(name: &str, entries: &[(&str, Dictionary)]) -> ManifestDocument {
        let mut packages = Dictionary::new();
        for (package, entry) in entries {
            packages.insert((*package).to_string(), Value::Dictionary(entry.clone()));
        }
        let mut root = Dictionary::new();
        root.insert("Packages".into(), Value::Dictionary(packages));
        ManifestDocument::from_value(name, Value::Dictionary(root)).unwrap()
    }

    pub(crate) fn run_config() -> RunConfig {
        RunConfig::new(&LoopsConfig::default())
    }

    const XML_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Content</key>
    <dict>
        <key>en</key>
        <array>
            <dict>
                <key>Name</key>
                <string>Drummer</string>
                <key>Packages</key>
                <array>
                    <string>DrummerKit</string>
                </array>
                <key>_LOCALIZABLE_</key>
                <array>
                    <dict>
                        <key>Description</key>
                        <string>  Drum kits  </string>
                    </dict>
                </array>
            </dict>
        </array>
    </dict>
    <key>Packages</key>
    <dict>
        <key>DrummerKit</key>
        <dict>
            <key>DownloadName</key>
            <string>DrummerKit.pkg</string>
            <key>DownloadSize</key>
            <integer>2048</integer>
            <key>InstalledSize</key>
            <integer>4096</integer>
            <key>IsMandatory</key>
            <false/>
            <key>PackageID</key>
            <string>com.apple.pkg. DrummerKit</string>
            <key>UnknownVendorField</key>
            <string>ignored</string>
        </dict>
    </dict>
</dict>
</plist>"#;

    #[test]
    fn parses_xml_manifest_with_locale_content() {
        let document = ManifestDocument::from_bytes("logicpro1050.plist", XML_MANIFEST.as_bytes())
            .unwrap();
        assert_eq!(document.packages.len(), 1);
        assert_eq!(document.content.len(), 1);
        assert_eq!(document.content[0].name.as_deref(), Some("Drummer"));
        assert_eq!(document.content[0].description.as_deref(), Some("Drum kits"));

        let catalog = document
            .into_catalog(&run_config(), &Logger::disabled())
            .unwrap();
        let record = &catalog.records["DrummerKit"];
        assert_eq!(record.download_size(), 2048);
        assert_eq!(record.package_id(), "com.apple.pkg.DrummerKit");
        assert_eq!(catalog.option_packs.len(), 1);
    }

    #[test]
    fn malformed_manifest_is_fatal() {
        let err = ManifestDocument::from_bytes("garageband1021.plist", b"<plist><dict>").unwrap_err();
        assert!(matches!(err, LoopsError::Manifest { .. }));
    }

    #[test]
    fn missing_packages_is_fatal() {
        let err = ManifestDocument::from_value("x.plist", Value::Dictionary(Dictionary::new()))
            .unwrap_err();
        assert!(matches!(err, LoopsError::Manifest { .. }));
    }

    #[test]
    fn ignored_packages_never_reach_catalog() {
        let document = document(
            "garageband1021.plist",
            &[
                ("JamPack1AppleLoopsPackage", package_entry("JamPack1.pkg", true, 10)),
                ("Keep", package_entry("Keep.pkg", true, 10)),
            ],
        );
        let catalog = document
            .into_catalog(&run_config(), &Logger::disabled())
            .unwrap();
        assert_eq!(catalog.records.len(), 1);
        assert!(catalog.records.contains_key("Keep"));
    }

    #[test]
    fn patched_flags_decide_classification() {
        let document = document(
            "garageband1021.plist",
            &[(
                "MAContent10_AssetPack_0491_EXS_OrchBrass",
                package_entry("MAContent10_AssetPack_0491_EXS_OrchBrass.pkg", false, 10),
            )],
        );
        let catalog = document
            .into_catalog(&run_config(), &Logger::disabled())
            .unwrap();
        assert_eq!(catalog.mandatory().count(), 1);
        assert_eq!(catalog.optional().count(), 0);
    }
}
