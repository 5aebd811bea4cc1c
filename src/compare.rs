/*============================================================
  Project: appleloops
  Module: appleloops::compare
  ------------------------------------------------------------
  Purpose:
    Compare the package lists of two manifests: packages new,
    removed and common between releases, plus packages whose
    mandatory flag changed.

  Security / Safety Notes:
    Read-only. Remote manifests follow the same fetch-parse-
    discard path as sources.

  Dependencies:
    plist for raw entry inspection.

  Operational Scope:
    Utility mode of the CLI; exits after printing.

  Revision History:
    2026-10-18 CW  Added manifest comparison utility.
============================================================*/

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use plist::Value;
use serde::Serialize;

use crate::content::ContentClient;
use crate::error::{LoopsError, Result};
use crate::logger::Logger;
use crate::manifest::ManifestDocument;
use crate::supported;

/// A package whose mandatory flag differs between releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MandatoryChange {
    pub package: String,
    pub left: bool,
    pub right: bool,
}

/// Differences between an older (`left`) and newer (`right`) manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestComparison {
    pub left: String,
    pub right: String,
    pub new: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub common: BTreeSet<String>,
    pub mandatory_changes: Vec<MandatoryChange>,
}

impl ManifestComparison {
    /// Compare two parsed manifests. Documents are ordered by name so the
    /// lower release is always on the left.
    pub fn between(a: &ManifestDocument, b: &ManifestDocument) -> Self {
        let (left, right) = if a.name <= b.name { (a, b) } else { (b, a) };
        let left_packages = package_flags(left);
        let right_packages = package_flags(right);

        let left_names: BTreeSet<String> = left_packages.keys().cloned().collect();
        let right_names: BTreeSet<String> = right_packages.keys().cloned().collect();

        let mandatory_changes = left_packages
            .iter()
            .filter_map(|(package, left_flag)| {
                let right_flag = right_packages.get(package)?;
                (left_flag != right_flag).then(|| MandatoryChange {
                    package: package.clone(),
                    left: *left_flag,
                    right: *right_flag,
                })
            })
            .collect();

        Self {
            left: left.name.clone(),
            right: right.name.clone(),
            new: right_names.difference(&left_names).cloned().collect(),
            removed: left_names.difference(&right_names).cloned().collect(),
            common: right_names.intersection(&left_names).cloned().collect(),
            mandatory_changes,
        }
    }

    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.new.is_empty() {
            lines.push(format!(
                "{} new packages in {} when compared to {}",
                self.new.len(),
                self.right,
                self.left
            ));
        }
        if !self.removed.is_empty() {
            lines.push(format!(
                "{} packages removed from {} compared to {}",
                self.removed.len(),
                self.left,
                self.right
            ));
        }
        if !self.common.is_empty() {
            lines.push(format!(
                "{} packages common between {} and {}",
                self.common.len(),
                self.left,
                self.right
            ));
        }
        for change in &self.mandatory_changes {
            lines.push(format!(
                "{} is {} in {} and {} in {}",
                change.package,
                classification(change.left),
                self.left,
                classification(change.right),
                self.right
            ));
        }
        lines
    }
}

fn classification(mandatory: bool) -> &'static str {
    if mandatory {
        "mandatory"
    } else {
        "optional"
    }
}

/// Package basename to raw mandatory flag. Comparison uses the vendor data
/// as published, before corrections.
fn package_flags(document: &ManifestDocument) -> BTreeMap<String, bool> {
    document
        .packages
        .values()
        .filter_map(|entry| {
            let download = entry.get("DownloadName").and_then(Value::as_string)?;
            let basename = download.rsplit('/').next().unwrap_or(download);
            let mandatory = matches!(entry.get("IsMandatory"), Some(Value::Boolean(true)));
            Some((basename.to_string(), mandatory))
        })
        .collect()
}

/// Load a manifest named on the command line: an existing file, or a
/// supported release fetched from the content host.
pub async fn load_manifest(
    name: &str,
    client: &ContentClient,
    logger: &Logger,
) -> Result<ManifestDocument> {
    let path = Path::new(name);
    if path.is_file() {
        return ManifestDocument::from_path(path);
    }

    let basename = path
        .file_name()
        .map(|file| file.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let manifest = supported::supported_manifest(&basename).ok_or_else(|| {
        LoopsError::Config(format!(
            "{name} is not a supported manifest; see --show-plists"
        ))
    })?;
    client.fetch_manifest(&manifest, logger).await
}

pub async fn compare_manifests(
    a: &str,
    b: &str,
    client: &ContentClient,
    logger: &Logger,
) -> Result<ManifestComparison> {
    let first = load_manifest(a, client, logger).await?;
    let second = load_manifest(b, client, logger).await?;
    Ok(ManifestComparison::between(&first, &second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::{document, package_entry};

    fn releases() -> (ManifestDocument, ManifestDocument) {
        let older = document(
            "garageband1011.plist",
            &[
                ("Kept", package_entry("Kept.pkg", true, 1)),
                ("Flipped", package_entry("Flipped.pkg", false, 1)),
                ("Dropped", package_entry("../lp10_ms3_content_2013/Dropped.pkg", false, 1)),
            ],
        );
        let newer = document(
            "garageband1021.plist",
            &[
                ("Kept", package_entry("Kept.pkg", true, 1)),
                ("Flipped", package_entry("Flipped.pkg", true, 1)),
                ("Added", package_entry("Added.pkg", false, 1)),
            ],
        );
        (older, newer)
    }

    #[test]
    fn newer_release_is_always_on_the_right() {
        let (older, newer) = releases();
        let comparison = ManifestComparison::between(&newer, &older);

        assert_eq!(comparison.left, "garageband1011.plist");
        assert_eq!(comparison.right, "garageband1021.plist");
        assert_eq!(comparison.new, BTreeSet::from(["Added.pkg".to_string()]));
        assert_eq!(comparison.removed, BTreeSet::from(["Dropped.pkg".to_string()]));
        assert_eq!(comparison.common.len(), 2);
    }

    #[test]
    fn mandatory_flag_changes_are_reported() {
        let (older, newer) = releases();
        let comparison = ManifestComparison::between(&older, &newer);
        assert_eq!(
            comparison.mandatory_changes,
            vec![MandatoryChange {
                package: "Flipped.pkg".into(),
                left: false,
                right: true,
            }]
        );
        let summary = comparison.summary();
        assert_eq!(summary[0], "1 new packages in garageband1021.plist when compared to garageband1011.plist");
        assert_eq!(
            summary.last().map(String::as_str),
            Some("Flipped.pkg is optional in garageband1011.plist and mandatory in garageband1021.plist")
        );
    }

    #[tokio::test]
    async fn unsupported_names_are_rejected_before_fetching() {
        let config = crate::manifest::tests::run_config();
        let client = ContentClient::new(&Default::default(), &config.content).unwrap();
        let err = load_manifest("garageband0001.plist", &client, &Logger::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, LoopsError::Config(_)));
    }
}
