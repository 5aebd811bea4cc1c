/*============================================================
  Project: appleloops
  Module: appleloops::patches
  ------------------------------------------------------------
  Purpose:
    Static "Bad Wolf" corrections for manifest entries that the
    vendor publishes with wrong flags, names or identifiers.

  Security / Safety Notes:
    Compile-time data; no I/O performed in this module.

  Dependencies:
    plist for the raw entry dictionaries being corrected.

  Operational Scope:
    Applied to every raw package entry before it becomes a
    PackageRecord, for every source kind.

  Revision History:
    2026-10-18 CW  Moved correction table into typed statics.
  ------------------------------------------------------------
  Principles Observed:
    - Versioned data, never computed at runtime
    - Patch values win; absent keys are added
============================================================*/

use plist::{Dictionary, Value};

/// A single corrected value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatchValue {
    Bool(bool),
    Text(&'static str),
}

impl PatchValue {
    fn to_value(self) -> Value {
        match self {
            PatchValue::Bool(flag) => Value::Boolean(flag),
            PatchValue::Text(text) => Value::String(text.to_string()),
        }
    }
}

/// Corrections for one package entry.
#[derive(Debug)]
pub struct PackagePatch {
    pub package: &'static str,
    pub fields: &'static [(&'static str, PatchValue)],
}

/// Corrections registered against one manifest file name.
#[derive(Debug)]
pub struct ManifestPatches {
    pub manifest: &'static str,
    pub packages: &'static [PackagePatch],
}

impl ManifestPatches {
    pub fn for_package(&self, package: &str) -> Option<&'static PackagePatch> {
        self.packages.iter().find(|patch| patch.package == package)
    }
}

const MANDATORY_GH45: &[(&str, PatchValue)] = &[
    ("IsMandatory", PatchValue::Bool(true)),
    ("Comment", PatchValue::Text("ghIssue:45")),
];

const IGNORE_GH29: &[(&str, PatchValue)] = &[
    ("BadWolfIgnore", PatchValue::Bool(true)),
    ("Comment", PatchValue::Text("ghIssue:29")),
];

const fn mandatory(package: &'static str) -> PackagePatch {
    PackagePatch {
        package,
        fields: MANDATORY_GH45,
    }
}

const fn ignored(package: &'static str) -> PackagePatch {
    PackagePatch {
        package,
        fields: IGNORE_GH29,
    }
}

/// Known corrections keyed by manifest file name.
pub static BAD_WOLF_PATCHES: &[ManifestPatches] = &[
    ManifestPatches {
        manifest: "garageband1021.plist",
        packages: &[
            mandatory("MAContent10_AssetPack_0357_EXS_BassAcousticUprightJazz"),
            mandatory("MAContent10_AssetPack_0358_EXS_BassElectricFingerStyle"),
            mandatory("MAContent10_AssetPack_0482_EXS_OrchWoodwindAltoSax"),
            mandatory("MAContent10_AssetPack_0484_EXS_OrchWoodwindClarinetSolo"),
            mandatory("MAContent10_AssetPack_0487_EXS_OrchWoodwindFluteSolo"),
            mandatory("MAContent10_AssetPack_0491_EXS_OrchBrass"),
            mandatory("MAContent10_AssetPack_0509_EXS_StringsEnsemble"),
            ignored("JamPack1InstrumentsPackage"),
            ignored("JamPackSymphonyOrchestraInstrumentsPackage"),
            ignored("JamPack1AppleLoopsPackage"),
            ignored("JamPackRemixToolsAppleLoopsPackage"),
            ignored("JamPackRhythmSectionAppleLoopsPackage"),
            ignored("JamPackSymphonyOrchestraAppleLoopsPackage"),
            ignored("JamPackVoicesAppleLoopsPackage"),
            ignored("JamPackWorldMusicAppleLoopsPackage"),
            ignored("GarageBand11ExtraContentPackage"),
            ignored("IRsSurroundPackage"),
            ignored("Logic9LegacyContentPackage"),
            ignored("JamPackRemixToolsInstrumentsPackage"),
            ignored("JamPackRhythmSectionInstrumentsPackage"),
            ignored("JamPackVoicesInstrumentsPackage"),
            ignored("JamPackWorldMusicInstrumentsPackage"),
        ],
    },
    ManifestPatches {
        manifest: "logicpro1050.plist",
        packages: &[
            PackagePatch {
                package: "MAContent10_AssetPack_0357_EXS_BassAcousticUprightJazz",
                fields: &[
                    (
                        "FileCheck",
                        PatchValue::Text(
                            "/Library/Application Support/Logic/Logic Pro X Demosongs/ocean eyes.logicx/Alternatives/001/DisplayState.plist",
                        ),
                    ),
                    ("Comment", PatchValue::Text("appleloops/3.1.7/ghIssue:22")),
                ],
            },
            PackagePatch {
                package: "MAContent10_AssetPack_0755_AppleLoopsPrismatica",
                fields: &[
                    (
                        "DownloadName",
                        PatchValue::Text("MAContent10_AssetPack_0801_AppleLoopsPrismaticaB.pkg"),
                    ),
                    (
                        "PackageID",
                        PatchValue::Text("MAContent10_AssetPack_0801_AppleLoopsPrismaticaB"),
                    ),
                    ("Comment", PatchValue::Text("appleloops/3.1.8/ghIssue:21")),
                ],
            },
        ],
    },
];

/// Look up the corrections registered for a manifest file name.
pub fn patches_for(manifest: &str) -> Option<&'static ManifestPatches> {
    BAD_WOLF_PATCHES
        .iter()
        .find(|patches| patches.manifest == manifest)
}

/// Merge a patch into a raw entry. Patch values replace existing keys.
pub fn apply(patch: &PackagePatch, entry: &mut Dictionary) {
    for (key, value) in patch.fields {
        entry.insert((*key).to_string(), value.to_value());
    }
}

/// Apply any registered correction for `package` in `manifest`.
///
/// Returns true when a correction was applied.
pub fn apply_registered(manifest: &str, package: &str, entry: &mut Dictionary) -> bool {
    match patches_for(manifest).and_then(|patches| patches.for_package(package)) {
        Some(patch) => {
            apply(patch, entry);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mandatory: bool) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert(
            "DownloadName".into(),
            Value::String("JamPack1AppleLoops.pkg".into()),
        );
        dict.insert("IsMandatory".into(), Value::Boolean(mandatory));
        dict
    }

    #[test]
    fn patch_overrides_and_adds_keys() {
        let mut dict = entry(true);
        assert!(apply_registered(
            "garageband1021.plist",
            "JamPack1AppleLoopsPackage",
            &mut dict
        ));
        assert_eq!(dict.get("BadWolfIgnore"), Some(&Value::Boolean(true)));
        assert_eq!(dict.get("IsMandatory"), Some(&Value::Boolean(true)));
        assert_eq!(
            dict.get("Comment").and_then(Value::as_string),
            Some("ghIssue:29")
        );
    }

    #[test]
    fn applying_twice_matches_applying_once() {
        for manifest in BAD_WOLF_PATCHES {
            for patch in manifest.packages {
                let mut once = entry(false);
                apply(patch, &mut once);
                let mut twice = once.clone();
                apply(patch, &mut twice);
                assert_eq!(once, twice, "{} / {}", manifest.manifest, patch.package);
            }
        }
    }

    #[test]
    fn unregistered_entries_pass_through() {
        let mut dict = entry(false);
        let before = dict.clone();
        assert!(!apply_registered("garageband1021.plist", "NotPatched", &mut dict));
        assert!(!apply_registered("mainstage350.plist", "JamPack1AppleLoopsPackage", &mut dict));
        assert_eq!(dict, before);
    }

    #[test]
    fn mandatory_correction_flips_flag() {
        let mut dict = entry(false);
        apply_registered(
            "garageband1021.plist",
            "MAContent10_AssetPack_0491_EXS_OrchBrass",
            &mut dict,
        );
        assert_eq!(dict.get("IsMandatory"), Some(&Value::Boolean(true)));
    }
}
