/*============================================================
  Project: appleloops
  Module: appleloops::option_packs
  ------------------------------------------------------------
  Purpose:
    Group optional packages into the named collections a
    manifest advertises, for display only.

  Security / Safety Notes:
    Pure data transformation; no I/O performed in this module.

  Dependencies:
    serde for report output.

  Operational Scope:
    Built alongside each catalog; never consulted by the
    reconciliation engine.

  Revision History:
    2026-10-18 CW  Authored option pack grouping.
  ------------------------------------------------------------
  Principles Observed:
    - Pack name is identity
    - Deterministic ordering
============================================================*/

use std::collections::{BTreeSet, HashSet};
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::manifest::ContentEntry;

/// A named collection of optional packages.
#[derive(Debug, Clone, Serialize)]
pub struct OptionPack {
    pub name: String,
    pub description: Option<String>,
    pub packages: BTreeSet<String>,
}

impl PartialEq for OptionPack {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for OptionPack {}

impl Hash for OptionPack {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Build option packs from manifest content.
///
/// Entries with `SubContent` contribute one pack per sub-entry instead of
/// themselves. Packs left without optional packages are dropped, as are
/// later packs repeating an earlier name.
pub fn build_option_packs(
    content: &[ContentEntry],
    optional: &BTreeSet<String>,
) -> Vec<OptionPack> {
    let mut packs = Vec::new();
    let mut seen = HashSet::new();

    for entry in content {
        if entry.sub_content.is_empty() {
            push_pack(entry, optional, &mut packs, &mut seen);
        } else {
            for sub_entry in &entry.sub_content {
                push_pack(sub_entry, optional, &mut packs, &mut seen);
            }
        }
    }

    packs
}

fn push_pack(
    entry: &ContentEntry,
    optional: &BTreeSet<String>,
    packs: &mut Vec<OptionPack>,
    seen: &mut HashSet<String>,
) {
    let packages: BTreeSet<String> = entry
        .packages
        .iter()
        .filter(|package| optional.contains(*package))
        .cloned()
        .collect();
    if packages.is_empty() {
        return;
    }

    let name = entry.name.clone().unwrap_or_default();
    if !seen.insert(name.clone()) {
        return;
    }

    packs.push(OptionPack {
        name,
        description: entry.description.clone(),
        packages,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, packages: &[&str]) -> ContentEntry {
        ContentEntry {
            name: Some(name.to_string()),
            description: None,
            packages: packages.iter().map(|p| p.to_string()).collect(),
            sub_content: Vec::new(),
        }
    }

    fn optional(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn sub_content_entries_become_individual_packs() {
        let mut legacy = entry("MainStage Legacy", &[]);
        legacy.sub_content = vec![
            entry("Legacy Keys", &["Keys1", "Keys2"]),
            entry("Legacy Synths", &["Synth1"]),
        ];
        let packs = build_option_packs(&[legacy], &optional(&["Keys1", "Keys2", "Synth1"]));

        let names: Vec<&str> = packs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Legacy Keys", "Legacy Synths"]);
        assert_eq!(packs[0].packages.len(), 2);
    }

    #[test]
    fn mandatory_only_packs_are_dropped() {
        let content = vec![
            entry("Essentials", &["Core1", "Core2"]),
            entry("Extras", &["Core1", "Extra1"]),
            entry("Empty", &[]),
        ];
        let packs = build_option_packs(&content, &optional(&["Extra1"]));

        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].name, "Extras");
        assert_eq!(packs[0].packages, optional(&["Extra1"]));
    }

    #[test]
    fn description_is_optional_and_name_is_identity() {
        let mut described = entry("Drummer", &["Kit1"]);
        described.description = Some("Drum kits".into());
        let duplicate = entry("Drummer", &["Kit2"]);
        let packs = build_option_packs(&[described, duplicate], &optional(&["Kit1", "Kit2"]));

        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].description.as_deref(), Some("Drum kits"));
        assert_eq!(packs[0], OptionPack {
            name: "Drummer".into(),
            description: None,
            packages: BTreeSet::new(),
        });
    }
}
