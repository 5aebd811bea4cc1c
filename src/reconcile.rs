/*============================================================
  Project: appleloops
  Module: appleloops::reconcile
  ------------------------------------------------------------
  Purpose:
    Merge every source's not-yet-installed packages into the
    final mandatory, optional and combined lists, with the size
    statistics used for the pre-flight space check.

  Security / Safety Notes:
    Records are shared, never mutated. Report output goes to
    operator-controlled paths only.

  Dependencies:
    serde + serde_json for the report document, chrono for the
    report timestamp.

  Operational Scope:
    Runs once per invocation between source resolution and the
    deployment driver.

  Revision History:
    2026-10-18 CW  Authored reconciliation engine and report.
  ------------------------------------------------------------
  Principles Observed:
    - Set semantics keyed by download name
    - Mandatory classification always wins
    - Exact integer arithmetic; formatting only for display
============================================================*/

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{LoopsError, Result};
use crate::option_packs::OptionPack;
use crate::package::{InstallOracle, PackageRecord};
use crate::size::bytes2hr;
use crate::source::{ManifestSource, SourceOrigin};

/// Which classifications the operator asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageSelection {
    pub mandatory: bool,
    pub optional: bool,
}

/// Byte totals for one classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeTotals {
    pub download: u64,
    pub installed: u64,
}

impl SizeTotals {
    fn of<'a>(records: impl IntoIterator<Item = &'a Arc<PackageRecord>>) -> Self {
        records.into_iter().fold(Self::default(), |totals, record| Self {
            download: totals.download.saturating_add(record.download_size()),
            installed: totals.installed.saturating_add(record.installed_size()),
        })
    }

    /// Download plus install bytes.
    pub fn combined(&self) -> u64 {
        self.download.saturating_add(self.installed)
    }
}

type Keyed = BTreeMap<String, Arc<PackageRecord>>;

/// The final, deduplicated and ordered work list.
#[derive(Debug, Clone, Default)]
pub struct ReconciledPackageSet {
    selection: PackageSelection,
    mandatory: Vec<Arc<PackageRecord>>,
    optional: Vec<Arc<PackageRecord>>,
    all: Vec<Arc<PackageRecord>>,
    mandatory_size: SizeTotals,
    optional_size: SizeTotals,
    all_size: SizeTotals,
}

impl ReconciledPackageSet {
    /// Reconcile `sources` against installed state.
    pub fn build<O: InstallOracle + ?Sized>(
        sources: &[ManifestSource],
        selection: PackageSelection,
        oracle: &O,
    ) -> Self {
        let mut mandatory = Keyed::new();
        let mut optional = Keyed::new();

        for source in sources {
            if selection.mandatory {
                collect_missing(source.mandatory_pkgs(), oracle, &mut mandatory);
            }
            if selection.optional {
                collect_missing(source.optional_pkgs(), oracle, &mut optional);
            }
        }

        optional.retain(|download_name, _| !mandatory.contains_key(download_name));

        let mut all = mandatory.clone();
        for (download_name, record) in &optional {
            all.entry(download_name.clone())
                .or_insert_with(|| Arc::clone(record));
        }

        let mandatory: Vec<_> = mandatory.into_values().collect();
        let optional: Vec<_> = optional.into_values().collect();
        let all: Vec<_> = all.into_values().collect();

        Self {
            selection,
            mandatory_size: SizeTotals::of(&mandatory),
            optional_size: SizeTotals::of(&optional),
            all_size: SizeTotals::of(&all),
            mandatory,
            optional,
            all,
        }
    }

    pub fn mandatory(&self) -> &[Arc<PackageRecord>] {
        &self.mandatory
    }

    pub fn optional(&self) -> &[Arc<PackageRecord>] {
        &self.optional
    }

    /// Every package to process, ordered by download name.
    pub fn all(&self) -> &[Arc<PackageRecord>] {
        &self.all
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn mandatory_size(&self) -> SizeTotals {
        self.mandatory_size
    }

    pub fn optional_size(&self) -> SizeTotals {
        self.optional_size
    }

    pub fn all_size(&self) -> SizeTotals {
        self.all_size
    }

    /// Bytes needed for downloading and installing everything.
    pub fn total_required(&self) -> u64 {
        self.all_size.combined()
    }

    pub fn total_required_hr(&self) -> String {
        bytes2hr(self.total_required())
    }

    /// Human-readable statistics, one line per requested classification
    /// followed by the combined line.
    pub fn stats_message(&self) -> String {
        let mut lines = Vec::with_capacity(3);
        if self.selection.mandatory {
            lines.push(format!(
                "Mandatory packages download/install size: {}/{} ({} packages)",
                bytes2hr(self.mandatory_size.download),
                bytes2hr(self.mandatory_size.installed),
                self.mandatory.len()
            ));
        }
        if self.selection.optional {
            lines.push(format!(
                "Optional packages download/install size: {}/{} ({} packages)",
                bytes2hr(self.optional_size.download),
                bytes2hr(self.optional_size.installed),
                self.optional.len()
            ));
        }
        lines.push(format!(
            "All packages download/install size: {}/{} ({} packages)",
            bytes2hr(self.all_size.download),
            bytes2hr(self.all_size.installed),
            self.all.len()
        ));
        lines.join("\n")
    }
}

fn collect_missing<'a, O: InstallOracle + ?Sized>(
    records: impl Iterator<Item = &'a Arc<PackageRecord>>,
    oracle: &O,
    into: &mut Keyed,
) {
    for record in records {
        if oracle.is_installed(record) {
            continue;
        }
        into.entry(record.download_name().to_string())
            .or_insert_with(|| Arc::clone(record));
    }
}

/// Serializable summary of a reconciled run.
#[derive(Debug, Serialize)]
pub struct ReconcileReport<'a> {
    pub metadata: ReportMetadata,
    pub sources: Vec<ReportSource<'a>>,
    pub packages: Vec<ReportPackage<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub generated_by: String,
    pub mandatory_packages: usize,
    pub optional_packages: usize,
    pub total_packages: usize,
    pub mandatory_size: SizeTotals,
    pub optional_size: SizeTotals,
    pub all_size: SizeTotals,
    pub total_required: u64,
    pub total_required_hr: String,
}

#[derive(Debug, Serialize)]
pub struct ReportSource<'a> {
    pub manifest: &'a str,
    pub origin: &'a SourceOrigin,
    pub option_packs: &'a [OptionPack],
}

#[derive(Debug, Serialize)]
pub struct ReportPackage<'a> {
    #[serde(flatten)]
    pub record: &'a PackageRecord,
    pub download_size_hr: String,
    pub installed_size_hr: String,
    /// `Content-Length` of the preferred URL, when verified.
    pub real_download_size: Option<u64>,
}

impl<'a> ReconcileReport<'a> {
    pub fn new(
        set: &'a ReconciledPackageSet,
        sources: &'a [ManifestSource],
        real_sizes: &HashMap<String, u64>,
    ) -> Self {
        let metadata = ReportMetadata {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            generated_by: format!("appleloops {}", env!("CARGO_PKG_VERSION")),
            mandatory_packages: set.mandatory().len(),
            optional_packages: set.optional().len(),
            total_packages: set.all().len(),
            mandatory_size: set.mandatory_size(),
            optional_size: set.optional_size(),
            all_size: set.all_size(),
            total_required: set.total_required(),
            total_required_hr: set.total_required_hr(),
        };
        let sources = sources
            .iter()
            .map(|source| ReportSource {
                manifest: &source.catalog.manifest,
                origin: &source.origin,
                option_packs: source.option_packs(),
            })
            .collect();
        let packages = set
            .all()
            .iter()
            .map(|record| ReportPackage {
                record: record.as_ref(),
                download_size_hr: record.human_download_size(),
                installed_size_hr: record.human_installed_size(),
                real_download_size: real_sizes.get(record.download_name()).copied(),
            })
            .collect();

        Self {
            metadata,
            sources,
            packages,
        }
    }
}

/// Persist the report to the given path.
pub fn write_report(report: &ReconcileReport<'_>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            LoopsError::Filesystem(format!(
                "Failed to create report directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let file = File::create(path).map_err(|err| {
        LoopsError::Filesystem(format!(
            "Failed to create report file {}: {err}",
            path.display()
        ))
    })?;
    serde_json::to_writer_pretty(file, report).map_err(|err| {
        LoopsError::Serialization(format!("Failed to write report {}: {err}", path.display()))
    })?;
    Ok(())
}
