/*============================================================
  Project: appleloops
  Module: appleloops::deploy
  ------------------------------------------------------------
  Purpose:
    Drive downloads and optional installs of the reconciled
    package list, strictly one package at a time.

  Security / Safety Notes:
    Installs run only in deployment modes; dry runs print the
    actions without touching the network or the filesystem.
    Destination tidy-up removes only the download destination.

  Dependencies:
    content for transfers, pkgutil for installs.

  Operational Scope:
    Final stage of a run, after the pre-flight space check.

  Revision History:
    2026-10-18 CW  Authored sequential deployment driver.
  ------------------------------------------------------------
  Principles Observed:
    - Mirror and cache first, canonical URL last
    - Per-package failures are counted, not fatal
    - Every action logged with its progress counter
============================================================*/

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::content::ContentClient;
use crate::error::{LoopsError, Result};
use crate::logger::Logger;
use crate::package::PackageRecord;
use crate::pkgutil;
use crate::reconcile::ReconciledPackageSet;

/// How much the driver prints to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Normal,
    /// Progress lines only.
    Quiet,
    Silent,
}

impl Verbosity {
    fn progress(self) -> bool {
        self != Verbosity::Silent
    }

    fn detail(self) -> bool {
        self == Verbosity::Normal
    }
}

/// Tally of a deployment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOutcome {
    pub downloaded: usize,
    pub installed: usize,
    pub failures: Vec<String>,
}

/// `NN of MM`, zero-padded to the width of the total.
pub fn counter(index: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("{index:0width$} of {total}")
}

pub struct Deployer<'a> {
    client: &'a ContentClient,
    config: &'a RunConfig,
    logger: &'a Logger,
    verbosity: Verbosity,
}

impl<'a> Deployer<'a> {
    pub fn new(
        client: &'a ContentClient,
        config: &'a RunConfig,
        logger: &'a Logger,
        verbosity: Verbosity,
    ) -> Self {
        Self {
            client,
            config,
            logger,
            verbosity,
        }
    }

    fn say(&self, message: &str) {
        if self.verbosity.progress() {
            println!("{message}");
        }
    }

    /// Process every package in order.
    pub async fn run(&self, set: &ReconciledPackageSet) -> Result<DeployOutcome> {
        let mut outcome = DeployOutcome::default();
        let total = set.all().len();

        for (position, record) in set.all().iter().enumerate() {
            let progress = counter(position + 1, total);
            if let Err(err) = self.process(record, &progress, &mut outcome).await {
                self.logger
                    .error("DEPLOY", format!("{}: {err}", record.download_name()));
                if self.verbosity.progress() {
                    eprintln!("{}: {err}", record.download_name());
                }
                outcome.failures.push(record.download_name().to_string());
            }
        }

        if self.config.is_deploying() {
            self.tidy_up()?;
        }

        self.logger.info(
            "DEPLOY",
            format!(
                "Downloaded {}, installed {}, failed {}",
                outcome.downloaded,
                outcome.installed,
                outcome.failures.len()
            ),
        );
        Ok(outcome)
    }

    async fn process(
        &self,
        record: &Arc<PackageRecord>,
        progress: &str,
        outcome: &mut DeployOutcome,
    ) -> Result<()> {
        let url = self.select_url(record).await;
        self.logger.debug(
            "DEPLOY",
            format!(
                "{progress}: {} ({}) -> {}",
                record.name(),
                record.package_id(),
                record.download_path().display()
            ),
        );
        let verb = if self.config.force_download {
            "Re-downloading"
        } else {
            "Downloading"
        };

        if self.config.dry_run {
            let message = format!("Download {progress} - {url}");
            self.say(&message);
            self.logger.info("DRYRUN", message);
        } else {
            if self.config.force_download && record.download_path().exists() {
                self.logger.debug(
                    "DEPLOY",
                    format!("Forced download - removing {}", record.download_path().display()),
                );
                remove_file(record.download_path())?;
            }
            let message = format!("{verb} {progress} - {url}");
            self.say(&message);
            self.logger.info("DOWNLOAD", message);
            self.download(record, url).await?;
            outcome.downloaded += 1;
        }

        if self.config.is_deploying() && self.install(record).await? {
            outcome.installed += 1;
        }
        Ok(())
    }

    /// Preferred URL when it answers, otherwise the canonical URL.
    async fn select_url<'r>(&self, record: &'r PackageRecord) -> &'r str {
        let urls = record.urls();
        let canonical = urls.canonical.as_str();
        if self.config.dry_run {
            return urls.preferred();
        }
        for candidate in urls.candidates() {
            if candidate == canonical {
                break;
            }
            if self.client.is_available(candidate).await {
                return candidate;
            }
            self.logger
                .debug("DEPLOY", format!("Fell back {candidate} to {canonical}"));
        }
        canonical
    }

    async fn download(&self, record: &PackageRecord, url: &str) -> Result<()> {
        let canonical = record.urls().canonical.as_str();
        match self.client.download(url, record.download_path()).await {
            Ok(bytes) => {
                self.logger.debug(
                    "DOWNLOAD",
                    format!("{}: {bytes} bytes written", record.download_name()),
                );
                Ok(())
            }
            Err(err) if url != canonical => {
                self.logger
                    .warn("DOWNLOAD", format!("{url} failed ({err}); trying {canonical}"));
                self.client
                    .download(canonical, record.download_path())
                    .await
                    .map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Install one package; returns whether `installer` ran and succeeded.
    async fn install(&self, record: &PackageRecord) -> Result<bool> {
        let package = record.download_path();
        let target = self.config.install_target.as_path();

        if self.config.dry_run {
            let command = pkgutil::install_command_line(package, target, self.config.allow_untrusted);
            self.say(&command);
            self.logger.info("DRYRUN", command);
            return Ok(false);
        }

        if !package.exists() {
            let message = format!("File not found: {}", package.display());
            self.say(&message);
            return Err(LoopsError::Filesystem(message));
        }

        self.say(&format!("Installing {}", record.download_name()));
        match pkgutil::install(package, target, self.config.allow_untrusted).await {
            Ok(()) => {
                self.logger
                    .info("INSTALL", format!("Installed {}", record.download_name()));
                if self.verbosity.detail() {
                    println!("  Installed {}", record.download_name());
                }
                remove_file(package)?;
                Ok(true)
            }
            Err(err) => {
                if self.verbosity.detail() {
                    println!(
                        "  Error installing {}. '/var/log/install.log' may include additional information.",
                        record.download_name()
                    );
                }
                Err(err)
            }
        }
    }

    fn tidy_up(&self) -> Result<()> {
        let destination = &self.config.destination;
        if self.config.dry_run || !destination.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(destination).map_err(|err| {
            LoopsError::Filesystem(format!(
                "Failed to remove {}: {err}",
                destination.display()
            ))
        })?;
        self.logger
            .debug("DEPLOY", format!("Removed {}", destination.display()));
        Ok(())
    }
}

fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LoopsError::Filesystem(format!(
            "Failed to remove {}: {err}",
            path.display()
        ))),
    }
}

/// `Content-Length` of each package's preferred URL, keyed by download name.
///
/// Packages whose length cannot be determined are left out.
pub async fn probe_real_sizes(
    client: &ContentClient,
    set: &ReconciledPackageSet,
    logger: &Logger,
) -> HashMap<String, u64> {
    let mut sizes = HashMap::new();
    for record in set.all() {
        let url = record.urls().preferred();
        match client.content_length(url).await {
            Some(length) => {
                if length != record.download_size() {
                    logger.debug(
                        "SIZE",
                        format!(
                            "{}: manifest {} bytes, server {length} bytes",
                            record.download_name(),
                            record.download_size()
                        ),
                    );
                }
                sizes.insert(record.download_name().to_string(), length);
            }
            None => logger.debug("SIZE", format!("{url}: no Content-Length")),
        }
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::{document, package_entry, run_config};
    use crate::package::ReceiptIndex;
    use crate::reconcile::PackageSelection;
    use crate::source::{ManifestSource, SourceOrigin};

    #[test]
    fn counter_is_zero_padded_to_total_width() {
        assert_eq!(counter(1, 9), "1 of 9");
        assert_eq!(counter(3, 12), "03 of 12");
        assert_eq!(counter(7, 120), "007 of 120");
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = run_config();
        config.destination = dir.path().join("loops");
        config.dry_run = true;
        config.mode = crate::config::DeployMode::ForceDeploy;

        let catalog = document(
            "mainstage350.plist",
            &[
                ("A", package_entry("a.pkg", true, 10)),
                ("B", package_entry("b.pkg", false, 10)),
            ],
        )
        .into_catalog(&config, &Logger::disabled())
        .unwrap();
        let sources = vec![ManifestSource {
            origin: SourceOrigin::Remote {
                manifest: "mainstage350.plist".into(),
            },
            catalog,
        }];
        let set = ReconciledPackageSet::build(
            &sources,
            PackageSelection {
                mandatory: true,
                optional: true,
            },
            &ReceiptIndex::for_config(&config),
        );

        let client = ContentClient::new(&Default::default(), &config.content).unwrap();
        let logger = Logger::disabled();
        let outcome = Deployer::new(&client, &config, &logger, Verbosity::Silent)
            .run(&set)
            .await
            .unwrap();

        assert_eq!(outcome, DeployOutcome::default());
        assert!(!config.destination.exists());
    }

    #[test]
    fn missing_files_are_not_an_error_to_remove() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_file(&dir.path().join("absent.pkg")).is_ok());
    }
}
