/*============================================================
  Project: appleloops
  Module: appleloops::main
  ------------------------------------------------------------
  Purpose:
    Entry point for appleloops. Resolves the loop packages that
    installed applications or named manifests require, reconciles
    them against installed state, and downloads or deploys what
    is missing.

  Security / Safety Notes:
    Installs require root unless running a dry run. Performs
    HTTPS GET/HEAD requests and executes pkgutil/installer only.

  Dependencies:
    clap for CLI parsing, tokio runtime for I/O boundaries.

  Operational Scope:
    Invoked by operators or management tooling, interactively or
    from deployment scripts.

  Revision History:
    2026-10-18 CW  Authored appleloops runtime.
  ------------------------------------------------------------
  Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging from "Log opened" to "Log closed"
    - Nothing to do is success, not failure
============================================================*/

mod compare;
mod config;
mod content;
mod deploy;
mod error;
mod logger;
mod manifest;
mod option_packs;
mod package;
mod patches;
mod pkgutil;
mod reconcile;
mod size;
mod source;
mod supported;
mod version;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use reqwest::Url;

use config::{DeployMode, LoopsConfig, RunConfig};
use content::ContentClient;
use deploy::{Deployer, Verbosity};
use error::{LoopsError, Result};
use logger::{Echo, Logger};
use package::ReceiptIndex;
use reconcile::{write_report, PackageSelection, ReconcileReport, ReconciledPackageSet};
use size::bytes2hr;
use source::{resolve_sources, SourceRequest};

const APP_CHOICES: [&str; 4] = ["garageband", "logicpro", "mainstage", "all"];

/// Command-line arguments for appleloops.
#[derive(Debug, Parser)]
#[command(
    name = "appleloops",
    version,
    about = "Download and deploy audio content for GarageBand, Logic Pro X and MainStage 3"
)]
struct Cli {
    /// Process the named applications (installed copies only).
    #[arg(
        short = 'a',
        long = "apps",
        value_name = "APP",
        num_args = 1..,
        value_parser = APP_CHOICES,
        conflicts_with = "plists"
    )]
    apps: Vec<String>,
    /// Process the named manifests, or `all` for the latest of each application.
    #[arg(short = 'p', long = "plists", value_name = "PLIST", num_args = 1..)]
    plists: Vec<String>,
    /// Include mandatory packages.
    #[arg(short = 'm', long, action = ArgAction::SetTrue)]
    mandatory: bool,
    /// Include optional packages.
    #[arg(short = 'o', long, action = ArgAction::SetTrue)]
    optional: bool,
    /// Download packages into this directory.
    #[arg(short = 'd', long = "destination", value_name = "PATH", conflicts_with = "force_destination")]
    destination: Option<PathBuf>,
    /// Download packages into this directory, replacing existing files.
    #[arg(short = 'f', long = "force-destination", value_name = "PATH")]
    force_destination: Option<PathBuf>,
    /// Install packages that are not already installed.
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "force_deploy")]
    deploy: bool,
    /// Install every package regardless of installed state.
    #[arg(long, action = ArgAction::SetTrue)]
    force_deploy: bool,
    /// Caching server URL, e.g. http://cache.example.org:49672.
    #[arg(long, value_name = "URL")]
    cache_server: Option<String>,
    /// Local mirror URL, e.g. https://example.org/appleloops.
    #[arg(long, value_name = "URL")]
    pkg_server: Option<String>,
    /// Print actions without downloading or installing.
    #[arg(short = 'n', long, action = ArgAction::SetTrue)]
    dry_run: bool,
    /// Volume packages are installed to.
    #[arg(long, value_name = "PATH", default_value = "/")]
    install_target: PathBuf,
    /// Allow installing untrusted packages.
    #[arg(long, action = ArgAction::SetTrue)]
    unsecure: bool,
    /// Accept invalid TLS certificates.
    #[arg(long, action = ArgAction::SetTrue)]
    insecure: bool,
    /// Verify each package's size against the server (slow).
    #[arg(long, action = ArgAction::SetTrue)]
    real_size: bool,
    /// Compare the packages of two manifests and exit.
    #[arg(long, num_args = 2, value_names = ["A", "B"])]
    compare: Option<Vec<String>>,
    /// List supported manifests and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    show_plists: bool,
    /// Override configuration file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,
    /// Write the reconciled package set as JSON.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Echo every log entry to stderr.
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
    /// Print progress only.
    #[arg(short = 'q', long, action = ArgAction::SetTrue)]
    quiet: bool,
    /// Print nothing.
    #[arg(short = 's', long, action = ArgAction::SetTrue)]
    silent: bool,
}

impl Cli {
    fn downloads(&self) -> bool {
        self.destination.is_some() || self.force_destination.is_some()
    }

    fn deploying(&self) -> bool {
        self.deploy || self.force_deploy
    }

    fn mode(&self) -> DeployMode {
        if self.force_deploy {
            DeployMode::ForceDeploy
        } else if self.deploy {
            DeployMode::Deploy
        } else {
            DeployMode::Download
        }
    }

    fn selects(&self) -> bool {
        self.mandatory || self.optional
    }

    fn echo(&self) -> Echo {
        if self.silent {
            Echo::Silent
        } else if self.verbose {
            Echo::Verbose
        } else {
            Echo::Default
        }
    }

    fn verbosity(&self) -> Verbosity {
        if self.silent {
            Verbosity::Silent
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    fn request(&self) -> SourceRequest {
        if !self.plists.is_empty() {
            SourceRequest::Manifests(self.plists.clone())
        } else if !self.apps.is_empty() {
            SourceRequest::Applications(self.apps.clone())
        } else {
            SourceRequest::Discover
        }
    }
}

/// Checks clap cannot express.
fn validate(cli: &Cli, is_root: bool) -> Result<()> {
    for plist in &cli.plists {
        if plist != "all" && supported::supported_manifest(plist).is_none() {
            return Err(LoopsError::Config(format!(
                "-p/--plists: unsupported manifest {plist}; see --show-plists"
            )));
        }
    }

    if !cli.plists.is_empty() {
        if !cli.selects() {
            return Err(LoopsError::Config(
                "-p/--plists: must provide at least -m/--mandatory or -o/--optional or both".into(),
            ));
        }
        if cli.deploying() {
            return Err(LoopsError::Config(
                "-p/--plists: not allowed with argument --deploy/--force-deploy".into(),
            ));
        }
        if !cli.downloads() {
            return Err(LoopsError::Config(
                "-p/--plists: not allowed without argument -d/--destination or -f/--force-destination"
                    .into(),
            ));
        }
    }

    if cli.deploying() && !cli.dry_run && !is_root {
        let flag = if cli.force_deploy { "--force-deploy" } else { "--deploy" };
        return Err(LoopsError::Config(format!(
            "{flag}: you must be root to install packages"
        )));
    }

    if (cli.downloads() || cli.deploying()) && !cli.selects() {
        return Err(LoopsError::Config(
            "must provide at least -m/--mandatory or -o/--optional or both".into(),
        ));
    }

    if let Some(server) = &cli.cache_server {
        let valid = Url::parse(server)
            .map(|url| matches!(url.scheme(), "http" | "https") && url.port().is_some())
            .unwrap_or(false);
        if !valid {
            return Err(LoopsError::Config(
                "--cache-server: cache server url format expected is https://example.org:1234".into(),
            ));
        }
    }

    if let Some(server) = &cli.pkg_server {
        let valid = Url::parse(server)
            .map(|url| {
                matches!(url.scheme(), "http" | "https") && !url.path().trim_matches('/').is_empty()
            })
            .unwrap_or(false);
        if !valid {
            return Err(LoopsError::Config(
                "--pkg-server: mirror server url format expected is https://example.org/<path>".into(),
            ));
        }
        if server.ends_with(".dmg") {
            return Err(LoopsError::Config(
                "--pkg-server: disk image mirrors are not supported".into(),
            ));
        }
    }

    Ok(())
}

fn build_run_config(cli: &Cli, file: &LoopsConfig) -> RunConfig {
    let mut run = RunConfig::new(file);
    run.mode = cli.mode();
    run.dry_run = cli.dry_run;
    run.install_target = cli.install_target.clone();
    run.allow_untrusted = cli.unsecure;
    run.real_download_size = cli.real_size;
    run.caching_server = cli
        .cache_server
        .as_ref()
        .map(|server| server.trim_end_matches('/').to_string());
    run.local_mirror = cli
        .pkg_server
        .as_ref()
        .map(|server| server.trim_end_matches('/').to_string());

    // Report-only runs cover both classifications unless narrowed.
    if cli.selects() || cli.downloads() || cli.deploying() {
        run.mandatory = cli.mandatory;
        run.optional = cli.optional;
    } else {
        run.mandatory = true;
        run.optional = true;
    }

    if !cli.deploying() {
        if let Some(path) = &cli.force_destination {
            run.force_download = true;
            run.destination = path.clone();
        } else if let Some(path) = &cli.destination {
            run.destination = path.clone();
        }
    }
    run
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[appleloops] {}", err);
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    execute(Cli::parse(), None).await
}

/// Run parsed arguments. `applications_dir` overrides the configured
/// location that discovery scans.
async fn execute(cli: Cli, applications_dir: Option<PathBuf>) -> Result<ExitCode> {
    if cli.show_plists {
        supported::show_supported();
        return Ok(ExitCode::SUCCESS);
    }

    validate(&cli, pkgutil::is_root())?;

    let mut file_config = LoopsConfig::load_from_optional_path(cli.config.as_deref())?;
    if cli.insecure {
        file_config.http.allow_insecure = true;
    }

    let log_path = cli.log.clone().unwrap_or_else(|| file_config.log_path());
    let logger = Logger::new(Some(log_path), cli.echo())?;
    logger.info("INIT", "Log opened");

    let client = ContentClient::new(&file_config.http, &file_config.content)?;

    if let Some(pair) = &cli.compare {
        let comparison = compare::compare_manifests(&pair[0], &pair[1], &client, &logger).await?;
        for line in comparison.summary() {
            logger.info("COMPARE", &line);
            if !cli.silent {
                println!("{line}");
            }
        }
        logger.finalize()?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = build_run_config(&cli, &file_config);
    if let Some(dir) = applications_dir {
        config.applications_dir = dir;
    }
    logger.debug(
        "CONFIG",
        format!(
            "mode={:?} mandatory={} optional={} dry_run={} destination={} target={}",
            config.mode,
            config.mandatory,
            config.optional,
            config.dry_run,
            config.destination.display(),
            config.install_target.display()
        ),
    );

    if cli.verbosity() == Verbosity::Normal {
        println!("Analysing...");
    }

    let sources = resolve_sources(&cli.request(), &client, &config, &logger).await?;
    logger.info("SOURCE", format!("Resolved {} sources", sources.len()));
    for source in &sources {
        logger.debug(
            "SOURCE",
            format!(
                "{}: {} packages, {} option packs",
                source.label(),
                source.catalog.records.len(),
                source.option_packs().len()
            ),
        );
    }

    let mut receipts = ReceiptIndex::for_config(&config);
    if config.checks_receipts() {
        pkgutil::gather_receipts(
            sources.iter().flat_map(|source| source.records()),
            &mut receipts,
            &logger,
        )
        .await?;
        logger.info("RECEIPT", format!("Found {} installed receipts", receipts.len()));
        let upgradable = sources
            .iter()
            .flat_map(|source| source.records())
            .filter(|record| receipts.needs_upgrade(record))
            .count();
        if upgradable > 0 {
            logger.info(
                "RECEIPT",
                format!("{upgradable} installed packages are older than their manifest version"),
            );
        }
    }

    let selection = PackageSelection {
        mandatory: config.mandatory,
        optional: config.optional,
    };
    let set = ReconciledPackageSet::build(&sources, selection, &receipts);
    for line in set.stats_message().lines() {
        logger.info("RECONCILE", line);
    }
    if !cli.silent {
        println!("{}\n", set.stats_message());
    }

    let real_sizes = if config.real_download_size {
        deploy::probe_real_sizes(&client, &set, &logger).await
    } else {
        HashMap::new()
    };
    if let Some(path) = &cli.report {
        write_report(&ReconcileReport::new(&set, &sources, &real_sizes), path)?;
        logger.info("REPORT", format!("Report written to {}", path.display()));
    }

    if set.is_empty() {
        logger.info("RECONCILE", "Nothing to process");
        if !cli.silent {
            println!("Nothing to process. Exiting.");
        }
        logger.finalize()?;
        return Ok(ExitCode::SUCCESS);
    }

    if !(cli.downloads() || cli.deploying()) {
        logger.finalize()?;
        return Ok(ExitCode::SUCCESS);
    }

    if !config.dry_run {
        let (volume, required) = if config.is_deploying() {
            (&config.install_target, set.total_required())
        } else {
            (&config.destination, set.all_size().download)
        };
        if let Err(err) = pkgutil::ensure_space(volume, required, &logger) {
            logger.error(
                "DISK",
                format!(
                    "Insufficient space. {} download total and {} install total.",
                    bytes2hr(set.all_size().download),
                    bytes2hr(set.all_size().installed)
                ),
            );
            logger.finalize()?;
            return Err(err);
        }
    }

    let outcome = Deployer::new(&client, &config, &logger, cli.verbosity())
        .run(&set)
        .await?;

    if !outcome.failures.is_empty() {
        logger.finalize()?;
        return Err(LoopsError::Runtime(format!(
            "{} of {} packages failed: {}",
            outcome.failures.len(),
            set.all().len(),
            outcome.failures.join(", ")
        )));
    }

    logger.info("COMPLETE", "All packages processed");
    logger.finalize()?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["appleloops"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn plists_require_a_selection_and_destination() {
        let cli = parse(&["-p", "garageband1021"]);
        assert!(validate(&cli, false).is_err());

        let cli = parse(&["-p", "garageband1021", "-m"]);
        assert!(validate(&cli, false).is_err());

        let cli = parse(&["-p", "garageband1021", "-m", "-d", "/tmp/loops"]);
        assert!(validate(&cli, false).is_ok());
    }

    #[test]
    fn plists_cannot_deploy() {
        let cli = parse(&["-p", "all", "-m", "-d", "/tmp/loops", "--deploy"]);
        assert!(validate(&cli, true).is_err());
    }

    #[test]
    fn unsupported_plist_is_rejected() {
        let cli = parse(&["-p", "garageband0001", "-m", "-d", "/tmp/loops"]);
        assert!(matches!(validate(&cli, false), Err(LoopsError::Config(_))));
    }

    #[test]
    fn apps_and_plists_conflict() {
        let argv = ["appleloops", "-a", "garageband", "-p", "all"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn deployment_requires_root_unless_dry_run() {
        let cli = parse(&["-a", "all", "-m", "--deploy"]);
        assert!(validate(&cli, false).is_err());
        assert!(validate(&cli, true).is_ok());

        let cli = parse(&["-a", "all", "-m", "--deploy", "-n"]);
        assert!(validate(&cli, false).is_ok());
    }

    #[test]
    fn downloads_require_a_selection() {
        let cli = parse(&["-a", "logicpro", "-d", "/tmp/loops"]);
        assert!(validate(&cli, false).is_err());
    }

    #[test]
    fn server_urls_are_checked() {
        let cli = parse(&["--cache-server", "http://cache.example.org"]);
        assert!(validate(&cli, false).is_err());
        let cli = parse(&["--cache-server", "http://cache.example.org:49672"]);
        assert!(validate(&cli, false).is_ok());

        let cli = parse(&["--pkg-server", "https://example.org"]);
        assert!(validate(&cli, false).is_err());
        let cli = parse(&["--pkg-server", "https://example.org/appleloops.dmg"]);
        assert!(validate(&cli, false).is_err());
        let cli = parse(&["--pkg-server", "https://example.org/appleloops"]);
        assert!(validate(&cli, false).is_ok());
    }

    #[test]
    fn run_config_reflects_flags() {
        let cli = parse(&[
            "-a",
            "garageband",
            "-m",
            "-f",
            "/tmp/loops",
            "--cache-server",
            "http://cache.example.org:49672/",
            "--unsecure",
        ]);
        let run = build_run_config(&cli, &LoopsConfig::default());
        assert_eq!(run.mode, DeployMode::Download);
        assert!(run.mandatory && !run.optional);
        assert!(run.force_download);
        assert_eq!(run.destination, PathBuf::from("/tmp/loops"));
        assert_eq!(run.caching_server.as_deref(), Some("http://cache.example.org:49672"));
        assert!(run.allow_untrusted);
        assert_eq!(cli.request(), SourceRequest::Applications(vec!["garageband".into()]));
    }

    #[test]
    fn deployment_uses_default_destination() {
        let cli = parse(&["-m", "--force-deploy", "-d", "/Users/shared/loops"]);
        let run = build_run_config(&cli, &LoopsConfig::default());
        assert_eq!(run.mode, DeployMode::ForceDeploy);
        assert_eq!(run.destination, PathBuf::from("/tmp/appleloops"));
        assert_eq!(cli.request(), SourceRequest::Discover);
    }

    #[tokio::test]
    async fn no_applications_and_no_manifests_exit_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let applications = dir.path().join("Applications");
        std::fs::create_dir_all(&applications).unwrap();
        let config_path = dir.path().join("appleloops.toml");
        std::fs::write(&config_path, "").unwrap();
        let log_path = dir.path().join("appleloops.log");

        let cli = parse(&[
            "-s",
            "--config",
            config_path.to_str().unwrap(),
            "--log",
            log_path.to_str().unwrap(),
        ]);
        let code = execute(cli, Some(applications)).await.unwrap();

        assert_eq!(code, ExitCode::SUCCESS);
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("[RECONCILE] Nothing to process"));
        assert!(log.contains("Log closed"));
        assert!(dir.path().join("appleloops.log.hash").is_file());
    }

    #[test]
    fn report_only_runs_select_everything() {
        let cli = parse(&[]);
        let run = build_run_config(&cli, &LoopsConfig::default());
        assert!(run.mandatory && run.optional);
        assert!(validate(&cli, false).is_ok());
    }
}
