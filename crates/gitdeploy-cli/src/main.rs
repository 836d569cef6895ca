//! gitdeploy - revision-tracked release deployment
//!
//! Ships a git revision to a fleet of hosts as timestamped release
//! directories behind an atomically swapped `current` link.
//!
//! ## Commands
//!
//! - `check`: what is deployed where, and what is on deck
//! - `archive`: write the target revision to a local tarball
//! - `stage`: extract the tarball into a new release on every host
//! - `install`: point `current` at the newest staged release
//! - `cleanup`: remove the tarball and old releases
//! - `run`: all of the above, in order
//! - `clear-refs`: forget mirrored `refs/servers/*`

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gitdeploy_core::{
    DeployConfig, DeployError, ReleasePipeline, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE,
};
use gitdeploy_state::{GitRepository, SshExecutor};
use serde::Serialize;
use tracing::{debug, Level};

const EXIT_SUCCESS: u8 = 0;

/// Exit status when a command finished but some hosts failed.
const EXIT_PARTIAL_FAILURE: u8 = 4;

/// Exit status for failures that are not a `DeployError`.
const EXIT_OTHER: u8 = 3;

#[derive(Parser)]
#[command(name = "gitdeploy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Revision-tracked release deployment", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Print reports as JSON on stdout
    #[arg(long, global = true)]
    json_report: bool,

    /// Deploy config file
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Git working directory holding the application
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Target these hosts instead of the configured fleet (repeatable)
    #[arg(long = "host", global = true)]
    hosts: Vec<String>,

    /// Deploy this revision instead of HEAD
    #[arg(long, global = true)]
    revision: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Show deployed revisions and pending changes
    Check,

    /// Write the target revision to a local tarball
    Archive,

    /// Extract the tarball into a new release on every host
    Stage,

    /// Point `current` at the newest staged release on every host
    Install,

    /// Remove the local tarball and prune old releases
    Cleanup,

    /// Full deploy: archive, stage, install, cleanup
    Run,

    /// Delete every mirrored refs/servers/* ref
    ClearRefs,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Check => "check",
            Commands::Archive => "archive",
            Commands::Stage => "stage",
            Commands::Install => "install",
            Commands::Cleanup => "cleanup",
            Commands::Run => "run",
            Commands::ClearRefs => "clear-refs",
        }
    }

    /// Whether the command deploys or inspects a target revision.
    fn uses_target(&self) -> bool {
        matches!(
            self,
            Commands::Check | Commands::Archive | Commands::Stage | Commands::Run
        )
    }
}

/// Reject flags the selected command would silently ignore.
fn check_flags(cli: &Cli) -> Result<()> {
    if cli.revision.is_some() && !cli.command.uses_target() {
        anyhow::bail!(
            "--revision has no effect on `{}`; it only applies to check, archive, stage and run",
            cli.command.name()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    gitdeploy_core::init_tracing(cli.json, level);

    match dispatch(&cli).await {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

/// Exit status for a failed command.
fn exit_status(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<DeployError>()
        .and_then(|e| u8::try_from(e.exit_code()).ok())
        .unwrap_or(EXIT_OTHER)
}

fn load_config(path: &Path, hosts: &[String]) -> Result<DeployConfig> {
    let config = DeployConfig::load(path)?;
    if hosts.is_empty() {
        return Ok(config);
    }
    Ok(config.with_hosts(hosts.to_vec())?)
}

fn build_pipeline(cli: &Cli) -> Result<ReleasePipeline> {
    let config = load_config(&cli.config, &cli.hosts)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    debug!(app = %config.app, hosts = config.hosts.len(), "loaded deploy config");

    let remote = Arc::new(SshExecutor::new(config.ssh_settings()));
    Ok(ReleasePipeline::new(
        Arc::new(GitRepository::open(&cli.repo)),
        Arc::clone(&remote) as _,
        remote,
        config,
    ))
}

fn print_report<T: Serialize + Display>(report: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

fn finished(partial_failure: bool) -> u8 {
    if partial_failure {
        EXIT_PARTIAL_FAILURE
    } else {
        EXIT_SUCCESS
    }
}

/// Run the selected command and return the process exit status.
async fn dispatch(cli: &Cli) -> Result<u8> {
    check_flags(cli)?;
    let pipeline = build_pipeline(cli)?;
    let revision = cli.revision.as_deref();

    match cli.command {
        Commands::Check => {
            let mut ctx = pipeline.start(revision).await?;
            let report = pipeline.check(&mut ctx).await?;
            print_report(&report, cli.json_report)?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Archive => {
            let ctx = pipeline.start(revision).await?;
            let path = pipeline.archive(&ctx).await?;
            println!(
                "Archived {} to {}",
                ctx.target_revision().short(),
                path.display()
            );
            Ok(EXIT_SUCCESS)
        }
        Commands::Stage => {
            let ctx = pipeline.start(revision).await?;
            let report = pipeline.stage(&ctx).await?;
            print_report(&report, cli.json_report)?;
            Ok(finished(report.has_failures()))
        }
        Commands::Install => {
            let report = pipeline.install_latest().await;
            print_report(&report, cli.json_report)?;
            Ok(finished(report.has_failures()))
        }
        Commands::Cleanup => {
            let report = pipeline.cleanup().await?;
            print_report(&report, cli.json_report)?;
            Ok(finished(report.has_failures()))
        }
        Commands::Run => {
            let mut ctx = pipeline.start(revision).await?;
            let report = pipeline.run(&mut ctx).await?;
            print_report(&report, cli.json_report)?;
            Ok(finished(report.has_failures()))
        }
        Commands::ClearRefs => {
            let removed = pipeline.tracker().clear_deployed_refs().await?;
            println!("Removed {removed} server ref(s)");
            Ok(EXIT_SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdeploy_state::{RepoError, Revision};

    const CONFIG: &str = r#"
app = "shop"
root = "/opt"
user = "deploy"
group = "deploy"
hosts = ["web1", "web2"]
"#;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gitdeploy",
            "run",
            "--host",
            "web3",
            "--host",
            "web4",
            "--revision",
            "abcde",
            "--json-report",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Run);
        assert_eq!(cli.hosts, vec!["web3".to_string(), "web4".to_string()]);
        assert_eq!(cli.revision.as_deref(), Some("abcde"));
        assert!(cli.json_report);
    }

    #[test]
    fn clear_refs_is_kebab_case() {
        let cli = Cli::try_parse_from(["gitdeploy", "clear-refs"]).unwrap();
        assert_eq!(cli.command, Commands::ClearRefs);
    }

    #[test]
    fn revision_is_rejected_where_no_target_is_used() {
        for command in ["install", "cleanup", "clear-refs"] {
            let cli = Cli::try_parse_from(["gitdeploy", command, "--revision", "abcde"]).unwrap();
            let err = check_flags(&cli).unwrap_err();
            assert!(err.to_string().contains(command), "{err}");
            assert_eq!(exit_status(&err), EXIT_OTHER);
        }
        for command in ["check", "archive", "stage", "run"] {
            let cli = Cli::try_parse_from(["gitdeploy", command, "--revision", "abcde"]).unwrap();
            assert!(check_flags(&cli).is_ok());
        }
        let cli = Cli::try_parse_from(["gitdeploy", "install"]).unwrap();
        assert!(check_flags(&cli).is_ok());
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["gitdeploy", "deploy"]).is_err());
    }

    #[test]
    fn exit_status_follows_deploy_error() {
        let unknown = anyhow::Error::new(DeployError::UnknownRevision {
            id: "zzzzz".to_string(),
        });
        assert_eq!(exit_status(&unknown), 1);

        let diverged = anyhow::Error::new(DeployError::DivergedHistory {
            a: Revision::parse("a").unwrap(),
            b: Revision::parse("b").unwrap(),
        })
        .context("check failed");
        assert_eq!(exit_status(&diverged), 2);

        let repo = anyhow::Error::new(DeployError::from(RepoError::Parse("bad".to_string())));
        assert_eq!(exit_status(&repo), 3);

        assert_eq!(exit_status(&anyhow::anyhow!("disk full")), EXIT_OTHER);
    }

    #[test]
    fn host_flags_replace_configured_fleet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, CONFIG).unwrap();

        let config = load_config(&path, &[]).unwrap();
        assert_eq!(config.hosts, vec!["web1".to_string(), "web2".to_string()]);

        let config = load_config(&path, &["db1".to_string()]).unwrap();
        assert_eq!(config.hosts, vec!["db1".to_string()]);

        let err = load_config(&path, &["db1".to_string(), "db1".to_string()]).unwrap_err();
        assert_eq!(exit_status(&err), 3);
    }

    #[test]
    fn missing_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml"), &[]).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn partial_failure_exit_code() {
        assert_eq!(finished(false), 0);
        assert_eq!(finished(true), 4);
    }
}
