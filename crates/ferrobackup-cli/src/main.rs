//! FerroBackup - incremental backups between storage backends
//!
//! Mirrors a source tree into a target tree, optionally keeping history
//! versions and encrypting either side with AES.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use ferrobackup_aes::{AesOptions, AesProvider};
use ferrobackup_config::builder::validate;
use ferrobackup_config::{Config, ConfigLoader, EndpointConfig, LogFormat};
use ferrobackup_storage::ProviderRegistry;
use ferrobackup_sync::{BackupEngine, BackupOptions};
use ferrobackup_types::{CancellationToken, StorageProvider};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

mod args;
mod display;
mod reporter;

use args::{prompt_password, BackupArgs};
use display::{display_error, display_success, display_summary, display_warning};
use reporter::ConsoleReporter;

/// FerroBackup - incremental backups between storage backends
#[derive(Parser, Debug)]
#[command(
    name = "ferrobackup",
    version = env!("CARGO_PKG_VERSION"),
    about = "Incremental backups between storage backends",
    long_about = "FerroBackup mirrors a source tree into a target tree.\n\
                  It can keep timestamped history versions of updated files\n\
                  and transparently encrypt either side with AES."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synchronize a target with a source
    Backup(Box<BackupArgs>),
    /// Inspect or create the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the available storage providers
    Providers,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Destination file; format follows the extension
        #[arg(default_value = "ferrobackup.yaml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Cancelled) => ExitCode::from(2),
        Err(error) => {
            display_error(&format!("{:#}", error));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = load_config(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let json = cli.json_logs || config.logging.format == LogFormat::Json;
    init_logging(level, json)?;

    info!("FerroBackup v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Backup(args) => backup_command(&args, config).await,
        Commands::Config { action } => {
            config_command(action, &config)?;
            Ok(Outcome::Completed)
        }
        Commands::Providers => {
            providers_command();
            Ok(Outcome::Completed)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => ConfigLoader::load_default().context("failed to load configuration"),
    }
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|error| anyhow::anyhow!("failed to install logger: {}", error))
}

/// Build the backend of `endpoint`, decorated with AES when configured
fn open_endpoint(
    registry: &ProviderRegistry,
    endpoint: &EndpointConfig,
) -> Result<Arc<dyn StorageProvider>> {
    let provider = registry
        .create(&endpoint.provider_configuration())
        .with_context(|| format!("cannot open provider '{}'", endpoint.provider))?;

    let Some(encryption) = &endpoint.encryption else {
        return Ok(provider);
    };
    let options = AesOptions::from_config(encryption)?;
    info!(
        "Encrypting '{}' with {} ({} iterations)",
        endpoint.path, options.version, options.iterations
    );
    Ok(Arc::new(AesProvider::new(provider, options)))
}

async fn backup_command(args: &BackupArgs, mut config: Config) -> Result<Outcome> {
    args.apply(&mut config, prompt_password)?;
    validate(&config)?;

    let (Some(source), Some(target)) = (config.source.clone(), config.target.clone()) else {
        bail!("both a source and a target are required");
    };

    let options = BackupOptions::from_config(&config.backup)?;
    let registry = ProviderRegistry::with_defaults();
    let source_provider = open_endpoint(&registry, &source)?;
    let target_provider = open_endpoint(&registry, &target)?;

    let reporter = Arc::new(ConsoleReporter::new(args.console_level.unwrap_or_default()));
    let engine = BackupEngine::new(options).with_observer(reporter.clone());

    let ct = CancellationToken::new();
    let interrupt = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling backup");
            interrupt.cancel();
        }
    });

    println!(
        "{} Backing up {} to {}",
        style("→").green().bold(),
        style(&args.source).cyan(),
        style(&args.target).cyan()
    );

    let result = engine
        .run_providers(
            source_provider.as_ref(),
            &source.path,
            target_provider.as_ref(),
            &target.path,
            &ct,
        )
        .await;
    reporter.finish();

    match result {
        Ok(report) => {
            display_summary(&report);
            if report.summary.errors > 0 {
                display_warning(&format!(
                    "Backup completed with {} skipped item(s)",
                    report.summary.errors
                ));
            } else {
                display_success("Backup completed");
            }
            Ok(Outcome::Completed)
        }
        Err(error) if error.is_cancelled() => {
            display_warning("Backup cancelled");
            Ok(Outcome::Cancelled)
        }
        Err(error) => Err(error).context("backup failed"),
    }
}

fn config_command(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{} Effective configuration:", style("⚙").blue().bold());
            print!("{}", serde_yaml::to_string(config)?);
        }
        ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists, use --force to overwrite", path.display());
            }
            ConfigLoader::generate_default_config(&path)?;
            display_success(&format!("Wrote default configuration to {}", path.display()));
        }
    }
    Ok(())
}

fn providers_command() {
    println!("{}", style("Storage providers:").bold().underlined());
    for name in ProviderRegistry::with_defaults().names() {
        println!("  {}", style(name).cyan());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use ferrobackup_types::{EqualityMethods, StorageEntry};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backup_command() {
        let cli = Cli::try_parse_from([
            "ferrobackup",
            "backup",
            "/data",
            "memory://vault",
            "-t",
            "region=eu",
            "--equality",
            "Length|ContentMd5",
            "--delete-files",
            "true",
            "--target-aes-password",
            "secret",
            "--console-level",
            "Error|FileCopyProgress",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Backup(args) = cli.command else {
            panic!("expected the backup command");
        };
        assert_eq!(args.source, "/data");
        assert_eq!(args.target_options, vec![("region".to_string(), "eu".to_string())]);
        assert_eq!(
            args.equality,
            Some(EqualityMethods::LENGTH | EqualityMethods::CONTENT_MD5)
        );
        assert_eq!(args.delete_files, Some(true));
        assert_eq!(args.target_aes_password.as_deref(), Some("secret"));
        assert!(args.console_level.is_some());
    }

    #[test]
    fn test_rejects_bad_values() {
        for bad in [
            vec!["ferrobackup", "backup", "a", "b", "--equality", "Fuzzy"],
            vec!["ferrobackup", "backup", "a", "b", "--target-aes-method", "des"],
            vec!["ferrobackup", "backup", "a", "b", "--delete-files", "maybe"],
            vec!["ferrobackup", "backup", "a"],
        ] {
            assert!(Cli::try_parse_from(bad).is_err());
        }
    }

    #[tokio::test]
    async fn test_open_endpoint_wraps_encrypted_sides() {
        let registry = ProviderRegistry::with_defaults();
        let mut endpoint = EndpointConfig::parse("memory://vault");
        assert!(open_endpoint(&registry, &endpoint).is_ok());

        endpoint.encryption = Some(ferrobackup_config::EncryptionConfig {
            password: "pw".to_string(),
            iterations: 1,
            ..Default::default()
        });
        let provider = open_endpoint(&registry, &endpoint).unwrap();
        let root = provider
            .get_or_create_root(&endpoint.path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(root.name(), "vault");

        let unknown = EndpointConfig::parse("ftp://host");
        assert!(open_endpoint(&registry, &unknown).is_err());
    }

    #[test]
    fn test_config_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferrobackup.toml");
        let config = Config::default();

        config_command(ConfigAction::Init { path: path.clone(), force: false }, &config).unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_ok());
        assert!(config_command(ConfigAction::Init { path: path.clone(), force: false }, &config).is_err());
        assert!(config_command(ConfigAction::Init { path, force: true }, &config).is_ok());
    }
}
