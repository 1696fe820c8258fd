//! `backup` command arguments and their merge into the loaded configuration

use crate::reporter::ConsoleLevel;
use anyhow::{Context, Result};
use clap::Args;
use ferrobackup_config::{AesMethod, Config, EncryptionConfig, EndpointConfig};
use ferrobackup_types::EqualityMethods;

/// Arguments of `ferrobackup backup`
#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    /// Source endpoint, `provider://path` or a local path
    pub source: String,
    /// Target endpoint, `provider://path` or a local path
    pub target: String,

    /// Source backend option
    #[arg(short = 's', long = "source-option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub source_options: Vec<(String, String)>,
    /// Target backend option
    #[arg(short = 't', long = "target-option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub target_options: Vec<(String, String)>,

    /// Read and write history versions
    #[arg(long)]
    pub keep_history: bool,
    /// Compare against the newest history version
    #[arg(long)]
    pub read_history: bool,
    /// Write updates as new history versions
    #[arg(long)]
    pub write_history: bool,
    /// Equality methods, e.g. `Length|LastWriteTime` or `ContentSha256`
    #[arg(long, value_name = "METHODS")]
    pub equality: Option<EqualityMethods>,

    /// Create directories missing from the target
    #[arg(long, value_name = "BOOL")]
    pub create_directories: Option<bool>,
    /// Delete target directories missing from the source
    #[arg(long, value_name = "BOOL")]
    pub delete_directories: Option<bool>,
    /// Create files missing from the target
    #[arg(long, value_name = "BOOL")]
    pub create_files: Option<bool>,
    /// Update target files that differ
    #[arg(long, value_name = "BOOL")]
    pub update_files: Option<bool>,
    /// Delete target files missing from the source
    #[arg(long, value_name = "BOOL")]
    pub delete_files: Option<bool>,

    /// Retries after a failed backend operation
    #[arg(long, value_name = "COUNT")]
    pub retry: Option<u32>,
    /// Delay between attempts
    #[arg(long, value_name = "MS")]
    pub retry_delay_ms: Option<u64>,
    /// Skip failed items instead of failing the backup
    #[arg(long)]
    pub ignore_errors: bool,
    /// Concurrent work items, `0` for unbounded or `auto` for one per CPU
    #[arg(long, value_name = "N", value_parser = parse_parallelism)]
    pub max_parallelism: Option<usize>,

    /// Encrypt the source with `aes128` or `aes256`
    #[arg(long, value_name = "METHOD")]
    pub source_aes_method: Option<AesMethod>,
    /// Source encryption password
    #[arg(long, value_name = "PASSWORD")]
    pub source_aes_password: Option<String>,
    /// Prompt for the source encryption password
    #[arg(long)]
    pub source_aes_ask_password: bool,
    /// Encrypt source file names
    #[arg(long, value_name = "BOOL")]
    pub source_aes_encrypt_file_names: Option<bool>,
    /// Encrypt source directory names
    #[arg(long, value_name = "BOOL")]
    pub source_aes_encrypt_directory_names: Option<bool>,

    /// Encrypt the target with `aes128` or `aes256`
    #[arg(long, value_name = "METHOD")]
    pub target_aes_method: Option<AesMethod>,
    /// Target encryption password
    #[arg(long, value_name = "PASSWORD")]
    pub target_aes_password: Option<String>,
    /// Prompt for the target encryption password
    #[arg(long)]
    pub target_aes_ask_password: bool,
    /// Encrypt target file names
    #[arg(long, value_name = "BOOL")]
    pub target_aes_encrypt_file_names: Option<bool>,
    /// Encrypt target directory names
    #[arg(long, value_name = "BOOL")]
    pub target_aes_encrypt_directory_names: Option<bool>,

    /// PBKDF2 iterations for both encrypted endpoints
    #[arg(long, value_name = "COUNT")]
    pub aes_iterations: Option<u32>,

    /// Printed notifications, e.g. `Error|FileCreating|FileCopyProgress`
    #[arg(long, value_name = "LEVELS")]
    pub console_level: Option<ConsoleLevel>,
}

/// Encryption flags of one side
struct AesArgs<'a> {
    method: Option<AesMethod>,
    password: Option<&'a str>,
    ask_password: bool,
    encrypt_file_names: Option<bool>,
    encrypt_directory_names: Option<bool>,
    iterations: Option<u32>,
}

impl AesArgs<'_> {
    fn is_requested(&self) -> bool {
        self.method.is_some() || self.password.is_some() || self.ask_password
    }
}

impl BackupArgs {
    /// Layer the command line over `config`
    ///
    /// `prompt` is asked for passwords of sides using `--*-aes-ask-password`.
    pub fn apply<P>(&self, config: &mut Config, mut prompt: P) -> Result<()>
    where
        P: FnMut(&str) -> Result<String>,
    {
        let backup = &mut config.backup;
        backup.keep_history |= self.keep_history;
        backup.read_history |= self.read_history;
        backup.write_history |= self.write_history;
        backup.continue_on_error |= self.ignore_errors;
        if let Some(equality) = self.equality {
            backup.equality_methods = equality;
        }
        let toggles = [
            (self.create_directories, &mut backup.can_create_directories),
            (self.delete_directories, &mut backup.can_delete_directories),
            (self.create_files, &mut backup.can_create_files),
            (self.update_files, &mut backup.can_update_files),
            (self.delete_files, &mut backup.can_delete_files),
        ];
        for (value, flag) in toggles {
            if let Some(value) = value {
                *flag = value;
            }
        }
        if let Some(retry) = self.retry {
            backup.retry_count = retry;
        }
        if let Some(delay) = self.retry_delay_ms {
            backup.retry_delay_ms = delay;
        }
        if let Some(parallelism) = self.max_parallelism {
            backup.max_parallelism = parallelism;
        }

        let source_aes = AesArgs {
            method: self.source_aes_method,
            password: self.source_aes_password.as_deref(),
            ask_password: self.source_aes_ask_password,
            encrypt_file_names: self.source_aes_encrypt_file_names,
            encrypt_directory_names: self.source_aes_encrypt_directory_names,
            iterations: self.aes_iterations,
        };
        config.source = Some(merge_endpoint(
            config.source.take(),
            &self.source,
            &self.source_options,
            &source_aes,
            || prompt("Source encryption password"),
        )?);

        let target_aes = AesArgs {
            method: self.target_aes_method,
            password: self.target_aes_password.as_deref(),
            ask_password: self.target_aes_ask_password,
            encrypt_file_names: self.target_aes_encrypt_file_names,
            encrypt_directory_names: self.target_aes_encrypt_directory_names,
            iterations: self.aes_iterations,
        };
        config.target = Some(merge_endpoint(
            config.target.take(),
            &self.target,
            &self.target_options,
            &target_aes,
            || prompt("Target encryption password"),
        )?);

        Ok(())
    }
}

/// Command-line location and options over the configured endpoint
fn merge_endpoint(
    existing: Option<EndpointConfig>,
    location: &str,
    options: &[(String, String)],
    aes: &AesArgs<'_>,
    prompt: impl FnOnce() -> Result<String>,
) -> Result<EndpointConfig> {
    let parsed = EndpointConfig::parse(location);
    let mut endpoint = existing.unwrap_or_default();
    endpoint.provider = parsed.provider;
    endpoint.path = parsed.path;
    endpoint.options.extend(options.iter().cloned());

    if aes.is_requested() && endpoint.encryption.is_none() {
        endpoint.encryption = Some(EncryptionConfig::default());
    }
    if let Some(encryption) = endpoint.encryption.as_mut() {
        if let Some(method) = aes.method {
            encryption.method = method;
        }
        if let Some(password) = aes.password {
            encryption.password = password.to_string();
        }
        if aes.ask_password {
            encryption.password = prompt()?;
        }
        if let Some(files) = aes.encrypt_file_names {
            encryption.encrypt_file_names = files;
        }
        if let Some(directories) = aes.encrypt_directory_names {
            encryption.encrypt_directory_names = directories;
        }
        if let Some(iterations) = aes.iterations {
            encryption.iterations = iterations;
        }
    }

    Ok(endpoint)
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", value))
}

fn parse_parallelism(value: &str) -> Result<usize, String> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(num_cpus::get());
    }
    value
        .parse()
        .map_err(|_| format!("expected a number or 'auto', got '{}'", value))
}

/// Ask for a password on the terminal
pub fn prompt_password(prompt: &str) -> Result<String> {
    dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .context("failed to read password")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn no_prompt(_: &str) -> Result<String> {
        anyhow::bail!("unexpected prompt")
    }

    fn args(source: &str, target: &str) -> BackupArgs {
        BackupArgs {
            source: source.to_string(),
            target: target.to_string(),
            ..BackupArgs::default()
        }
    }

    #[test]
    fn test_apply_overrides_backup_policy() {
        let mut config = Config::default();
        let args = BackupArgs {
            keep_history: true,
            delete_files: Some(true),
            create_directories: Some(false),
            retry: Some(0),
            ignore_errors: true,
            equality: Some(EqualityMethods::CONTENT_SHA256),
            max_parallelism: Some(4),
            ..args("photos", "memory://vault")
        };
        args.apply(&mut config, no_prompt).unwrap();

        let backup = &config.backup;
        assert!(backup.effective_read_history() && backup.effective_write_history());
        assert!(backup.can_delete_files && !backup.can_create_directories);
        assert!(backup.can_create_files);
        assert_eq!(backup.retry_count, 0);
        assert!(backup.continue_on_error);
        assert_eq!(backup.equality_methods, EqualityMethods::CONTENT_SHA256);
        assert_eq!(backup.max_parallelism, 4);

        let source = config.source.unwrap();
        assert_eq!((source.provider.as_str(), source.path.as_str()), ("file", "photos"));
        let target = config.target.unwrap();
        assert_eq!((target.provider.as_str(), target.path.as_str()), ("memory", "vault"));
        assert!(target.encryption.is_none());
    }

    #[test]
    fn test_endpoint_keeps_configured_options() {
        let mut config = Config::default();
        let mut configured = EndpointConfig::default();
        configured.options.insert("include_hidden".to_string(), "true".to_string());
        config.source = Some(configured);

        let args = BackupArgs {
            source_options: vec![("region".to_string(), "eu".to_string())],
            ..args("/data", "/backup")
        };
        args.apply(&mut config, no_prompt).unwrap();

        let source = config.source.unwrap();
        assert_eq!(source.path, "/data");
        assert_eq!(source.options.len(), 2);
    }

    #[test]
    fn test_encryption_from_flags_and_prompt() {
        let mut config = Config::default();
        let args = BackupArgs {
            target_aes_method: Some(AesMethod::Aes128),
            target_aes_ask_password: true,
            target_aes_encrypt_file_names: Some(false),
            aes_iterations: Some(2000),
            ..args("/data", "memory://vault")
        };
        let mut prompts = Vec::new();
        args.apply(&mut config, |message: &str| {
            prompts.push(message.to_string());
            Ok("typed".to_string())
        })
        .unwrap();

        assert_eq!(prompts, vec!["Target encryption password".to_string()]);
        assert!(config.source.unwrap().encryption.is_none());
        let encryption = config.target.unwrap().encryption.unwrap();
        assert_eq!(encryption.method, AesMethod::Aes128);
        assert_eq!(encryption.password, "typed");
        assert_eq!(encryption.iterations, 2000);
        assert!(!encryption.encrypt_file_names && encryption.encrypt_directory_names);
    }

    #[rstest]
    #[case("region=eu", Some(("region", "eu")))]
    #[case("token=a=b", Some(("token", "a=b")))]
    #[case("novalue", None)]
    #[case("=x", None)]
    fn test_parse_key_value(#[case] input: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = parse_key_value(input).ok();
        assert_eq!(
            parsed.as_ref().map(|(k, v)| (k.as_str(), v.as_str())),
            expected
        );
    }

    #[test]
    fn test_parse_parallelism() {
        assert_eq!(parse_parallelism("0").unwrap(), 0);
        assert_eq!(parse_parallelism("AUTO").unwrap(), num_cpus::get());
        assert!(parse_parallelism("many").is_err());
    }
}
