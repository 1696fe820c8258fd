//! Configuration builder layering defaults, files and environment variables

use crate::{Config, ConfigError, ConfigResult, EndpointConfig};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Configuration builder for loading configuration from multiple sources
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
    env_separator: String,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Defaults,
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
            env_separator: "__".to_string(),
        }
    }

    /// Add default configuration values
    pub fn add_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    /// Add a configuration file source, format chosen by extension
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Set environment variable separator (default: "__")
    pub fn env_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.env_separator = separator.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> ConfigResult<Config> {
        let defaults_value = serde_yaml::to_value(Config::default())
            .map_err(ConfigError::format)?;
        self.inner = self
            .inner
            .add_source(config::Config::try_from(&defaults_value)?);

        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix)
                            .separator(&self.env_separator)
                            .try_parsing(true),
                    );
                }
                ConfigSource::Defaults => {}
            }
        }

        let config = self.inner.build()?;
        let result: Config = config.try_deserialize()?;

        validate(&result)?;

        Ok(result)
    }

    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a loaded or hand-built configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    config.backup.retry_config()?;
    config.backup.parallelism()?;

    if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.level",
            "must be one of: trace, debug, info, warn, error",
        ));
    }

    for (side, endpoint) in [("source", &config.source), ("target", &config.target)] {
        if let Some(endpoint) = endpoint {
            validate_endpoint(side, endpoint)?;
        }
    }

    Ok(())
}

fn validate_endpoint(side: &str, endpoint: &EndpointConfig) -> ConfigResult<()> {
    if endpoint.provider.trim().is_empty() {
        return Err(ConfigError::endpoint(side, "provider", "must name a provider"));
    }
    if endpoint.path.trim().is_empty() {
        return Err(ConfigError::endpoint(side, "path", "must not be empty"));
    }
    if let Some(encryption) = &endpoint.encryption {
        if encryption.password.is_empty() {
            return Err(ConfigError::endpoint(side, "encryption.password", "must not be empty"));
        }
        if encryption.iterations == 0 {
            return Err(ConfigError::endpoint(side, "encryption.iterations", "must be greater than 0"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AesMethod;
    use ferrobackup_types::EqualityMethods;
    use std::io::Write;
    use tempfile::Builder;

    fn temp_config(extension: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(extension).tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().add_defaults().build().unwrap();
        assert_eq!(config.backup.equality_methods, EqualityMethods::DEFAULT);
        assert_eq!(config.logging.level, "info");
        assert!(config.source.is_none());
    }

    #[test]
    fn test_builder_yaml_file() {
        let file = temp_config(
            ".yaml",
            r#"
backup:
  retry_count: 5
  can_delete_files: true
  equality_methods: "Length|Content"
target:
  provider: memory
  path: vault
  encryption:
    method: aes128
    password: secret
"#,
        );

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap();

        assert_eq!(config.backup.retry_count, 5);
        assert!(config.backup.can_delete_files);
        assert!(config.backup.can_create_files);
        assert_eq!(
            config.backup.equality_methods,
            EqualityMethods::LENGTH | EqualityMethods::CONTENT
        );
        let target = config.target.unwrap();
        assert_eq!(target.provider, "memory");
        let encryption = target.encryption.unwrap();
        assert_eq!(encryption.method, AesMethod::Aes128);
        assert_eq!(encryption.iterations, 10_000);
    }

    #[test]
    fn test_builder_toml_file() {
        let file = temp_config(
            ".toml",
            r#"
[backup]
max_parallelism = 4
keep_history = true

[logging]
level = "debug"
format = "json"
"#,
        );

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap();

        assert_eq!(config.backup.max_parallelism, 4);
        assert!(config.backup.effective_write_history());
        assert_eq!(config.logging.format, crate::LogFormat::Json);
    }

    #[test]
    fn test_builder_validation() {
        let file = temp_config(
            ".yaml",
            r#"
target:
  path: vault
  encryption:
    password: ""
"#,
        );

        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("'encryption.password' must not be empty"));
    }

    #[test]
    fn test_builder_rejects_unknown_equality_method() {
        let file = temp_config(".yaml", "backup:\n  equality_methods: \"Length|Crc32\"\n");
        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build();
        assert!(result.is_err());
    }
}
