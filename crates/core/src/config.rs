use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "countersign.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub escalation: EscalationConfig,
    pub server: ServerConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct EscalationConfig {
    pub enabled: bool,
    pub sweep_interval_secs: u64,
}

impl EscalationConfig {
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Programmatic overrides, applied after file and environment values.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub escalation_enabled: Option<bool>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    /// Fail when the config file is missing instead of using defaults.
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    logging: Option<FileLogging>,
    escalation: Option<FileEscalation>,
    server: Option<FileServer>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileEscalation {
    enabled: Option<bool>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileServer {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
}

impl AppConfig {
    /// Layering: defaults, then the TOML file, then `COUNTERSIGN_*`
    /// environment variables, then programmatic overrides.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let path =
            options.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let file = match fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<FileConfig>(&raw)
                .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                if options.require_file {
                    return Err(ConfigError::MissingConfigFile(path));
                }
                FileConfig::default()
            }
            Err(source) => return Err(ConfigError::ReadFile { path, source }),
        };

        let database = file.database.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();
        let escalation = file.escalation.unwrap_or_default();
        let server = file.server.unwrap_or_default();

        let mut config = Self {
            database: DatabaseConfig {
                url: database.url.unwrap_or_else(|| "sqlite:countersign.db".to_string()),
                max_connections: database.max_connections.unwrap_or(5),
                timeout_secs: database.timeout_secs.unwrap_or(30),
            },
            logging: LoggingConfig {
                level: logging.level.unwrap_or_else(|| "info".to_string()),
                format: logging.format.unwrap_or(LogFormat::Compact),
            },
            escalation: EscalationConfig {
                enabled: escalation.enabled.unwrap_or(true),
                sweep_interval_secs: escalation.sweep_interval_secs.unwrap_or(300),
            },
            server: ServerConfig {
                bind_address: server.bind_address.unwrap_or_else(|| "127.0.0.1".to_string()),
                health_check_port: server.health_check_port.unwrap_or(8090),
            },
        };

        config.apply_env()?;
        config.apply_overrides(&options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("COUNTERSIGN_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = env::var("COUNTERSIGN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("COUNTERSIGN_LOG_FORMAT") {
            self.logging.format = match format.as_str() {
                "compact" => LogFormat::Compact,
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => {
                    return Err(ConfigError::InvalidEnvOverride {
                        key: "COUNTERSIGN_LOG_FORMAT".to_string(),
                        value: other.to_string(),
                    })
                }
            };
        }
        if let Ok(raw) = env::var("COUNTERSIGN_SWEEP_INTERVAL_SECS") {
            self.escalation.sweep_interval_secs =
                raw.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "COUNTERSIGN_SWEEP_INTERVAL_SECS".to_string(),
                    value: raw,
                })?;
        }
        if let Ok(raw) = env::var("COUNTERSIGN_ESCALATION_ENABLED") {
            self.escalation.enabled = match raw.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(ConfigError::InvalidEnvOverride {
                        key: "COUNTERSIGN_ESCALATION_ENABLED".to_string(),
                        value: other.to_string(),
                    })
                }
            };
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.database_url {
            self.database.url = url.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
        if let Some(enabled) = overrides.escalation_enabled {
            self.escalation.enabled = enabled;
        }
        if let Some(interval) = overrides.sweep_interval_secs {
            self.escalation.sweep_interval_secs = interval;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.escalation.enabled && self.escalation.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "escalation.sweep_interval_secs must be at least 1 when enabled".to_string(),
            ));
        }
        Ok(())
    }
}
