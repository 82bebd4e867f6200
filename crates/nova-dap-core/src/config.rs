use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DispatchMode;
use crate::format::StackFrameFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for all Nova targets, or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level with `RUST_LOG` merged on top.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let combined = format!(
                    "{},{env_directives}",
                    Self::normalize_level_directives(&self.level)
                );
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Session settings negotiated with the client or read from `nova-dap.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Issue independent target queries concurrently.
    #[serde(alias = "asyncJDWP", alias = "asyncJdwp")]
    pub async_jdwp: bool,

    /// User source roots scanned when no lookup provider resolves a type.
    #[serde(alias = "sourcePaths")]
    pub source_paths: Vec<PathBuf>,

    #[serde(alias = "debuggerLinesStartAt1")]
    pub debugger_lines_start_at1: bool,
    #[serde(alias = "clientLinesStartAt1")]
    pub client_lines_start_at1: bool,
    #[serde(alias = "clientColumnsStartAt1")]
    pub client_columns_start_at1: bool,

    #[serde(alias = "debuggerPathsAreUri")]
    pub debugger_paths_are_uri: bool,
    #[serde(alias = "clientPathsAreUri")]
    pub client_paths_are_uri: bool,

    #[serde(alias = "stackFrameFormat")]
    pub stack_frame_format: StackFrameFormat,

    /// Upper bound on memoized type-to-source resolutions.
    #[serde(alias = "sourceCacheCapacity")]
    pub source_cache_capacity: usize,

    pub logging: LoggingConfig,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            async_jdwp: false,
            source_paths: Vec::new(),
            debugger_lines_start_at1: true,
            client_lines_start_at1: true,
            client_columns_start_at1: true,
            debugger_paths_are_uri: true,
            client_paths_are_uri: false,
            stack_frame_format: StackFrameFormat::default(),
            source_cache_capacity: 4_096,
            logging: LoggingConfig::default(),
        }
    }
}

impl DebugConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.async_jdwp {
            DispatchMode::Concurrent
        } else {
            DispatchMode::Serial
        }
    }
}
