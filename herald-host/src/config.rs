//! Root and per-extension configuration
//!
//! The root file is JSON with camelCase keys. Relative paths in it are
//! resolved against the directory holding the file.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix used when the config does not set one
pub const DEFAULT_PREFIX: &str = "!";

/// Errors that can occur while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Extension config does not match the expected shape: {0}")]
    Shape(#[source] serde_json::Error),
}

/// Where to connect and as whom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25565,
            username: "herald".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RootConfig {
    pub connection: ConnectionConfig,
    pub command_prefix: String,
    /// Extensions to load, in order
    pub extensions: Vec<String>,
    pub permissions_file: PathBuf,
    pub extensions_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            command_prefix: DEFAULT_PREFIX.to_string(),
            extensions: Vec::new(),
            permissions_file: PathBuf::from("permissions.json"),
            extensions_dir: PathBuf::from("extensions"),
            audit_log: None,
        }
    }
}

impl RootConfig {
    /// Load and validate the root config at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: RootConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }

        tracing::info!(
            path = %path.display(),
            extensions = config.extensions.len(),
            prefix = %config.command_prefix,
            "Config loaded"
        );
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_prefix.is_empty() {
            return Err(ConfigError::Invalid("commandPrefix must not be empty".into()));
        }
        if self.command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "commandPrefix must not contain whitespace".into(),
            ));
        }
        if self.connection.username.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.username must not be empty".into()));
        }
        Ok(())
    }

    /// Make relative paths absolute against `base`
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.permissions_file);
        resolve(&mut self.extensions_dir);
        if let Some(audit) = self.audit_log.as_mut() {
            resolve(audit);
        }
    }
}

/// Private configuration of one extension
///
/// Always an object. A missing or broken file gives an empty one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionConfig {
    values: Map<String, Value>,
}

impl ExtensionConfig {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; anything but an object becomes empty
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::empty(),
        }
    }

    /// Read `path`, falling back to an empty config
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No extension config, using empty config");
            return Self::empty();
        }

        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));

        match parsed {
            Ok(Value::Object(values)) => Self { values },
            Ok(_) => {
                tracing::error!(path = %path.display(), "Extension config is not a JSON object, using empty config");
                Self::empty()
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load extension config, using empty config");
                Self::empty()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Deserialize the whole config into a typed struct
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(ConfigError::Shape)
    }
}
