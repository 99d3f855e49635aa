/*!
 * Configuration types for the CIFS file copier
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CopierError, Result};
use crate::protocols::smb::SmbSecurity;

/// Smallest chunk written per SMB request
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk written per SMB request
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// What to do when a configured password cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PasswordLookupPolicy {
    /// Fail the copy with a configuration error
    #[default]
    Abort,
    /// Log a warning and connect without a password (guest shares)
    ProceedWithoutPassword,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// JSON output on stdout as well
    #[serde(default)]
    pub json: bool,
}

/// Main configuration for the copier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CopierConfig {
    /// Plugin-level `passwordStoragePath` option; may contain `${...}` references
    #[serde(default, alias = "passwordStoragePath")]
    pub password_storage_path: Option<String>,

    #[serde(default)]
    pub password_lookup: PasswordLookupPolicy,

    /// Default remote directory for Windows nodes
    #[serde(default = "default_windows_dir")]
    pub default_windows_dir: String,

    /// Default remote directory for other nodes
    #[serde(default = "default_unix_dir")]
    pub default_unix_dir: String,

    /// Bytes per SMB write request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Connection attempts for retryable failures (1 = no retry)
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Compare the remote size with the bytes written after close
    #[serde(default = "default_true")]
    pub verify_remote_size: bool,

    /// SMB port used when the node hostname carries none
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub security: SmbSecurity,

    /// Directory for staged payloads (None = system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_windows_dir() -> String {
    r"C:\WINDOWS\TEMP\".to_string()
}

fn default_unix_dir() -> String {
    "/tmp/".to_string()
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_connect_attempts() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for CopierConfig {
    fn default() -> Self {
        Self {
            password_storage_path: None,
            password_lookup: PasswordLookupPolicy::default(),
            default_windows_dir: default_windows_dir(),
            default_unix_dir: default_unix_dir(),
            chunk_size: default_chunk_size(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            verify_remote_size: true,
            port: None,
            security: SmbSecurity::default(),
            temp_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl CopierConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| CopierError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CopierError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialise back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CopierError::Config(format!("TOML serialize error: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 {
            return Err(CopierError::Config(
                "connect-attempts must be at least 1".to_string(),
            ));
        }
        if self.default_windows_dir.trim().is_empty() || self.default_unix_dir.trim().is_empty() {
            return Err(CopierError::Config(
                "default remote directories must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Chunk size clamped to the supported range
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }
}
