/*!
 * Error types for the CIFS file copier
 */

use std::fmt;
use std::io;

use thiserror::Error;

use crate::protocols::smb::SmbError;
use crate::secrets::StorageError;

/// Plugin identifier used in user-facing failure messages
pub const PLUGIN_ID: &str = "jcifs";

pub type Result<T> = std::result::Result<T, CopierError>;

/// Failures of the copy pipeline
#[derive(Debug, Error)]
pub enum CopierError {
    /// Secret lookup failed for a configured storage path
    #[error("Failed to read the JCIFS password for storage path: {storage_path}: {source}")]
    Configuration {
        storage_path: String,
        #[source]
        source: StorageError,
    },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication parameters could not be assembled
    #[error("Invalid authentication parameters: {0}")]
    AuthConstruction(String),

    /// Host unreachable, name resolution, session setup or remote create/open failure
    #[error("Failed to reach {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: SmbError,
    },

    /// Byte copy, flush or close failed
    #[error("Failed writing {url}: {source}")]
    Transfer {
        url: String,
        #[source]
        source: SmbError,
    },

    /// Reading the local payload failed mid-transfer
    #[error("Failed reading local payload {path}: {source}")]
    LocalRead {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Remote file size differs from what was written
    #[error("Remote file {url} holds {actual} bytes, expected {expected}")]
    Verification {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// The payload could not be written to a local temp file
    #[error("Failed to stage payload: {0}")]
    Staging(#[source] io::Error),

    /// Caller supplied an unusable request
    #[error("Invalid copy request: {0}")]
    InvalidRequest(String),
}

impl CopierError {
    /// Reason reported to the orchestrator for a failed step
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            CopierError::Configuration { .. } | CopierError::Config(_) => {
                FailureReason::ConfigurationFailure
            }
            CopierError::AuthConstruction(_) => FailureReason::AuthenticationFailure,
            CopierError::Connection { source, .. } if source.is_auth_failure() => {
                FailureReason::AuthenticationFailure
            }
            CopierError::Connection { .. } => FailureReason::ConnectionFailure,
            CopierError::Transfer { .. }
            | CopierError::LocalRead { .. }
            | CopierError::Verification { .. }
            | CopierError::Staging(_) => FailureReason::IoFailure,
            CopierError::InvalidRequest(_) => FailureReason::Unknown,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            CopierError::Configuration { .. } | CopierError::Config(_) => {
                ErrorCategory::Configuration
            }
            CopierError::AuthConstruction(_) => ErrorCategory::Security,
            CopierError::Connection { source, .. } if source.is_auth_failure() => {
                ErrorCategory::Security
            }
            CopierError::Connection { .. } => ErrorCategory::Network,
            CopierError::Transfer { .. } => ErrorCategory::Network,
            CopierError::LocalRead { .. } | CopierError::Staging(_) => ErrorCategory::IoError,
            CopierError::Verification { .. } => ErrorCategory::Integrity,
            CopierError::InvalidRequest(_) => ErrorCategory::Validation,
        }
    }

    /// Check if another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CopierError::Connection { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Step failure reasons understood by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ConfigurationFailure,
    AuthenticationFailure,
    ConnectionFailure,
    IoFailure,
    Unknown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ConfigurationFailure => write!(f, "ConfigurationFailure"),
            FailureReason::AuthenticationFailure => write!(f, "AuthenticationFailure"),
            FailureReason::ConnectionFailure => write!(f, "ConnectionFailure"),
            FailureReason::IoFailure => write!(f, "IOFailure"),
            FailureReason::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request validation errors
    Validation,
    /// Local I/O errors
    IoError,
    /// Configuration and secret lookup errors
    Configuration,
    /// Network/protocol errors
    Network,
    /// Authentication/authorization errors
    Security,
    /// Written data does not match
    Integrity,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Integrity => write!(f, "integrity"),
        }
    }
}

/// Typed failure handed back to the orchestrator
///
/// Displays as `[jcifs] Failed copying the file: <cause>`.
#[derive(Debug, Error)]
#[error("[{}] Failed copying the file: {source}", PLUGIN_ID)]
pub struct CopyFailure {
    pub reason: FailureReason,
    #[source]
    pub source: CopierError,
}

impl From<CopierError> for CopyFailure {
    fn from(source: CopierError) -> Self {
        Self {
            reason: source.failure_reason(),
            source,
        }
    }
}
