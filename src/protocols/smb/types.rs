//! Session targets, authentication and metadata for SMB copies

use super::error::SmbError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Default SMB port
pub const DEFAULT_SMB_PORT: u16 = 445;

/// User name jcifs falls back to when only a password is known
pub const GUEST_USER: &str = "GUEST";

/// SMB target configuration
///
/// Specifies the connection details for one share on one host.
///
/// # Example
///
/// ```
/// use cifs_copier::protocols::smb::{SmbAuth, SmbSecurity, SmbTarget};
///
/// let target = SmbTarget {
///     host: "winnode01".to_string(),
///     share: "C$".to_string(),
///     port: None,
///     auth: SmbAuth::Anonymous,
///     security: SmbSecurity::Opportunistic,
/// };
/// assert_eq!(target.unc_root(), r"\\winnode01\C$");
/// ```
#[derive(Debug, Clone)]
pub struct SmbTarget {
    /// Hostname or IP address
    pub host: String,

    /// Share name, e.g. the administrative share `C$`
    pub share: String,

    /// SMB port (default: 445)
    pub port: Option<u16>,

    /// Authentication method
    pub auth: SmbAuth,

    /// Signing and encryption mode
    pub security: SmbSecurity,
}

impl SmbTarget {
    /// `\\host\share`
    pub fn unc_root(&self) -> String {
        format!(r"\\{}\{}", self.host, self.share)
    }

    /// Effective port
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SMB_PORT)
    }
}

impl Default for SmbTarget {
    fn default() -> Self {
        Self {
            host: String::new(),
            share: String::new(),
            port: Some(DEFAULT_SMB_PORT),
            auth: SmbAuth::Anonymous,
            security: SmbSecurity::Opportunistic,
        }
    }
}

/// SMB authentication methods
#[derive(Debug, Clone)]
pub enum SmbAuth {
    /// Anonymous/guest session (no credentials)
    Anonymous,

    /// NTLMv2 authentication
    Ntlmv2 {
        domain: Option<String>,
        username: String,
        password: SecretString,
    },
}

impl SmbAuth {
    /// Build an NTLM authentication context from optional parts.
    ///
    /// Every part may be absent: with neither user nor password the session is
    /// anonymous, a lone password authenticates as [`GUEST_USER`], and a user
    /// without a password sends an empty one.
    pub fn ntlm(
        domain: Option<String>,
        username: Option<String>,
        password: Option<SecretString>,
    ) -> Self {
        match (username, password) {
            (None, None) => SmbAuth::Anonymous,
            (username, password) => SmbAuth::Ntlmv2 {
                domain,
                username: username.unwrap_or_else(|| GUEST_USER.to_string()),
                password: password.unwrap_or_else(|| SecretString::new(String::new().into_boxed_str())),
            },
        }
    }

    /// User name presented to the server, if any
    pub fn username(&self) -> Option<&str> {
        match self {
            SmbAuth::Anonymous => None,
            SmbAuth::Ntlmv2 { username, .. } => Some(username),
        }
    }

    /// `(user, password)` pair as passed to the SMB session setup
    pub(crate) fn session_credentials(&self) -> (String, String) {
        match self {
            SmbAuth::Anonymous => (String::new(), String::new()),
            SmbAuth::Ntlmv2 {
                domain: Some(domain),
                username,
                password,
            } => (
                format!("{}\\{}", domain, username),
                password.expose_secret().to_string(),
            ),
            SmbAuth::Ntlmv2 {
                domain: None,
                username,
                password,
            } => (username.clone(), password.expose_secret().to_string()),
        }
    }
}

/// Signing and encryption requested for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmbSecurity {
    /// Whatever the server negotiates
    #[default]
    Opportunistic,

    /// Refuse servers that cannot encrypt (SMB 3.x only)
    RequireEncryption,

    /// Signed but unencrypted
    SignOnly,
}

/// What the copier needs to know about a remote file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbMetadata {
    /// File size in bytes
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,
}

/// A parsed `smb://host/share/path` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbUrl {
    pub host: String,
    pub share: String,
    /// Path inside the share, backslash separated, no leading separator
    pub path: String,
}

impl SmbUrl {
    /// Parse an SMB URL of the form `smb://host/share/dir/file`.
    pub fn parse(url: &str) -> Result<Self, SmbError> {
        let rest = url
            .strip_prefix("smb://")
            .ok_or_else(|| SmbError::InvalidPath(format!("not an smb:// URL: {}", url)))?;

        let (host, rest) = rest
            .split_once('/')
            .ok_or_else(|| SmbError::InvalidPath(format!("missing share in {}", url)))?;
        if host.is_empty() {
            return Err(SmbError::InvalidPath(format!("missing host in {}", url)));
        }

        let rest = rest.trim_start_matches('/');
        let (share, path) = rest.split_once('/').unwrap_or((rest, ""));
        if share.is_empty() {
            return Err(SmbError::InvalidPath(format!("missing share in {}", url)));
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.iter().any(|s| *s == "..") {
            return Err(SmbError::InvalidPath(format!(
                "path traversal not allowed in {}",
                url
            )));
        }

        Ok(Self {
            host: host.to_string(),
            share: share.to_string(),
            path: segments.join("\\"),
        })
    }
}
