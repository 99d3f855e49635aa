//! SMB error types

use thiserror::Error;

/// Failures reported by an SMB session or one of its file handles
#[derive(Error, Debug)]
pub enum SmbError {
    /// The server rejected the user name or password
    #[error("logon failure: unknown user name or bad password")]
    LogonFailure,

    /// Authenticated, but not allowed to touch the path
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("no such file on share: {0}")]
    NotFound(String),

    /// Exclusive create hit an existing file
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// Another handle holds the file open without sharing
    #[error("file in use: {0}")]
    SharingViolation(String),

    /// Host name could not be resolved
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("network I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMB protocol error: {0}")]
    Protocol(String),

    #[error("SMB request timed out")]
    Timeout,

    /// Client built without the required support
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Session could not be established or was lost
    #[error("session setup failed: {0}")]
    Connection(String),

    /// Malformed SMB URL or share-relative path
    #[error("invalid SMB path: {0}")]
    InvalidPath(String),

    /// Write handle used after close
    #[error("stream already closed: {0}")]
    Closed(String),
}

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, SmbError>;

/// NTSTATUS codes the copier distinguishes
pub mod ntstatus {
    pub const NO_SUCH_FILE: u32 = 0xC000_000F;
    pub const OBJECT_NAME_INVALID: u32 = 0xC000_0033;
    pub const OBJECT_NAME_NOT_FOUND: u32 = 0xC000_0034;
    pub const OBJECT_NAME_COLLISION: u32 = 0xC000_0035;
    pub const OBJECT_PATH_NOT_FOUND: u32 = 0xC000_003A;
    pub const OBJECT_PATH_SYNTAX_BAD: u32 = 0xC000_003B;
    pub const SHARING_VIOLATION: u32 = 0xC000_0043;
    pub const ACCESS_DENIED: u32 = 0xC000_0022;
    pub const WRONG_PASSWORD: u32 = 0xC000_006A;
    pub const LOGON_FAILURE: u32 = 0xC000_006D;
    pub const ACCOUNT_RESTRICTION: u32 = 0xC000_006E;
    pub const PASSWORD_EXPIRED: u32 = 0xC000_0071;
    pub const ACCOUNT_DISABLED: u32 = 0xC000_0072;
    pub const ACCOUNT_LOCKED_OUT: u32 = 0xC000_0234;
    pub const IO_TIMEOUT: u32 = 0xC000_00B5;
    pub const NETWORK_NAME_DELETED: u32 = 0xC000_00C9;
    pub const BAD_NETWORK_NAME: u32 = 0xC000_00CC;
    pub const USER_SESSION_DELETED: u32 = 0xC000_0203;
    pub const CONNECTION_RESET: u32 = 0xC000_020D;
}

impl SmbError {
    /// Classify an NTSTATUS returned for `path`
    pub fn from_status(status: u32, path: &str) -> Self {
        use ntstatus::*;

        match status {
            WRONG_PASSWORD | LOGON_FAILURE | ACCOUNT_RESTRICTION | PASSWORD_EXPIRED
            | ACCOUNT_DISABLED | ACCOUNT_LOCKED_OUT => SmbError::LogonFailure,
            ACCESS_DENIED => SmbError::AccessDenied(path.to_string()),
            NO_SUCH_FILE | OBJECT_NAME_NOT_FOUND | OBJECT_PATH_NOT_FOUND | BAD_NETWORK_NAME => {
                SmbError::NotFound(path.to_string())
            }
            OBJECT_NAME_COLLISION => SmbError::AlreadyExists(path.to_string()),
            SHARING_VIOLATION => SmbError::SharingViolation(path.to_string()),
            OBJECT_NAME_INVALID | OBJECT_PATH_SYNTAX_BAD => SmbError::InvalidPath(path.to_string()),
            IO_TIMEOUT => SmbError::Timeout,
            NETWORK_NAME_DELETED | USER_SESSION_DELETED | CONNECTION_RESET => {
                SmbError::Connection(format!("session lost on {} (0x{:08X})", path, status))
            }
            other => SmbError::Protocol(format!("{}: NTSTATUS 0x{:08X}", path, other)),
        }
    }

    /// Classify a transport failure
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut => SmbError::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => SmbError::Connection(err.to_string()),
            _ => SmbError::Io(err),
        }
    }

    /// Transient failures worth another connection attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmbError::Timeout | SmbError::Connection(_) | SmbError::Io(_)
        )
    }

    /// Credential or authorization failures
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SmbError::LogonFailure | SmbError::AccessDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_cause() {
        assert_eq!(
            SmbError::LogonFailure.to_string(),
            "logon failure: unknown user name or bad password"
        );
        assert_eq!(
            SmbError::NotFound(r"WINDOWS\TEMP\run.bat".to_string()).to_string(),
            r"no such file on share: WINDOWS\TEMP\run.bat"
        );
        assert_eq!(
            SmbError::UnknownHost("winnode01".to_string()).to_string(),
            "unknown host: winnode01"
        );
    }

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(SmbError::Timeout.is_retryable());
        assert!(SmbError::Connection("connection refused".to_string()).is_retryable());
        assert!(SmbError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_retryable());

        assert!(!SmbError::LogonFailure.is_retryable());
        assert!(!SmbError::UnknownHost("x".to_string()).is_retryable());
        assert!(!SmbError::InvalidPath("x".to_string()).is_retryable());
        assert!(!SmbError::Closed("x".to_string()).is_retryable());
    }

    #[test]
    fn test_status_classification() {
        let path = r"scripts\run.sh";
        assert!(matches!(
            SmbError::from_status(ntstatus::LOGON_FAILURE, path),
            SmbError::LogonFailure
        ));
        assert!(matches!(
            SmbError::from_status(ntstatus::ACCOUNT_LOCKED_OUT, path),
            SmbError::LogonFailure
        ));
        assert!(matches!(
            SmbError::from_status(ntstatus::ACCESS_DENIED, path),
            SmbError::AccessDenied(p) if p == path
        ));
        assert!(matches!(
            SmbError::from_status(ntstatus::OBJECT_NAME_COLLISION, path),
            SmbError::AlreadyExists(_)
        ));
        assert!(matches!(
            SmbError::from_status(ntstatus::IO_TIMEOUT, path),
            SmbError::Timeout
        ));
        assert_eq!(
            SmbError::from_status(0xC000_0001, path).to_string(),
            r"SMB protocol error: scripts\run.sh: NTSTATUS 0xC0000001"
        );
    }

    #[test]
    fn test_missing_parent_is_not_an_auth_failure() {
        for status in [
            ntstatus::OBJECT_PATH_NOT_FOUND,
            ntstatus::OBJECT_NAME_NOT_FOUND,
            ntstatus::BAD_NETWORK_NAME,
        ] {
            let err = SmbError::from_status(status, r"scripts\run.sh");
            assert!(matches!(err, SmbError::NotFound(_)), "{:?}", err);
            assert!(!err.is_auth_failure());
        }
        // file exists but is locked or unreadable: not "absent"
        assert!(matches!(
            SmbError::from_status(ntstatus::SHARING_VIOLATION, "x"),
            SmbError::SharingViolation(_)
        ));
    }

    #[test]
    fn test_io_classification() {
        use std::io::{Error, ErrorKind};

        assert!(matches!(SmbError::from_io(Error::from(ErrorKind::TimedOut)), SmbError::Timeout));
        assert!(matches!(
            SmbError::from_io(Error::from(ErrorKind::ConnectionRefused)),
            SmbError::Connection(_)
        ));
        assert!(matches!(
            SmbError::from_io(Error::from(ErrorKind::UnexpectedEof)),
            SmbError::Io(_)
        ));
    }

    #[test]
    fn test_auth_failures() {
        assert!(SmbError::LogonFailure.is_auth_failure());
        assert!(SmbError::AccessDenied(r"C$\x".to_string()).is_auth_failure());
        assert!(!SmbError::Timeout.is_auth_failure());
        assert!(!SmbError::NotFound("x".to_string()).is_auth_failure());
    }
}
