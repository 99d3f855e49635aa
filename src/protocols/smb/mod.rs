//! SMB2/3 protocol support
//!
//! The copier talks to remote shares through the [`SmbClient`] trait. Sessions
//! are opened by an [`SmbConnector`]; the default [`NativeConnector`] uses the
//! pure-Rust `smb` crate when the `smb-native` feature is enabled, and
//! [`MemorySmbServer`] serves shares from memory.
//!
//! # Feature Flag
//!
//! Enable the native client with: `--features smb-native`
//!
//! # Example
//!
//! ```no_run
//! use cifs_copier::protocols::smb::{client_for, SmbAuth, SmbSecurity, SmbTarget};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let target = SmbTarget {
//!     host: "winnode01".to_string(),
//!     share: "C$".to_string(),
//!     port: None,
//!     auth: SmbAuth::Anonymous,
//!     security: SmbSecurity::Opportunistic,
//! };
//!
//! let client = client_for(&target).await?;
//! client.create_if_absent(r"WINDOWS\TEMP\run.ps1").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod memory;
pub mod types;

#[cfg(feature = "smb-native")]
pub mod native;

pub use error::*;
pub use memory::{MemorySmbServer, SessionRecord};
pub use types::*;

#[cfg(feature = "smb-native")]
pub use native::NativeSmbClient;

use async_trait::async_trait;

/// SMB client trait - the operations a file copy needs from one share
#[async_trait]
pub trait SmbClient: Send + Sync {
    /// Create `rel` as an empty file unless it already exists.
    ///
    /// Returns `true` when the file was created. An existing file is left
    /// untouched.
    async fn create_if_absent(&self, rel: &str) -> std::result::Result<bool, SmbError>;

    /// Open `rel` for writing, truncating any previous content
    async fn open_write(&self, rel: &str) -> std::result::Result<Box<dyn SmbWriter>, SmbError>;

    /// Get file metadata
    async fn metadata(&self, rel: &str) -> std::result::Result<SmbMetadata, SmbError>;

    /// Disconnect from the server
    async fn disconnect(&mut self) -> std::result::Result<(), SmbError>;
}

/// Sequential write stream to a remote file
#[async_trait]
pub trait SmbWriter: Send {
    /// Append `buf` to the remote file
    async fn write_all(&mut self, buf: &[u8]) -> std::result::Result<(), SmbError>;

    /// Push buffered data to the server
    async fn flush(&mut self) -> std::result::Result<(), SmbError>;

    /// Release the remote handle. Writing after close is an error.
    async fn close(&mut self) -> std::result::Result<(), SmbError>;
}

/// Opens an authenticated session to one share
#[async_trait]
pub trait SmbConnector: Send + Sync {
    async fn connect(&self, target: &SmbTarget) -> std::result::Result<Box<dyn SmbClient>, SmbError>;
}

/// Connector backed by [`client_for`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

#[async_trait]
impl SmbConnector for NativeConnector {
    async fn connect(&self, target: &SmbTarget) -> std::result::Result<Box<dyn SmbClient>, SmbError> {
        client_for(target).await
    }
}

/// Factory function to create a connected SMB client
///
/// This function only connects when the `smb-native` feature is enabled.
#[cfg(feature = "smb-native")]
pub async fn client_for(target: &SmbTarget) -> std::result::Result<Box<dyn SmbClient>, SmbError> {
    Ok(Box::new(native::NativeSmbClient::new(target).await?))
}

#[cfg(not(feature = "smb-native"))]
pub async fn client_for(_target: &SmbTarget) -> std::result::Result<Box<dyn SmbClient>, SmbError> {
    Err(SmbError::Unsupported(
        "smb-native feature is not enabled. Rebuild with --features smb-native",
    ))
}
