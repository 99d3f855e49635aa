/*!
 * cifs-copier - copy scripts to remote Windows nodes over SMB/CIFS
 *
 * Resolves credentials from node attributes and project/framework
 * properties, reads passwords from a key store, uploads the payload to the
 * node's administrative share and returns the remote path for the next
 * execution step.
 *
 * ```no_run
 * use std::sync::Arc;
 * use cifs_copier::{
 *     CifsFileCopier, CopierConfig, DataContext, ExecutionContext, FileCopier, Framework,
 *     MemorySecretStore, NodeTarget,
 * };
 *
 * # async fn example() -> Result<(), Box<dyn std::error::Error>> {
 * let node = NodeTarget::new("web1", "winnode01").with_os_family("windows");
 * let context = ExecutionContext::new(
 *     "ops",
 *     DataContext::new().with_node(&node),
 *     Arc::new(MemorySecretStore::new()),
 * );
 * let copier = CifsFileCopier::new(Arc::new(Framework::default()), CopierConfig::default());
 *
 * let remote = copier.copy_script(&context, "@echo off\r\n", &node).await?;
 * println!("uploaded to {}", remote);
 * # Ok(())
 * # }
 * ```
 */

pub mod config;
pub mod context;
pub mod copier;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod node;
pub mod properties;
pub mod protocols;
pub mod remote_path;
pub mod secrets;
pub mod staging;
pub mod transfer;

// Re-export commonly used types
pub use config::{CopierConfig, LogLevel, LoggingConfig, PasswordLookupPolicy};
pub use context::{DataContext, ExecutionContext};
pub use copier::{describe, BlockingFileCopier, CifsFileCopier, FileCopier, PluginDescription};
pub use credentials::{CredentialResolver, Layer, ResolvedCredential};
pub use error::{CopierError, CopyFailure, ErrorCategory, FailureReason, Result, PLUGIN_ID};
pub use node::NodeTarget;
pub use properties::{Framework, Properties, PropertySource};
pub use remote_path::{to_smb_url, RemotePath};
pub use secrets::{DirectorySecretStore, MemorySecretStore, SecretStore, StorageError, StoragePath};
pub use staging::Payload;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
