//! Remote destination paths and their SMB URL form

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::config::CopierConfig;
use crate::credentials::CredentialResolver;
use crate::error::{CopierError, Result};
use crate::node::{non_blank, NodeTarget};

/// Key of the remote working directory setting
pub const FILE_COPY_DESTINATION_DIR: &str = "file-copy-destination-dir";

/// File name used when the payload has none
pub const DEFAULT_SCRIPT_NAME: &str = "dispatch-script";

/// A logical remote path plus the SMB URL it maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    logical: String,
    smb_url: String,
}

impl RemotePath {
    pub fn new(logical: impl Into<String>, host: &str) -> Self {
        let logical = logical.into();
        let smb_url = to_smb_url(&logical, host);
        Self { logical, smb_url }
    }

    /// Path as handed back to the orchestrator, e.g. `C:\WINDOWS\TEMP\x.bat`
    pub fn logical(&self) -> &str {
        &self.logical
    }

    pub fn smb_url(&self) -> &str {
        &self.smb_url
    }

    pub fn into_logical(self) -> String {
        self.logical
    }
}

/// Convert a logical path to an SMB URL on `host`.
///
/// Every `:` becomes `$` and every `\` becomes `/`.
///
/// ```
/// use cifs_copier::remote_path::to_smb_url;
///
/// assert_eq!(to_smb_url(r"C:\dir\file.sh", "node1"), "smb://node1/C$/dir/file.sh");
/// ```
pub fn to_smb_url(logical: &str, host: &str) -> String {
    let converted = logical.replace(':', "$").replace('\\', "/");
    format!("smb://{}/{}", host, converted)
}

/// Computes the destination of one copy
pub struct RemotePathBuilder<'a> {
    node: &'a NodeTarget,
    config: &'a CopierConfig,
}

impl<'a> RemotePathBuilder<'a> {
    pub fn new(node: &'a NodeTarget, config: &'a CopierConfig) -> Self {
        Self { node, config }
    }

    /// Explicit destinations are used verbatim; otherwise a unique file name
    /// inside the node's destination directory.
    pub fn build(
        &self,
        resolver: &CredentialResolver<'_>,
        base_name: Option<&str>,
        explicit: Option<&str>,
    ) -> Result<RemotePath> {
        let logical = match explicit {
            Some(dest) if dest.trim().is_empty() => {
                return Err(CopierError::InvalidRequest(
                    "destination path is empty".to_string(),
                ));
            }
            Some(dest) => dest.to_string(),
            None => self.default_path(resolver, base_name, unique_millis()),
        };

        let path = RemotePath::new(logical, self.node.host());
        tracing::debug!(
            node = %self.node.nodename,
            remote_path = path.logical(),
            smb_url = path.smb_url(),
            explicit = explicit.is_some(),
            "remote path computed"
        );
        Ok(path)
    }

    fn default_path(
        &self,
        resolver: &CredentialResolver<'_>,
        base_name: Option<&str>,
        millis: i64,
    ) -> String {
        let base = non_blank(base_name).unwrap_or_else(|| DEFAULT_SCRIPT_NAME.to_string());
        format!(
            "{}{}-{}-{}",
            self.destination_dir(resolver),
            millis,
            sanitize(&self.node.nodename),
            base
        )
    }

    /// Destination directory with a trailing separator
    pub fn destination_dir(&self, resolver: &CredentialResolver<'_>) -> String {
        let dir = non_blank(resolver.resolve(FILE_COPY_DESTINATION_DIR, None).as_deref())
            .unwrap_or_else(|| {
                if self.node.is_windows() {
                    self.config.default_windows_dir.clone()
                } else {
                    self.config.default_unix_dir.clone()
                }
            });

        if dir.ends_with('\\') || dir.ends_with('/') {
            dir
        } else if dir.contains('\\') || is_drive_path(&dir) {
            format!("{}\\", dir)
        } else {
            format!("{}/", dir)
        }
    }
}

/// Epoch millis, strictly increasing within the process
fn unique_millis() -> i64 {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let now = Utc::now().timestamp_millis();
    let prev = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
        .unwrap_or_else(|last| last);
    now.max(prev + 1)
}

fn is_drive_path(dir: &str) -> bool {
    let bytes = dir.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Properties;

    #[test]
    fn test_smb_url_conversion() {
        assert_eq!(to_smb_url(r"C:\dir\file.sh", "node1"), "smb://node1/C$/dir/file.sh");
        assert_eq!(
            to_smb_url(r"D:\scripts\run.sh", "winnode01"),
            "smb://winnode01/D$/scripts/run.sh"
        );
        // every colon is replaced, not only the drive separator
        assert_eq!(to_smb_url(r"C:\a:b", "h"), "smb://h/C$/a$b");
    }

    #[test]
    fn test_explicit_destination_is_verbatim() {
        let node = NodeTarget::new("web1", "admin@winnode01:4455");
        let framework = Properties::new();
        let resolver = CredentialResolver::new(&node, None, &framework);
        let config = CopierConfig::default();

        let path = RemotePathBuilder::new(&node, &config)
            .build(&resolver, Some("ignored.sh"), Some(r"D:\scripts\run.sh"))
            .unwrap();
        assert_eq!(path.logical(), r"D:\scripts\run.sh");
        assert_eq!(path.smb_url(), "smb://winnode01/D$/scripts/run.sh");
    }

    #[test]
    fn test_empty_destination_rejected() {
        let node = NodeTarget::new("web1", "winnode01");
        let framework = Properties::new();
        let resolver = CredentialResolver::new(&node, None, &framework);
        let config = CopierConfig::default();

        let err = RemotePathBuilder::new(&node, &config)
            .build(&resolver, None, Some("  "))
            .unwrap_err();
        assert!(matches!(err, CopierError::InvalidRequest(_)));
    }

    #[test]
    fn test_default_path_for_windows_node() {
        let node = NodeTarget::new("web 1", "winnode01").with_os_family("windows");
        let framework = Properties::new();
        let resolver = CredentialResolver::new(&node, None, &framework);
        let config = CopierConfig::default();
        let builder = RemotePathBuilder::new(&node, &config);

        assert_eq!(
            builder.default_path(&resolver, Some("deploy.bat"), 1700000000000),
            r"C:\WINDOWS\TEMP\1700000000000-web_1-deploy.bat"
        );
        assert_eq!(
            builder.default_path(&resolver, None, 1),
            r"C:\WINDOWS\TEMP\1-web_1-dispatch-script"
        );
    }

    #[test]
    fn test_default_path_uses_configured_directory() {
        let node = NodeTarget::new("web1", "winnode01").with_os_family("windows");
        let framework = Properties::new().with("framework.file-copy-destination-dir", r"D:\deploy");
        let resolver = CredentialResolver::new(&node, None, &framework);
        let config = CopierConfig::default();
        let builder = RemotePathBuilder::new(&node, &config);

        assert_eq!(builder.destination_dir(&resolver), r"D:\deploy\");

        let path = builder.build(&resolver, Some("a.ps1"), None).unwrap();
        assert!(path.logical().starts_with(r"D:\deploy\"));
        assert!(path.logical().ends_with("-web1-a.ps1"));
        assert!(path.smb_url().starts_with("smb://winnode01/D$/deploy/"));
    }

    #[test]
    fn test_unique_millis_is_strictly_increasing() {
        let stamps: Vec<i64> = (0..1000).map(|_| unique_millis()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_destination_dir_separators() {
        let framework = Properties::new();
        let config = CopierConfig::default();

        let node = NodeTarget::new("n", "h").with_attribute(FILE_COPY_DESTINATION_DIR, "E:");
        let resolver = CredentialResolver::new(&node, None, &framework);
        assert_eq!(RemotePathBuilder::new(&node, &config).destination_dir(&resolver), r"E:\");

        let node = NodeTarget::new("n", "h").with_attribute(FILE_COPY_DESTINATION_DIR, "/var/tmp");
        let resolver = CredentialResolver::new(&node, None, &framework);
        assert_eq!(RemotePathBuilder::new(&node, &config).destination_dir(&resolver), "/var/tmp/");

        let node = NodeTarget::new("n", "h");
        let resolver = CredentialResolver::new(&node, None, &framework);
        assert_eq!(RemotePathBuilder::new(&node, &config).destination_dir(&resolver), "/tmp/");
    }
}
