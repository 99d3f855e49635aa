/*!
 * File copier entry points
 *
 * Every copy runs the same pipeline: stage the payload locally, resolve the
 * credential, compute the remote path, upload, remove the staged file and
 * hand back the remote path.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::config::CopierConfig;
use crate::context::ExecutionContext;
use crate::credentials::{CredentialResolver, JCIFS_PASSWORD_STORAGE_PATH};
use crate::error::{CopierError, CopyFailure, Result, PLUGIN_ID};
use crate::node::NodeTarget;
use crate::properties::{Framework, Properties, PropertySource, PROJ_PROP_PREFIX};
use crate::protocols::smb::{NativeConnector, SmbConnector};
use crate::remote_path::RemotePathBuilder;
use crate::staging::{Payload, StagedPayload, TempFileManager};
use crate::transfer::SmbTransferEngine;

/// Name of the plugin-level password storage option
pub const CONFIG_PASSWORD_STORAGE_PATH: &str = "passwordStoragePath";

/// Copies payloads to remote nodes and returns the remote path
///
/// Implementors provide [`FileCopier::copy`]; the file, stream and script
/// variants funnel into it.
#[async_trait]
pub trait FileCopier: Send + Sync {
    async fn copy(
        &self,
        context: &ExecutionContext,
        payload: Payload,
        node: &NodeTarget,
        destination: Option<&str>,
    ) -> std::result::Result<String, CopyFailure>;

    async fn copy_file(
        &self,
        context: &ExecutionContext,
        file: &Path,
        node: &NodeTarget,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::file(file), node, None).await
    }

    async fn copy_file_to(
        &self,
        context: &ExecutionContext,
        file: &Path,
        node: &NodeTarget,
        destination: &str,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::file(file), node, Some(destination))
            .await
    }

    async fn copy_stream(
        &self,
        context: &ExecutionContext,
        input: Box<dyn AsyncRead + Send + Unpin>,
        node: &NodeTarget,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::Stream(input), node, None).await
    }

    async fn copy_stream_to(
        &self,
        context: &ExecutionContext,
        input: Box<dyn AsyncRead + Send + Unpin>,
        node: &NodeTarget,
        destination: &str,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::Stream(input), node, Some(destination))
            .await
    }

    async fn copy_script(
        &self,
        context: &ExecutionContext,
        script: &str,
        node: &NodeTarget,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::script(script), node, None).await
    }

    async fn copy_script_to(
        &self,
        context: &ExecutionContext,
        script: &str,
        node: &NodeTarget,
        destination: &str,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::script(script), node, Some(destination))
            .await
    }
}

/// SMB/CIFS file copier
#[derive(Clone)]
pub struct CifsFileCopier {
    framework: Arc<Framework>,
    config: CopierConfig,
    connector: Arc<dyn SmbConnector>,
    staging: TempFileManager,
}

impl CifsFileCopier {
    /// Copier using the native SMB client
    pub fn new(framework: Arc<Framework>, config: CopierConfig) -> Self {
        let staging = TempFileManager::new(config.temp_dir.clone());
        Self {
            framework,
            config,
            connector: Arc::new(NativeConnector),
            staging,
        }
    }

    /// Replace the SMB connector
    pub fn with_connector(mut self, connector: Arc<dyn SmbConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &CopierConfig {
        &self.config
    }

    pub fn framework(&self) -> &Framework {
        &self.framework
    }

    #[tracing::instrument(
        name = "jcifs_copy",
        skip_all,
        fields(node = %node.nodename, payload = payload.kind(), project = context.project())
    )]
    async fn run(
        &self,
        context: &ExecutionContext,
        payload: Payload,
        node: &NodeTarget,
        destination: Option<&str>,
    ) -> Result<String> {
        tracing::debug!(destination, "copy requested");

        let staged = self.staging.materialize(payload).await?;
        let outcome = self.upload(context, &staged, node, destination).await;
        self.staging.cleanup(staged);
        outcome
    }

    async fn upload(
        &self,
        context: &ExecutionContext,
        staged: &StagedPayload,
        node: &NodeTarget,
        destination: Option<&str>,
    ) -> Result<String> {
        let project = PluginOptions {
            properties: self.framework.project(context.project()),
            password_storage_path: self.config.password_storage_path.as_deref(),
        };
        let resolver = CredentialResolver::new(
            node,
            Some(&project as &dyn PropertySource),
            self.framework.as_ref(),
        );

        let remote = RemotePathBuilder::new(node, &self.config).build(
            &resolver,
            staged.base_name(),
            destination,
        )?;
        let credential = resolver
            .credential(context, self.config.password_lookup)
            .await?;

        tracing::debug!(
            local = %staged.path().display(),
            remote = remote.logical(),
            "copying file"
        );

        let mut engine =
            SmbTransferEngine::new(self.connector.as_ref(), &self.config).with_port(node.port());
        engine
            .transfer(remote.smb_url(), credential.to_auth(), staged.path())
            .await?;

        Ok(remote.into_logical())
    }
}

#[async_trait]
impl FileCopier for CifsFileCopier {
    async fn copy(
        &self,
        context: &ExecutionContext,
        payload: Payload,
        node: &NodeTarget,
        destination: Option<&str>,
    ) -> std::result::Result<String, CopyFailure> {
        self.run(context, payload, node, destination)
            .await
            .map_err(|e| {
                let failure = CopyFailure::from(e);
                tracing::error!(
                    node = %node.nodename,
                    reason = %failure.reason,
                    category = %failure.source.category(),
                    error = %failure,
                    "copy failed"
                );
                failure
            })
    }
}

impl std::fmt::Debug for CifsFileCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CifsFileCopier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Project properties with the plugin's `passwordStoragePath` option mapped
/// onto `project.jcifs-password-storage-path`
struct PluginOptions<'a> {
    properties: Option<&'a Properties>,
    password_storage_path: Option<&'a str>,
}

impl PropertySource for PluginOptions<'_> {
    fn property(&self, key: &str) -> Option<&str> {
        let own = self.properties.and_then(|p| p.property(key));
        match key.strip_prefix(PROJ_PROP_PREFIX) {
            Some(JCIFS_PASSWORD_STORAGE_PATH) => own
                .filter(|v| !v.trim().is_empty())
                .or(self.password_storage_path),
            _ => own,
        }
    }
}

/// Blocking front end for synchronous callers
///
/// Each call runs the async pipeline to completion on a private
/// current-thread runtime. Must not be called from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct BlockingFileCopier {
    inner: CifsFileCopier,
}

impl BlockingFileCopier {
    pub fn new(inner: CifsFileCopier) -> Self {
        Self { inner }
    }

    pub fn copy(
        &self,
        context: &ExecutionContext,
        payload: Payload,
        node: &NodeTarget,
        destination: Option<&str>,
    ) -> std::result::Result<String, CopyFailure> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CopyFailure::from(CopierError::Staging(e)))?;
        runtime.block_on(self.inner.copy(context, payload, node, destination))
    }

    pub fn copy_file(
        &self,
        context: &ExecutionContext,
        file: impl Into<PathBuf>,
        node: &NodeTarget,
        destination: Option<&str>,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::file(file), node, destination)
    }

    pub fn copy_script(
        &self,
        context: &ExecutionContext,
        script: &str,
        node: &NodeTarget,
        destination: Option<&str>,
    ) -> std::result::Result<String, CopyFailure> {
        self.copy(context, Payload::script(script), node, destination)
    }

    pub fn into_inner(self) -> CifsFileCopier {
        self.inner
    }
}

/// One configurable plugin property
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyDescription {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub rendering_options: BTreeMap<&'static str, &'static str>,
}

/// Plugin metadata shown to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescription {
    pub name: &'static str,
    pub service: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub properties: Vec<PropertyDescription>,
    /// Plugin property name to project property key
    pub mappings: BTreeMap<&'static str, String>,
}

/// Describe the copier plugin
pub fn describe() -> PluginDescription {
    let rendering_options = BTreeMap::from([
        ("selectionAccessor", "STORAGE_PATH"),
        ("storage-path-root", "keys"),
        ("storage-file-meta-filter", "Rundeck-data-type=password"),
    ]);

    PluginDescription {
        name: PLUGIN_ID,
        service: "FileCopier",
        title: "JCIFS",
        description: "Copies a script file to a remote node via CIFS.",
        properties: vec![PropertyDescription {
            name: CONFIG_PASSWORD_STORAGE_PATH,
            title: "Password Storage",
            description: "Key Storage Path for the CIFS password.\n\n\
                          The path can contain property references like `${node.name}`.",
            required: false,
            rendering_options,
        }],
        mappings: BTreeMap::from([(
            CONFIG_PASSWORD_STORAGE_PATH,
            format!("{}{}", PROJ_PROP_PREFIX, JCIFS_PASSWORD_STORAGE_PATH),
        )]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use crate::error::FailureReason;
    use crate::protocols::smb::MemorySmbServer;
    use crate::secrets::MemorySecretStore;
    use tempfile::tempdir;

    struct Fixture {
        server: MemorySmbServer,
        store: MemorySecretStore,
        temp: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                server: MemorySmbServer::new(),
                store: MemorySecretStore::new(),
                temp: tempdir().unwrap(),
            }
        }

        fn copier(&self, framework: Framework, mut config: CopierConfig) -> CifsFileCopier {
            config.temp_dir = Some(self.temp.path().to_path_buf());
            CifsFileCopier::new(Arc::new(framework), config)
                .with_connector(Arc::new(self.server.clone()))
        }

        fn context(&self, node: &NodeTarget) -> ExecutionContext {
            ExecutionContext::new(
                "ops",
                DataContext::new().with_node(node),
                Arc::new(self.store.clone()),
            )
        }

        fn staged_files(&self) -> usize {
            std::fs::read_dir(self.temp.path()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn test_script_round_trip_with_explicit_destination() {
        let fx = Fixture::new();
        let node = NodeTarget::new("web1", "winnode01").with_os_family("windows");
        let copier = fx.copier(Framework::default(), CopierConfig::default());

        let remote = copier
            .copy_script_to(&fx.context(&node), "@echo off\r\necho hi\r\n", &node, r"D:\scripts\run.bat")
            .await
            .unwrap();

        assert_eq!(remote, r"D:\scripts\run.bat");
        assert_eq!(
            fx.server.file("winnode01", "D$", r"scripts\run.bat"),
            Some(b"@echo off\r\necho hi\r\n".to_vec())
        );
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_stream_default_destination() {
        let fx = Fixture::new();
        let node = NodeTarget::new("web1", "winnode01").with_os_family("windows");
        let copier = fx.copier(Framework::default(), CopierConfig::default());

        let remote = copier
            .copy_stream(
                &fx.context(&node),
                Box::new(std::io::Cursor::new(b"payload".to_vec())),
                &node,
            )
            .await
            .unwrap();

        assert!(remote.starts_with(r"C:\WINDOWS\TEMP\"), "{}", remote);
        assert!(remote.ends_with("-web1-dispatch-script"), "{}", remote);
        let rel = remote.trim_start_matches(r"C:\");
        assert_eq!(fx.server.file("winnode01", "C$", rel), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_plugin_password_option_maps_to_project() {
        let fx = Fixture::new();
        fx.store.insert("keys/web1/password", "pw").unwrap();
        fx.server.require_credentials("winnode01", "svc", "pw");

        let node = NodeTarget::new("web1", "winnode01").with_username("svc");
        let config = CopierConfig {
            password_storage_path: Some("keys/${node.name}/password".to_string()),
            ..CopierConfig::default()
        };
        let copier = fx.copier(Framework::default(), config);

        copier
            .copy_script_to(&fx.context(&node), "x", &node, r"C:\x.bat")
            .await
            .unwrap();
        assert_eq!(fx.store.lookups()[0].as_str(), "keys/web1/password");
    }

    #[tokio::test]
    async fn test_project_property_beats_plugin_option() {
        let fx = Fixture::new();
        fx.store.insert("keys/project", "pw").unwrap();

        let framework = Framework::default().with_project(
            "ops",
            Properties::new().with("project.jcifs-password-storage-path", "keys/project"),
        );
        let config = CopierConfig {
            password_storage_path: Some("keys/plugin".to_string()),
            ..CopierConfig::default()
        };
        let node = NodeTarget::new("web1", "winnode01");
        let copier = fx.copier(framework, config);

        copier
            .copy_script_to(&fx.context(&node), "x", &node, r"C:\x.bat")
            .await
            .unwrap();
        assert_eq!(fx.store.lookups()[0].as_str(), "keys/project");
    }

    #[tokio::test]
    async fn test_blank_project_property_falls_back_to_plugin_option() {
        let fx = Fixture::new();
        fx.store.insert("keys/plugin", "pw").unwrap();

        let framework = Framework::default().with_project(
            "ops",
            Properties::new().with("project.jcifs-password-storage-path", ""),
        );
        let config = CopierConfig {
            password_storage_path: Some("keys/plugin".to_string()),
            ..CopierConfig::default()
        };
        let node = NodeTarget::new("web1", "winnode01");
        let copier = fx.copier(framework, config);

        copier
            .copy_script_to(&fx.context(&node), "x", &node, r"C:\x.bat")
            .await
            .unwrap();
        assert_eq!(fx.store.lookups()[0].as_str(), "keys/plugin");
    }

    #[tokio::test]
    async fn test_rejected_destination_reads_no_secret() {
        let fx = Fixture::new();
        fx.store.insert("keys/pw", "pw").unwrap();
        let node = NodeTarget::new("web1", "winnode01")
            .with_attribute(JCIFS_PASSWORD_STORAGE_PATH, "keys/pw");
        let copier = fx.copier(Framework::default(), CopierConfig::default());

        let failure = copier
            .copy_script_to(&fx.context(&node), "x", &node, "   ")
            .await
            .unwrap_err();

        assert!(matches!(failure.source, CopierError::InvalidRequest(_)));
        assert!(fx.store.lookups().is_empty());
        assert!(fx.server.sessions().is_empty());
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_with_configuration_reason() {
        let fx = Fixture::new();
        let node = NodeTarget::new("web1", "winnode01")
            .with_attribute(JCIFS_PASSWORD_STORAGE_PATH, "keys/missing");
        let copier = fx.copier(Framework::default(), CopierConfig::default());

        let failure = copier
            .copy_script(&fx.context(&node), "x", &node)
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::ConfigurationFailure);
        assert!(failure
            .to_string()
            .starts_with("[jcifs] Failed copying the file: "));
        assert!(fx.server.sessions().is_empty());
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_reason() {
        let fx = Fixture::new();
        fx.server.add_unknown_host("ghost");
        let node = NodeTarget::new("ghost", "ghost");
        let copier = fx.copier(Framework::default(), CopierConfig::default());

        let failure = copier
            .copy_script(&fx.context(&node), "x", &node)
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::ConnectionFailure);
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_node_port_is_used() {
        struct PortCheck(MemorySmbServer);

        #[async_trait]
        impl SmbConnector for PortCheck {
            async fn connect(
                &self,
                target: &crate::protocols::smb::SmbTarget,
            ) -> std::result::Result<Box<dyn crate::protocols::smb::SmbClient>, crate::protocols::smb::SmbError>
            {
                assert_eq!(target.port(), 4455);
                self.0.connect(target).await
            }
        }

        let fx = Fixture::new();
        let node = NodeTarget::new("web1", "admin@winnode01:4455");
        let copier = fx
            .copier(Framework::default(), CopierConfig::default())
            .with_connector(Arc::new(PortCheck(fx.server.clone())));

        copier
            .copy_script_to(&fx.context(&node), "x", &node, r"C:\x.bat")
            .await
            .unwrap();
        assert_eq!(fx.server.sessions()[0].host, "winnode01");
        assert_eq!(fx.server.sessions()[0].username.as_deref(), Some("admin"));
    }

    #[test]
    fn test_blocking_copier() {
        let fx = Fixture::new();
        let node = NodeTarget::new("web1", "winnode01");
        let copier = BlockingFileCopier::new(fx.copier(Framework::default(), CopierConfig::default()));

        let remote = copier
            .copy_script(&fx.context(&node), "echo sync", &node, Some(r"C:\sync.bat"))
            .unwrap();
        assert_eq!(remote, r"C:\sync.bat");
        assert_eq!(fx.server.file("winnode01", "C$", "sync.bat"), Some(b"echo sync".to_vec()));
    }

    #[test]
    fn test_describe() {
        let desc = describe();
        assert_eq!(desc.name, "jcifs");
        assert_eq!(desc.properties[0].name, "passwordStoragePath");
        assert_eq!(
            desc.mappings.get("passwordStoragePath").map(String::as_str),
            Some("project.jcifs-password-storage-path")
        );

        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["title"], "JCIFS");
    }
}
