//! Credential resolution
//!
//! Settings are looked up in layers, first match wins:
//!
//! 1. node attribute `<key>`
//! 2. project property `project.<key>` (ignored when empty)
//! 3. framework property `framework.<key>` (used even when empty)
//! 4. the caller's default

use secrecy::SecretString;
use std::fmt;

use crate::config::PasswordLookupPolicy;
use crate::context::ExecutionContext;
use crate::error::{CopierError, Result};
use crate::node::{non_blank, NodeTarget};
use crate::properties::{Framework, PropertySource, FWK_PROP_PREFIX, PROJ_PROP_PREFIX};
use crate::protocols::smb::SmbAuth;
use crate::secrets::StoragePath;

/// Key of the SMB user name setting
pub const JCIFS_USER: &str = "jcifs-user";

/// Key of the password storage path setting
pub const JCIFS_PASSWORD_STORAGE_PATH: &str = "jcifs-password-storage-path";

/// Key of the NTLM domain setting
pub const JCIFS_DOMAIN: &str = "jcifs-domain";

/// One place a setting can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    NodeAttribute,
    ProjectProperty,
    FrameworkProperty,
}

impl Layer {
    /// Lookup order used by the copier
    pub const DEFAULT_ORDER: [Layer; 3] = [
        Layer::NodeAttribute,
        Layer::ProjectProperty,
        Layer::FrameworkProperty,
    ];
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::NodeAttribute => write!(f, "node"),
            Layer::ProjectProperty => write!(f, "project"),
            Layer::FrameworkProperty => write!(f, "framework"),
        }
    }
}

/// Resolves settings for one node within one project
pub struct CredentialResolver<'a> {
    node: &'a NodeTarget,
    project: Option<&'a dyn PropertySource>,
    framework: &'a dyn PropertySource,
    layers: &'a [Layer],
}

impl<'a> CredentialResolver<'a> {
    pub fn new(
        node: &'a NodeTarget,
        project: Option<&'a dyn PropertySource>,
        framework: &'a dyn PropertySource,
    ) -> Self {
        Self {
            node,
            project,
            framework,
            layers: &Layer::DEFAULT_ORDER,
        }
    }

    /// Resolver for `project` of `framework`
    pub fn for_project(node: &'a NodeTarget, framework: &'a Framework, project: &str) -> Self {
        Self::new(
            node,
            framework.project(project).map(|p| p as &dyn PropertySource),
            framework,
        )
    }

    /// Replace the lookup order
    pub fn with_layers(mut self, layers: &'a [Layer]) -> Self {
        self.layers = layers;
        self
    }

    fn lookup(&self, layer: Layer, key: &str) -> Option<&'a str> {
        match layer {
            Layer::NodeAttribute => self.node.attribute(key),
            Layer::ProjectProperty => self
                .project
                .and_then(|p| p.property(&format!("{}{}", PROJ_PROP_PREFIX, key)))
                .filter(|v| !v.is_empty()),
            Layer::FrameworkProperty => self
                .framework
                .property(&format!("{}{}", FWK_PROP_PREFIX, key)),
        }
    }

    /// The value and the layer it came from
    pub fn resolve_with_layer(&self, key: &str) -> Option<(String, Layer)> {
        self.layers
            .iter()
            .find_map(|&layer| self.lookup(layer, key).map(|v| (v.to_string(), layer)))
    }

    /// First match for `key`, else `default`
    pub fn resolve(&self, key: &str, default: Option<&str>) -> Option<String> {
        match self.resolve_with_layer(key) {
            Some((value, layer)) => {
                tracing::trace!(key, %layer, "resolved setting");
                Some(value)
            }
            None => default.map(str::to_string),
        }
    }

    /// SMB user: the node's declared user, else the `jcifs-user` setting
    pub fn username(&self) -> Option<String> {
        if self.node.declared_username().is_some() || self.node.contains_user_name() {
            self.node.declared_username()
        } else {
            self.resolve(JCIFS_USER, None)
        }
    }

    pub fn domain(&self) -> Option<String> {
        non_blank(self.resolve(JCIFS_DOMAIN, None).as_deref())
    }

    /// Look up the password in the secret store.
    ///
    /// `Ok(None)` when no storage path is configured. A configured path that
    /// cannot be read is a [`CopierError::Configuration`].
    pub async fn password(&self, context: &ExecutionContext) -> Result<Option<SecretString>> {
        let Some(mut storage_path) = self.resolve(JCIFS_PASSWORD_STORAGE_PATH, None) else {
            return Ok(None);
        };

        if storage_path.contains("${") {
            storage_path = context.data_context().expand(&storage_path);
        }

        let path = StoragePath::parse(&storage_path).map_err(|source| {
            CopierError::Configuration {
                storage_path: storage_path.clone(),
                source,
            }
        })?;
        tracing::debug!(storage_path = %path, "reading password from key storage");

        let content = context
            .storage()
            .get(&path)
            .await
            .map_err(|source| CopierError::Configuration {
                storage_path: storage_path.clone(),
                source,
            })?;

        let text = String::from_utf8_lossy(&content).into_owned();
        Ok(Some(SecretString::new(text.into_boxed_str())))
    }

    /// Resolve user, domain and password for one transfer
    pub async fn credential(
        &self,
        context: &ExecutionContext,
        policy: PasswordLookupPolicy,
    ) -> Result<ResolvedCredential> {
        let mut domain = self.domain();
        let mut username = self.username();

        if domain.is_none() {
            if let Some((dom, user)) = username.as_deref().and_then(|u| u.split_once('\\')) {
                if !dom.is_empty() && !user.is_empty() {
                    domain = Some(dom.to_string());
                    username = Some(user.to_string());
                }
            }
        }

        let password = match self.password(context).await {
            Ok(password) => password,
            Err(e) if policy == PasswordLookupPolicy::ProceedWithoutPassword => {
                tracing::warn!(error = %e, "continuing without password");
                None
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            node = %self.node.nodename,
            username = username.as_deref().unwrap_or("<none>"),
            domain = domain.as_deref().unwrap_or("<none>"),
            password = password.is_some(),
            "credential resolved"
        );

        Ok(ResolvedCredential {
            domain,
            username,
            password,
        })
    }
}

/// Credentials for one transfer; never cached
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl ResolvedCredential {
    /// NTLM authentication context for the session
    pub fn to_auth(&self) -> SmbAuth {
        SmbAuth::ntlm(
            self.domain.clone(),
            self.username.clone(),
            self.password.clone(),
        )
    }
}
