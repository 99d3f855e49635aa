/*!
 * Per-execution context handed in by the orchestrator
 */

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::node::NodeTarget;
use crate::secrets::SecretStore;

static DATA_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([^${}\s]+)\}").expect("data reference pattern is valid")
});

/// Property values available for `${group.key}` expansion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataContext {
    values: BTreeMap<String, String>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add every entry of `values` as `group.<key>`
    pub fn with_group<I, K, V>(mut self, group: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (k, v) in values {
            self.insert(format!("{}.{}", group, k.as_ref()), v);
        }
        self
    }

    /// Add the `node.*` group for `node`
    pub fn with_node(self, node: &NodeTarget) -> Self {
        let mut ctx = self
            .with("node.name", node.nodename.clone())
            .with("node.hostname", node.hostname.clone());
        if let Some(user) = node.declared_username() {
            ctx.insert("node.username", user);
        }
        if let Some(os) = &node.os_family {
            ctx.insert("node.os-family", os.clone());
        }
        ctx.with_group("node", node.attributes.iter().map(|(k, v)| (k, v.clone())))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every `${key}` with its value. Unknown references are left as
    /// written.
    ///
    /// ```
    /// use cifs_copier::context::DataContext;
    ///
    /// let ctx = DataContext::new().with("node.name", "web1");
    /// assert_eq!(ctx.expand("keys/${node.name}/${option.x}"), "keys/web1/${option.x}");
    /// ```
    pub fn expand(&self, template: &str) -> String {
        DATA_REFERENCE
            .replace_all(template, |caps: &Captures<'_>| match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Execution state of one workflow step
#[derive(Clone)]
pub struct ExecutionContext {
    project: String,
    data_context: DataContext,
    storage: Arc<dyn SecretStore>,
}

impl ExecutionContext {
    pub fn new(
        project: impl Into<String>,
        data_context: DataContext,
        storage: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            project: project.into(),
            data_context,
            storage,
        }
    }

    /// Name of the project the step runs in
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn data_context(&self) -> &DataContext {
        &self.data_context
    }

    pub fn storage(&self) -> &dyn SecretStore {
        self.storage.as_ref()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("project", &self.project)
            .field("data_context", &self.data_context)
            .finish_non_exhaustive()
    }
}
