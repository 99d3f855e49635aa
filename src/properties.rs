/*!
 * Project and framework property sources
 */

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{CopierError, Result};

/// Prefix of project-scoped property keys
pub const PROJ_PROP_PREFIX: &str = "project.";

/// Prefix of framework-wide property keys
pub const FWK_PROP_PREFIX: &str = "framework.";

/// Read-only key/value lookup
pub trait PropertySource: Send + Sync {
    fn property(&self, key: &str) -> Option<&str>;

    fn has_property(&self, key: &str) -> bool {
        self.property(key).is_some()
    }
}

/// A flat set of properties
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `key=value` / `key: value` lines.
    ///
    /// Lines starting with `#` or `!` are comments. A trailing backslash joins
    /// the next line.
    pub fn parse(text: &str) -> Self {
        let mut props = Self::new();
        let mut pending = String::new();

        for line in text.lines() {
            let line = line.trim_start();
            if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }
            if let Some(head) = line.strip_suffix('\\') {
                pending.push_str(head);
                continue;
            }
            pending.push_str(line);
            props.insert_entry(&std::mem::take(&mut pending));
        }
        if !pending.is_empty() {
            props.insert_entry(&pending);
        }

        props
    }

    fn insert_entry(&mut self, entry: &str) {
        let (key, value) = match entry.find(['=', ':']) {
            Some(ix) => (&entry[..ix], &entry[ix + 1..]),
            None => (entry, ""),
        };
        self.set(key.trim(), value.trim());
    }

    /// Load a properties file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CopierError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&text))
    }
}

impl PropertySource for Properties {
    fn property(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Framework-wide properties plus per-project property sets
#[derive(Debug, Clone, Default)]
pub struct Framework {
    properties: Properties,
    projects: HashMap<String, Properties>,
}

impl Framework {
    pub fn new(properties: Properties) -> Self {
        Self {
            properties,
            projects: HashMap::new(),
        }
    }

    pub fn with_project(mut self, name: impl Into<String>, properties: Properties) -> Self {
        self.projects.insert(name.into(), properties);
        self
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Properties of `project`, if the project is known
    pub fn project(&self, project: &str) -> Option<&Properties> {
        self.projects.get(project)
    }

    pub fn project_mut(&mut self, project: &str) -> &mut Properties {
        self.projects.entry(project.to_string()).or_default()
    }

    pub fn project_property(&self, project: &str, key: &str) -> Option<&str> {
        self.project(project).and_then(|p| p.property(key))
    }
}

impl PropertySource for Framework {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties.property(key)
    }
}
