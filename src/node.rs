/*!
 * Target node model
 */

use std::collections::BTreeMap;

/// OS family attribute value for Windows nodes
pub const OS_FAMILY_WINDOWS: &str = "windows";

/// A remote node as described by the inventory
///
/// `hostname` may carry a user prefix (`admin@winnode01`) and a port suffix
/// (`winnode01:4455`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTarget {
    pub nodename: String,
    pub hostname: String,
    pub username: Option<String>,
    pub os_family: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl NodeTarget {
    pub fn new(nodename: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            nodename: nodename.into(),
            hostname: hostname.into(),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_os_family(mut self, os_family: impl Into<String>) -> Self {
        self.os_family = Some(os_family.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// True when the hostname carries a `user@` prefix
    pub fn contains_user_name(&self) -> bool {
        self.hostname.contains('@')
    }

    /// User declared for this node: the hostname prefix wins over the
    /// `username` field. Blank values count as undeclared.
    pub fn declared_username(&self) -> Option<String> {
        let raw = match self.hostname.split_once('@') {
            Some((user, _)) => Some(user),
            None => self.username.as_deref(),
        };
        non_blank(raw)
    }

    /// Hostname without user prefix or port
    pub fn host(&self) -> &str {
        let host = self.host_with_port();
        match host.rsplit_once(':') {
            Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => name,
            _ => host,
        }
    }

    /// Port suffix of the hostname, if any
    pub fn port(&self) -> Option<u16> {
        self.host_with_port()
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }

    fn host_with_port(&self) -> &str {
        match self.hostname.split_once('@') {
            Some((_, host)) => host,
            None => &self.hostname,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os_family
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case(OS_FAMILY_WINDOWS))
    }
}

/// Trimmed value, or `None` when blank
pub(crate) fn non_blank(input: Option<&str>) -> Option<String> {
    input
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
