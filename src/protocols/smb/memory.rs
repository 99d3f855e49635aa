//! In-memory SMB server
//!
//! Serves shares from memory through the same [`SmbConnector`] seam the native
//! client uses. Useful for dry runs and for exercising the copy pipeline
//! without a Windows host.

use super::{ntstatus, SmbAuth, SmbClient, SmbConnector, SmbError, SmbMetadata, SmbTarget, SmbWriter};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

type ShareKey = (String, String);

/// One accepted session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub host: String,
    pub share: String,
    /// `None` for anonymous sessions
    pub username: Option<String>,
    pub domain: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default)]
struct ServerState {
    files: HashMap<ShareKey, HashMap<String, Vec<u8>>>,
    unknown_hosts: HashSet<String>,
    read_only: HashSet<ShareKey>,
    missing_dirs: HashSet<(ShareKey, String)>,
    refused_connects: u32,
    connect_calls: usize,
    credentials: HashMap<String, (String, String)>,
    sessions: Vec<SessionRecord>,
    fail_writes: bool,
    write_limit: Option<usize>,
    create_calls: usize,
}

/// Shared in-memory SMB server
///
/// # Example
///
/// ```
/// use cifs_copier::protocols::smb::{MemorySmbServer, SmbConnector, SmbTarget};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = MemorySmbServer::new();
/// let target = SmbTarget { host: "node1".into(), share: "C$".into(), ..SmbTarget::default() };
/// let client = server.connect(&target).await?;
/// client.create_if_absent(r"temp\a.txt").await?;
/// assert_eq!(server.file("node1", "C$", r"temp\a.txt"), Some(Vec::new()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySmbServer {
    state: Arc<RwLock<ServerState>>,
}

impl MemorySmbServer {
    /// Create an empty server that accepts every host and any credentials
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&ServerState) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Make `host` fail name resolution
    pub fn add_unknown_host(&self, host: impl Into<String>) {
        self.write(|s| s.unknown_hosts.insert(host.into()));
    }

    /// Refuse the next `count` connections with a retryable error
    pub fn refuse_connects(&self, count: u32) {
        self.write(|s| s.refused_connects = count);
    }

    /// Deny file creation and writes on `share`
    pub fn set_read_only(&self, host: &str, share: &str) {
        self.write(|s| s.read_only.insert(share_key(host, share)));
    }

    /// Make `dir` absent on `share`, so files below it cannot be created
    pub fn remove_directory(&self, host: &str, share: &str, dir: &str) {
        self.write(|s| {
            s.missing_dirs
                .insert((share_key(host, share), normalize(dir).to_ascii_lowercase()))
        });
    }

    /// Require `username`/`password` for sessions to `host`
    pub fn require_credentials(
        &self,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) {
        self.write(|s| {
            s.credentials
                .insert(host.into(), (username.into(), password.into()))
        });
    }

    /// Fail every write after a stream has been opened
    pub fn fail_writes(&self, fail: bool) {
        self.write(|s| s.fail_writes = fail);
    }

    /// Silently keep only the first `limit` bytes of every stream
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.write(|s| s.write_limit = limit);
    }

    /// Seed a file
    pub fn add_file(&self, host: &str, share: &str, path: &str, data: &[u8]) {
        self.write(|s| {
            s.files
                .entry(share_key(host, share))
                .or_default()
                .insert(normalize(path), data.to_vec())
        });
    }

    /// Content of a file, if present
    pub fn file(&self, host: &str, share: &str, path: &str) -> Option<Vec<u8>> {
        self.read(|s| {
            s.files
                .get(&share_key(host, share))
                .and_then(|files| files.get(&normalize(path)).cloned())
        })
    }

    /// Sessions accepted so far, oldest first
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.read(|s| s.sessions.clone())
    }

    /// Number of connection attempts, accepted or not
    pub fn connect_calls(&self) -> usize {
        self.read(|s| s.connect_calls)
    }

    /// Number of files created by `create_if_absent`
    pub fn create_calls(&self) -> usize {
        self.read(|s| s.create_calls)
    }
}

fn share_key(host: &str, share: &str) -> ShareKey {
    (host.to_ascii_lowercase(), share.to_ascii_uppercase())
}

fn normalize(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
}

#[async_trait]
impl SmbConnector for MemorySmbServer {
    async fn connect(&self, target: &SmbTarget) -> Result<Box<dyn SmbClient>, SmbError> {
        if target.host.is_empty() {
            return Err(SmbError::InvalidPath("host cannot be empty".to_string()));
        }
        if target.share.is_empty() {
            return Err(SmbError::InvalidPath("share cannot be empty".to_string()));
        }

        let record = match &target.auth {
            SmbAuth::Anonymous => SessionRecord {
                host: target.host.clone(),
                share: target.share.clone(),
                username: None,
                domain: None,
                password: None,
            },
            SmbAuth::Ntlmv2 {
                domain,
                username,
                password,
            } => SessionRecord {
                host: target.host.clone(),
                share: target.share.clone(),
                username: Some(username.clone()),
                domain: domain.clone(),
                password: Some(password.expose_secret().to_string()),
            },
        };

        self.write(|s| {
            s.connect_calls += 1;
            if s.refused_connects > 0 {
                s.refused_connects -= 1;
                return Err(SmbError::Connection("connection refused".to_string()));
            }
            if s.unknown_hosts.contains(&target.host) {
                return Err(SmbError::UnknownHost(target.host.clone()));
            }
            if let Some((user, pass)) = s.credentials.get(&target.host) {
                let presented = (record.username.as_deref(), record.password.as_deref());
                if presented != (Some(user.as_str()), Some(pass.as_str())) {
                    return Err(SmbError::LogonFailure);
                }
            }
            s.sessions.push(record);
            Ok(())
        })?;

        Ok(Box::new(MemorySmbClient {
            server: self.clone(),
            key: share_key(&target.host, &target.share),
            connected: true,
        }))
    }
}

struct MemorySmbClient {
    server: MemorySmbServer,
    key: ShareKey,
    connected: bool,
}

impl MemorySmbClient {
    fn ensure_connected(&self) -> Result<(), SmbError> {
        if self.connected {
            Ok(())
        } else {
            Err(SmbError::Connection("not connected".to_string()))
        }
    }

    fn ensure_writable(&self, rel: &str) -> Result<(), SmbError> {
        let path = normalize(rel).to_ascii_lowercase();
        self.server.read(|s| {
            let parent_missing = s.missing_dirs.iter().any(|(key, dir)| {
                *key == self.key && path.starts_with(dir.as_str()) && path[dir.len()..].starts_with('\\')
            });
            if parent_missing {
                Err(SmbError::from_status(ntstatus::OBJECT_PATH_NOT_FOUND, rel))
            } else if s.read_only.contains(&self.key) {
                Err(SmbError::from_status(ntstatus::ACCESS_DENIED, rel))
            } else {
                Ok(())
            }
        })
    }
}

#[async_trait]
impl SmbClient for MemorySmbClient {
    async fn create_if_absent(&self, rel: &str) -> Result<bool, SmbError> {
        self.ensure_connected()?;
        let path = normalize(rel);
        if path.is_empty() {
            return Err(SmbError::InvalidPath(rel.to_string()));
        }
        self.ensure_writable(rel)?;

        Ok(self.server.write(|s| {
            let files = s.files.entry(self.key.clone()).or_default();
            if files.contains_key(&path) {
                false
            } else {
                files.insert(path, Vec::new());
                s.create_calls += 1;
                true
            }
        }))
    }

    async fn open_write(&self, rel: &str) -> Result<Box<dyn SmbWriter>, SmbError> {
        self.ensure_connected()?;
        let path = normalize(rel);
        if path.is_empty() {
            return Err(SmbError::InvalidPath(rel.to_string()));
        }
        self.ensure_writable(rel)?;

        self.server.write(|s| {
            s.files
                .entry(self.key.clone())
                .or_default()
                .insert(path.clone(), Vec::new())
        });

        Ok(Box::new(MemorySmbWriter {
            server: self.server.clone(),
            key: self.key.clone(),
            path,
            pending: Vec::new(),
            written: 0,
            closed: false,
        }))
    }

    async fn metadata(&self, rel: &str) -> Result<SmbMetadata, SmbError> {
        self.ensure_connected()?;
        let path = normalize(rel);
        self.server.read(|s| {
            s.files
                .get(&self.key)
                .and_then(|files| files.get(&path))
                .map(|data| SmbMetadata {
                    size: data.len() as u64,
                    is_dir: false,
                })
                .ok_or(SmbError::NotFound(rel.to_string()))
        })
    }

    async fn disconnect(&mut self) -> Result<(), SmbError> {
        self.connected = false;
        Ok(())
    }
}

/// Buffers writes until flush, like a client-side output stream
struct MemorySmbWriter {
    server: MemorySmbServer,
    key: ShareKey,
    path: String,
    pending: Vec<u8>,
    written: usize,
    closed: bool,
}

#[async_trait]
impl SmbWriter for MemorySmbWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), SmbError> {
        if self.closed {
            return Err(SmbError::Closed(self.path.clone()));
        }
        if self.server.read(|s| s.fail_writes) {
            return Err(SmbError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.pending.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SmbError> {
        if self.closed {
            return Err(SmbError::Closed(self.path.clone()));
        }
        let pending = std::mem::take(&mut self.pending);
        let written = self.written;
        let accepted = self.server.write(|s| {
            let keep = match s.write_limit {
                Some(limit) => limit.saturating_sub(written).min(pending.len()),
                None => pending.len(),
            };
            s.files
                .entry(self.key.clone())
                .or_default()
                .entry(self.path.clone())
                .or_default()
                .extend_from_slice(&pending[..keep]);
            keep
        });
        self.written += accepted;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SmbError> {
        if !self.closed {
            self.flush().await?;
            self.closed = true;
        }
        Ok(())
    }
}
