//! SMB2/3 sessions over the `smb` crate
//!
//! Only the calls the copier needs: tree connect, create-if-absent, a
//! truncating write stream and a size query.

use crate::protocols::smb::{error::SmbError, types::*, SmbWriter};
use async_trait::async_trait;
use std::str::FromStr;

use smb::connection::EncryptionMode;
use smb::{
    Client, ClientConfig, CreateDisposition, File, FileAccessMask, FileCreateArgs, GetLen, Resource,
    UncPath, WriteAt,
};

/// One tree connection to `\\host\share`
pub struct NativeSmbClient {
    client: Client,
    target: SmbTarget,
    connected: bool,
}

impl NativeSmbClient {
    /// Open a session and connect the share named by `t`
    pub async fn new(t: &SmbTarget) -> Result<Self, SmbError> {
        tracing::debug!(
            host = %t.host,
            share = %t.share,
            port = t.port(),
            security = ?t.security,
            "opening SMB session"
        );

        Self::check_target(t)?;
        resolve_host(&t.host, t.port()).await?;

        let mut config = ClientConfig::default();
        config.connection.port = Some(t.port());
        config.connection.encryption_mode = encryption_mode(t.security);
        let client = Client::new(config);

        let mut session = Self {
            client,
            target: t.clone(),
            connected: false,
        };
        session.tree_connect().await?;
        Ok(session)
    }

    fn check_target(t: &SmbTarget) -> Result<(), SmbError> {
        match (t.host.trim().is_empty(), t.share.trim().is_empty()) {
            (true, _) => Err(SmbError::InvalidPath("no host in SMB target".to_string())),
            (_, true) => Err(SmbError::InvalidPath(format!("no share on {}", t.host))),
            _ => Ok(()),
        }
    }

    async fn tree_connect(&mut self) -> Result<(), SmbError> {
        let root = self.target.unc_root();
        let unc = UncPath::from_str(&root).map_err(|_| SmbError::InvalidPath(root.clone()))?;
        let (username, password) = self.target.auth.session_credentials();

        if let Err(e) = self.client.share_connect(&unc, &username, password).await {
            tracing::debug!(share = %root, error = %e, "tree connect rejected");
            return Err(from_smb(e, &root));
        }

        self.connected = true;
        tracing::debug!(share = %root, user = %username, "tree connected");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), SmbError> {
        if self.connected {
            Ok(())
        } else {
            Err(SmbError::Connection("not connected".to_string()))
        }
    }

    fn unc_for(&self, rel: &str) -> Result<UncPath, SmbError> {
        let rel = rel.trim_start_matches(['/', '\\']).replace('/', "\\");
        let full = format!(r"{}\{}", self.target.unc_root(), rel);
        UncPath::from_str(&full).map_err(|_| SmbError::InvalidPath(full))
    }

    async fn open_file(&self, rel: &str, args: &FileCreateArgs) -> Result<File, SmbError> {
        let unc = self.unc_for(rel)?;
        let resource = self
            .client
            .create_file(&unc, args)
            .await
            .map_err(|e| from_smb(e, rel))?;

        match resource {
            Resource::File(f) => Ok(f),
            _ => Err(SmbError::InvalidPath(format!("{} is not a file", rel))),
        }
    }
}

/// Fail early with `UnknownHost` instead of an opaque transport error
async fn resolve_host(host: &str, port: u16) -> Result<(), SmbError> {
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) if addrs.next().is_some() => Ok(()),
        _ => Err(SmbError::UnknownHost(host.to_string())),
    }
}

fn encryption_mode(security: SmbSecurity) -> EncryptionMode {
    match security {
        SmbSecurity::Opportunistic => EncryptionMode::Allowed,
        SmbSecurity::RequireEncryption => EncryptionMode::Required,
        // SMB 3.x sessions stay signed
        SmbSecurity::SignOnly => EncryptionMode::Disabled,
    }
}

/// Map an `smb` crate failure for `path` onto the copier's error kinds
fn from_smb(err: smb::Error, path: &str) -> SmbError {
    match err {
        smb::Error::ReceivedErrorMessage(status, _) | smb::Error::UnexpectedMessageStatus(status) => {
            SmbError::from_status(status, path)
        }
        smb::Error::IoError(e) => SmbError::from_io(e),
        other => SmbError::Protocol(format!("{}: {}", path, other)),
    }
}

fn write_access() -> FileAccessMask {
    FileAccessMask::new().with_generic_write(true)
}

#[async_trait]
impl super::SmbClient for NativeSmbClient {
    async fn create_if_absent(&self, rel: &str) -> Result<bool, SmbError> {
        self.ensure_connected()?;

        match self
            .open_file(rel, &FileCreateArgs::make_open_existing(write_access()))
            .await
        {
            Ok(file) => {
                file.close().await.ok();
                return Ok(false);
            }
            Err(SmbError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        // exclusive create: never truncates, loses a race to another creator
        let create_new = FileCreateArgs {
            disposition: CreateDisposition::Create,
            ..FileCreateArgs::make_create_always(write_access())
        };
        match self.open_file(rel, &create_new).await {
            Ok(file) => {
                file.close().await.ok();
                Ok(true)
            }
            Err(SmbError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn open_write(&self, rel: &str) -> Result<Box<dyn SmbWriter>, SmbError> {
        self.ensure_connected()?;

        let file = self
            .open_file(rel, &FileCreateArgs::make_create_always(write_access()))
            .await?;

        Ok(Box::new(NativeSmbWriter {
            file: Some(file),
            offset: 0,
            rel: rel.to_string(),
        }))
    }

    async fn metadata(&self, rel: &str) -> Result<SmbMetadata, SmbError> {
        self.ensure_connected()?;

        let unc = self.unc_for(rel)?;
        let read_only = FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true));
        let resource = match self.client.create_file(&unc, &read_only).await {
            Ok(resource) => resource,
            Err(e) => {
                tracing::debug!(path = rel, error = %e, "size query failed");
                return Err(from_smb(e, rel));
            }
        };

        let meta = match resource {
            Resource::File(f) => {
                let size = f.get_len().await.map_err(|e| from_smb(e, rel));
                f.close().await.ok();
                SmbMetadata { size: size?, is_dir: false }
            }
            Resource::Directory(d) => {
                d.close().await.ok();
                SmbMetadata { size: 0, is_dir: true }
            }
            Resource::Pipe(p) => {
                p.close().await.ok();
                SmbMetadata { size: 0, is_dir: false }
            }
        };
        Ok(meta)
    }

    async fn disconnect(&mut self) -> Result<(), SmbError> {
        if self.connected {
            tracing::debug!(share = %self.target.unc_root(), "logging off");
        }
        // session teardown happens when `client` drops
        self.connected = false;
        Ok(())
    }
}

/// Write stream over an open `smb::File`
struct NativeSmbWriter {
    file: Option<File>,
    offset: u64,
    rel: String,
}

#[async_trait]
impl SmbWriter for NativeSmbWriter {
    async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), SmbError> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| SmbError::Closed(self.rel.clone()))?;

        while !buf.is_empty() {
            let written = file
                .write_at(buf, self.offset)
                .await
                .map_err(|e| from_smb(e, &self.rel))?;
            if written == 0 {
                return Err(SmbError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("server accepted no bytes for {}", self.rel),
                )));
            }
            self.offset += written as u64;
            buf = &buf[written..];
        }

        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SmbError> {
        // write_at completes only once the server acknowledged the data
        if self.file.is_none() {
            return Err(SmbError::Closed(self.rel.clone()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SmbError> {
        match self.file.take() {
            Some(file) => file.close().await.map_err(|e| from_smb(e, &self.rel)),
            None => Ok(()),
        }
    }
}
