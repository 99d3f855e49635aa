/*!
 * SMB upload of one local file
 *
 * One transfer walks Unconnected -> FileEnsured -> StreamOpened -> Copying ->
 * Closed. Any failure moves the engine to Errored and is returned to the
 * caller with its cause attached.
 */

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config::CopierConfig;
use crate::error::{CopierError, Result};
use crate::protocols::smb::{SmbAuth, SmbClient, SmbConnector, SmbError, SmbTarget, SmbUrl, SmbWriter};

/// Progress of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Unconnected,
    FileEnsured,
    StreamOpened,
    Copying,
    Closed,
    Errored,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Unconnected => "unconnected",
            TransferState::FileEnsured => "file-ensured",
            TransferState::StreamOpened => "stream-opened",
            TransferState::Copying => "copying",
            TransferState::Closed => "closed",
            TransferState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    /// The remote file did not exist before
    pub created: bool,
    /// Connection attempts used
    pub attempts: u32,
    pub duration: Duration,
}

/// Uploads local files to SMB URLs
pub struct SmbTransferEngine<'a> {
    connector: &'a dyn SmbConnector,
    config: &'a CopierConfig,
    port: Option<u16>,
    state: TransferState,
}

impl<'a> SmbTransferEngine<'a> {
    pub fn new(connector: &'a dyn SmbConnector, config: &'a CopierConfig) -> Self {
        Self {
            connector,
            config,
            port: None,
            state: TransferState::Unconnected,
        }
    }

    /// Port to connect to; falls back to the configured port, then 445
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Copy `local` byte for byte to `smb_url`
    pub async fn transfer(
        &mut self,
        smb_url: &str,
        auth: SmbAuth,
        local: &Path,
    ) -> Result<TransferReport> {
        let started = Instant::now();
        self.state = TransferState::Unconnected;

        match self.run(smb_url, auth, local, started).await {
            Ok(report) => {
                tracing::info!(
                    url = smb_url,
                    bytes = report.bytes,
                    created = report.created,
                    attempts = report.attempts,
                    duration_ms = report.duration.as_millis() as u64,
                    "transfer complete"
                );
                Ok(report)
            }
            Err(e) => {
                let failed_in = self.state;
                self.state = TransferState::Errored;
                tracing::debug!(
                    url = smb_url,
                    state = %failed_in,
                    category = %e.category(),
                    "transfer aborted"
                );
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        smb_url: &str,
        auth: SmbAuth,
        local: &Path,
        started: Instant,
    ) -> Result<TransferReport> {
        let url = SmbUrl::parse(smb_url).map_err(|source| connection_error(smb_url, source))?;
        if url.path.is_empty() {
            return Err(connection_error(
                smb_url,
                SmbError::InvalidPath("URL names a share, not a file".to_string()),
            ));
        }

        let mut source = File::open(local).await.map_err(|e| local_read_error(local, e))?;

        let target = SmbTarget {
            host: url.host.clone(),
            share: url.share.clone(),
            port: self.port.or(self.config.port),
            auth,
            security: self.config.security,
        };
        let (mut client, attempts) = self.connect(smb_url, &target).await?;

        let outcome = self
            .upload(client.as_ref(), smb_url, &url.path, &mut source, local)
            .await;

        if let Err(e) = client.disconnect().await {
            tracing::warn!(url = smb_url, error = %e, "disconnect failed");
        }

        let (bytes, created) = outcome?;
        Ok(TransferReport {
            bytes,
            created,
            attempts,
            duration: started.elapsed(),
        })
    }

    /// Open a session, retrying retryable failures
    async fn connect(
        &self,
        smb_url: &str,
        target: &SmbTarget,
    ) -> Result<(Box<dyn SmbClient>, u32)> {
        let max_attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.connector.connect(target).await {
                Ok(client) => return Ok((client, attempt)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = Duration::from_millis(
                        self.config
                            .retry_delay_ms
                            .saturating_mul(1u64 << (attempt - 1).min(16)),
                    );
                    tracing::warn!(
                        url = smb_url,
                        attempt,
                        max_attempts,
                        error = %e,
                        "connect failed, retrying after {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(connection_error(smb_url, e)),
            }
        }
    }

    async fn upload(
        &mut self,
        client: &dyn SmbClient,
        smb_url: &str,
        rel: &str,
        source: &mut File,
        local: &Path,
    ) -> Result<(u64, bool)> {
        let created = client
            .create_if_absent(rel)
            .await
            .map_err(|e| connection_error(smb_url, e))?;
        self.state = TransferState::FileEnsured;

        let mut writer = client
            .open_write(rel)
            .await
            .map_err(|e| connection_error(smb_url, e))?;
        self.state = TransferState::StreamOpened;

        let bytes = match self.copy(writer.as_mut(), source, smb_url, local).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(close_err) = writer.close().await {
                    tracing::debug!(url = smb_url, error = %close_err, "close after failure");
                }
                return Err(e);
            }
        };

        writer.flush().await.map_err(|e| transfer_error(smb_url, e))?;
        writer.close().await.map_err(|e| transfer_error(smb_url, e))?;
        self.state = TransferState::Closed;

        if self.config.verify_remote_size {
            let meta = client
                .metadata(rel)
                .await
                .map_err(|e| transfer_error(smb_url, e))?;
            if meta.size != bytes {
                return Err(CopierError::Verification {
                    url: smb_url.to_string(),
                    expected: bytes,
                    actual: meta.size,
                });
            }
        }

        Ok((bytes, created))
    }

    async fn copy(
        &mut self,
        writer: &mut dyn SmbWriter,
        source: &mut File,
        smb_url: &str,
        local: &Path,
    ) -> Result<u64> {
        self.state = TransferState::Copying;
        let mut buf = vec![0u8; self.config.effective_chunk_size()];
        let mut total = 0u64;

        loop {
            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| local_read_error(local, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| transfer_error(smb_url, e))?;
            total += n as u64;
        }

        Ok(total)
    }
}

fn connection_error(url: &str, source: SmbError) -> CopierError {
    CopierError::Connection {
        url: url.to_string(),
        source,
    }
}

fn transfer_error(url: &str, source: SmbError) -> CopierError {
    CopierError::Transfer {
        url: url.to_string(),
        source,
    }
}

fn local_read_error(path: &Path, source: std::io::Error) -> CopierError {
    CopierError::LocalRead {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::smb::MemorySmbServer;
    use tempfile::NamedTempFile;

    fn local_file(content: &[u8]) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    fn fast_retry(attempts: u32) -> CopierConfig {
        CopierConfig {
            connect_attempts: attempts,
            retry_delay_ms: 1,
            ..CopierConfig::default()
        }
    }

    #[tokio::test]
    async fn test_binary_safe_upload() {
        let server = MemorySmbServer::new();
        let config = CopierConfig::default();
        let content: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let local = local_file(&content);

        let mut engine = SmbTransferEngine::new(&server, &config);
        let report = engine
            .transfer("smb://node1/C$/dir/file.bin", SmbAuth::Anonymous, local.path())
            .await
            .unwrap();

        assert_eq!(engine.state(), TransferState::Closed);
        assert_eq!(report.bytes, content.len() as u64);
        assert!(report.created);
        assert_eq!(report.attempts, 1);
        assert_eq!(server.file("node1", "C$", r"dir\file.bin"), Some(content));
    }

    #[tokio::test]
    async fn test_existing_remote_file_is_replaced() {
        let server = MemorySmbServer::new();
        server.add_file("node1", "C$", "run.bat", b"a much longer previous script body");
        let config = CopierConfig::default();
        let local = local_file(b"echo new\r\n");

        let report = SmbTransferEngine::new(&server, &config)
            .transfer("smb://node1/C$/run.bat", SmbAuth::Anonymous, local.path())
            .await
            .unwrap();

        assert!(!report.created);
        assert_eq!(server.file("node1", "C$", "run.bat"), Some(b"echo new\r\n".to_vec()));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let server = MemorySmbServer::new();
        let config = CopierConfig::default();
        let local = local_file(b"");

        let report = SmbTransferEngine::new(&server, &config)
            .transfer("smb://node1/C$/empty.txt", SmbAuth::Anonymous, local.path())
            .await
            .unwrap();
        assert_eq!(report.bytes, 0);
        assert_eq!(server.file("node1", "C$", "empty.txt"), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_unknown_host_is_connection_error() {
        let server = MemorySmbServer::new();
        server.add_unknown_host("ghost");
        let config = fast_retry(3);
        let local = local_file(b"x");

        let mut engine = SmbTransferEngine::new(&server, &config);
        let err = engine
            .transfer("smb://ghost/C$/x", SmbAuth::Anonymous, local.path())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CopierError::Connection { source: SmbError::UnknownHost(_), .. }
        ));
        assert_eq!(engine.state(), TransferState::Errored);
        // not retryable
        assert_eq!(server.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_url_is_connection_error() {
        let server = MemorySmbServer::new();
        let config = CopierConfig::default();
        let local = local_file(b"x");

        for url in ["node1/C$/x", "smb://node1/C$", "smb://node1/C$/../x"] {
            let err = SmbTransferEngine::new(&server, &config)
                .transfer(url, SmbAuth::Anonymous, local.path())
                .await
                .unwrap_err();
            assert!(matches!(err, CopierError::Connection { .. }), "{}", url);
        }
        assert_eq!(server.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_on_refused_connection() {
        let server = MemorySmbServer::new();
        server.refuse_connects(2);
        let local = local_file(b"payload");

        let config = fast_retry(3);
        let report = SmbTransferEngine::new(&server, &config)
            .transfer("smb://node1/C$/p.txt", SmbAuth::Anonymous, local.path())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);

        server.refuse_connects(2);
        let config = fast_retry(2);
        let err = SmbTransferEngine::new(&server, &config)
            .transfer("smb://node1/C$/p.txt", SmbAuth::Anonymous, local.path())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_create_failure_aborts_before_write() {
        let server = MemorySmbServer::new();
        server.set_read_only("node1", "C$");
        let config = CopierConfig::default();
        let local = local_file(b"x");

        let mut engine = SmbTransferEngine::new(&server, &config);
        let err = engine
            .transfer("smb://node1/C$/x.txt", SmbAuth::Anonymous, local.path())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CopierError::Connection { source: SmbError::AccessDenied(_), .. }
        ));
        assert_eq!(server.file("node1", "C$", "x.txt"), None);
    }

    #[tokio::test]
    async fn test_write_failure_is_transfer_error() {
        let server = MemorySmbServer::new();
        server.fail_writes(true);
        let config = CopierConfig::default();
        let local = local_file(b"payload");

        let err = SmbTransferEngine::new(&server, &config)
            .transfer("smb://node1/C$/x.txt", SmbAuth::Anonymous, local.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CopierError::Transfer { source: SmbError::Io(_), .. }));
    }

    #[tokio::test]
    async fn test_short_write_fails_verification() {
        let server = MemorySmbServer::new();
        server.set_write_limit(Some(3));
        let local = local_file(b"0123456789");

        let config = CopierConfig::default();
        let err = SmbTransferEngine::new(&server, &config)
            .transfer("smb://node1/C$/v.txt", SmbAuth::Anonymous, local.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CopierError::Verification { expected: 10, actual: 3, .. }
        ));

        let config = CopierConfig {
            verify_remote_size: false,
            ..CopierConfig::default()
        };
        assert!(SmbTransferEngine::new(&server, &config)
            .transfer("smb://node1/C$/v.txt", SmbAuth::Anonymous, local.path())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let server = MemorySmbServer::new();
        let config = CopierConfig::default();

        let err = SmbTransferEngine::new(&server, &config)
            .transfer(
                "smb://node1/C$/x.txt",
                SmbAuth::Anonymous,
                Path::new("/definitely/not/here"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CopierError::LocalRead { .. }));
        assert_eq!(server.connect_calls(), 0);
    }
}
