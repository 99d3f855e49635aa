/*!
 * Local staging of copy payloads
 *
 * Stream and inline-script payloads are written to a temporary file before
 * upload. Files supplied by the caller are used in place and never removed.
 */

use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::error::{CopierError, Result};

/// What the caller wants copied
pub enum Payload {
    /// An existing local file
    File(PathBuf),
    /// Bytes read to end of stream
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// Inline script text
    Script(String),
}

impl Payload {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Payload::File(path.into())
    }

    pub fn stream<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Payload::Stream(Box::new(reader))
    }

    pub fn script(text: impl Into<String>) -> Self {
        Payload::Script(text.into())
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::File(_) => "file",
            Payload::Stream(_) => "stream",
            Payload::Script(_) => "script",
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::File(path) => f.debug_tuple("File").field(path).finish(),
            Payload::Stream(_) => f.write_str("Stream(..)"),
            Payload::Script(text) => write!(f, "Script({} bytes)", text.len()),
        }
    }
}

/// A payload available as a local file
#[derive(Debug)]
pub struct StagedPayload {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl StagedPayload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file belongs to the caller
    pub fn is_caller_supplied(&self) -> bool {
        self.temp.is_none()
    }

    /// File name for default destinations; `None` for staged content
    pub fn base_name(&self) -> Option<&str> {
        if self.is_caller_supplied() {
            self.path.file_name().and_then(|n| n.to_str())
        } else {
            None
        }
    }
}

/// Creates and removes staged payload files
#[derive(Debug, Clone, Default)]
pub struct TempFileManager {
    temp_dir: Option<PathBuf>,
}

impl TempFileManager {
    /// Stage into `temp_dir`, or the system temp directory when `None`
    pub fn new(temp_dir: Option<PathBuf>) -> Self {
        Self { temp_dir }
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Make `payload` available as a local file
    pub async fn materialize(&self, payload: Payload) -> Result<StagedPayload> {
        match payload {
            Payload::File(path) => {
                let meta = tokio::fs::metadata(&path).await.map_err(|e| {
                    CopierError::InvalidRequest(format!("{}: {}", path.display(), e))
                })?;
                if !meta.is_file() {
                    return Err(CopierError::InvalidRequest(format!(
                        "{} is not a regular file",
                        path.display()
                    )));
                }
                Ok(StagedPayload { path, temp: None })
            }
            Payload::Stream(mut reader) => {
                let (mut file, temp) = self.create_temp().await?;
                tokio::io::copy(&mut reader, &mut file)
                    .await
                    .map_err(CopierError::Staging)?;
                file.flush().await.map_err(CopierError::Staging)?;
                self.staged(temp)
            }
            Payload::Script(text) => {
                let (mut file, temp) = self.create_temp().await?;
                file.write_all(text.as_bytes())
                    .await
                    .map_err(CopierError::Staging)?;
                file.flush().await.map_err(CopierError::Staging)?;
                self.staged(temp)
            }
        }
    }

    async fn create_temp(&self) -> Result<(tokio::fs::File, TempPath)> {
        let named = Builder::new()
            .prefix("jcifs-")
            .suffix(".tmp")
            .tempfile_in(self.temp_dir())
            .map_err(CopierError::Staging)?;
        let (file, temp) = named.into_parts();
        Ok((tokio::fs::File::from_std(file), temp))
    }

    fn staged(&self, temp: TempPath) -> Result<StagedPayload> {
        let path = temp.to_path_buf();
        tracing::debug!(path = %path.display(), "payload staged");
        Ok(StagedPayload {
            path,
            temp: Some(temp),
        })
    }

    /// Remove a staged file. Caller-supplied files are left alone; a failed
    /// removal is logged, never returned.
    pub fn cleanup(&self, staged: StagedPayload) -> bool {
        let Some(temp) = staged.temp else {
            return false;
        };
        match temp.close() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    path = %staged.path.display(),
                    error = %e,
                    "Unable to remove local temp file"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_script_is_staged_and_removed() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::new(Some(dir.path().to_path_buf()));

        let staged = manager.materialize(Payload::script("echo hi\r\n")).await.unwrap();
        assert!(!staged.is_caller_supplied());
        assert!(staged.base_name().is_none());
        assert!(staged.path().starts_with(dir.path()));
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"echo hi\r\n");

        let path = staged.path().to_path_buf();
        assert!(manager.cleanup(staged));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stream_is_staged() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::new(Some(dir.path().to_path_buf()));
        let data: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();

        let staged = manager
            .materialize(Payload::stream(std::io::Cursor::new(data.clone())))
            .await
            .unwrap();
        assert_eq!(std::fs::read(staged.path()).unwrap(), data);
        manager.cleanup(staged);
    }

    #[tokio::test]
    async fn test_caller_file_is_kept() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("deploy.ps1");
        std::fs::write(&file, "Write-Host hi").unwrap();
        let manager = TempFileManager::default();

        let staged = manager.materialize(Payload::file(&file)).await.unwrap();
        assert!(staged.is_caller_supplied());
        assert_eq!(staged.base_name(), Some("deploy.ps1"));
        assert!(!manager.cleanup(staged));
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_missing_or_directory_file_rejected() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::default();

        let err = manager
            .materialize(Payload::file(dir.path().join("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, CopierError::InvalidRequest(_)));

        let err = manager
            .materialize(Payload::file(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, CopierError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_cleanup_of_vanished_file_is_not_fatal() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::new(Some(dir.path().to_path_buf()));
        let staged = manager.materialize(Payload::script("x")).await.unwrap();

        std::fs::remove_file(staged.path()).unwrap();
        assert!(!manager.cleanup(staged));
    }

    #[tokio::test]
    async fn test_unusable_temp_dir() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::new(Some(dir.path().join("missing")));
        let err = manager.materialize(Payload::script("x")).await.unwrap_err();
        assert!(matches!(err, CopierError::Staging(_)));
    }

    #[test]
    fn test_payload_debug_hides_content() {
        assert_eq!(format!("{:?}", Payload::script("secret")), "Script(6 bytes)");
        assert_eq!(Payload::stream(tokio::io::empty()).kind(), "stream");
    }
}
