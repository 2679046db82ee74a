//! Local content access for uploads (read) and downloads (write).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use blobferry_protocol::LocalLocator;

use crate::TransferError;
use crate::validation::validate_relative_name;

/// How a transfer uses its local content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Range access to the local content of one transfer.
#[async_trait]
pub trait ContentAccessor: Send + Sync {
    /// Current content length in bytes.
    async fn length(&self) -> Result<u64, TransferError>;

    /// Reads exactly `size` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, size: u64) -> Result<Vec<u8>, TransferError>;

    async fn write_range(&self, offset: u64, data: &[u8]) -> Result<(), TransferError>;

    /// Makes bytes written so far durable.
    async fn flush(&self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Flushes and releases the content. Later calls fail.
    async fn close(&self) -> Result<(), TransferError>;
}

/// Opens content accessors for transfer locators.
#[async_trait]
pub trait AccessorProvider: Send + Sync {
    async fn open(
        &self,
        locator: &LocalLocator,
        mode: AccessMode,
    ) -> Result<Arc<dyn ContentAccessor>, TransferError>;
}

// ---------------------------------------------------------------------------
// Filesystem accessor
// ---------------------------------------------------------------------------

/// [`ContentAccessor`] over a local file.
pub struct FsAccessor {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FsAccessor {
    /// Opens `path`. In write mode the file and its parent directories are
    /// created if needed; existing bytes are kept so a download can resume.
    pub async fn open(path: &Path, mode: AccessMode) -> Result<Self, TransferError> {
        let file = match mode {
            AccessMode::Read => File::open(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransferError::ContentNotFound(path.display().to_string())
                } else {
                    TransferError::Io(e)
                }
            })?,
            AccessMode::Write => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .read(true)
                    .write(true)
                    .open(path)
                    .await?
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContentAccessor for FsAccessor {
    async fn length(&self) -> Result<u64, TransferError> {
        let guard = self.file.lock().await;
        let file = guard.as_ref().ok_or(TransferError::AccessorClosed)?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(TransferError::LengthUnknown(self.path.display().to_string()));
        }
        Ok(meta.len())
    }

    async fn read_range(&self, offset: u64, size: u64) -> Result<Vec<u8>, TransferError> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(TransferError::AccessorClosed)?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write_range(&self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(TransferError::AccessorClosed)?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransferError> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(TransferError::AccessorClosed)?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransferError> {
        let mut guard = self.file.lock().await;
        let mut file = guard.take().ok_or(TransferError::AccessorClosed)?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Opens [`FsAccessor`]s.
///
/// Plain locators are used as filesystem paths. Resolved handles are
/// relative names confined to `resolved_root`.
#[derive(Debug, Clone, Default)]
pub struct FsAccessorProvider {
    resolved_root: Option<PathBuf>,
}

impl FsAccessorProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolved_root(root: impl Into<PathBuf>) -> Self {
        Self {
            resolved_root: Some(root.into()),
        }
    }

    fn resolve(&self, locator: &LocalLocator) -> Result<PathBuf, TransferError> {
        if !locator.uses_resolved_access {
            return Ok(PathBuf::from(&locator.location));
        }
        let root = self.resolved_root.as_ref().ok_or_else(|| {
            TransferError::InvalidPath(format!(
                "no resolved root configured for handle {:?}",
                locator.location
            ))
        })?;
        validate_relative_name(&locator.location)?;
        Ok(root.join(&locator.location))
    }
}

#[async_trait]
impl AccessorProvider for FsAccessorProvider {
    async fn open(
        &self,
        locator: &LocalLocator,
        mode: AccessMode,
    ) -> Result<Arc<dyn ContentAccessor>, TransferError> {
        let path = self.resolve(locator)?;
        Ok(Arc::new(FsAccessor::open(&path, mode).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"0123456789abcdef").unwrap();

        let acc = FsAccessor::open(&path, AccessMode::Read).await.unwrap();
        assert_eq!(acc.length().await.unwrap(), 16);
        assert_eq!(acc.read_range(10, 6).await.unwrap(), b"abcdef");
        assert_eq!(acc.read_range(0, 3).await.unwrap(), b"012");
    }

    #[tokio::test]
    async fn missing_file_is_content_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = FsAccessor::open(&dir.path().join("nope"), AccessMode::Read).await;
        assert!(matches!(result, Err(TransferError::ContentNotFound(_))));
    }

    #[tokio::test]
    async fn write_keeps_existing_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");

        let acc = FsAccessor::open(&path, AccessMode::Write).await.unwrap();
        acc.write_range(0, b"hello ").await.unwrap();
        acc.close().await.unwrap();

        let acc = FsAccessor::open(&path, AccessMode::Write).await.unwrap();
        acc.write_range(6, b"world").await.unwrap();
        acc.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn closed_accessor_rejects_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let acc = FsAccessor::open(&path, AccessMode::Write).await.unwrap();
        acc.close().await.unwrap();

        assert!(matches!(
            acc.write_range(0, b"x").await,
            Err(TransferError::AccessorClosed)
        ));
        assert!(matches!(acc.close().await, Err(TransferError::AccessorClosed)));
    }

    #[tokio::test]
    async fn directory_length_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let acc = FsAccessor::open(dir.path(), AccessMode::Read).await.unwrap();
        assert!(matches!(
            acc.length().await,
            Err(TransferError::LengthUnknown(_))
        ));
    }

    #[tokio::test]
    async fn resolved_handles_stay_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();
        let provider = FsAccessorProvider::with_resolved_root(dir.path());

        let acc = provider
            .open(&LocalLocator::resolved("a.bin"), AccessMode::Read)
            .await
            .unwrap();
        assert_eq!(acc.length().await.unwrap(), 3);

        let escaped = provider
            .open(&LocalLocator::resolved("../a.bin"), AccessMode::Read)
            .await;
        assert!(matches!(escaped, Err(TransferError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn resolved_handle_without_root_is_rejected() {
        let provider = FsAccessorProvider::new();
        let result = provider
            .open(&LocalLocator::resolved("a.bin"), AccessMode::Read)
            .await;
        assert!(matches!(result, Err(TransferError::InvalidPath(_))));
    }
}
