//! Directory-backed [`TransferBackend`].
//!
//! Objects live at `<root>/<container>/<object>`. Staged chunks live under
//! `<root>/.staging/<container>/<object>/` with the hex-encoded remote
//! chunk id as file name, until a commit concatenates them in order.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::stream;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::backend::{BackendError, DownloadStream, TransferBackend};
use crate::validation::validate_relative_name;

const STAGING_DIR: &str = ".staging";
const READ_BUF_SIZE: usize = 64 * 1024;

/// Filesystem object store for local use and tests.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a committed object.
    pub fn object_path(&self, container: &str, object: &str) -> Result<PathBuf, BackendError> {
        check_name(container)?;
        check_name(object)?;
        Ok(self.root.join(container).join(object))
    }

    fn staging_dir(&self, container: &str, object: &str) -> Result<PathBuf, BackendError> {
        check_name(container)?;
        check_name(object)?;
        Ok(self.root.join(STAGING_DIR).join(container).join(object))
    }
}

fn check_name(name: &str) -> Result<(), BackendError> {
    validate_relative_name(name).map_err(|e| BackendError::Rejected(e.to_string()))
}

fn block_file_name(remote_chunk_id: &str) -> String {
    hex::encode(remote_chunk_id.as_bytes())
}

#[async_trait]
impl TransferBackend for FsBackend {
    async fn stage_chunk(
        &self,
        container: &str,
        object: &str,
        remote_chunk_id: &str,
        data: Vec<u8>,
    ) -> Result<(), BackendError> {
        let dir = self.staging_dir(container, object)?;
        tokio::fs::create_dir_all(&dir).await?;
        let block = dir.join(block_file_name(remote_chunk_id));
        let tmp = block.with_extension("part");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &block).await?;
        tracing::debug!(container, object, chunk = remote_chunk_id, bytes = data.len(), "staged block");
        Ok(())
    }

    async fn commit(
        &self,
        container: &str,
        object: &str,
        remote_chunk_ids: &[String],
    ) -> Result<(), BackendError> {
        let dir = self.staging_dir(container, object)?;
        let target = self.object_path(container, object)?;

        let mut blocks = Vec::with_capacity(remote_chunk_ids.len());
        for id in remote_chunk_ids {
            let block = dir.join(block_file_name(id));
            if !tokio::fs::try_exists(&block).await? {
                return Err(BackendError::NotFound(format!("staged block {id}")));
            }
            blocks.push(block);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_file_name(format!(
            ".{}.commit",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));

        let mut out = tokio::fs::File::create(&tmp).await?;
        for block in &blocks {
            let data = tokio::fs::read(block).await?;
            out.write_all(&data).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        tokio::fs::rename(&tmp, &target).await?;
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(container, object, "failed to clean staging area: {e}");
        }
        tracing::debug!(container, object, blocks = blocks.len(), "committed object");
        Ok(())
    }

    async fn download_from(
        &self,
        container: &str,
        object: &str,
        start_offset: u64,
    ) -> Result<DownloadStream, BackendError> {
        let path = self.object_path(container, object)?;
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound(format!("{container}/{object}"))
            } else {
                BackendError::Io(e)
            }
        })?;

        let total_size = file.metadata().await?.len();
        if start_offset > total_size {
            return Err(BackendError::Rejected(format!(
                "offset {start_offset} beyond object size {total_size}"
            )));
        }
        file.seek(SeekFrom::Start(start_offset)).await?;

        let body = stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buf = vec![0u8; READ_BUF_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(file)))
                }
                Err(e) => Some((Err(BackendError::Io(e)), None)),
            }
        });

        Ok(DownloadStream {
            total_size,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    async fn collect(stream: DownloadStream) -> Vec<u8> {
        let mut body = stream.body;
        let mut out = Vec::new();
        while let Some(part) = body.next().await {
            out.extend(part.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn commit_concatenates_in_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());

        backend.stage_chunk("c", "o.bin", "b", b"world".to_vec()).await.unwrap();
        backend.stage_chunk("c", "o.bin", "a", b"hello ".to_vec()).await.unwrap();
        backend
            .commit("c", "o.bin", &["a".into(), "b".into()])
            .await
            .unwrap();

        let path = backend.object_path("c", "o.bin").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");
        assert!(!dir.path().join(".staging/c/o.bin").exists());
    }

    #[tokio::test]
    async fn commit_with_missing_block_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        backend.stage_chunk("c", "o", "a", b"x".to_vec()).await.unwrap();

        let err = backend
            .commit("c", "o", &["a".into(), "missing".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
        assert!(!backend.object_path("c", "o").unwrap().exists());
    }

    #[tokio::test]
    async fn download_resumes_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        std::fs::create_dir_all(dir.path().join("c")).unwrap();
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("c/big"), &content).unwrap();

        let full = backend.download_from("c", "big", 0).await.unwrap();
        assert_eq!(full.total_size, 200_000);
        assert_eq!(collect(full).await, content);

        let tail = backend.download_from("c", "big", 150_000).await.unwrap();
        assert_eq!(tail.total_size, 200_000);
        assert_eq!(collect(tail).await, &content[150_000..]);
    }

    #[tokio::test]
    async fn download_errors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        assert!(matches!(
            backend.download_from("c", "none", 0).await,
            Err(BackendError::NotFound(_))
        ));

        std::fs::create_dir_all(dir.path().join("c")).unwrap();
        std::fs::write(dir.path().join("c/small"), b"abc").unwrap();
        assert!(matches!(
            backend.download_from("c", "small", 4).await,
            Err(BackendError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let err = backend
            .stage_chunk("../etc", "o", "a", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }
}
