//! File handles returned by [`EvictFs`](crate::EvictFs).

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use vellum_vfs::{FileAttr, OpContext, VfsFile, VfsResult};

use crate::evictor::Evictor;

/// Wraps a backing handle so writes and truncation refresh the path's
/// eviction priority.
///
/// Each refresh re-stats the path. Reads do not refresh; opening already did.
pub(crate) struct EvictFile {
    inner: Box<dyn VfsFile>,
    evictor: Arc<Evictor>,
    key: PathBuf,
}

impl EvictFile {
    pub fn new(inner: Box<dyn VfsFile>, evictor: Arc<Evictor>, key: PathBuf) -> Self {
        Self {
            inner,
            evictor,
            key,
        }
    }

    async fn touch(&self) {
        self.evictor
            .touch(&OpContext::background(), &self.key)
            .await;
    }
}

#[async_trait]
impl VfsFile for EvictFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        self.inner.read(buf).await
    }

    async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        let n = self.inner.write(data).await?;
        if n > 0 {
            self.touch().await;
        }
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        self.inner.seek(pos).await
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.inner.truncate(size).await?;
        self.touch().await;
        Ok(())
    }

    async fn stat(&self) -> VfsResult<FileAttr> {
        self.inner.stat().await
    }

    async fn flush(&mut self) -> VfsResult<()> {
        self.inner.flush().await
    }
}
