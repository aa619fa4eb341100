//! Eviction-bounded filesystem wrapper.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vellum_vfs::path::normalize;
use vellum_vfs::{
    DirEntry, FileAttr, OpContext, OpenFlags, VfsFile, VfsOps, VfsResult, fallback,
};

use crate::config::EvictConfig;
use crate::evictor::{EvictStats, Evictor, spawn_coordinator};
use crate::file::EvictFile;

/// A filesystem that keeps its backing store within count, size and age
/// bounds.
///
/// Every successful access refreshes the path's eviction priority. When the
/// count or size bound is exceeded, a background task deletes the
/// lowest-priority files until it holds again. Paths idle past the age bound
/// are deleted when next accessed and reported as missing.
///
/// Bounds are soft: writes are never refused, and a burst can overshoot
/// until the background task catches up.
pub struct EvictFs {
    evictor: Arc<Evictor>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EvictFs {
    /// Wrap `backing`, scanning it to build the initial index.
    ///
    /// `cx` bounds the scan only; the background task is stopped by
    /// [`shutdown`](Self::shutdown) or by dropping the `EvictFs`. Must be
    /// called within a tokio runtime.
    pub async fn new(
        cx: &OpContext,
        backing: Arc<dyn VfsOps>,
        config: EvictConfig,
    ) -> VfsResult<Self> {
        let (evictor, rx) = Evictor::new(backing, &config);
        evictor.scan(cx).await?;

        let evictor = Arc::new(evictor);
        let shutdown = CancellationToken::new();
        let worker = spawn_coordinator(Arc::clone(&evictor), rx, shutdown.clone());

        Ok(Self {
            evictor,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Current tracked count and total size.
    pub fn stats(&self) -> EvictStats {
        self.evictor.stats()
    }

    /// True while the count or size bound is exceeded.
    pub fn over_bounds(&self) -> bool {
        self.evictor.over_bounds()
    }

    /// Whether `path` is currently in the index.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.evictor.is_tracked(&normalize(path))
    }

    /// Ask the background task to enforce the bounds now.
    ///
    /// The initial scan does not do this on its own, so a store that starts
    /// out over its bounds is only trimmed after the first access or an
    /// explicit call here.
    pub fn enforce(&self) {
        self.evictor.wake();
    }

    /// Stop the background task and wait for it to exit.
    ///
    /// Bounds are no longer enforced afterwards; foreground operations keep
    /// working and keep the index current.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "eviction coordinator panicked");
            }
        }
    }

    /// Run `op` after the age check, then refresh `key` if it succeeded.
    async fn gated<T>(
        &self,
        cx: &OpContext,
        key: &Path,
        op: impl Future<Output = VfsResult<T>>,
    ) -> VfsResult<T> {
        self.evictor.check_expired(cx, key).await?;
        let result = op.await;
        if result.is_ok() {
            self.evictor.touch(cx, key).await;
        }
        result
    }

    fn backing(&self) -> &dyn VfsOps {
        self.evictor.backing.as_ref()
    }
}

impl Drop for EvictFs {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl VfsOps for EvictFs {
    async fn open_file(
        &self,
        cx: &OpContext,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn VfsFile>> {
        let key = normalize(path);
        // With create set this may be a fresh file, so don't gate it.
        if !flags.create {
            self.evictor.check_expired(cx, &key).await?;
        }
        let file = fallback::open_file(cx, self.backing(), path, flags, mode).await?;
        self.evictor.touch(cx, &key).await;
        Ok(Box::new(EvictFile::new(file, Arc::clone(&self.evictor), key)))
    }

    async fn remove(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
        fallback::remove(cx, self.backing(), path).await?;
        self.evictor.untrack(&normalize(path));
        Ok(())
    }

    async fn stat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        let key = normalize(path);
        self.gated(cx, &key, fallback::stat(cx, self.backing(), path))
            .await
    }

    async fn lstat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        let key = normalize(path);
        self.gated(cx, &key, fallback::lstat(cx, self.backing(), path))
            .await
    }

    async fn readdir(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<DirEntry>> {
        fallback::readdir(cx, self.backing(), path).await
    }

    async fn readlink(&self, cx: &OpContext, path: &Path) -> VfsResult<PathBuf> {
        self.evictor.check_expired(cx, &normalize(path)).await?;
        fallback::readlink(cx, self.backing(), path).await
    }

    async fn read_file(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<u8>> {
        let key = normalize(path);
        self.gated(cx, &key, fallback::read_file(cx, self.backing(), path))
            .await
    }

    async fn write_file(
        &self,
        cx: &OpContext,
        path: &Path,
        data: &[u8],
        perm: u32,
    ) -> VfsResult<()> {
        fallback::write_file(cx, self.backing(), path, data, perm).await?;
        self.evictor.touch(cx, &normalize(path)).await;
        Ok(())
    }

    async fn mkdir(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        fallback::mkdir(cx, self.backing(), path, perm).await
    }

    async fn mkdir_all(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        fallback::mkdir_all(cx, self.backing(), path, perm).await
    }

    async fn remove_all(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
        fallback::remove_all(cx, self.backing(), path).await?;
        self.evictor.untrack_prefix(&normalize(path));
        Ok(())
    }

    async fn rename(&self, cx: &OpContext, from: &Path, to: &Path) -> VfsResult<()> {
        let from_key = normalize(from);
        let to_key = normalize(to);
        self.evictor.check_expired(cx, &from_key).await?;

        fallback::rename(cx, self.backing(), from, to).await?;
        self.evictor.rekey(&from_key, &to_key);
        self.evictor.touch(cx, &to_key).await;
        Ok(())
    }

    async fn symlink(&self, cx: &OpContext, target: &Path, link: &Path) -> VfsResult<()> {
        fallback::symlink(cx, self.backing(), target, link).await?;
        self.evictor.touch(cx, &normalize(link)).await;
        Ok(())
    }

    async fn truncate(&self, cx: &OpContext, path: &Path, size: u64) -> VfsResult<()> {
        let key = normalize(path);
        self.gated(cx, &key, fallback::truncate(cx, self.backing(), path, size))
            .await
    }

    async fn chmod(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        let key = normalize(path);
        self.gated(cx, &key, fallback::chmod(cx, self.backing(), path, perm))
            .await
    }

    async fn chown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        let key = normalize(path);
        self.gated(cx, &key, fallback::chown(cx, self.backing(), path, uid, gid))
            .await
    }

    async fn lchown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        let key = normalize(path);
        self.gated(cx, &key, fallback::lchown(cx, self.backing(), path, uid, gid))
            .await
    }

    async fn chtimes(
        &self,
        cx: &OpContext,
        path: &Path,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> VfsResult<()> {
        let key = normalize(path);
        self.gated(
            cx,
            &key,
            fallback::chtimes(cx, self.backing(), path, atime, mtime),
        )
        .await
    }

    fn read_only(&self) -> bool {
        self.backing().read_only()
    }
}
