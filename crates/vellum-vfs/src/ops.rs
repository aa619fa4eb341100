//! VFS operations traits.
//!
//! [`VfsOps`] is a capability interface: only opening and removing files is
//! mandatory. Every other operation has a default body that reports
//! [`VfsError::Unsupported`], and the helpers in [`crate::fallback`] emulate
//! the ones that can be built from simpler calls.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::context::OpContext;
use super::types::{DirEntry, FileAttr, OpenFlags};
use super::{VfsError, VfsResult};

/// An open file handle.
///
/// Handles keep their own cursor. They do not carry an [`OpContext`]; once a
/// file is open its I/O is not cancellable through the filesystem layer.
#[async_trait]
pub trait VfsFile: Send + Sync {
    /// Read into `buf` at the cursor. Returns 0 at EOF.
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write `data` at the cursor (or at the end, in append mode).
    async fn write(&mut self, data: &[u8]) -> VfsResult<usize>;

    /// Move the cursor.
    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64>;

    /// Change the size of the file.
    async fn truncate(&mut self, size: u64) -> VfsResult<()>;

    /// Attributes of the open file.
    async fn stat(&self) -> VfsResult<FileAttr>;

    /// Flush buffered writes to the backend.
    async fn flush(&mut self) -> VfsResult<()> {
        Ok(())
    }

    /// Read from the cursor to EOF.
    async fn read_to_end(&mut self) -> VfsResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Write the whole buffer.
    async fn write_all(&mut self, mut data: &[u8]) -> VfsResult<()> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            if n == 0 {
                return Err(VfsError::other("write returned zero bytes"));
            }
            data = &data[n..];
        }
        Ok(())
    }
}

/// Core VFS operations trait.
///
/// Paths are relative to the backend's root; a leading `/` is ignored and
/// the empty path names the root itself.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Required
    // ========================================================================

    /// Open a file with the given flags, creating it with `mode` if
    /// `flags.create` is set.
    async fn open_file(
        &self,
        cx: &OpContext,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn VfsFile>>;

    /// Remove a file or an empty directory.
    async fn remove(&self, cx: &OpContext, path: &Path) -> VfsResult<()>;

    // ========================================================================
    // Reading (optional)
    // ========================================================================

    /// Get file attributes, following symlinks.
    async fn stat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        let _ = (cx, path);
        Err(VfsError::Unsupported("stat"))
    }

    /// Get file attributes without following a trailing symlink.
    async fn lstat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        let _ = (cx, path);
        Err(VfsError::Unsupported("lstat"))
    }

    /// Read directory entries, sorted by name.
    async fn readdir(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let _ = (cx, path);
        Err(VfsError::Unsupported("readdir"))
    }

    /// Read symbolic link target.
    async fn readlink(&self, cx: &OpContext, path: &Path) -> VfsResult<PathBuf> {
        let _ = (cx, path);
        Err(VfsError::Unsupported("readlink"))
    }

    /// Read entire file contents.
    async fn read_file(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<u8>> {
        let _ = (cx, path);
        Err(VfsError::Unsupported("read_file"))
    }

    // ========================================================================
    // Writing (optional)
    // ========================================================================

    /// Create or truncate `path` and write `data` to it.
    async fn write_file(
        &self,
        cx: &OpContext,
        path: &Path,
        data: &[u8],
        perm: u32,
    ) -> VfsResult<()> {
        let _ = (cx, path, data, perm);
        Err(VfsError::Unsupported("write_file"))
    }

    /// Create a new directory. The parent must exist.
    async fn mkdir(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        let _ = (cx, path, perm);
        Err(VfsError::Unsupported("mkdir"))
    }

    /// Create a directory and any missing parents.
    async fn mkdir_all(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        let _ = (cx, path, perm);
        Err(VfsError::Unsupported("mkdir_all"))
    }

    /// Remove `path` and everything below it. A missing path is not an error.
    async fn remove_all(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
        let _ = (cx, path);
        Err(VfsError::Unsupported("remove_all"))
    }

    /// Rename a file or directory.
    async fn rename(&self, cx: &OpContext, from: &Path, to: &Path) -> VfsResult<()> {
        let _ = (cx, from, to);
        Err(VfsError::Unsupported("rename"))
    }

    /// Create a symlink at `link` pointing to `target`.
    async fn symlink(&self, cx: &OpContext, target: &Path, link: &Path) -> VfsResult<()> {
        let _ = (cx, target, link);
        Err(VfsError::Unsupported("symlink"))
    }

    /// Truncate a file to the specified size.
    async fn truncate(&self, cx: &OpContext, path: &Path, size: u64) -> VfsResult<()> {
        let _ = (cx, path, size);
        Err(VfsError::Unsupported("truncate"))
    }

    // ========================================================================
    // Metadata (optional)
    // ========================================================================

    /// Change permission bits.
    async fn chmod(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        let _ = (cx, path, perm);
        Err(VfsError::Unsupported("chmod"))
    }

    /// Change ownership, following symlinks. `None` leaves a field as is.
    async fn chown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        let _ = (cx, path, uid, gid);
        Err(VfsError::Unsupported("chown"))
    }

    /// Change ownership of the link itself.
    async fn lchown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        let _ = (cx, path, uid, gid);
        Err(VfsError::Unsupported("lchown"))
    }

    /// Change access and modification times.
    async fn chtimes(
        &self,
        cx: &OpContext,
        path: &Path,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> VfsResult<()> {
        let _ = (cx, path, atime, mtime);
        Err(VfsError::Unsupported("chtimes"))
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Returns true if this filesystem is read-only.
    fn read_only(&self) -> bool {
        false
    }

    /// Open a file for reading.
    async fn open(&self, cx: &OpContext, path: &Path) -> VfsResult<Box<dyn VfsFile>> {
        self.open_file(cx, path, OpenFlags::read(), 0).await
    }

    /// Create or truncate a file for reading and writing.
    async fn create(&self, cx: &OpContext, path: &Path) -> VfsResult<Box<dyn VfsFile>> {
        self.open_file(cx, path, OpenFlags::create_truncate(), 0o666)
            .await
    }
}
