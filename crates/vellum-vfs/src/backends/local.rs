//! Local filesystem backend.
//!
//! Provides access to real filesystem paths, with path security
//! to prevent escaping the root directory.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::context::OpContext;
use crate::error::{VfsError, VfsResult};
use crate::ops::{VfsFile, VfsOps};
use crate::path::normalize;
use crate::types::{DirEntry, FileAttr, FileType, OpenFlags};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/cache`, then `stat("blobs/ab12")` looks at
/// `/srv/cache/blobs/ab12`.
///
/// Path security is enforced: `..` is clamped lexically, and symlinks that
/// resolve outside the root are rejected.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only local filesystem.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute one within the root,
    /// following symlinks all the way.
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let relative = normalize(path);
        if relative.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(&relative);
        let canonical = match full.canonicalize() {
            Ok(canonical) => canonical,
            // New file: only the parent has to resolve
            Err(_) => return self.resolve_parent(&relative),
        };
        self.check_contained(&canonical, &relative)?;
        Ok(canonical)
    }

    /// Resolve the parent directory but keep the final component as is, so
    /// a trailing symlink names the link itself.
    fn resolve_parent(&self, relative: &Path) -> VfsResult<PathBuf> {
        let name = match relative.file_name() {
            Some(name) => name,
            None => return Ok(self.root.clone()),
        };
        let parent = self.root.join(relative.parent().unwrap_or(Path::new("")));
        let parent = match parent.canonicalize() {
            Ok(canonical) => {
                self.check_contained(&canonical, relative)?;
                canonical
            }
            // Parent doesn't exist, will fail on actual operation
            Err(_) => parent,
        };
        Ok(parent.join(name))
    }

    fn resolve_nofollow(&self, path: &Path) -> VfsResult<PathBuf> {
        self.resolve_parent(&normalize(path))
    }

    fn check_contained(&self, canonical: &Path, relative: &Path) -> VfsResult<()> {
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(VfsError::path_escapes_root(relative.display().to_string()))
        }
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        };

        FileAttr {
            size: meta.len(),
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            atime: meta.accessed().ok(),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
            nlink: meta.nlink() as u32,
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        }
    }
}

fn unix_time(secs: i64, nsecs: i64) -> Option<SystemTime> {
    let secs = u64::try_from(secs).ok()?;
    let nsecs = u32::try_from(nsecs).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(Duration::new(secs, nsecs))
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn open_file(
        &self,
        cx: &OpContext,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn VfsFile>> {
        cx.check()?;
        if !flags.is_read_only() {
            self.check_writable()?;
        }
        let full_path = self.resolve(path)?;

        let mut options = fs::OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write && !flags.append)
            .append(flags.append)
            .truncate(flags.truncate);
        if flags.exclusive {
            options.create_new(true);
        } else {
            options.create(flags.create);
        }
        if flags.create {
            options.mode(mode);
        }

        let file = options.open(&full_path).await?;
        Ok(Box::new(LocalFile { file }))
    }

    async fn remove(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve_nofollow(path)?;
        if full_path == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let meta = fs::symlink_metadata(&full_path).await?;
        if meta.is_dir() {
            fs::remove_dir(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }
        Ok(())
    }

    async fn stat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        cx.check()?;
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn lstat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        cx.check()?;
        let full_path = self.resolve_nofollow(path)?;
        let meta = fs::symlink_metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<DirEntry>> {
        cx.check()?;
        let full_path = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                FileType::Directory
            } else if file_type.is_symlink() {
                FileType::Symlink
            } else {
                FileType::File
            };

            entries.push(DirEntry::new(entry.file_name().to_string_lossy(), kind));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn readlink(&self, cx: &OpContext, path: &Path) -> VfsResult<PathBuf> {
        cx.check()?;
        let full_path = self.resolve_nofollow(path)?;
        Ok(fs::read_link(&full_path).await?)
    }

    async fn read_file(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<u8>> {
        cx.check()?;
        let full_path = self.resolve(path)?;
        Ok(fs::read(&full_path).await?)
    }

    async fn write_file(
        &self,
        cx: &OpContext,
        path: &Path,
        data: &[u8],
        perm: u32,
    ) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(perm)
            .open(&full_path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn mkdir(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        use std::os::unix::fs::DirBuilderExt;

        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve_nofollow(path)?;

        std::fs::DirBuilder::new().mode(perm).create(&full_path)?;
        Ok(())
    }

    async fn mkdir_all(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        use std::os::unix::fs::DirBuilderExt;

        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        std::fs::DirBuilder::new()
            .mode(perm)
            .recursive(true)
            .create(&full_path)?;
        Ok(())
    }

    async fn remove_all(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve_nofollow(path)?;
        if full_path == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let result = match fs::symlink_metadata(&full_path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full_path).await,
            Ok(_) => fs::remove_file(&full_path).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn rename(&self, cx: &OpContext, from: &Path, to: &Path) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let from_path = self.resolve_nofollow(from)?;
        let to_path = self.resolve_nofollow(to)?;

        Ok(fs::rename(&from_path, &to_path).await?)
    }

    async fn symlink(&self, cx: &OpContext, target: &Path, link: &Path) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve_nofollow(link)?;

        Ok(fs::symlink(target, &full_path).await?)
    }

    async fn truncate(&self, cx: &OpContext, path: &Path, size: u64) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let file = fs::OpenOptions::new().write(true).open(&full_path).await?;
        Ok(file.set_len(size).await?)
    }

    async fn chmod(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let permissions = std::fs::Permissions::from_mode(perm);
        Ok(fs::set_permissions(&full_path, permissions).await?)
    }

    async fn chown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        Ok(std::os::unix::fs::chown(&full_path, uid, gid)?)
    }

    async fn lchown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve_nofollow(path)?;

        Ok(std::os::unix::fs::lchown(&full_path, uid, gid)?)
    }

    async fn chtimes(
        &self,
        cx: &OpContext,
        path: &Path,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> VfsResult<()> {
        cx.check()?;
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let times = std::fs::FileTimes::new()
            .set_accessed(atime)
            .set_modified(mtime);
        let file = std::fs::File::open(&full_path)?;
        Ok(file.set_times(times)?)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

/// Open handle onto a local file.
struct LocalFile {
    file: fs::File,
}

#[async_trait]
impl VfsFile for LocalFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(self.file.read(buf).await?)
    }

    async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        Ok(self.file.write(data).await?)
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        Ok(self.file.seek(pos).await?)
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        Ok(self.file.set_len(size).await?)
    }

    async fn stat(&self) -> VfsResult<FileAttr> {
        let meta = self.file.metadata().await?;
        Ok(LocalBackend::metadata_to_attr(&meta))
    }

    async fn flush(&mut self) -> VfsResult<()> {
        Ok(self.file.flush().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    fn cx() -> OpContext {
        OpContext::background()
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (backend, _dir) = setup();

        let mut file = backend.create(&cx(), Path::new("test.txt")).await.unwrap();
        file.write_all(b"hello world").await.unwrap();
        file.flush().await.unwrap();

        let data = backend.read_file(&cx(), Path::new("test.txt")).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_partial_read() {
        let (backend, _dir) = setup();
        backend
            .write_file(&cx(), Path::new("test.txt"), b"hello world", 0o644)
            .await
            .unwrap();

        let mut file = backend.open(&cx(), Path::new("test.txt")).await.unwrap();
        file.seek(SeekFrom::Start(6)).await.unwrap();
        let data = file.read_to_end().await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let (backend, _dir) = setup();

        backend.mkdir(&cx(), Path::new("subdir"), 0o755).await.unwrap();
        backend
            .write_file(&cx(), Path::new("subdir/file.txt"), b"", 0o644)
            .await
            .unwrap();
        backend
            .write_file(&cx(), Path::new("root.txt"), b"", 0o644)
            .await
            .unwrap();

        let entries = backend.readdir(&cx(), Path::new("")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["root.txt", "subdir"]);
    }

    #[tokio::test]
    async fn test_mkdir_all_and_remove_all() {
        let (backend, dir) = setup();

        backend
            .mkdir_all(&cx(), Path::new("a/b/c"), 0o755)
            .await
            .unwrap();
        std::fs::write(dir.path().join("a/b/c/f"), "x").unwrap();

        backend.remove_all(&cx(), Path::new("a")).await.unwrap();
        assert!(!dir.path().join("a").exists());

        // Missing path is fine
        backend.remove_all(&cx(), Path::new("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_file_and_empty_dir() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("f"), "x").unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();

        backend.remove(&cx(), Path::new("f")).await.unwrap();
        backend.remove(&cx(), Path::new("d")).await.unwrap();

        let err = backend.remove(&cx(), Path::new("f")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_only() {
        let (mut backend, _dir) = setup();
        backend.set_read_only(true);

        let result = backend.create(&cx(), Path::new("test.txt")).await;
        assert!(matches!(result.err(), Some(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_parent_dir_is_clamped() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("inside"), "x").unwrap();

        let data = backend
            .read_file(&cx(), Path::new("../../../inside"))
            .await
            .unwrap();
        assert_eq!(data, b"x");
    }

    #[tokio::test]
    async fn test_symlink_escape_blocked() {
        let (backend, dir) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("out")).unwrap();

        let err = backend
            .read_file(&cx(), Path::new("out/secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[tokio::test]
    async fn test_symlink() {
        let (backend, _dir) = setup();
        backend
            .write_file(&cx(), Path::new("target.txt"), b"content", 0o644)
            .await
            .unwrap();

        backend
            .symlink(&cx(), Path::new("target.txt"), Path::new("link.txt"))
            .await
            .unwrap();

        let target = backend.readlink(&cx(), Path::new("link.txt")).await.unwrap();
        assert_eq!(target, Path::new("target.txt"));
        assert!(backend
            .lstat(&cx(), Path::new("link.txt"))
            .await
            .unwrap()
            .is_symlink());
        assert!(backend
            .stat(&cx(), Path::new("link.txt"))
            .await
            .unwrap()
            .is_file());
    }

    #[tokio::test]
    async fn test_rename() {
        let (backend, _dir) = setup();
        backend
            .write_file(&cx(), Path::new("old.txt"), b"content", 0o644)
            .await
            .unwrap();

        backend
            .rename(&cx(), Path::new("old.txt"), Path::new("new.txt"))
            .await
            .unwrap();

        assert!(backend.stat(&cx(), Path::new("old.txt")).await.is_err());
        let data = backend.read_file(&cx(), Path::new("new.txt")).await.unwrap();
        assert_eq!(data, b"content");
    }

    #[tokio::test]
    async fn test_truncate() {
        let (backend, _dir) = setup();
        backend
            .write_file(&cx(), Path::new("test.txt"), b"hello world", 0o644)
            .await
            .unwrap();

        backend.truncate(&cx(), Path::new("test.txt"), 5).await.unwrap();

        let data = backend.read_file(&cx(), Path::new("test.txt")).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_chmod_and_chtimes() {
        let (backend, _dir) = setup();
        backend
            .write_file(&cx(), Path::new("f"), b"x", 0o644)
            .await
            .unwrap();

        backend.chmod(&cx(), Path::new("f"), 0o600).await.unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        backend
            .chtimes(&cx(), Path::new("f"), when, when)
            .await
            .unwrap();

        let attr = backend.stat(&cx(), Path::new("f")).await.unwrap();
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.mtime, when);
        assert_eq!(attr.access_time(), when);
    }

    #[tokio::test]
    async fn test_create_exclusive() {
        let (backend, _dir) = setup();
        backend
            .open_file(&cx(), Path::new("f"), OpenFlags::create_exclusive(), 0o644)
            .await
            .unwrap();
        let err = backend
            .open_file(&cx(), Path::new("f"), OpenFlags::create_exclusive(), 0o644)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    }
}
