//! In-memory filesystem backend.
//!
//! Used for testing and as scratch space. All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::context::OpContext;
use crate::error::{VfsError, VfsResult};
use crate::ops::{VfsFile, VfsOps};
use crate::path::{display, normalize};
use crate::types::{DirEntry, FileAttr, FileType, OpenFlags};

/// Symlink hops followed before giving up.
const MAX_SYMLINK_HOPS: usize = 40;

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
    Symlink { target: PathBuf, attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
            Entry::Symlink { attr, .. } => attr,
        }
    }

    fn attr_mut(&mut self) -> &mut FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
            Entry::Symlink { attr, .. } => attr,
        }
    }

    fn kind(&self) -> FileType {
        self.attr().kind
    }
}

type Entries = HashMap<PathBuf, Entry>;

/// In-memory filesystem backend.
///
/// Thread-safe via an internal `RwLock`; open handles share the same table,
/// so writes through a handle are visible to path-based calls immediately.
/// Reads refresh a file's access time and writes refresh both access and
/// modification times.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    entries: Arc<RwLock<Entries>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            PathBuf::new(),
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Number of regular files currently stored.
    pub fn file_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| matches!(e, Entry::File { .. }))
            .count()
    }

    /// Ensure all parent directories exist.
    fn ensure_parents(entries: &mut Entries, path: &Path) -> VfsResult<()> {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            current.push(component);
            match entries.get(&current) {
                Some(Entry::Directory { .. }) => {}
                Some(_) => return Err(VfsError::not_a_directory(display(&current))),
                None => {
                    entries.insert(
                        current.clone(),
                        Entry::Directory {
                            attr: FileAttr::directory(0o755),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Follow symlinks at the final path component.
    fn resolve(entries: &Entries, path: &Path) -> VfsResult<PathBuf> {
        let mut current = path.to_path_buf();
        for _ in 0..MAX_SYMLINK_HOPS {
            match entries.get(&current) {
                Some(Entry::Symlink { target, .. }) => {
                    current = if target.is_absolute() {
                        normalize(target)
                    } else {
                        let parent = current.parent().unwrap_or(Path::new(""));
                        normalize(&parent.join(target))
                    };
                }
                _ => return Ok(current),
            }
        }
        Err(VfsError::other(format!(
            "too many levels of symbolic links: {}",
            display(path)
        )))
    }

    fn has_children(entries: &Entries, dir: &Path) -> bool {
        entries
            .keys()
            .any(|k| k.parent() == Some(dir) && k.as_path() != dir)
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn open_file(
        &self,
        cx: &OpContext,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn VfsFile>> {
        cx.check()?;
        let normalized = normalize(path);
        let mut entries = self.entries.write();
        let resolved = Self::resolve(&entries, &normalized)?;

        match entries.get_mut(&resolved) {
            Some(_) if flags.create && flags.exclusive => {
                return Err(VfsError::already_exists(display(&normalized)));
            }
            Some(Entry::Directory { .. }) => {
                if !flags.is_read_only() {
                    return Err(VfsError::is_a_directory(display(&normalized)));
                }
            }
            Some(Entry::File { data, attr }) => {
                if flags.truncate {
                    data.clear();
                    attr.size = 0;
                    attr.mtime = SystemTime::now();
                }
            }
            Some(Entry::Symlink { .. }) => {
                return Err(VfsError::other("dangling symlink resolution"));
            }
            None if flags.create => {
                Self::ensure_parents(&mut entries, &resolved)?;
                entries.insert(
                    resolved.clone(),
                    Entry::File {
                        data: Vec::new(),
                        attr: FileAttr::file(0, mode),
                    },
                );
            }
            None => return Err(VfsError::not_found(display(&normalized))),
        }

        Ok(Box::new(MemoryFile {
            entries: Arc::clone(&self.entries),
            path: resolved,
            flags,
            pos: 0,
        }))
    }

    async fn remove(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
        cx.check()?;
        let normalized = normalize(path);

        if normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) if Self::has_children(&entries, &normalized) => {
                Err(VfsError::directory_not_empty(display(&normalized)))
            }
            Some(_) => {
                entries.remove(&normalized);
                Ok(())
            }
            None => Err(VfsError::not_found(display(&normalized))),
        }
    }

    async fn stat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        cx.check()?;
        let normalized = normalize(path);
        let entries = self.entries.read();
        let resolved = Self::resolve(&entries, &normalized)?;

        entries
            .get(&resolved)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(display(&normalized)))
    }

    async fn lstat(&self, cx: &OpContext, path: &Path) -> VfsResult<FileAttr> {
        cx.check()?;
        let normalized = normalize(path);
        let entries = self.entries.read();

        entries
            .get(&normalized)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(display(&normalized)))
    }

    async fn readdir(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<DirEntry>> {
        cx.check()?;
        let normalized = normalize(path);
        let entries = self.entries.read();
        let resolved = Self::resolve(&entries, &normalized)?;

        match entries.get(&resolved) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(display(&normalized))),
            None => return Err(VfsError::not_found(display(&normalized))),
        }

        // Find all direct children
        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(entry_path, _)| {
                entry_path.parent() == Some(resolved.as_path()) && **entry_path != resolved
            })
            .filter_map(|(entry_path, entry)| {
                entry_path
                    .file_name()
                    .map(|name| DirEntry::new(name.to_string_lossy(), entry.kind()))
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn readlink(&self, cx: &OpContext, path: &Path) -> VfsResult<PathBuf> {
        cx.check()?;
        let normalized = normalize(path);
        let entries = self.entries.read();

        match entries.get(&normalized) {
            Some(Entry::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(VfsError::NotASymlink(display(&normalized))),
            None => Err(VfsError::not_found(display(&normalized))),
        }
    }

    async fn read_file(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<u8>> {
        cx.check()?;
        let normalized = normalize(path);
        let mut entries = self.entries.write();
        let resolved = Self::resolve(&entries, &normalized)?;

        match entries.get_mut(&resolved) {
            Some(Entry::File { data, attr }) => {
                attr.atime = Some(SystemTime::now());
                Ok(data.clone())
            }
            Some(_) => Err(VfsError::is_a_directory(display(&normalized))),
            None => Err(VfsError::not_found(display(&normalized))),
        }
    }

    async fn write_file(
        &self,
        cx: &OpContext,
        path: &Path,
        data: &[u8],
        perm: u32,
    ) -> VfsResult<()> {
        cx.check()?;
        let normalized = normalize(path);
        let mut entries = self.entries.write();
        let resolved = Self::resolve(&entries, &normalized)?;

        match entries.get_mut(&resolved) {
            Some(Entry::File {
                data: file_data,
                attr,
            }) => {
                let now = SystemTime::now();
                *file_data = data.to_vec();
                attr.size = data.len() as u64;
                attr.mtime = now;
                attr.atime = Some(now);
                Ok(())
            }
            Some(_) => Err(VfsError::is_a_directory(display(&normalized))),
            None => {
                Self::ensure_parents(&mut entries, &resolved)?;
                entries.insert(
                    resolved,
                    Entry::File {
                        data: data.to_vec(),
                        attr: FileAttr::file(data.len() as u64, perm),
                    },
                );
                Ok(())
            }
        }
    }

    async fn mkdir(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        cx.check()?;
        let normalized = normalize(path);
        let mut entries = self.entries.write();

        if entries.contains_key(&normalized) {
            return Err(VfsError::already_exists(display(&normalized)));
        }
        let parent = normalized.parent().unwrap_or(Path::new(""));
        match entries.get(parent) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(display(parent))),
            None => return Err(VfsError::not_found(display(parent))),
        }

        entries.insert(
            normalized,
            Entry::Directory {
                attr: FileAttr::directory(perm),
            },
        );
        Ok(())
    }

    async fn mkdir_all(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        cx.check()?;
        let normalized = normalize(path);
        let mut entries = self.entries.write();

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => return Ok(()),
            Some(_) => return Err(VfsError::not_a_directory(display(&normalized))),
            None => {}
        }

        Self::ensure_parents(&mut entries, &normalized)?;
        entries.insert(
            normalized,
            Entry::Directory {
                attr: FileAttr::directory(perm),
            },
        );
        Ok(())
    }

    async fn remove_all(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
        cx.check()?;
        let normalized = normalize(path);
        let mut entries = self.entries.write();

        // Removing the root clears its contents but keeps the root itself.
        entries.retain(|k, _| {
            k.as_os_str().is_empty() || !k.starts_with(&normalized)
        });
        Ok(())
    }

    async fn rename(&self, cx: &OpContext, from: &Path, to: &Path) -> VfsResult<()> {
        cx.check()?;
        let from_normalized = normalize(from);
        let to_normalized = normalize(to);

        if from_normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot rename root"));
        }
        if from_normalized == to_normalized {
            return Ok(());
        }
        if to_normalized.starts_with(&from_normalized) {
            return Err(VfsError::invalid_path(format!(
                "cannot move {} into itself",
                display(&from_normalized)
            )));
        }

        let mut entries = self.entries.write();

        let is_dir = match entries.get(&from_normalized) {
            Some(entry) => entry.kind().is_dir(),
            None => return Err(VfsError::not_found(display(&from_normalized))),
        };
        match entries.get(&to_normalized) {
            Some(Entry::Directory { .. }) if !is_dir => {
                return Err(VfsError::is_a_directory(display(&to_normalized)));
            }
            Some(Entry::Directory { .. })
                if Self::has_children(&entries, &to_normalized) =>
            {
                return Err(VfsError::directory_not_empty(display(&to_normalized)));
            }
            Some(_) if is_dir => {
                return Err(VfsError::not_a_directory(display(&to_normalized)));
            }
            _ => {}
        }

        // Ensure parent of destination exists
        Self::ensure_parents(&mut entries, &to_normalized)?;

        let moved: Vec<PathBuf> = entries
            .keys()
            .filter(|k| k.starts_with(&from_normalized))
            .cloned()
            .collect();

        for old in moved {
            if let Some(entry) = entries.remove(&old) {
                let relative = old.strip_prefix(&from_normalized).unwrap_or(Path::new(""));
                let new_path = if relative.as_os_str().is_empty() {
                    to_normalized.clone()
                } else {
                    to_normalized.join(relative)
                };
                entries.insert(new_path, entry);
            }
        }
        Ok(())
    }

    async fn symlink(&self, cx: &OpContext, target: &Path, link: &Path) -> VfsResult<()> {
        cx.check()?;
        let normalized = normalize(link);
        let mut entries = self.entries.write();

        if entries.contains_key(&normalized) {
            return Err(VfsError::already_exists(display(&normalized)));
        }
        Self::ensure_parents(&mut entries, &normalized)?;

        let attr = FileAttr::symlink(target.as_os_str().len() as u64);
        entries.insert(
            normalized,
            Entry::Symlink {
                target: target.to_path_buf(),
                attr,
            },
        );
        Ok(())
    }

    async fn truncate(&self, cx: &OpContext, path: &Path, size: u64) -> VfsResult<()> {
        cx.check()?;
        let normalized = normalize(path);
        let mut entries = self.entries.write();
        let resolved = Self::resolve(&entries, &normalized)?;

        match entries.get_mut(&resolved) {
            Some(Entry::File { data, attr }) => {
                let now = SystemTime::now();
                data.resize(size as usize, 0);
                attr.size = size;
                attr.mtime = now;
                attr.atime = Some(now);
                Ok(())
            }
            Some(_) => Err(VfsError::is_a_directory(display(&normalized))),
            None => Err(VfsError::not_found(display(&normalized))),
        }
    }

    async fn chmod(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
        cx.check()?;
        self.update_attr(path, true, |attr| attr.perm = perm)
    }

    async fn chown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        cx.check()?;
        self.update_attr(path, true, |attr| set_owner(attr, uid, gid))
    }

    async fn lchown(
        &self,
        cx: &OpContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> VfsResult<()> {
        cx.check()?;
        self.update_attr(path, false, |attr| set_owner(attr, uid, gid))
    }

    async fn chtimes(
        &self,
        cx: &OpContext,
        path: &Path,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> VfsResult<()> {
        cx.check()?;
        self.update_attr(path, true, |attr| {
            attr.atime = Some(atime);
            attr.mtime = mtime;
        })
    }
}

impl MemoryBackend {
    fn update_attr(
        &self,
        path: &Path,
        follow: bool,
        f: impl FnOnce(&mut FileAttr),
    ) -> VfsResult<()> {
        let normalized = normalize(path);
        let mut entries = self.entries.write();
        let target = if follow {
            Self::resolve(&entries, &normalized)?
        } else {
            normalized.clone()
        };

        let entry = entries
            .get_mut(&target)
            .ok_or_else(|| VfsError::not_found(display(&normalized)))?;
        let attr = entry.attr_mut();
        f(attr);
        attr.ctime = Some(SystemTime::now());
        Ok(())
    }
}

fn set_owner(attr: &mut FileAttr, uid: Option<u32>, gid: Option<u32>) {
    if uid.is_some() {
        attr.uid = uid;
    }
    if gid.is_some() {
        attr.gid = gid;
    }
}

/// Open handle into a [`MemoryBackend`].
struct MemoryFile {
    entries: Arc<RwLock<Entries>>,
    path: PathBuf,
    flags: OpenFlags,
    pos: u64,
}

impl MemoryFile {
    fn check_writable(&self) -> VfsResult<()> {
        if self.flags.is_read_only() {
            Err(VfsError::permission_denied(format!(
                "{} not open for writing",
                display(&self.path)
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VfsFile for MemoryFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let mut entries = self.entries.write();
        match entries.get_mut(&self.path) {
            Some(Entry::File { data, attr }) => {
                let start = (self.pos as usize).min(data.len());
                let end = (start + buf.len()).min(data.len());
                let n = end - start;
                buf[..n].copy_from_slice(&data[start..end]);
                self.pos += n as u64;
                attr.atime = Some(SystemTime::now());
                Ok(n)
            }
            Some(_) => Err(VfsError::is_a_directory(display(&self.path))),
            None => Err(VfsError::not_found(display(&self.path))),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        self.check_writable()?;
        let mut entries = self.entries.write();
        match entries.get_mut(&self.path) {
            Some(Entry::File { data, attr }) => {
                if self.flags.append {
                    self.pos = data.len() as u64;
                }
                let offset = self.pos as usize;
                // Extend if necessary
                if offset + buf.len() > data.len() {
                    data.resize(offset + buf.len(), 0);
                }
                data[offset..offset + buf.len()].copy_from_slice(buf);
                self.pos += buf.len() as u64;

                let now = SystemTime::now();
                attr.size = data.len() as u64;
                attr.mtime = now;
                attr.atime = Some(now);
                Ok(buf.len())
            }
            Some(_) => Err(VfsError::is_a_directory(display(&self.path))),
            None => Err(VfsError::not_found(display(&self.path))),
        }
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let len = {
            let entries = self.entries.read();
            match entries.get(&self.path) {
                Some(entry) => entry.attr().size,
                None => return Err(VfsError::not_found(display(&self.path))),
            }
        };
        let next = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let next = next.ok_or_else(|| VfsError::invalid_path("seek before start of file"))?;
        self.pos = next;
        Ok(next)
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let mut entries = self.entries.write();
        match entries.get_mut(&self.path) {
            Some(Entry::File { data, attr }) => {
                let now = SystemTime::now();
                data.resize(size as usize, 0);
                attr.size = size;
                attr.mtime = now;
                attr.atime = Some(now);
                Ok(())
            }
            Some(_) => Err(VfsError::is_a_directory(display(&self.path))),
            None => Err(VfsError::not_found(display(&self.path))),
        }
    }

    async fn stat(&self) -> VfsResult<FileAttr> {
        self.entries
            .read()
            .get(&self.path)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(display(&self.path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cx() -> OpContext {
        OpContext::background()
    }

    async fn write(fs: &MemoryBackend, path: &str, data: &[u8]) {
        fs.write_file(&cx(), Path::new(path), data, 0o644)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_write_and_read_through_handle() {
        let fs = MemoryBackend::new();
        let mut file = fs.create(&cx(), Path::new("test.txt")).await.unwrap();
        file.write_all(b"hello world").await.unwrap();

        file.seek(SeekFrom::Start(6)).await.unwrap();
        let mut buf = [0u8; 5];
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");

        let data = fs.read_file(&cx(), Path::new("test.txt")).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_open_missing_without_create() {
        let fs = MemoryBackend::new();
        let err = fs.open(&cx(), Path::new("nope")).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_exclusive_conflict() {
        let fs = MemoryBackend::new();
        write(&fs, "a", b"x").await;
        let err = fs
            .open_file(&cx(), Path::new("a"), OpenFlags::create_exclusive(), 0o644)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_read_only_handle_rejects_writes() {
        let fs = MemoryBackend::new();
        write(&fs, "a", b"x").await;
        let mut file = fs.open(&cx(), Path::new("a")).await.unwrap();
        assert!(file.write(b"y").await.is_err());
        assert!(file.truncate(0).await.is_err());
    }

    #[tokio::test]
    async fn test_append() {
        let fs = MemoryBackend::new();
        write(&fs, "log", b"one").await;
        let mut file = fs
            .open_file(&cx(), Path::new("log"), OpenFlags::append(), 0)
            .await
            .unwrap();
        file.write_all(b"two").await.unwrap();
        assert_eq!(fs.read_file(&cx(), Path::new("log")).await.unwrap(), b"onetwo");
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let fs = MemoryBackend::new();
        fs.mkdir(&cx(), Path::new("subdir"), 0o755).await.unwrap();
        write(&fs, "subdir/file.txt", b"").await;
        write(&fs, "root.txt", b"").await;

        let entries = fs.readdir(&cx(), Path::new("")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["root.txt", "subdir"]);

        let subentries = fs.readdir(&cx(), Path::new("subdir")).await.unwrap();
        assert_eq!(subentries, vec![DirEntry::file("file.txt")]);
    }

    #[tokio::test]
    async fn test_mkdir_requires_parent() {
        let fs = MemoryBackend::new();
        let err = fs.mkdir(&cx(), Path::new("a/b"), 0o755).await.unwrap_err();
        assert!(err.is_not_found());

        fs.mkdir_all(&cx(), Path::new("a/b"), 0o755).await.unwrap();
        fs.mkdir_all(&cx(), Path::new("a/b"), 0o755).await.unwrap();
        assert!(fs.stat(&cx(), Path::new("a")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_remove() {
        let fs = MemoryBackend::new();
        write(&fs, "test.txt", b"").await;
        fs.remove(&cx(), Path::new("test.txt")).await.unwrap();
        assert!(fs.stat(&cx(), Path::new("test.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_non_empty_dir() {
        let fs = MemoryBackend::new();
        write(&fs, "nonempty/file.txt", b"").await;

        let err = fs.remove(&cx(), Path::new("nonempty")).await.unwrap_err();
        assert!(matches!(err, VfsError::DirectoryNotEmpty(_)));
    }

    #[tokio::test]
    async fn test_remove_all_matches_components() {
        let fs = MemoryBackend::new();
        write(&fs, "dir/a", b"").await;
        write(&fs, "dir/sub/b", b"").await;
        write(&fs, "dir2/c", b"").await;

        fs.remove_all(&cx(), Path::new("dir")).await.unwrap();

        assert!(fs.stat(&cx(), Path::new("dir")).await.is_err());
        assert!(fs.stat(&cx(), Path::new("dir2/c")).await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_file_and_dir() {
        let fs = MemoryBackend::new();
        write(&fs, "old.txt", b"content").await;
        fs.rename(&cx(), Path::new("old.txt"), Path::new("new.txt"))
            .await
            .unwrap();
        assert!(fs.stat(&cx(), Path::new("old.txt")).await.is_err());
        assert_eq!(
            fs.read_file(&cx(), Path::new("new.txt")).await.unwrap(),
            b"content"
        );

        write(&fs, "d/x", b"1").await;
        fs.rename(&cx(), Path::new("d"), Path::new("e")).await.unwrap();
        assert_eq!(fs.read_file(&cx(), Path::new("e/x")).await.unwrap(), b"1");
        assert!(fs.stat(&cx(), Path::new("d")).await.is_err());
    }

    #[tokio::test]
    async fn test_symlink_stat_and_lstat() {
        let fs = MemoryBackend::new();
        write(&fs, "dir/target.txt", b"abc").await;
        fs.symlink(&cx(), Path::new("target.txt"), Path::new("dir/link"))
            .await
            .unwrap();

        assert_eq!(
            fs.readlink(&cx(), Path::new("dir/link")).await.unwrap(),
            Path::new("target.txt")
        );
        assert!(fs.lstat(&cx(), Path::new("dir/link")).await.unwrap().is_symlink());

        let attr = fs.stat(&cx(), Path::new("dir/link")).await.unwrap();
        assert!(attr.is_file());
        assert_eq!(attr.size, 3);
    }

    #[tokio::test]
    async fn test_truncate() {
        let fs = MemoryBackend::new();
        write(&fs, "test.txt", b"hello world").await;
        fs.truncate(&cx(), Path::new("test.txt"), 5).await.unwrap();

        let data = fs.read_file(&cx(), Path::new("test.txt")).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_chtimes_and_read_refresh_atime() {
        let fs = MemoryBackend::new();
        write(&fs, "f", b"x").await;

        let old = SystemTime::now() - Duration::from_secs(3600);
        fs.chtimes(&cx(), Path::new("f"), old, old).await.unwrap();
        let attr = fs.stat(&cx(), Path::new("f")).await.unwrap();
        assert_eq!(attr.access_time(), old);

        fs.read_file(&cx(), Path::new("f")).await.unwrap();
        let attr = fs.stat(&cx(), Path::new("f")).await.unwrap();
        assert!(attr.access_time() > old);
        assert_eq!(attr.mtime, old);
    }

    #[tokio::test]
    async fn test_chmod_chown() {
        let fs = MemoryBackend::new();
        write(&fs, "f", b"x").await;
        fs.chmod(&cx(), Path::new("f"), 0o600).await.unwrap();
        fs.chown(&cx(), Path::new("f"), Some(10), None).await.unwrap();

        let attr = fs.stat(&cx(), Path::new("f")).await.unwrap();
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.uid, Some(10));
        assert_eq!(attr.gid, None);
    }

    #[tokio::test]
    async fn test_auto_create_parents() {
        let fs = MemoryBackend::new();
        write(&fs, "a/b/c/file.txt", b"").await;

        assert!(fs.stat(&cx(), Path::new("a")).await.unwrap().is_dir());
        assert!(fs.stat(&cx(), Path::new("a/b/c")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let fs = MemoryBackend::new();
        write(&fs, "/a/b/c.txt", b"").await;

        // Various path forms should all work
        assert!(fs.stat(&cx(), Path::new("a/b/c.txt")).await.is_ok());
        assert!(fs.stat(&cx(), Path::new("/a/b/c.txt")).await.is_ok());
        assert!(fs.stat(&cx(), Path::new("a/./b/c.txt")).await.is_ok());
        assert!(fs.stat(&cx(), Path::new("a/b/../b/c.txt")).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let fs = MemoryBackend::new();
        let cx = OpContext::background();
        cx.cancel();
        let err = fs.stat(&cx, Path::new("")).await.unwrap_err();
        assert!(matches!(err, VfsError::Cancelled));
    }
}
