//! Capability checks with emulation.
//!
//! Callers that hold an arbitrary `VfsOps` go through these helpers rather
//! than calling optional methods directly. Each helper tries the backend's
//! own implementation first; if that reports [`VfsError::Unsupported`] and the
//! operation can be composed from simpler ones, the composition runs
//! instead. Every failure comes back annotated with the operation and path.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::context::OpContext;
use crate::error::{VfsError, VfsResult};
use crate::ops::{VfsFile, VfsOps};
use crate::path::display;
use crate::types::{DirEntry, FileAttr, OpenFlags};

/// Open a file with explicit flags.
pub async fn open_file<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    flags: OpenFlags,
    mode: u32,
) -> VfsResult<Box<dyn VfsFile>> {
    fs.open_file(cx, path, flags, mode)
        .await
        .map_err(|e| e.with_op("open", display(path)))
}

/// Remove a file or empty directory.
pub async fn remove<F: VfsOps + ?Sized>(cx: &OpContext, fs: &F, path: &Path) -> VfsResult<()> {
    fs.remove(cx, path)
        .await
        .map_err(|e| e.with_op("remove", display(path)))
}

/// Stat a path, falling back to opening it and asking the handle.
pub async fn stat<F: VfsOps + ?Sized>(cx: &OpContext, fs: &F, path: &Path) -> VfsResult<FileAttr> {
    let result = match fs.stat(cx, path).await {
        Err(e) if e.is_unsupported() => stat_via_open(cx, fs, path).await,
        other => other,
    };
    result.map_err(|e| e.with_op("stat", display(path)))
}

async fn stat_via_open<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
) -> VfsResult<FileAttr> {
    let file = fs.open_file(cx, path, OpenFlags::read(), 0).await?;
    file.stat().await
}

/// Lstat a path; backends without symlink support fall back to `stat`.
pub async fn lstat<F: VfsOps + ?Sized>(cx: &OpContext, fs: &F, path: &Path) -> VfsResult<FileAttr> {
    match fs.lstat(cx, path).await {
        Err(e) if e.is_unsupported() => stat(cx, fs, path).await,
        other => other.map_err(|e| e.with_op("lstat", display(path))),
    }
}

/// Read a whole file.
pub async fn read_file<F: VfsOps + ?Sized>(cx: &OpContext, fs: &F, path: &Path) -> VfsResult<Vec<u8>> {
    let result = match fs.read_file(cx, path).await {
        Err(e) if e.is_unsupported() => {
            let mut file = fs.open_file(cx, path, OpenFlags::read(), 0).await?;
            file.read_to_end().await
        }
        other => other,
    };
    result.map_err(|e| e.with_op("read", display(path)))
}

/// Create or truncate a file and write `data` to it.
pub async fn write_file<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    data: &[u8],
    perm: u32,
) -> VfsResult<()> {
    let result = match fs.write_file(cx, path, data, perm).await {
        Err(e) if e.is_unsupported() => {
            let mut file = fs
                .open_file(cx, path, OpenFlags::create_truncate(), perm)
                .await?;
            file.write_all(data).await?;
            file.flush().await
        }
        other => other,
    };
    result.map_err(|e| e.with_op("write", display(path)))
}

/// Truncate a file by path, falling back to truncating an open handle.
pub async fn truncate<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    size: u64,
) -> VfsResult<()> {
    let result = match fs.truncate(cx, path, size).await {
        Err(e) if e.is_unsupported() => {
            let mut file = fs.open_file(cx, path, OpenFlags::write(), 0).await?;
            file.truncate(size).await
        }
        other => other,
    };
    result.map_err(|e| e.with_op("truncate", display(path)))
}

/// Read a directory.
pub async fn readdir<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
) -> VfsResult<Vec<DirEntry>> {
    fs.readdir(cx, path)
        .await
        .map_err(|e| e.with_op("readdir", display(path)))
}

/// Create a single directory.
pub async fn mkdir<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    perm: u32,
) -> VfsResult<()> {
    fs.mkdir(cx, path, perm)
        .await
        .map_err(|e| e.with_op("mkdir", display(path)))
}

/// Create a directory and its parents, falling back to one `mkdir` per
/// missing component.
pub async fn mkdir_all<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    perm: u32,
) -> VfsResult<()> {
    let result = match fs.mkdir_all(cx, path, perm).await {
        Err(e) if e.is_unsupported() => mkdir_each(cx, fs, path, perm).await,
        other => other,
    };
    result.map_err(|e| e.with_op("mkdir", display(path)))
}

async fn mkdir_each<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    perm: u32,
) -> VfsResult<()> {
    let mut current = PathBuf::new();
    for component in crate::path::normalize(path).components() {
        current.push(component);
        match stat(cx, fs, &current).await {
            Ok(attr) if attr.is_dir() => continue,
            Ok(_) => return Err(VfsError::not_a_directory(display(&current))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        if let Err(e) = fs.mkdir(cx, &current, perm).await {
            // Lost a race with a concurrent mkdir; that's fine as long as a
            // directory is there now.
            match stat(cx, fs, &current).await {
                Ok(attr) if attr.is_dir() => {}
                _ => return Err(e),
            }
        }
    }
    Ok(())
}

/// Remove a path and everything below it.
///
/// Falls back to removing entries one at a time, children before their
/// parents. A missing path is not an error.
pub async fn remove_all<F: VfsOps + ?Sized>(cx: &OpContext, fs: &F, path: &Path) -> VfsResult<()> {
    let result = match fs.remove_all(cx, path).await {
        Err(e) if e.is_unsupported() => remove_tree(cx, fs, path).await,
        other => other,
    };
    result.map_err(|e| e.with_op("remove", display(path)))
}

async fn remove_tree<F: VfsOps + ?Sized>(cx: &OpContext, fs: &F, root: &Path) -> VfsResult<()> {
    // (path, children already queued for removal)
    let mut stack = vec![(root.to_path_buf(), false)];
    while let Some((path, expanded)) = stack.pop() {
        let err = match fs.remove(cx, &path).await {
            Ok(()) => continue,
            Err(e) if e.is_not_found() => continue,
            Err(e) => e,
        };
        if expanded {
            return Err(err);
        }
        // Probably a non-empty directory. If it can't be listed, the
        // original failure is the more useful one to report.
        let Ok(entries) = fs.readdir(cx, &path).await else {
            return Err(err);
        };
        stack.push((path.clone(), true));
        for entry in entries {
            stack.push((path.join(&entry.name), false));
        }
    }
    Ok(())
}

/// Rename `from` to `to`.
pub async fn rename<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    from: &Path,
    to: &Path,
) -> VfsResult<()> {
    fs.rename(cx, from, to)
        .await
        .map_err(|e| e.with_op("rename", link_display(from, to)))
}

/// Create a symlink at `link` pointing to `target`.
pub async fn symlink<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    target: &Path,
    link: &Path,
) -> VfsResult<()> {
    fs.symlink(cx, target, link)
        .await
        .map_err(|e| e.with_op("symlink", link_display(target, link)))
}

/// Read a symlink's target.
pub async fn readlink<F: VfsOps + ?Sized>(cx: &OpContext, fs: &F, path: &Path) -> VfsResult<PathBuf> {
    fs.readlink(cx, path)
        .await
        .map_err(|e| e.with_op("readlink", display(path)))
}

/// Change permission bits.
pub async fn chmod<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    perm: u32,
) -> VfsResult<()> {
    fs.chmod(cx, path, perm)
        .await
        .map_err(|e| e.with_op("chmod", display(path)))
}

/// Change ownership.
pub async fn chown<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
) -> VfsResult<()> {
    fs.chown(cx, path, uid, gid)
        .await
        .map_err(|e| e.with_op("chown", display(path)))
}

/// Change ownership without following a trailing symlink.
pub async fn lchown<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
) -> VfsResult<()> {
    fs.lchown(cx, path, uid, gid)
        .await
        .map_err(|e| e.with_op("lchown", display(path)))
}

/// Change access and modification times.
pub async fn chtimes<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    path: &Path,
    atime: SystemTime,
    mtime: SystemTime,
) -> VfsResult<()> {
    fs.chtimes(cx, path, atime, mtime)
        .await
        .map_err(|e| e.with_op("chtimes", display(path)))
}

fn link_display(from: &Path, to: &Path) -> String {
    format!("{} -> {}", from.display(), to.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use async_trait::async_trait;

    /// Only the mandatory surface, so every helper has to emulate.
    struct Minimal(MemoryBackend);

    #[async_trait]
    impl VfsOps for Minimal {
        async fn open_file(
            &self,
            cx: &OpContext,
            path: &Path,
            flags: OpenFlags,
            mode: u32,
        ) -> VfsResult<Box<dyn VfsFile>> {
            self.0.open_file(cx, path, flags, mode).await
        }

        async fn remove(&self, cx: &OpContext, path: &Path) -> VfsResult<()> {
            self.0.remove(cx, path).await
        }

        async fn readdir(&self, cx: &OpContext, path: &Path) -> VfsResult<Vec<DirEntry>> {
            self.0.readdir(cx, path).await
        }

        async fn mkdir(&self, cx: &OpContext, path: &Path, perm: u32) -> VfsResult<()> {
            self.0.mkdir(cx, path, perm).await
        }
    }

    fn cx() -> OpContext {
        OpContext::background()
    }

    #[tokio::test]
    async fn test_write_and_read_file_emulated() {
        let fs = Minimal(MemoryBackend::new());
        write_file(&cx(), &fs, Path::new("a.txt"), b"hello", 0o644)
            .await
            .unwrap();

        let data = read_file(&cx(), &fs, Path::new("a.txt")).await.unwrap();
        assert_eq!(data, b"hello");

        let attr = stat(&cx(), &fs, Path::new("a.txt")).await.unwrap();
        assert_eq!(attr.size, 5);
    }

    #[tokio::test]
    async fn test_truncate_emulated() {
        let fs = Minimal(MemoryBackend::new());
        write_file(&cx(), &fs, Path::new("a.txt"), b"hello world", 0o644)
            .await
            .unwrap();
        truncate(&cx(), &fs, Path::new("a.txt"), 5).await.unwrap();

        let data = read_file(&cx(), &fs, Path::new("a.txt")).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_mkdir_all_emulated() {
        let fs = Minimal(MemoryBackend::new());
        mkdir_all(&cx(), &fs, Path::new("a/b/c"), 0o755)
            .await
            .unwrap();
        // Idempotent.
        mkdir_all(&cx(), &fs, Path::new("a/b"), 0o755).await.unwrap();

        let attr = fs.0.stat(&cx(), Path::new("a/b/c")).await.unwrap();
        assert!(attr.is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_all_through_file_fails() {
        let fs = Minimal(MemoryBackend::new());
        write_file(&cx(), &fs, Path::new("f"), b"", 0o644)
            .await
            .unwrap();

        let err = mkdir_all(&cx(), &fs, Path::new("f/sub"), 0o755)
            .await
            .unwrap_err();
        assert!(matches!(err.root_cause(), VfsError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_remove_all_emulated() {
        let fs = Minimal(MemoryBackend::new());
        for p in ["d/one", "d/sub/two", "d/sub/deeper/three", "keep"] {
            write_file(&cx(), &fs, Path::new(p), b"x", 0o644)
                .await
                .unwrap();
        }

        remove_all(&cx(), &fs, Path::new("d")).await.unwrap();

        assert!(stat(&cx(), &fs, Path::new("d")).await.unwrap_err().is_not_found());
        assert!(stat(&cx(), &fs, Path::new("keep")).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_all_missing_is_ok() {
        let fs = Minimal(MemoryBackend::new());
        remove_all(&cx(), &fs, Path::new("nope")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unemulated_op_reports_unsupported() {
        let fs = Minimal(MemoryBackend::new());
        let err = rename(&cx(), &fs, Path::new("a"), Path::new("b"))
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(err.to_string(), "rename a -> b: operation not supported: rename");
    }

    #[tokio::test]
    async fn test_errors_carry_op_and_path() {
        let fs = MemoryBackend::new();
        let err = stat(&cx(), &fs, Path::new("missing")).await.unwrap_err();
        match err {
            VfsError::Op { op, path, .. } => {
                assert_eq!(op, "stat");
                assert_eq!(path, "missing");
            }
            other => panic!("expected Op, got {other:?}"),
        }
    }
}
