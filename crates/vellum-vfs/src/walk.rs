//! Recursive tree walk used to seed indexes from existing content.

use std::path::{Path, PathBuf};

use crate::context::OpContext;
use crate::error::VfsResult;
use crate::fallback;
use crate::ops::VfsOps;
use crate::types::FileAttr;

/// Collect every non-directory entry below `root`, with its own metadata.
///
/// Depth-first: each directory's own entries come in name order, ahead of
/// its subdirectories. Directories are descended but not returned.
/// Symlinks are reported as links and never followed. The first `readdir` or
/// `lstat` failure aborts the walk.
pub async fn walk_files<F: VfsOps + ?Sized>(
    cx: &OpContext,
    fs: &F,
    root: &Path,
) -> VfsResult<Vec<(PathBuf, FileAttr)>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        cx.check()?;
        let entries = fallback::readdir(cx, fs, &dir).await?;
        let mut subdirs = Vec::new();
        for entry in entries {
            let path = dir.join(&entry.name);
            let attr = fallback::lstat(cx, fs, &path).await?;
            if attr.is_dir() {
                subdirs.push(path);
            } else {
                found.push((path, attr));
            }
        }
        // Reverse so the stack pops them in name order
        pending.extend(subdirs.into_iter().rev());
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::error::VfsError;
    use crate::types::FileType;

    #[tokio::test]
    async fn test_walk_lists_files_only() {
        let fs = MemoryBackend::new();
        let cx = OpContext::background();
        for (p, data) in [("b/two", "22"), ("a", "1"), ("b/c/three", "333")] {
            fs.write_file(&cx, Path::new(p), data.as_bytes(), 0o644)
                .await
                .unwrap();
        }
        fs.mkdir(&cx, Path::new("empty"), 0o755).await.unwrap();
        fs.symlink(&cx, Path::new("a"), Path::new("link"))
            .await
            .unwrap();

        let found = walk_files(&cx, &fs, Path::new("")).await.unwrap();
        let summary: Vec<_> = found
            .iter()
            .map(|(p, attr)| (p.to_string_lossy().into_owned(), attr.kind))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("a".to_string(), FileType::File),
                ("link".to_string(), FileType::Symlink),
                ("b/two".to_string(), FileType::File),
                ("b/c/three".to_string(), FileType::File),
            ]
        );
        assert_eq!(found[3].1.size, 3);
    }

    #[tokio::test]
    async fn test_walk_missing_root_fails() {
        let fs = MemoryBackend::new();
        let cx = OpContext::background();
        let err = walk_files(&cx, &fs, Path::new("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_walk_honours_cancellation() {
        let fs = MemoryBackend::new();
        let cx = OpContext::background();
        cx.cancel();
        let err = walk_files(&cx, &fs, Path::new("")).await.unwrap_err();
        assert!(matches!(err, VfsError::Cancelled));
    }
}
