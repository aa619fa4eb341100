//! Path normalization shared by backends and wrappers.

use std::path::{Component, Path, PathBuf};

/// Normalize a path: remove leading `/`, resolve `.` and `..`.
///
/// `..` at the root is dropped rather than escaping it.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(s) => result.push(s),
        }
    }
    result
}

/// Returns true if `path` is `prefix` itself or lies below it.
///
/// Both arguments are expected to be normalized. The empty prefix (root)
/// contains everything.
pub fn is_within(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}

/// Display form used in error messages.
pub fn display(path: &Path) -> String {
    path.display().to_string()
}
