//! Eviction limits.
//!
//! [`EvictConfig`] is what [`EvictFs`](crate::EvictFs) runs with. [`Limits`]
//! is its serializable form, loaded from RON by the CLI:
//!
//! ```ron
//! (
//!     max_files: 10000,
//!     max_size: 1073741824,
//!     max_age_secs: 86400,
//!     policy: Lru,
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vellum_vfs::FileAttr;

use crate::policy::{LargestFirstMetadata, LruMetadata, Metadata};

/// Builds the initial policy state for a newly tracked file.
pub type MetadataFactory = Arc<dyn Fn(&FileAttr) -> Box<dyn Metadata> + Send + Sync>;

/// Limits enforced by [`EvictFs`](crate::EvictFs). Zero means unbounded.
#[derive(Clone)]
pub struct EvictConfig {
    /// Maximum number of tracked files.
    pub max_files: usize,
    /// Maximum total size of tracked files, in bytes.
    pub max_size: u64,
    /// Maximum time since last access. Checked when a path is used.
    pub max_age: Duration,
    /// Eviction policy.
    pub metadata: MetadataFactory,
}

impl Default for EvictConfig {
    fn default() -> Self {
        Self {
            max_files: 0,
            max_size: 0,
            max_age: Duration::ZERO,
            metadata: PolicyKind::Lru.factory(),
        }
    }
}

impl fmt::Debug for EvictConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictConfig")
            .field("max_files", &self.max_files)
            .field("max_size", &self.max_size)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl EvictConfig {
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Use a custom policy.
    pub fn with_metadata<F>(mut self, factory: F) -> Self
    where
        F: Fn(&FileAttr) -> Box<dyn Metadata> + Send + Sync + 'static,
    {
        self.metadata = Arc::new(factory);
        self
    }

    pub(crate) fn bounds(&self) -> Bounds {
        Bounds {
            max_files: self.max_files,
            max_size: self.max_size,
        }
    }
}

/// The count and size limits the coordinator enforces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Bounds {
    pub max_files: usize,
    pub max_size: u64,
}

impl Bounds {
    pub fn exceeded(&self, files: usize, bytes: u64) -> bool {
        (self.max_files > 0 && files > self.max_files)
            || (self.max_size > 0 && bytes > self.max_size)
    }
}

/// Built-in eviction policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Least recently accessed first.
    #[default]
    Lru,
    /// Largest first, ties by access time.
    LargestFirst,
}

impl PolicyKind {
    pub fn factory(self) -> MetadataFactory {
        match self {
            PolicyKind::Lru => Arc::new(|attr: &FileAttr| -> Box<dyn Metadata> {
                Box::new(LruMetadata::new(attr))
            }),
            PolicyKind::LargestFirst => Arc::new(|attr: &FileAttr| -> Box<dyn Metadata> {
                Box::new(LargestFirstMetadata::new(attr))
            }),
        }
    }
}

/// Serializable limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_files: usize,
    pub max_size: u64,
    pub max_age_secs: u64,
    pub policy: PolicyKind,
}

impl Limits {
    /// Parse limits from RON text.
    pub fn from_ron(text: &str) -> Result<Self, LimitsError> {
        Ok(ron::from_str(text)?)
    }

    /// Load limits from a RON file.
    pub fn load(path: &Path) -> Result<Self, LimitsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn into_config(self) -> EvictConfig {
        EvictConfig {
            max_files: self.max_files,
            max_size: self.max_size,
            max_age: Duration::from_secs(self.max_age_secs),
            metadata: self.policy.factory(),
        }
    }
}

/// Error type for loading [`Limits`].
#[derive(Debug, thiserror::Error)]
pub enum LimitsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}
