//! Eviction-priority policies.
//!
//! A policy is per-file state derived from the backing filesystem's
//! metadata. The heap orders tracked files by [`Metadata::less`]; the minimum
//! is the next file to go.

use std::fmt;
use std::time::SystemTime;

use vellum_vfs::FileAttr;

/// Policy-owned state for one tracked file.
pub trait Metadata: Send + Sync + fmt::Debug {
    /// True if `self` should be evicted before `other`.
    ///
    /// Must be a strict weak ordering and a pure function of the two values.
    fn less(&self, other: &dyn Metadata) -> bool;

    /// Refresh from newly fetched attributes.
    ///
    /// Heap position is not this method's concern; the index re-fixes the
    /// item after calling it.
    fn update(&mut self, attr: &FileAttr);

    /// Size in bytes as last observed.
    fn size(&self) -> u64;

    /// Last access time as last observed.
    fn access_time(&self) -> SystemTime;
}

/// Least-recently-used: oldest access time goes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruMetadata {
    size: u64,
    accessed: SystemTime,
}

impl LruMetadata {
    pub fn new(attr: &FileAttr) -> Self {
        Self {
            size: attr.size,
            accessed: attr.access_time(),
        }
    }
}

impl Metadata for LruMetadata {
    fn less(&self, other: &dyn Metadata) -> bool {
        self.accessed < other.access_time()
    }

    fn update(&mut self, attr: &FileAttr) {
        self.size = attr.size;
        self.accessed = attr.access_time();
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn access_time(&self) -> SystemTime {
        self.accessed
    }
}

/// Largest file goes first; equal sizes fall back to LRU.
///
/// Frees the most space per deletion, at the cost of evicting big files
/// that are still in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargestFirstMetadata {
    size: u64,
    accessed: SystemTime,
}

impl LargestFirstMetadata {
    pub fn new(attr: &FileAttr) -> Self {
        Self {
            size: attr.size,
            accessed: attr.access_time(),
        }
    }
}

impl Metadata for LargestFirstMetadata {
    fn less(&self, other: &dyn Metadata) -> bool {
        match self.size.cmp(&other.size()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.accessed < other.access_time(),
        }
    }

    fn update(&mut self, attr: &FileAttr) {
        self.size = attr.size;
        self.accessed = attr.access_time();
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn access_time(&self) -> SystemTime {
        self.accessed
    }
}
