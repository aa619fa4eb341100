//! Eviction-bounded caching filesystem.
//!
//! [`EvictFs`] wraps any [`VfsOps`](vellum_vfs::VfsOps) backend and keeps it
//! within a file count, a total size and a maximum idle age. It tracks every
//! file in an in-memory index (rebuilt by a full scan on construction) and
//! trims the lowest-priority files in a background task.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vellum_evict::{EvictConfig, EvictFs};
//! use vellum_vfs::{LocalBackend, OpContext};
//!
//! let cx = OpContext::background();
//! let backing = Arc::new(LocalBackend::new("/var/cache/blobs"));
//! let config = EvictConfig::default().with_max_size(1 << 30);
//! let fs = EvictFs::new(&cx, backing, config).await?;
//! ```

mod config;
mod evictor;
mod file;
mod fs;
mod heap;
mod policy;
mod registry;

pub use config::{EvictConfig, Limits, LimitsError, MetadataFactory, PolicyKind};
pub use evictor::EvictStats;
pub use fs::EvictFs;
pub use policy::{LargestFirstMetadata, LruMetadata, Metadata};
