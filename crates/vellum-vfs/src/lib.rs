//! Virtual filesystem layer for vellum.
//!
//! A small capability-based filesystem interface. Backends implement the
//! mandatory [`VfsOps::open_file`] and [`VfsOps::remove`] plus whichever
//! optional operations they support; wrappers such as the eviction layer
//! reach the rest through [`fallback`], which emulates what it can.
//!
//! # Example
//!
//! ```ignore
//! use vellum_vfs::{fallback, MemoryBackend, OpContext};
//!
//! let fs = MemoryBackend::new();
//! let cx = OpContext::background();
//! fallback::write_file(&cx, &fs, "notes.txt".as_ref(), b"hi", 0o644).await?;
//! ```

pub mod backends;
pub mod context;
pub mod error;
pub mod fallback;
pub mod ops;
pub mod path;
pub mod types;
pub mod walk;

pub use backends::{LocalBackend, MemoryBackend};
pub use context::OpContext;
pub use error::{VfsError, VfsResult};
pub use ops::{VfsFile, VfsOps};
pub use types::{DirEntry, FileAttr, FileType, OpenFlags};
pub use walk::walk_files;
