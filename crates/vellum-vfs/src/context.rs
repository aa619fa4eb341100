//! Per-call cancellation context.
//!
//! Every [`VfsOps`](crate::VfsOps) method takes an [`OpContext`] so that a
//! caller can abandon slow backend work. Layers that wrap another filesystem
//! forward the context unchanged; they never wait on it themselves.

use tokio_util::sync::CancellationToken;

use crate::error::{VfsError, VfsResult};

/// Cancellation context carried through filesystem calls.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
}

impl OpContext {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Derive a context that is cancelled when this one is, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// The underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context (and every child derived from it).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`VfsError::Cancelled`] once the context is cancelled.
    pub fn check(&self) -> VfsResult<()> {
        if self.token.is_cancelled() {
            Err(VfsError::Cancelled)
        } else {
            Ok(())
        }
    }
}
