//! Shared eviction state and the background coordinator.
//!
//! Foreground calls update the index through [`Evictor::touch`] and friends
//! and nudge the coordinator over a capacity-1 channel. The coordinator pops
//! victims one at a time with the lock held only for the pop, and deletes
//! each one from the backing filesystem after releasing it.
//!
//! The lock is never held across backing I/O. Touches carry a ticket from
//! the index so a removal that lands while their stat is running wins.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vellum_vfs::path::display;
use vellum_vfs::{OpContext, VfsError, VfsOps, VfsResult, fallback};

use crate::config::{Bounds, EvictConfig, MetadataFactory};
use crate::registry::{EvictionIndex, TouchTicket};

/// Snapshot of what is currently tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictStats {
    /// Number of tracked files.
    pub files: usize,
    /// Sum of tracked file sizes, in bytes.
    pub bytes: u64,
}

pub(crate) struct Evictor {
    pub backing: Arc<dyn VfsOps>,
    index: Mutex<EvictionIndex>,
    bounds: Bounds,
    max_age: Duration,
    metadata: MetadataFactory,
    signal: mpsc::Sender<()>,
}

impl Evictor {
    pub fn new(backing: Arc<dyn VfsOps>, config: &EvictConfig) -> (Self, mpsc::Receiver<()>) {
        let (signal, rx) = mpsc::channel(1);
        let evictor = Self {
            backing,
            index: Mutex::new(EvictionIndex::new()),
            bounds: config.bounds(),
            max_age: config.max_age,
            metadata: Arc::clone(&config.metadata),
            signal,
        };
        (evictor, rx)
    }

    /// Seed the index from everything already in the backing store.
    pub async fn scan(&self, cx: &OpContext) -> VfsResult<()> {
        let found = vellum_vfs::walk_files(cx, self.backing.as_ref(), Path::new("")).await?;

        let mut index = self.index.lock();
        for (path, attr) in found {
            index.insert(path, (self.metadata)(&attr));
        }
        tracing::info!(
            files = index.len(),
            bytes = index.current_size(),
            "eviction index built"
        );
        Ok(())
    }

    pub fn stats(&self) -> EvictStats {
        let index = self.index.lock();
        EvictStats {
            files: index.len(),
            bytes: index.current_size(),
        }
    }

    /// True while the count or size bound is violated.
    pub fn over_bounds(&self) -> bool {
        let index = self.index.lock();
        self.bounds.exceeded(index.len(), index.current_size())
    }

    pub fn is_tracked(&self, key: &Path) -> bool {
        self.index.lock().contains(key)
    }

    /// Wake the coordinator. A signal already pending absorbs this one.
    pub fn wake(&self) {
        let _ = self.signal.try_send(());
    }

    /// Re-stat `key` and fold the result into the index.
    ///
    /// Never fails: a path that can no longer be stat'ed is simply dropped.
    pub async fn touch(&self, cx: &OpContext, key: &Path) {
        let ticket = self.index.lock().begin_touch(key);
        let mut guard = TicketGuard {
            index: &self.index,
            key,
            ticket: Some(ticket),
        };
        let stat = fallback::stat(cx, self.backing.as_ref(), key).await;
        let Some(ticket) = guard.ticket.take() else {
            return;
        };
        let outcome = self
            .index
            .lock()
            .apply_touch(key, ticket, stat, &self.metadata);
        if outcome.needs_eviction_check() {
            tracing::debug!(path = %key.display(), ?outcome, "touched");
            self.wake();
        }
    }

    pub fn untrack(&self, key: &Path) {
        self.index.lock().untrack(key);
    }

    pub fn untrack_prefix(&self, key: &Path) {
        let removed = self.index.lock().untrack_prefix(key);
        if removed > 0 {
            tracing::debug!(path = %key.display(), removed, "untracked subtree");
        }
    }

    pub fn rekey(&self, from: &Path, to: &Path) {
        self.index.lock().rekey_prefix(from, to);
    }

    /// Fail with not-found if `key` has been idle longer than the age bound,
    /// deleting it from the backing store on the way.
    pub async fn check_expired(&self, cx: &OpContext, key: &Path) -> VfsResult<()> {
        if self.max_age.is_zero() {
            return Ok(());
        }
        let expired = self
            .index
            .lock()
            .expire(key, self.max_age, SystemTime::now());
        let Some(item) = expired else {
            return Ok(());
        };

        tracing::debug!(path = %key.display(), "expired on access");
        match fallback::remove(cx, self.backing.as_ref(), &item.path).await {
            Ok(()) => self.resync(cx, key).await,
            Err(e) => {
                tracing::warn!(path = %key.display(), error = %e, "failed to delete expired file");
            }
        }
        Err(VfsError::not_found(display(key)))
    }

    /// Re-check a path after deleting it from the backing store.
    ///
    /// The index dropped it before the delete, so a touch that ran in between
    /// may have put it back; a write that came after the delete must stay.
    async fn resync(&self, cx: &OpContext, key: &Path) {
        self.index.lock().invalidate(key);
        self.touch(cx, key).await;
    }

    /// Evict until the bounds hold again or `stop` is cancelled.
    ///
    /// `stop` is checked between victims only; a delete that has started
    /// always runs to completion.
    async fn drain(&self, stop: &CancellationToken) {
        let cx = OpContext::background();
        while !stop.is_cancelled() {
            let victim = self.index.lock().pop_over(&self.bounds);
            let Some(item) = victim else {
                break;
            };

            tracing::debug!(
                path = %item.path.display(),
                size = item.metadata.size(),
                "evicting"
            );
            // Dropped from the index either way; the next access re-syncs.
            match fallback::remove(&cx, self.backing.as_ref(), &item.path).await {
                Ok(()) => self.resync(&cx, &item.path).await,
                Err(e) => {
                    tracing::warn!(path = %item.path.display(), error = %e, "eviction delete failed");
                }
            }
        }
    }

    #[cfg(test)]
    pub fn check_invariants(&self) {
        self.index.lock().check_invariants();
    }
}

/// Returns an unused touch ticket if the touch is dropped mid-stat.
struct TicketGuard<'a> {
    index: &'a Mutex<EvictionIndex>,
    key: &'a Path,
    ticket: Option<TouchTicket>,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.index.lock().abandon_touch(self.key, ticket);
        }
    }
}

/// Spawn the coordinator. It runs until `token` is cancelled.
pub(crate) fn spawn_coordinator(
    evictor: Arc<Evictor>,
    mut rx: mpsc::Receiver<()>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("eviction coordinator started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(()) => evictor.drain(&token).await,
                    None => break,
                },
            }
        }
        tracing::info!("eviction coordinator stopped");
    })
}
