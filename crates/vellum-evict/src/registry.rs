//! The eviction index: path map, priority heap and running byte total.
//!
//! All three change together. Callers hold one lock around the whole index
//! and only ever touch it through the methods here, which keep
//! `files.len() == heap.len()` and `current_size == Σ size()` after every
//! call.
//!
//! A touch stats the backing store without the lock, so the index also
//! remembers which paths have a touch in flight. Removing a path bumps its
//! generation there, and a touch that started under an older generation is
//! thrown away instead of resurrecting the path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use vellum_vfs::path::is_within;
use vellum_vfs::{FileAttr, VfsError, VfsResult};

use crate::config::{Bounds, MetadataFactory};
use crate::heap::{Handle, PriorityHeap, TrackedItem};
use crate::policy::Metadata;

/// What a touch did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TouchOutcome {
    /// A new path was tracked.
    Inserted,
    /// An already tracked path was refreshed.
    Updated,
    /// The path could not be stat'ed and was dropped.
    Untracked,
    /// Nothing changed.
    Ignored,
    /// The path was removed while the stat was running; the result was
    /// dropped.
    Stale,
}

impl TouchOutcome {
    /// True if the index grew or an entry changed, so bounds may now be
    /// violated.
    pub fn needs_eviction_check(self) -> bool {
        matches!(self, TouchOutcome::Inserted | TouchOutcome::Updated)
    }
}

/// Proof that a touch registered itself before it went to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TouchTicket {
    generation: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct InFlight {
    touches: usize,
    generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct EvictionIndex {
    files: HashMap<PathBuf, Handle>,
    heap: PriorityHeap,
    current_size: u64,
    in_flight: HashMap<PathBuf, InFlight>,
}

impl EvictionIndex {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            heap: PriorityHeap::new(),
            current_size: 0,
            in_flight: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Start tracking `path`, replacing any previous entry.
    pub fn insert(&mut self, path: PathBuf, metadata: Box<dyn Metadata>) {
        self.remove_entry(&path);
        self.current_size += metadata.size();
        let handle = self.heap.push(path.clone(), metadata);
        self.files.insert(path, handle);
    }

    /// Register a touch of `path` that is about to stat the backing store.
    ///
    /// Every ticket must be handed back through [`apply_touch`] or
    /// [`abandon_touch`].
    ///
    /// [`apply_touch`]: Self::apply_touch
    /// [`abandon_touch`]: Self::abandon_touch
    pub fn begin_touch(&mut self, path: &Path) -> TouchTicket {
        let entry = self.in_flight.entry(path.to_path_buf()).or_default();
        entry.touches += 1;
        TouchTicket {
            generation: entry.generation,
        }
    }

    /// Give back a ticket without applying anything.
    pub fn abandon_touch(&mut self, path: &Path, ticket: TouchTicket) {
        self.finish_touch(path, ticket);
    }

    /// Release `ticket`; true if no removal of `path` happened since it was
    /// issued.
    fn finish_touch(&mut self, path: &Path, ticket: TouchTicket) -> bool {
        let Some(entry) = self.in_flight.get_mut(path) else {
            return false;
        };
        let current = entry.generation == ticket.generation;
        entry.touches = entry.touches.saturating_sub(1);
        if entry.touches == 0 {
            self.in_flight.remove(path);
        }
        current
    }

    /// Make every outstanding ticket for `path` stale.
    pub fn invalidate(&mut self, path: &Path) {
        if let Some(entry) = self.in_flight.get_mut(path) {
            entry.generation += 1;
        }
    }

    fn invalidate_prefix(&mut self, prefix: &Path) {
        for (path, entry) in self.in_flight.iter_mut() {
            if is_within(path, prefix) {
                entry.generation += 1;
            }
        }
    }

    /// Fold the result of a fresh stat of `path` into the index.
    pub fn apply_touch(
        &mut self,
        path: &Path,
        ticket: TouchTicket,
        stat: VfsResult<FileAttr>,
        factory: &MetadataFactory,
    ) -> TouchOutcome {
        if !self.finish_touch(path, ticket) {
            return TouchOutcome::Stale;
        }
        let attr = match stat {
            Ok(attr) => attr,
            // A cancelled caller says nothing about the file itself.
            Err(e) if matches!(e.root_cause(), VfsError::Cancelled) => {
                return TouchOutcome::Ignored;
            }
            Err(_) => {
                return match self.remove_entry(path) {
                    Some(_) => TouchOutcome::Untracked,
                    None => TouchOutcome::Ignored,
                };
            }
        };

        if attr.is_dir() {
            return TouchOutcome::Ignored;
        }

        match self.files.get(path).copied() {
            Some(handle) => {
                if let Some(item) = self.heap.get_mut(handle) {
                    self.current_size -= item.metadata.size();
                    item.metadata.update(&attr);
                    self.current_size += item.metadata.size();
                }
                self.heap.fix(handle);
                TouchOutcome::Updated
            }
            None => {
                self.insert(path.to_path_buf(), factory(&attr));
                TouchOutcome::Inserted
            }
        }
    }

    /// Stop tracking `path` because it was removed. Touches of it already in
    /// flight go stale, tracked or not.
    pub fn untrack(&mut self, path: &Path) -> Option<TrackedItem> {
        self.invalidate(path);
        self.remove_entry(path)
    }

    fn remove_entry(&mut self, path: &Path) -> Option<TrackedItem> {
        let handle = self.files.remove(path)?;
        let item = self.heap.remove(handle)?;
        self.current_size -= item.metadata.size();
        Some(item)
    }

    /// Stop tracking `prefix` and everything below it. Returns how many
    /// entries went.
    pub fn untrack_prefix(&mut self, prefix: &Path) -> usize {
        self.invalidate_prefix(prefix);
        let doomed: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| is_within(p, prefix))
            .cloned()
            .collect();
        for path in &doomed {
            self.remove_entry(path);
        }
        doomed.len()
    }

    /// Move every entry at or below `from` to the same place below `to`.
    ///
    /// Entries already tracked under the destination are dropped first; the
    /// backing rename replaced them.
    pub fn rekey_prefix(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        self.invalidate_prefix(from);
        self.invalidate_prefix(to);
        let moving: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| is_within(p, from))
            .cloned()
            .collect();
        if moving.is_empty() {
            return;
        }
        self.untrack_prefix(to);

        for old in moving {
            let Some(handle) = self.files.remove(&old) else {
                continue;
            };
            let relative = old.strip_prefix(from).unwrap_or(Path::new(""));
            let new_path = if relative.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(relative)
            };
            if let Some(item) = self.heap.get_mut(handle) {
                item.path = new_path.clone();
            }
            self.files.insert(new_path, handle);
        }
    }

    /// Pop the lowest-priority entry if `bounds` are currently exceeded.
    pub fn pop_over(&mut self, bounds: &Bounds) -> Option<TrackedItem> {
        if !bounds.exceeded(self.len(), self.current_size) {
            return None;
        }
        let item = self.heap.pop()?;
        self.files.remove(&item.path);
        self.invalidate(&item.path);
        self.current_size -= item.metadata.size();
        Some(item)
    }

    /// Untrack and return `path` if it has been idle longer than `max_age`.
    ///
    /// Untracked paths are never expired, and neither is anything whose
    /// access time lies in the future.
    pub fn expire(&mut self, path: &Path, max_age: Duration, now: SystemTime) -> Option<TrackedItem> {
        let handle = *self.files.get(path)?;
        let accessed = self.heap.get(handle)?.metadata.access_time();
        let idle = now.duration_since(accessed).ok()?;
        if idle <= max_age {
            return None;
        }
        self.untrack(path)
    }

    /// Panics if the map, heap and size counter disagree.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        self.heap.check_invariants();
        assert_eq!(self.files.len(), self.heap.len(), "map and heap sizes");

        let mut total = 0;
        for (path, handle) in &self.files {
            let item = self.heap.get(*handle).expect("mapped handle is live");
            assert_eq!(&item.path, path, "item path matches its key");
            total += item.metadata.size();
        }
        assert_eq!(total, self.current_size, "running size");
        assert!(self.in_flight.is_empty(), "touch tickets outstanding");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictConfig;
    use std::time::UNIX_EPOCH;

    fn attr(size: u64, secs: u64) -> FileAttr {
        let mut attr = FileAttr::file(size, 0o644);
        attr.atime = Some(UNIX_EPOCH + Duration::from_secs(secs));
        attr
    }

    fn factory() -> MetadataFactory {
        EvictConfig::default().metadata
    }

    fn apply(index: &mut EvictionIndex, path: &str, stat: VfsResult<FileAttr>) -> TouchOutcome {
        let ticket = index.begin_touch(Path::new(path));
        index.apply_touch(Path::new(path), ticket, stat, &factory())
    }

    fn touch(index: &mut EvictionIndex, path: &str, size: u64, secs: u64) -> TouchOutcome {
        apply(index, path, Ok(attr(size, secs)))
    }

    fn paths(index: &EvictionIndex) -> Vec<String> {
        let mut v: Vec<_> = index
            .files
            .keys()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_touch_inserts_then_updates() {
        let mut index = EvictionIndex::new();
        assert_eq!(touch(&mut index, "a", 10, 1), TouchOutcome::Inserted);
        assert_eq!(touch(&mut index, "a", 25, 2), TouchOutcome::Updated);
        index.check_invariants();
        assert_eq!(index.len(), 1);
        assert_eq!(index.current_size(), 25);
    }

    #[test]
    fn test_touch_is_idempotent() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "a", 10, 1);
        touch(&mut index, "b", 20, 2);
        touch(&mut index, "b", 20, 2);
        index.check_invariants();
        assert_eq!(index.current_size(), 30);

        let bounds = Bounds {
            max_files: 1,
            max_size: 0,
        };
        assert_eq!(index.pop_over(&bounds).unwrap().path, PathBuf::from("a"));
    }

    #[test]
    fn test_touch_ignores_directories() {
        let mut index = EvictionIndex::new();
        let outcome = apply(&mut index, "d", Ok(FileAttr::directory(0o755)));
        assert_eq!(outcome, TouchOutcome::Ignored);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_failed_stat_untracks() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "a", 10, 1);

        let gone = Err(VfsError::not_found("a"));
        let outcome = apply(&mut index, "a", gone);
        assert_eq!(outcome, TouchOutcome::Untracked);
        assert_eq!(index.len(), 0);
        assert_eq!(index.current_size(), 0);

        let again = Err(VfsError::not_found("a"));
        let outcome = apply(&mut index, "a", again);
        assert_eq!(outcome, TouchOutcome::Ignored);
        index.check_invariants();
    }

    #[test]
    fn test_cancelled_stat_keeps_entry() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "a", 10, 1);

        let cancelled = Err(VfsError::Cancelled.with_op("stat", "a"));
        let outcome = apply(&mut index, "a", cancelled);
        assert_eq!(outcome, TouchOutcome::Ignored);
        assert!(index.contains(Path::new("a")));
    }

    #[test]
    fn test_untrack_prefix_matches_components() {
        let mut index = EvictionIndex::new();
        for p in ["dir", "dir/a", "dir/sub/b", "dir2/c", "other"] {
            touch(&mut index, p, 1, 1);
        }
        assert_eq!(index.untrack_prefix(Path::new("dir")), 3);
        index.check_invariants();
        assert_eq!(paths(&index), vec!["dir2/c", "other"]);
    }

    #[test]
    fn test_rekey_prefix_moves_descendants() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "old/a", 1, 1);
        touch(&mut index, "old/sub/b", 2, 2);
        touch(&mut index, "new/stale", 4, 3);
        touch(&mut index, "keep", 8, 4);

        index.rekey_prefix(Path::new("old"), Path::new("new"));
        index.check_invariants();
        assert_eq!(paths(&index), vec!["keep", "new/a", "new/sub/b"]);
        assert_eq!(index.current_size(), 11);
    }

    #[test]
    fn test_rekey_single_file_replaces_destination() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "a", 1, 1);
        touch(&mut index, "b", 2, 2);

        index.rekey_prefix(Path::new("a"), Path::new("b"));
        index.check_invariants();
        assert_eq!(paths(&index), vec!["b"]);
        assert_eq!(index.current_size(), 1);
    }

    #[test]
    fn test_pop_over_respects_bounds() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "a", 15, 1);
        touch(&mut index, "b", 10, 2);

        let size_bound = Bounds {
            max_files: 0,
            max_size: 20,
        };
        let victim = index.pop_over(&size_bound).unwrap();
        assert_eq!(victim.path, PathBuf::from("a"));
        assert!(index.pop_over(&size_bound).is_none());
        assert_eq!(index.current_size(), 10);

        let unbounded = Bounds::default();
        touch(&mut index, "c", 1_000, 3);
        assert!(index.pop_over(&unbounded).is_none());
        index.check_invariants();
    }

    #[test]
    fn test_expire() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "old", 5, 0);
        touch(&mut index, "fresh", 5, 7_000);

        let now = UNIX_EPOCH + Duration::from_secs(7_200);
        let hour = Duration::from_secs(3_600);

        assert!(index.expire(Path::new("fresh"), hour, now).is_none());
        assert!(index.expire(Path::new("untracked"), hour, now).is_none());
        let gone = index.expire(Path::new("old"), hour, now).unwrap();
        assert_eq!(gone.path, PathBuf::from("old"));
        assert!(!index.contains(Path::new("old")));
        index.check_invariants();
    }

    #[test]
    fn test_reinsert_after_removal() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "a", 1, 1);
        touch(&mut index, "b", 2, 2);
        index.untrack(Path::new("a"));
        assert_eq!(touch(&mut index, "a", 3, 3), TouchOutcome::Inserted);
        index.check_invariants();
        assert_eq!(index.len(), 2);
        assert_eq!(index.current_size(), 5);
    }

    #[test]
    fn test_removal_during_touch_drops_result() {
        let mut index = EvictionIndex::new();
        let ticket = index.begin_touch(Path::new("a"));
        // Never tracked yet, but the removal still counts
        assert!(index.untrack(Path::new("a")).is_none());

        let outcome = index.apply_touch(Path::new("a"), ticket, Ok(attr(1, 1)), &factory());
        assert_eq!(outcome, TouchOutcome::Stale);
        assert!(!index.contains(Path::new("a")));
        assert!(index.in_flight.is_empty());
        index.check_invariants();
    }

    #[test]
    fn test_touch_started_after_removal_applies() {
        let mut index = EvictionIndex::new();
        let before = index.begin_touch(Path::new("a"));
        index.untrack(Path::new("a"));
        let after = index.begin_touch(Path::new("a"));

        let stale = index.apply_touch(Path::new("a"), before, Ok(attr(1, 1)), &factory());
        let fresh = index.apply_touch(Path::new("a"), after, Ok(attr(2, 2)), &factory());
        assert_eq!(stale, TouchOutcome::Stale);
        assert_eq!(fresh, TouchOutcome::Inserted);
        assert_eq!(index.current_size(), 2);
        assert!(index.in_flight.is_empty());
    }

    #[test]
    fn test_subtree_removal_and_eviction_stale_touches() {
        let mut index = EvictionIndex::new();
        touch(&mut index, "victim", 5, 1);
        touch(&mut index, "keep", 5, 2);

        let in_dir = index.begin_touch(Path::new("dir/a"));
        let sibling = index.begin_touch(Path::new("dir2/b"));
        let victim = index.begin_touch(Path::new("victim"));

        index.untrack_prefix(Path::new("dir"));
        let bounds = Bounds {
            max_files: 1,
            max_size: 0,
        };
        assert_eq!(index.pop_over(&bounds).unwrap().path, PathBuf::from("victim"));

        let f = factory();
        let a = index.apply_touch(Path::new("dir/a"), in_dir, Ok(attr(1, 3)), &f);
        let b = index.apply_touch(Path::new("dir2/b"), sibling, Ok(attr(1, 3)), &f);
        let v = index.apply_touch(Path::new("victim"), victim, Ok(attr(5, 3)), &f);
        assert_eq!(a, TouchOutcome::Stale);
        assert_eq!(b, TouchOutcome::Inserted);
        assert_eq!(v, TouchOutcome::Stale);
        index.check_invariants();
    }

    #[test]
    fn test_abandoned_touch_releases_slot() {
        let mut index = EvictionIndex::new();
        let ticket = index.begin_touch(Path::new("a"));
        index.abandon_touch(Path::new("a"), ticket);
        assert!(index.in_flight.is_empty());
    }
}
