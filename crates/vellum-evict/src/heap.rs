//! Index-aware binary min-heap over tracked files.
//!
//! Items live in an arena and are addressed by stable [`Handle`]s. The heap
//! array stores handles; every item records its own position in that array,
//! and every swap rewrites both positions, so `fix` and `remove` can find an
//! item in O(1) and restore order in O(log n).

use std::path::PathBuf;

use crate::policy::Metadata;

/// Position recorded for an item that is no longer in the heap.
pub(crate) const NOT_IN_HEAP: usize = usize::MAX;

/// Stable address of a tracked item in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Handle(usize);

/// One tracked path.
#[derive(Debug)]
pub(crate) struct TrackedItem {
    pub path: PathBuf,
    pub metadata: Box<dyn Metadata>,
    pub heap_index: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PriorityHeap {
    slots: Vec<Option<TrackedItem>>,
    free: Vec<usize>,
    order: Vec<Handle>,
}

impl PriorityHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, handle: Handle) -> Option<&TrackedItem> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    /// Mutable access to an item. Call [`fix`](Self::fix) afterwards if the
    /// change can affect ordering.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut TrackedItem> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    pub fn push(&mut self, path: PathBuf, metadata: Box<dyn Metadata>) -> Handle {
        let item = TrackedItem {
            path,
            metadata,
            heap_index: self.order.len(),
        };
        let handle = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(item);
                Handle(slot)
            }
            None => {
                self.slots.push(Some(item));
                Handle(self.slots.len() - 1)
            }
        };
        self.order.push(handle);
        self.sift_up(self.order.len() - 1);
        handle
    }

    /// Remove and return the minimum.
    pub fn pop(&mut self) -> Option<TrackedItem> {
        let min = *self.order.first()?;
        self.remove(min)
    }

    /// Restore heap order after the item's metadata changed.
    pub fn fix(&mut self, handle: Handle) {
        let Some(pos) = self.get(handle).map(|item| item.heap_index) else {
            return;
        };
        if !self.sift_down(pos) {
            self.sift_up(pos);
        }
    }

    /// Remove an arbitrary item.
    pub fn remove(&mut self, handle: Handle) -> Option<TrackedItem> {
        let pos = self.get(handle)?.heap_index;
        let last = self.order.len() - 1;
        if pos != last {
            self.swap(pos, last);
        }
        self.order.pop();
        if pos < self.order.len() && !self.sift_down(pos) {
            self.sift_up(pos);
        }

        let mut item = self.slots[handle.0].take()?;
        item.heap_index = NOT_IN_HEAP;
        self.free.push(handle.0);
        Some(item)
    }

    fn metadata_at(&self, pos: usize) -> Option<&dyn Metadata> {
        let handle = self.order.get(pos)?;
        self.get(*handle).map(|item| item.metadata.as_ref())
    }

    fn less(&self, i: usize, j: usize) -> bool {
        match (self.metadata_at(i), self.metadata_at(j)) {
            (Some(a), Some(b)) => a.less(b),
            _ => false,
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.order.swap(i, j);
        for pos in [i, j] {
            let handle = self.order[pos];
            if let Some(item) = self.slots[handle.0].as_mut() {
                item.heap_index = pos;
            }
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    /// Returns true if the item moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.order.len();
        let mut pos = start;
        loop {
            let left = 2 * pos + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let child = if right < n && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, pos) {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
        pos > start
    }

    /// Panics if any back-pointer or ordering invariant is broken.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        for (pos, handle) in self.order.iter().enumerate() {
            let item = self.get(*handle).expect("heap entry has a live slot");
            assert_eq!(item.heap_index, pos, "back-pointer for {:?}", item.path);
            if pos > 0 {
                assert!(!self.less(pos, (pos - 1) / 2), "heap order at {pos}");
            }
        }
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(live, self.order.len(), "arena and heap disagree");
    }
}
