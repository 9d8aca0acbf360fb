//! Time-ordered priority queue of scheduled tasks.
//!
//! A binary min-heap keyed by `(trigger_time, id)`. Tasks live in a slab and
//! every slab entry records its current heap position, so an arbitrary task
//! can be removed by id in O(log n) instead of only the head.

use crate::runtime::task::{Schedulable, TaskId};
use crate::utils::slab::Slab;

use std::collections::HashMap;
use std::time::Duration;

type Key = (Duration, TaskId);

struct Entry {
    key: Key,
    position: usize,
    task: Box<dyn Schedulable>,
}

pub(crate) struct TaskHeap {
    entries: Slab<Entry>,
    heap: Vec<usize>,
    index: HashMap<TaskId, usize>,
}

impl TaskHeap {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
            heap: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    pub(crate) fn push(&mut self, task: Box<dyn Schedulable>) {
        let id = task.id();
        let key = (task.trigger_time(), id);

        // A task is queued at most once; a stale copy is replaced.
        drop(self.remove(id));

        let position = self.heap.len();
        let slot = self.entries.insert(Entry {
            key,
            position,
            task,
        });
        self.heap.push(slot);
        self.index.insert(id, slot);
        self.sift_up(position);
    }

    /// Trigger time of the earliest task.
    pub(crate) fn next_trigger(&self) -> Option<Duration> {
        let slot = *self.heap.first()?;
        self.entries.get(slot).map(|entry| entry.key.0)
    }

    /// Pops the earliest task if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<Box<dyn Schedulable>> {
        if self.next_trigger()? > now {
            return None;
        }
        self.remove_at(0)
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Box<dyn Schedulable>> {
        let slot = *self.index.get(&id)?;
        let position = self.entries.get(slot)?.position;
        self.remove_at(position)
    }

    /// Empties the heap, returning tasks in trigger order.
    pub(crate) fn drain(&mut self) -> Vec<Box<dyn Schedulable>> {
        let mut tasks = Vec::with_capacity(self.len());
        while let Some(task) = self.remove_at(0) {
            tasks.push(task);
        }
        tasks
    }

    fn remove_at(&mut self, position: usize) -> Option<Box<dyn Schedulable>> {
        if position >= self.heap.len() {
            return None;
        }

        let last = self.heap.len() - 1;
        self.swap(position, last);
        let slot = self.heap.pop()?;
        let entry = self.entries.remove(slot)?;
        self.index.remove(&entry.key.1);

        if position < self.heap.len() {
            let position = self.sift_up(position);
            self.sift_down(position);
        }

        Some(entry.task)
    }

    fn key(&self, position: usize) -> Option<Key> {
        let slot = *self.heap.get(position)?;
        self.entries.get(slot).map(|entry| entry.key)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        for position in [a, b] {
            let slot = self.heap[position];
            if let Some(entry) = self.entries.get_mut(slot) {
                entry.position = position;
            }
        }
    }

    fn sift_up(&mut self, mut position: usize) -> usize {
        while position > 0 {
            let parent = (position - 1) / 2;
            if self.key(position) >= self.key(parent) {
                break;
            }
            self.swap(position, parent);
            position = parent;
        }
        position
    }

    fn sift_down(&mut self, mut position: usize) {
        loop {
            let left = 2 * position + 1;
            let right = left + 1;
            let mut smallest = position;

            if left < self.heap.len() && self.key(left) < self.key(smallest) {
                smallest = left;
            }
            if right < self.heap.len() && self.key(right) < self.key(smallest) {
                smallest = right;
            }
            if smallest == position {
                return;
            }

            self.swap(position, smallest);
            position = smallest;
        }
    }
}
