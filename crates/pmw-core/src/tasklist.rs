//! Synchronized task list (spec §4.1, C1).
//!
//! A thread-safe FIFO-ish queue with blocking and selective pop, backed by a
//! `Mutex` + `Condvar` pair — the same shape as the original `PyMW_List`
//! (`threading.Lock` plus `threading.Condition`). `pop_specific` waits on the
//! same condition `pop` does and re-checks under the lock; it never busy-loops.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A synchronized list supporting blocking and selective pop.
pub struct TaskList<T> {
    data: Mutex<VecDeque<T>>,
    added: Condvar,
}

impl<T> Default for TaskList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        TaskList {
            data: Mutex::new(VecDeque::new()),
            added: Condvar::new(),
        }
    }

    /// Append an item, waking every thread blocked in any `pop` variant.
    pub fn append(&self, item: T) {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.push_back(item);
        self.added.notify_all();
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the list is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy the caller may iterate without holding any lock.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl<T: PartialEq> TaskList<T> {
    /// Whether the list contains an item equal to `item`.
    pub fn contains(&self, item: &T) -> bool {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|x| x == item)
    }

    /// Return any item if one is present (non-blocking), or wait for one
    /// (blocking).
    pub fn pop(&self, blocking: bool) -> Option<T> {
        self.pop_specific(&[], blocking)
    }

    /// Return the first queued item whose value appears in `candidates`.
    ///
    /// An empty `candidates` behaves like [`TaskList::pop`]. When blocking
    /// and no candidate is present, waits for an `append` and re-checks.
    /// Never returns an item outside `candidates` when `candidates` is
    /// non-empty.
    pub fn pop_specific(&self, candidates: &[T], blocking: bool) -> Option<T> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(pos) = find_candidate(&data, candidates) {
                return data.remove(pos);
            }

            if !blocking {
                return None;
            }

            data = self
                .added
                .wait_timeout(data, Duration::from_secs(1))
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }
}

fn find_candidate<T: PartialEq>(data: &VecDeque<T>, candidates: &[T]) -> Option<usize> {
    if candidates.is_empty() {
        if data.is_empty() { None } else { Some(0) }
    } else {
        data.iter().position(|item| candidates.contains(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn pop_non_blocking_on_empty_returns_none() {
        let list: TaskList<i32> = TaskList::new();
        assert_eq!(list.pop(false), None);
    }

    #[test]
    fn pop_returns_appended_item() {
        let list = TaskList::new();
        list.append(42);
        assert_eq!(list.pop(false), Some(42));
        assert!(list.is_empty());
    }

    #[test]
    fn pop_specific_never_returns_outside_candidates() {
        let list = TaskList::new();
        list.append(1);
        list.append(2);
        list.append(3);
        let got = list.pop_specific(&[2, 3], false).unwrap();
        assert!(matches!(got, 2 | 3));
        // Item 1 must remain since it wasn't a candidate.
        assert!(list.contains(&1));
    }

    #[test]
    fn blocking_pop_wakes_on_append() {
        let list = Arc::new(TaskList::new());
        let reader = {
            let list = list.clone();
            thread::spawn(move || list.pop(true))
        };

        thread::sleep(StdDuration::from_millis(50));
        list.append("hello");
        let got = reader.join().unwrap();
        assert_eq!(got, Some("hello"));
    }

    #[test]
    fn blocking_pop_specific_waits_for_matching_candidate() {
        let list = Arc::new(TaskList::new());
        let reader = {
            let list = list.clone();
            thread::spawn(move || list.pop_specific(&[99], true))
        };

        thread::sleep(StdDuration::from_millis(30));
        list.append(1); // not a candidate, should not satisfy the waiter
        thread::sleep(StdDuration::from_millis(30));
        list.append(99);

        let got = reader.join().unwrap();
        assert_eq!(got, Some(99));
        assert!(list.contains(&1));
    }
}
