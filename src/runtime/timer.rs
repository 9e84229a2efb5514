//! Deadline-ordered timer queue
//!
//! Each event loop owns one [`TimerQueue`]. Tasks fire in deadline
//! order; tasks with equal deadlines fire in submission order, which the
//! sequence number guarantees even though the underlying heap is not
//! stable. Cancellation is lazy: a cancelled entry stays in the heap and
//! is discarded when it surfaces.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

type TimerTask = Box<dyn FnOnce() + Send>;

/// Cancels a scheduled task. Dropping the handle does not cancel.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub(crate) fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }

    /// Marks the task cancelled. A task already running is unaffected.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the max-heap surfaces the earliest deadline, with the
    // sequence number breaking ties in submission order.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn insert(&mut self, deadline: Instant, cancelled: Arc<AtomicBool>, task: TimerTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            cancelled,
            task,
        });
    }

    /// Earliest pending deadline, purging cancelled entries off the top.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        loop {
            match self.heap.peek() {
                Some(entry) if entry.cancelled.load(Ordering::Relaxed) => {
                    self.heap.pop();
                }
                Some(entry) => return Some(entry.deadline),
                None => return None,
            }
        }
    }

    /// Pops the next task due at `now`, skipping cancelled entries.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerTask> {
        loop {
            match self.heap.peek() {
                Some(entry) if entry.cancelled.load(Ordering::Relaxed) => {
                    self.heap.pop();
                }
                Some(entry) if entry.deadline <= now => {
                    return self.heap.pop().map(|entry| entry.task);
                }
                _ => return None,
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_tasks_fire_in_deadline_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let (tx, rx) = mpsc::channel();

        for (label, offset_ms) in [("c", 30u64), ("a", 10), ("b", 20)] {
            let tx = tx.clone();
            queue.insert(
                now + Duration::from_millis(offset_ms),
                flag(),
                Box::new(move || tx.send(label).unwrap()),
            );
        }

        while let Some(task) = queue.pop_due(now + Duration::from_millis(100)) {
            task();
        }
        let fired: Vec<_> = rx.try_iter().collect();
        assert_eq!(fired, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_equal_deadlines_fire_in_submission_order() {
        let mut queue = TimerQueue::new();
        let deadline = Instant::now() + Duration::from_millis(5);
        let (tx, rx) = mpsc::channel();

        for label in ["first", "second", "third"] {
            let tx = tx.clone();
            queue.insert(deadline, flag(), Box::new(move || tx.send(label).unwrap()));
        }

        while let Some(task) = queue.pop_due(deadline) {
            task();
        }
        let fired: Vec<_> = rx.try_iter().collect();
        assert_eq!(fired, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_not_due_tasks_stay_queued() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.insert(
            now + Duration::from_secs(60),
            flag(),
            Box::new(|| panic!("must not fire")),
        );

        assert!(queue.pop_due(now).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancelled_tasks_are_skipped() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let (tx, rx) = mpsc::channel();

        let cancelled = flag();
        let handle = TimerHandle::new(cancelled.clone());
        queue.insert(now, cancelled, Box::new(|| panic!("cancelled task ran")));
        {
            let tx = tx.clone();
            queue.insert(now, flag(), Box::new(move || tx.send("live").unwrap()));
        }

        handle.cancel();
        assert!(handle.is_cancelled());

        while let Some(task) = queue.pop_due(now) {
            task();
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["live"]);
    }

    #[test]
    fn test_next_deadline_purges_cancelled_head() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let soon = now + Duration::from_millis(1);
        let later = now + Duration::from_millis(50);

        let cancelled = flag();
        let handle = TimerHandle::new(cancelled.clone());
        queue.insert(soon, cancelled, Box::new(|| {}));
        queue.insert(later, flag(), Box::new(|| {}));

        handle.cancel();
        assert_eq!(queue.next_deadline(), Some(later));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_empty_queue_has_no_deadline() {
        let mut queue = TimerQueue::new();
        assert!(queue.next_deadline().is_none());
        assert!(queue.pop_due(Instant::now()).is_none());
    }
}
