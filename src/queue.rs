use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub const DEFAULT_HIGH_WATER_MARK: usize = 32_768;

/// Returned by `push` once the queue has been finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("work queue is already finished")]
pub struct QueueClosed;

/// FIFO between one producer and many consumers with a soft capacity.
///
/// The producer blocks while more than `high_water_mark` items are queued;
/// a single push may overshoot the mark by its batch size.
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    space: Condvar,
    drained: Condvar,
    active: AtomicBool,
    high_water_mark: usize,
}

impl<T> WorkQueue<T> {
    pub fn new(high_water_mark: usize) -> Self {
        WorkQueue {
            items: Mutex::new(VecDeque::new()),
            space: Condvar::new(),
            drained: Condvar::new(),
            active: AtomicBool::new(true),
            high_water_mark,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // items are plain data, a panicking holder cannot leave them half updated
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends the whole batch, waiting for space first
    pub fn push(&self, batch: Vec<T>) -> Result<(), QueueClosed> {
        let mut items = self.lock();
        while self.is_active() && items.len() > self.high_water_mark {
            items = self
                .space
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if !self.is_active() {
            return Err(QueueClosed);
        }
        items.extend(batch);
        Ok(())
    }

    /// Removes up to `max` items from the front. Always empty once finished.
    pub fn pop(&self, max: usize) -> Vec<T> {
        if !self.is_active() {
            return Vec::new();
        }

        let mut items = self.lock();
        let count = max.min(items.len());
        let batch: Vec<T> = items.drain(..count).collect();

        if count > 0 && items.len() <= self.high_water_mark {
            self.space.notify_all();
        }
        if items.is_empty() {
            self.drained.notify_all();
        }
        batch
    }

    /// Waits until consumers took every item, then deactivates the queue.
    ///
    /// Consumers must keep popping while this runs or it never returns.
    pub fn finish(&self) {
        let mut items = self.lock();
        while !items.is_empty() {
            items = self
                .drained
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }

        self.active.store(false, Ordering::Release);
        self.space.notify_all();
        self.drained.notify_all();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pop_is_fifo_and_bounded_by_max() {
        let queue = WorkQueue::new(100);
        queue.push(vec![1, 2, 3, 4, 5]).unwrap();

        assert_eq!(queue.pop(2), vec![1, 2]);
        assert_eq!(queue.pop(10), vec![3, 4, 5]);
        assert!(queue.pop(10).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_after_finish_is_rejected() {
        let queue = WorkQueue::new(100);
        queue.finish();

        assert!(!queue.is_active());
        assert_eq!(queue.push(vec![1]), Err(QueueClosed));
        assert!(queue.pop(10).is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_push_blocks_above_high_water_mark() {
        let queue = Arc::new(WorkQueue::new(4));
        queue.push((0..10).collect()).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                queue.push(vec![10]).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!pushed.load(Ordering::SeqCst));

        assert_eq!(queue.pop(6).len(), 6);
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_finish_waits_for_drain() {
        let queue = Arc::new(WorkQueue::new(100));
        queue.push((0..50).collect()).unwrap();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while queue.is_active() {
                    let batch = queue.pop(7);
                    if batch.is_empty() {
                        thread::sleep(Duration::from_millis(1));
                    }
                    seen.extend(batch);
                }
                seen
            })
        };

        queue.finish();
        assert!(!queue.is_active());
        assert!(queue.is_empty());

        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
