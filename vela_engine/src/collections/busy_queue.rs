use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::collections::cancellation::CancellationToken;
use crate::messages::engine_error::VelaError;

const WAIT_STEP: Duration = Duration::from_millis(50);

struct QueueState<T> {
    items: VecDeque<T>,
    adding_complete: bool,
    is_idle: bool,
}

/// Single producer to single consumer bounded hand-off queue with a busy/idle
/// handle. The feed driver publishes time slices through it, the algorithm
/// manager consumes them, and the live driver parks on `wait_idle` before
/// applying a universe selection so the consumer is known to have drained
/// everything in flight.
///
/// One mutex linearises the two critical transitions: the first item added
/// after idle (the producer clears the idle flag in the same critical section
/// as the enqueue) and the last item removed before idle (the consumer only
/// sets the flag after re-checking emptiness under the same lock). A
/// `wait_idle` return therefore implies an observable empty queue with no
/// item in transit.
pub struct BusyHandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    idle_changed: Condvar,
    capacity: usize,
}

impl<T> BusyHandoffQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BusyHandoffQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                adding_complete: false,
                is_idle: true,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            idle_changed: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Blocks until capacity is available or the token cancels. The busy mark
    /// is made atomically with the enqueue.
    pub fn add(&self, item: T, cancel: &CancellationToken) -> Result<(), VelaError> {
        let mut state = self.lock();
        loop {
            if state.adding_complete {
                return Err(VelaError::EngineErrorDebug(
                    "add called after complete_adding".to_string(),
                ));
            }
            if state.items.len() < self.capacity {
                state.is_idle = false;
                state.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(VelaError::Cancelled);
            }
            let (guard, _timeout) = match self.not_full.wait_timeout(state, WAIT_STEP) {
                Ok(result) => result,
                Err(poisoned) => {
                    let inner = poisoned.into_inner();
                    (inner.0, inner.1)
                }
            };
            state = guard;
        }
    }

    /// Declares no further adds, blocked and future takes observe the end of
    /// the sequence once the remaining items drain.
    pub fn complete_adding(&self) {
        let mut state = self.lock();
        state.adding_complete = true;
        self.not_empty.notify_all();
        // an empty completed queue is idle from the producer's point of view
        if state.items.is_empty() {
            state.is_idle = true;
            self.idle_changed.notify_all();
        }
    }

    pub fn is_adding_complete(&self) -> bool {
        self.lock().adding_complete
    }

    pub fn count(&self) -> usize {
        self.lock().items.len()
    }

    /// Takes the next item, blocking while the queue is empty and the
    /// producer has not completed. Returns `None` when adding is complete and
    /// the queue drained, or when cancelled.
    pub fn take(&self, cancel: &CancellationToken) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            // re-checked empty while holding the producer-synchronising lock,
            // safe to declare idle before blocking
            if !state.is_idle {
                state.is_idle = true;
                self.idle_changed.notify_all();
            }
            if state.adding_complete || cancel.is_cancelled() {
                return None;
            }
            let (guard, _timeout) = match self.not_empty.wait_timeout(state, WAIT_STEP) {
                Ok(result) => result,
                Err(poisoned) => {
                    let inner = poisoned.into_inner();
                    (inner.0, inner.1)
                }
            };
            state = guard;
        }
    }

    /// Waits until the consumer has observed an empty queue. Returns `false`
    /// if cancelled first.
    pub fn wait_idle(&self, cancel: &CancellationToken) -> bool {
        let mut state = self.lock();
        loop {
            if state.is_idle {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            let (guard, _timeout) = match self.idle_changed.wait_timeout(state, WAIT_STEP) {
                Ok(result) => result,
                Err(poisoned) => {
                    let inner = poisoned.into_inner();
                    (inner.0, inner.1)
                }
            };
            state = guard;
        }
    }

    /// A consuming sequence that yields until the queue is empty and adding
    /// is complete. Cancellation ends the sequence cleanly.
    pub fn consume<'a>(&'a self, cancel: &'a CancellationToken) -> ConsumingIter<'a, T> {
        ConsumingIter { queue: self, cancel }
    }
}

pub struct ConsumingIter<'a, T> {
    queue: &'a BusyHandoffQueue<T>,
    cancel: &'a CancellationToken,
}

impl<'a, T> Iterator for ConsumingIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.take(self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn producer_blocks_at_capacity() {
        let queue = Arc::new(BusyHandoffQueue::new(3));
        let cancel = CancellationToken::new();
        let max_seen = Arc::new(AtomicUsize::new(0));

        let producer_queue = queue.clone();
        let producer_cancel = cancel.clone();
        let producer = thread::spawn(move || {
            for i in 0..100usize {
                producer_queue.add(i, &producer_cancel).unwrap();
            }
            producer_queue.complete_adding();
        });

        let consumer_queue = queue.clone();
        let consumer_max = max_seen.clone();
        let consumer = thread::spawn(move || {
            use rand::Rng;
            let cancel = CancellationToken::new();
            let mut rng = rand::thread_rng();
            let mut taken = Vec::new();
            while let Some(item) = consumer_queue.take(&cancel) {
                let count = consumer_queue.count();
                consumer_max.fetch_max(count, Ordering::SeqCst);
                taken.push(item);
                // consumer slower than producer so capacity pressure builds
                thread::sleep(Duration::from_micros(rng.gen_range(100..400)));
            }
            taken
        });

        producer.join().unwrap();
        let taken = consumer.join().unwrap();
        assert_eq!(taken, (0..100).collect::<Vec<_>>());
        // producer held to capacity even while blocked
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn consume_terminates_after_complete_adding() {
        let queue = BusyHandoffQueue::new(8);
        let cancel = CancellationToken::new();
        for i in 0..5 {
            queue.add(i, &cancel).unwrap();
        }
        queue.complete_adding();
        let items: Vec<i32> = queue.consume(&cancel).collect();
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert!(queue.add(9, &cancel).is_err());
    }

    #[test]
    fn wait_idle_returns_after_final_take() {
        let queue = Arc::new(BusyHandoffQueue::new(4));
        let cancel = CancellationToken::new();
        queue.add(1, &cancel).unwrap();
        queue.add(2, &cancel).unwrap();

        let consumer_queue = queue.clone();
        let consumer = thread::spawn(move || {
            let cancel = CancellationToken::new();
            assert_eq!(consumer_queue.take(&cancel), Some(1));
            assert_eq!(consumer_queue.take(&cancel), Some(2));
            // this take blocks on the empty queue, marking it idle first
            consumer_queue.take(&cancel)
        });

        let start = Instant::now();
        assert!(queue.wait_idle(&cancel));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(queue.count(), 0);

        queue.complete_adding();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn add_marks_queue_busy() {
        let queue = BusyHandoffQueue::new(4);
        let cancel = CancellationToken::new();
        queue.add(1, &cancel).unwrap();
        let busy_cancel = CancellationToken::new();
        // cancel the wait quickly, the queue must not be idle with an item in it
        busy_cancel.cancel();
        assert!(!queue.wait_idle(&busy_cancel));
    }

    #[test]
    fn cancellation_ends_blocked_take() {
        let queue: Arc<BusyHandoffQueue<i32>> = Arc::new(BusyHandoffQueue::new(2));
        let cancel = CancellationToken::new();
        let take_queue = queue.clone();
        let take_cancel = cancel.clone();
        let consumer = thread::spawn(move || take_queue.take(&take_cancel));
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(consumer.join().unwrap(), None);
        // the queue remains usable with a fresh token
        let fresh = CancellationToken::new();
        queue.add(7, &fresh).unwrap();
        assert_eq!(queue.take(&fresh), Some(7));
    }
}
