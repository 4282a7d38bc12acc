use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::collections::cancellation::CancellationToken;
use crate::collections::scoped_locks::ScopedRwLock;
use crate::helpers::converters::ceil_to_second;

pub type EventCallback = Box<dyn FnMut(DateTime<Utc>) + Send + Sync>;

/// A named event with a sorted sequence of UTC trigger times and a callback.
pub struct ScheduledEvent {
    pub name: String,
    trigger_times: Vec<DateTime<Utc>>,
    cursor: usize,
    callback: EventCallback,
}

impl ScheduledEvent {
    pub fn new(name: impl Into<String>, mut trigger_times: Vec<DateTime<Utc>>, callback: EventCallback) -> Self {
        trigger_times.sort();
        ScheduledEvent {
            name: name.into(),
            trigger_times,
            cursor: 0,
            callback,
        }
    }

    pub fn next_trigger(&self) -> Option<DateTime<Utc>> {
        self.trigger_times.get(self.cursor).copied()
    }

    /// Advances past triggers strictly before `time` without firing them.
    /// Events registered mid-run skip forward to the algorithm's clock.
    fn skip_until(&mut self, time: DateTime<Utc>) {
        while let Some(next) = self.next_trigger() {
            if next >= time {
                break;
            }
            self.cursor += 1;
        }
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.trigger_times.len()
    }

    /// Fires every trigger at or before `time`. Callback panics are logged
    /// and swallowed, the cursor still advances.
    fn scan(&mut self, time: DateTime<Utc>) {
        while let Some(next) = self.next_trigger() {
            if next > time {
                break;
            }
            self.cursor += 1;
            let result = catch_unwind(AssertUnwindSafe(|| (self.callback)(next)));
            if result.is_err() {
                log::error!("Scheduled event {} callback panicked at {}", self.name, next);
            }
        }
    }
}

/// Holds the named scheduled events. The backtest variant is driven by
/// `set_time` on every slice, the live variant runs `run_live` on a
/// dedicated thread waking each second.
pub struct TimedEventHandler {
    events: ScopedRwLock<HashMap<String, ScheduledEvent>>,
    last_scan_time: Mutex<Option<DateTime<Utc>>>,
}

impl TimedEventHandler {
    pub fn new() -> Self {
        TimedEventHandler {
            events: ScopedRwLock::new(HashMap::new()),
            last_scan_time: Mutex::new(None),
        }
    }

    fn last_time(&self) -> Option<DateTime<Utc>> {
        match self.last_scan_time.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn add_event(&self, mut event: ScheduledEvent) {
        // late registrations never replay triggers the clock already passed
        if let Some(last) = self.last_time() {
            event.skip_until(last);
        }
        let mut events = self.events.write_token();
        events.insert(event.name.clone(), event);
    }

    pub fn remove_event(&self, name: &str) -> bool {
        self.events.write_token().remove(name).is_some()
    }

    pub fn event_count(&self) -> usize {
        self.events.read_token().len()
    }

    /// Fires every event whose next trigger is at or before `time`.
    /// Idempotent for monotonic time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        {
            let mut last = match self.last_scan_time.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *last = Some(match *last {
                Some(previous) => previous.max(time),
                None => time,
            });
        }
        let mut events = self.events.write_token();
        for event in events.values_mut() {
            event.scan(time);
        }
        events.retain(|_, event| !event.is_exhausted());
    }

    /// Live loop: wakes at each second boundary and scans the wall clock.
    pub fn run_live(&self, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            let now = Utc::now();
            self.set_time(now);
            let next_second = ceil_to_second(now) + chrono::Duration::seconds(1);
            let sleep = (next_second - Utc::now()).to_std().unwrap_or(StdDuration::from_millis(100));
            // wake early enough to observe cancellation promptly
            let mut remaining = sleep;
            while remaining > StdDuration::ZERO && !cancel.is_cancelled() {
                let step = remaining.min(StdDuration::from_millis(50));
                thread::sleep(step);
                remaining = remaining.saturating_sub(step);
            }
        }
    }
}

impl Default for TimedEventHandler {
    fn default() -> Self {
        TimedEventHandler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn time(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 2, 14, minute, second).unwrap()
    }

    #[test]
    fn fires_due_triggers_once() {
        let handler = TimedEventHandler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        handler.add_event(ScheduledEvent::new(
            "sample",
            vec![time(30, 0), time(31, 0), time(32, 0)],
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        handler.set_time(time(30, 30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // idempotent for monotonic time
        handler.set_time(time(30, 30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        handler.set_time(time(32, 0));
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        // fully fired events unregister themselves
        assert_eq!(handler.event_count(), 0);
    }

    #[test]
    fn late_registrations_skip_forward() {
        let handler = TimedEventHandler::new();
        handler.set_time(time(31, 0));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        handler.add_event(ScheduledEvent::new(
            "late",
            vec![time(30, 0), time(32, 0)],
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        handler.set_time(time(33, 0));
        // the 14:30 trigger was already in the past at registration
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callbacks_are_swallowed() {
        let handler = TimedEventHandler::new();
        handler.add_event(ScheduledEvent::new(
            "explosive",
            vec![time(30, 0)],
            Box::new(|_| panic!("boom")),
        ));
        handler.set_time(time(31, 0));
        assert_eq!(handler.event_count(), 0);
    }

    #[test]
    fn remove_event_by_name() {
        let handler = TimedEventHandler::new();
        handler.add_event(ScheduledEvent::new("keep", vec![time(40, 0)], Box::new(|_| {})));
        handler.add_event(ScheduledEvent::new("drop", vec![time(40, 0)], Box::new(|_| {})));
        assert!(handler.remove_event("drop"));
        assert!(!handler.remove_event("drop"));
        assert_eq!(handler.event_count(), 1);
    }
}
