use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::collections::cancellation::CancellationToken;
use crate::messages::engine_error::VelaError;

/// Tracks the start of the current manager iteration. The manager resets it
/// at the top of every slice, the time monitor measures against it.
pub struct IterationClock {
    started: Mutex<Instant>,
}

impl IterationClock {
    pub fn new() -> Arc<Self> {
        Arc::new(IterationClock {
            started: Mutex::new(Instant::now()),
        })
    }

    pub fn reset(&self) {
        let mut started = match self.started.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *started = Instant::now();
    }

    /// Elapsed wall time of the current iteration.
    pub fn current_time_step_elapsed(&self) -> Duration {
        let started = match self.started.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        started.elapsed()
    }
}

/// The per-iteration time budget. `check` returns a human readable reason
/// when the current iteration has exceeded the configured maximum.
#[derive(Clone)]
pub struct TimeMonitor {
    clock: Arc<IterationClock>,
    maximum: Duration,
}

impl TimeMonitor {
    pub fn new(clock: Arc<IterationClock>, maximum: Duration) -> Self {
        TimeMonitor { clock, maximum }
    }

    fn maximum_minutes_label(&self) -> String {
        let minutes = self.maximum.as_secs_f64() / 60.0;
        if minutes.fract() == 0.0 {
            format!("{}", minutes as u64)
        } else {
            format!("{:.1}", minutes)
        }
    }

    pub fn check(&self) -> Option<String> {
        if self.clock.current_time_step_elapsed() > self.maximum {
            Some(format!(
                "Algorithm took longer than {} minutes on a single time loop.",
                self.maximum_minutes_label()
            ))
        } else {
            None
        }
    }
}

/// Supervising scope for the algorithm loop. Runs the job on its own thread
/// and polls the monitor, on breach the shared token is cancelled and the
/// failure is reported while the job thread winds down cooperatively.
pub struct Isolator {
    poll_interval: Duration,
}

impl Isolator {
    pub fn new() -> Self {
        Isolator {
            poll_interval: Duration::from_millis(25),
        }
    }

    pub fn execute<F>(
        &self,
        job: F,
        monitor: TimeMonitor,
        cancel: CancellationToken,
    ) -> Result<(), VelaError>
    where
        F: FnOnce() -> Result<(), VelaError> + Send + 'static,
    {
        let worker = thread::Builder::new()
            .name("algorithm-manager".to_string())
            .spawn(job)
            .map_err(|e| VelaError::EngineErrorDebug(format!("Failed to spawn algorithm thread: {}", e)))?;

        loop {
            if worker.is_finished() {
                return match worker.join() {
                    Ok(result) => result,
                    Err(_) => Err(VelaError::UserCallbackError(
                        "Algorithm thread panicked".to_string(),
                    )),
                };
            }
            if let Some(reason) = monitor.check() {
                // the worker is abandoned, it observes the token at its next
                // suspension point
                cancel.cancel();
                return Err(VelaError::TimeLimitExceeded(reason));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Default for Isolator {
    fn default() -> Self {
        Isolator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_within_budget() {
        let clock = IterationClock::new();
        let monitor = TimeMonitor::new(clock, Duration::from_secs(10));
        let result = Isolator::new().execute(|| Ok(()), monitor, CancellationToken::new());
        assert!(result.is_ok());
    }

    #[test]
    fn aborts_on_budget_breach() {
        let clock = IterationClock::new();
        let monitor = TimeMonitor::new(clock.clone(), Duration::from_millis(50));
        clock.reset();
        let cancel = CancellationToken::new();
        let observed = cancel.clone();
        let result = Isolator::new().execute(
            move || {
                while !observed.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            },
            monitor,
            cancel.clone(),
        );
        match result {
            Err(VelaError::TimeLimitExceeded(reason)) => {
                assert!(reason.contains("on a single time loop"));
            }
            other => panic!("expected time limit breach, got {:?}", other),
        }
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn ten_minute_limit_message() {
        let clock = IterationClock::new();
        let monitor = TimeMonitor::new(clock.clone(), Duration::from_secs(600));
        assert!(monitor.check().is_none());
        // the default ten minute limit reports whole minutes
        assert_eq!(monitor.maximum_minutes_label(), "10");
        let short = TimeMonitor::new(clock, Duration::from_nanos(1));
        thread::sleep(Duration::from_millis(2));
        assert_eq!(
            short.check(),
            Some("Algorithm took longer than 0.0 minutes on a single time loop.".to_string())
        );
    }

    #[test]
    fn worker_errors_propagate() {
        let clock = IterationClock::new();
        let monitor = TimeMonitor::new(clock, Duration::from_secs(10));
        let result = Isolator::new().execute(
            || Err(VelaError::UserCallbackError("boom".to_string())),
            monitor,
            CancellationToken::new(),
        );
        assert_eq!(result, Err(VelaError::UserCallbackError("boom".to_string())));
    }
}
