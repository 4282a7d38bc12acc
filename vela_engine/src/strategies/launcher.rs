use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};

use crate::collections::busy_queue::BusyHandoffQueue;
use crate::collections::cancellation::CancellationToken;
use crate::messages::engine_error::VelaError;
use crate::messages::results::ResultHandler;
use crate::settings::Settings;
use crate::standardized_types::time_slices::TimeSlice;
use crate::strategies::algorithm::{AlgorithmHandle, Strategy};
use crate::strategies::collaborators::{CommandQueue, TransactionHandler};
use crate::strategies::feeds::backtest_feed::BacktestFeedDriver;
use crate::strategies::feeds::live_feed::LiveFeedDriver;
use crate::strategies::feeds::exchange::DataExchange;
use crate::strategies::feeds::SubscriptionCollection;
use crate::strategies::handlers::algorithm_manager::{AlgorithmJob, AlgorithmManager};
use crate::strategies::handlers::timed_events_handler::TimedEventHandler;
use crate::strategies::isolator::{Isolator, IterationClock, TimeMonitor};

/// Capacity of the feed-to-manager hand-off queue. Small enough that a slow
/// algorithm back-pressures the feed promptly.
const HANDOFF_CAPACITY: usize = 100;

pub struct EngineCollaborators {
    pub transactions: Arc<dyn TransactionHandler>,
    pub results: Arc<dyn ResultHandler>,
    pub realtime: Arc<TimedEventHandler>,
    pub commands: Arc<dyn CommandQueue>,
}

/// Wires a backtest together: the feed driver on its own thread publishing
/// into the hand-off queue, the algorithm manager consuming under the
/// isolator's time monitor.
#[allow(clippy::too_many_arguments)]
pub fn run_backtest(
    job: AlgorithmJob,
    mut strategy: Box<dyn Strategy>,
    algorithm: Arc<AlgorithmHandle>,
    subscriptions: Arc<SubscriptionCollection>,
    collaborators: EngineCollaborators,
    settings: &Settings,
    end_utc: DateTime<Utc>,
) -> Result<(), VelaError> {
    let queue: Arc<BusyHandoffQueue<TimeSlice>> = Arc::new(BusyHandoffQueue::new(HANDOFF_CAPACITY));
    let cancel = CancellationToken::new();
    let clock = IterationClock::new();
    let monitor = TimeMonitor::new(clock.clone(), settings.time_loop_maximum());

    let driver = Arc::new(BacktestFeedDriver::new(
        subscriptions,
        queue.clone(),
        algorithm.clone(),
        collaborators.results.clone(),
        end_utc,
    ));
    let feed_cancel = cancel.clone();
    let feed_driver = driver.clone();
    let feed_thread = thread::Builder::new()
        .name("backtest-feed".to_string())
        .spawn(move || feed_driver.run(&feed_cancel))
        .map_err(|e| VelaError::EngineErrorDebug(format!("Failed to spawn feed thread: {}", e)))?;

    let manager_cancel = cancel.clone();
    let manager_algorithm = algorithm.clone();
    let manager_queue = queue.clone();
    let manager_clock = clock.clone();
    let transactions = collaborators.transactions.clone();
    let results = collaborators.results.clone();
    let realtime = collaborators.realtime.clone();
    let commands = collaborators.commands.clone();

    let outcome = Isolator::new().execute(
        move || {
            let mut manager = AlgorithmManager::new(job);
            manager.run(
                strategy.as_mut(),
                &manager_algorithm,
                &manager_queue,
                &transactions,
                &results,
                &realtime,
                &commands,
                &manager_clock,
                &manager_cancel,
            )
        },
        monitor,
        cancel.clone(),
    );

    // stop the feed regardless of how the manager ended
    cancel.cancel();
    let _ = feed_thread.join();

    if let Err(error) = &outcome {
        if let VelaError::TimeLimitExceeded(reason) = error {
            algorithm.set_runtime_error(reason.clone());
            algorithm.set_status(crate::standardized_types::enums::AlgorithmStatus::RuntimeError);
            collaborators.results.runtime_error(reason, None);
            collaborators
                .results
                .status_update(crate::standardized_types::enums::AlgorithmStatus::RuntimeError);
        }
    }
    outcome
}

/// Wires a live run: the exchange worker, the scheduler loop, the live feed
/// driver and the manager under the isolator. Returns when the manager exits,
/// after cancelling and joining every worker.
#[allow(clippy::too_many_arguments)]
pub fn run_live(
    job: AlgorithmJob,
    mut strategy: Box<dyn Strategy>,
    algorithm: Arc<AlgorithmHandle>,
    exchange: Arc<DataExchange>,
    driver: Arc<LiveFeedDriver>,
    queue: Arc<BusyHandoffQueue<TimeSlice>>,
    collaborators: EngineCollaborators,
    settings: &Settings,
) -> Result<(), VelaError> {
    let cancel = CancellationToken::new();
    let clock = IterationClock::new();
    let monitor = TimeMonitor::new(clock.clone(), settings.time_loop_maximum());

    exchange.clone().start(cancel.clone());

    let scheduler = collaborators.realtime.clone();
    let scheduler_cancel = cancel.clone();
    let scheduler_thread = thread::Builder::new()
        .name("real-time-scheduler".to_string())
        .spawn(move || scheduler.run_live(&scheduler_cancel))
        .map_err(|e| VelaError::EngineErrorDebug(format!("Failed to spawn scheduler: {}", e)))?;

    let feed_cancel = cancel.clone();
    let feed_driver = driver.clone();
    let feed_thread = thread::Builder::new()
        .name("live-feed".to_string())
        .spawn(move || feed_driver.run(&feed_cancel))
        .map_err(|e| VelaError::EngineErrorDebug(format!("Failed to spawn live feed: {}", e)))?;

    let manager_cancel = cancel.clone();
    let manager_algorithm = algorithm.clone();
    let manager_clock = clock.clone();
    let transactions = collaborators.transactions.clone();
    let results = collaborators.results.clone();
    let realtime = collaborators.realtime.clone();
    let commands = collaborators.commands.clone();

    let outcome = Isolator::new().execute(
        move || {
            let mut manager = AlgorithmManager::new(job);
            manager.run(
                strategy.as_mut(),
                &manager_algorithm,
                &queue,
                &transactions,
                &results,
                &realtime,
                &commands,
                &manager_clock,
                &manager_cancel,
            )
        },
        monitor,
        cancel.clone(),
    );

    cancel.cancel();
    exchange.stop();
    let _ = feed_thread.join();
    let _ = scheduler_thread.join();
    outcome
}
