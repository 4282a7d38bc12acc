use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use crate::market_maps::factor_files::{FactorFile, FactorFileRow};
use crate::market_maps::map_files::{map_rows, MapFile};
use crate::messages::engine_error::VelaError;
use crate::messages::results::BacktestResultHandler;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::enums::{AlgorithmStatus, NormalizationMode};
use crate::standardized_types::orders::{Order, OrderStatus, SYMBOL_CHANGED_CANCEL_REASON};
use crate::standardized_types::securities::{Portfolio, Security};
use crate::standardized_types::subscriptions::{SubscriptionConfig, SymbolName};
use crate::standardized_types::time_slices::TimeSlice;
use crate::strategies::algorithm::{AlgorithmHandle, Strategy};
use crate::strategies::collaborators::{BacktestTransactionHandler, ChannelCommandQueue, TransactionHandler};
use crate::strategies::feeds::{Subscription, SubscriptionCollection};
use crate::strategies::handlers::algorithm_manager::AlgorithmJob;
use crate::strategies::handlers::timed_events_handler::TimedEventHandler;
use crate::strategies::launcher::{run_backtest, EngineCollaborators};
use crate::settings::Settings;
use crate::tests::fixtures::*;

struct Harness {
    algorithm: Arc<AlgorithmHandle>,
    subscriptions: Arc<SubscriptionCollection>,
    results: Arc<BacktestResultHandler>,
    transactions: Arc<BacktestTransactionHandler>,
    end_utc: DateTime<Utc>,
}

fn build_harness(
    data_dir: &std::path::Path,
    config: Arc<SubscriptionConfig>,
    start: NaiveDate,
    finish: NaiveDate,
    map_file: Option<MapFile>,
    factor_file: Option<FactorFile>,
) -> Harness {
    let portfolio = Arc::new(Portfolio::new("USD", dec!(100_000)));
    let mut security = Security::new(config.symbol.clone());
    security.normalization = config.normalization;
    portfolio.securities.add(security);

    let algorithm = Arc::new(AlgorithmHandle::new(New_York, portfolio.clone()));
    let transactions = Arc::new(BacktestTransactionHandler::new(portfolio));
    let results = Arc::new(BacktestResultHandler::new());

    let data_reader = reader(config.clone(), start, finish, map_file, factor_file, data_dir);
    let subscriptions = Arc::new(SubscriptionCollection::new());
    subscriptions.add(Subscription::new(config, Box::new(data_reader)));

    let end_utc = crate::helpers::converters::date_start_utc(finish + chrono::Duration::days(1), New_York);
    Harness {
        algorithm,
        subscriptions,
        results,
        transactions,
        end_utc,
    }
}

fn launch(harness: &Harness, strategy: Box<dyn Strategy>, settings: &Settings) -> Result<(), VelaError> {
    run_backtest(
        AlgorithmJob::backtest(),
        strategy,
        harness.algorithm.clone(),
        harness.subscriptions.clone(),
        EngineCollaborators {
            transactions: harness.transactions.clone() as Arc<dyn TransactionHandler>,
            results: harness.results.clone(),
            realtime: Arc::new(TimedEventHandler::new()),
            commands: Arc::new(ChannelCommandQueue::new()),
        },
        settings,
        harness.end_utc,
    )
}

#[derive(Default)]
struct Recorded {
    trade_bar_slices: usize,
    slice_times: Vec<DateTime<Utc>>,
    bar_end_matches: bool,
    data_within_frontier: bool,
    splits: Vec<(DateTime<Utc>, Decimal, Decimal)>,
    symbol_changes: Vec<(SymbolName, SymbolName)>,
    first_day2_bar_slice: Option<usize>,
}

struct RecordingStrategy {
    state: Arc<Mutex<Recorded>>,
    symbol_name: String,
    day2: Option<NaiveDate>,
}

impl RecordingStrategy {
    fn new(symbol_name: &str) -> (Self, Arc<Mutex<Recorded>>) {
        let state = Arc::new(Mutex::new(Recorded {
            bar_end_matches: true,
            data_within_frontier: true,
            ..Recorded::default()
        }));
        (
            RecordingStrategy {
                state: state.clone(),
                symbol_name: symbol_name.to_string(),
                day2: None,
            },
            state,
        )
    }
}

impl Strategy for RecordingStrategy {
    fn on_trade_bars(
        &mut self,
        _bars: &HashMap<SymbolName, TradeBar>,
        _algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        let mut state = self.state.lock().unwrap();
        state.trade_bar_slices += 1;
        Ok(())
    }

    fn on_splits(
        &mut self,
        splits: &HashMap<SymbolName, crate::standardized_types::base_data::auxiliary::Split>,
        _algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        let mut state = self.state.lock().unwrap();
        for split in splits.values() {
            state.splits.push((split.time, split.reference_price, split.split_factor));
        }
        Ok(())
    }

    fn on_symbol_changed_events(
        &mut self,
        changes: &HashMap<SymbolName, crate::standardized_types::base_data::auxiliary::SymbolChangedEvent>,
        _algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        let mut state = self.state.lock().unwrap();
        for changed in changes.values() {
            state.symbol_changes.push((changed.old_symbol.clone(), changed.new_symbol.clone()));
        }
        Ok(())
    }

    fn on_data(&mut self, slice: &TimeSlice, _algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.slice_times.last() {
            if slice.time < *previous {
                state.data_within_frontier = false;
            }
        }
        state.slice_times.push(slice.time);
        for datum in &slice.data {
            if datum.time_end_utc() > slice.time {
                state.data_within_frontier = false;
            }
        }
        if let Some(bar) = slice.slice.trade_bars.get(&self.symbol_name) {
            if bar.time_end_utc() != slice.time {
                state.bar_end_matches = false;
            }
            if let Some(day2) = self.day2 {
                if bar.time_utc().with_timezone(&New_York).date_naive() == day2
                    && state.first_day2_bar_slice.is_none()
                {
                    state.first_day2_bar_slice = Some(state.slice_times.len() - 1);
                }
            }
        }
        Ok(())
    }
}

#[test]
fn single_symbol_minute_backtest_one_day() {
    let temp = TempDir::new().unwrap();
    let config = minute_config("FOO", NormalizationMode::Raw);
    // entries 09:30 through 16:00 inclusive, one bar per minute
    write_minute_day(
        temp.path(),
        &config,
        date(2020, 1, 2),
        MARKET_OPEN_MILLIS,
        391,
        dec!(100),
        dec!(0.01),
    );
    let harness = build_harness(temp.path(), config, date(2020, 1, 2), date(2020, 1, 2), None, None);
    let (strategy, state) = RecordingStrategy::new("FOO");
    launch(&harness, Box::new(strategy), &Settings::default()).unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.trade_bar_slices, 391);
    assert_eq!(state.slice_times.len(), 391);
    assert!(state.bar_end_matches, "bar end times must equal the slice time");
    assert!(state.data_within_frontier);

    // equity sampled once at end of day with flat performance
    assert_eq!(harness.results.equity_samples().len(), 1);
    let performance = harness.results.daily_performance();
    assert_eq!(performance.len(), 1);
    assert_eq!(performance[&date(2020, 1, 2)], Decimal::ZERO.round_dp(10));
    assert_eq!(harness.results.last_status(), Some(AlgorithmStatus::Completed));
}

struct OrderOnFirstSlice {
    inner: RecordingStrategy,
    transactions: Arc<BacktestTransactionHandler>,
    order: Option<Order>,
}

impl Strategy for OrderOnFirstSlice {
    fn on_data(&mut self, slice: &TimeSlice, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        if let Some(order) = self.order.take() {
            self.transactions.submit(order);
        }
        self.inner.on_data(slice, algorithm)
    }

    fn on_splits(
        &mut self,
        splits: &HashMap<SymbolName, crate::standardized_types::base_data::auxiliary::Split>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        self.inner.on_splits(splits, algorithm)
    }

    fn on_symbol_changed_events(
        &mut self,
        changes: &HashMap<SymbolName, crate::standardized_types::base_data::auxiliary::SymbolChangedEvent>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        self.inner.on_symbol_changed_events(changes, algorithm)
    }

    fn on_trade_bars(
        &mut self,
        bars: &HashMap<SymbolName, TradeBar>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        self.inner.on_trade_bars(bars, algorithm)
    }
}

fn split_fixture(temp: &TempDir, mode: NormalizationMode) -> (Harness, Arc<Mutex<Recorded>>, Box<dyn Strategy>) {
    let config = minute_config("FOO", mode);
    write_minute_day(temp.path(), &config, date(2020, 1, 2), MARKET_OPEN_MILLIS, 3, dec!(100), dec!(1));
    write_minute_day(temp.path(), &config, date(2020, 1, 3), MARKET_OPEN_MILLIS, 3, dec!(51), dec!(0));
    let factor_file = FactorFile::new(
        "FOO",
        vec![FactorFileRow {
            date: date(2020, 1, 3),
            price_factor: Decimal::ONE,
            split_factor: dec!(0.5),
        }],
    );
    let harness = build_harness(
        temp.path(),
        config.clone(),
        date(2020, 1, 2),
        date(2020, 1, 3),
        None,
        Some(factor_file),
    );
    let (mut recording, state) = RecordingStrategy::new("FOO");
    recording.day2 = Some(date(2020, 1, 3));
    // resting buy well below the market so it stays open through the split
    let order = Order::limit(
        config.symbol.clone(),
        dec!(10),
        dec!(40),
        DateTime::<Utc>::MIN_UTC,
        "",
    );
    let strategy = OrderOnFirstSlice {
        inner: recording,
        transactions: harness.transactions.clone(),
        order: Some(order),
    };
    (harness, state, Box::new(strategy))
}

#[test]
fn split_adjusts_open_orders_in_raw_mode() {
    let temp = TempDir::new().unwrap();
    let (harness, state, strategy) = split_fixture(&temp, NormalizationMode::Raw);
    launch(&harness, strategy, &Settings::default()).unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.splits.len(), 1);
    let (split_time, reference, factor) = state.splits[0];
    assert_eq!(factor, dec!(0.5));
    assert_eq!(reference, dec!(102));
    // the split slice arrived before any of the ex date's bars
    let split_seen_at = state
        .slice_times
        .iter()
        .position(|time| *time == split_time)
        .expect("the split rode its own slice");
    let first_day2 = state.first_day2_bar_slice.expect("day two bars arrived");
    assert!(split_seen_at < first_day2);

    // raw data mode: the resting 10 @ 40 became 20 @ 20
    let open_orders = harness.transactions.open_orders(None);
    assert_eq!(open_orders.len(), 1);
    assert_eq!(open_orders[0].quantity, dec!(20));
    assert_eq!(open_orders[0].limit_price, Some(dec!(20)));
}

#[test]
fn split_leaves_orders_alone_in_split_adjusted_mode() {
    let temp = TempDir::new().unwrap();
    let (harness, state, strategy) = split_fixture(&temp, NormalizationMode::SplitAdjusted);
    launch(&harness, strategy, &Settings::default()).unwrap();

    assert_eq!(state.lock().unwrap().splits.len(), 1);
    let open_orders = harness.transactions.open_orders(None);
    assert_eq!(open_orders.len(), 1);
    assert_eq!(open_orders[0].quantity, dec!(10));
    assert_eq!(open_orders[0].limit_price, Some(dec!(40)));
}

#[test]
fn symbol_remap_cancels_open_orders() {
    let temp = TempDir::new().unwrap();
    let config = minute_config("BAR", NormalizationMode::Raw);
    let map_file = MapFile::new(
        "BAR",
        map_rows(&[
            (date(2019, 6, 3), "BAR"),
            (date(2020, 1, 9), "BAR"),
            (date(2050, 1, 1), "BAZ"),
        ]),
    );
    write_minute_day(temp.path(), &config, date(2020, 1, 9), MARKET_OPEN_MILLIS, 3, dec!(20), dec!(0));
    {
        let renamed = minute_config("BAR", NormalizationMode::Raw);
        renamed.set_mapped_symbol("BAZ".to_string());
        write_minute_day(temp.path(), &renamed, date(2020, 1, 10), MARKET_OPEN_MILLIS, 3, dec!(21), dec!(0));
    }
    let harness = build_harness(
        temp.path(),
        config.clone(),
        date(2020, 1, 9),
        date(2020, 1, 10),
        Some(map_file),
        None,
    );
    let (recording, state) = RecordingStrategy::new("BAR");
    let order = Order::limit(config.symbol.clone(), dec!(5), dec!(10), DateTime::<Utc>::MIN_UTC, "");
    let strategy = OrderOnFirstSlice {
        inner: recording,
        transactions: harness.transactions.clone(),
        order: Some(order),
    };
    launch(&harness, Box::new(strategy), &Settings::default()).unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.symbol_changes, vec![("BAR".to_string(), "BAZ".to_string())]);
    assert_eq!(config.mapped_symbol(), "BAZ");

    // the open order was cancelled with the symbol change reason
    assert!(harness.transactions.open_orders(None).is_empty());
    let order_id = harness
        .transactions
        .all_order_ids()
        .into_iter()
        .next()
        .expect("an order was submitted");
    let order = harness.transactions.order(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);
    assert_eq!(order.tag, SYMBOL_CHANGED_CANCEL_REASON);
    assert_eq!(
        harness.transactions.ticket(&order_id).unwrap().status,
        OrderStatus::Canceled
    );
}

struct SleepyStrategy;

impl Strategy for SleepyStrategy {
    fn on_data(&mut self, _slice: &TimeSlice, _algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        thread::sleep(StdDuration::from_millis(250));
        Ok(())
    }
}

#[test]
fn time_limit_breach_aborts_the_algorithm() {
    let temp = TempDir::new().unwrap();
    let config = minute_config("FOO", NormalizationMode::Raw);
    write_minute_day(temp.path(), &config, date(2020, 1, 2), MARKET_OPEN_MILLIS, 5, dec!(100), dec!(0));
    let harness = build_harness(temp.path(), config, date(2020, 1, 2), date(2020, 1, 2), None, None);

    let mut settings = Settings::default();
    // one millisecond-scale iteration budget
    settings.algorithm_manager_time_loop_maximum = 0.001;

    let outcome = launch(&harness, Box::new(SleepyStrategy), &settings);
    match outcome {
        Err(VelaError::TimeLimitExceeded(reason)) => {
            assert!(reason.contains("on a single time loop"));
        }
        other => panic!("expected a time limit breach, got {:?}", other),
    }
    assert_eq!(harness.algorithm.status(), AlgorithmStatus::RuntimeError);
    assert!(harness
        .results
        .runtime_errors()
        .iter()
        .any(|message| message.contains("on a single time loop")));
}

#[test]
fn commands_drain_before_data_dispatch() {
    let temp = TempDir::new().unwrap();
    let config = minute_config("FOO", NormalizationMode::Raw);
    write_minute_day(temp.path(), &config, date(2020, 1, 2), MARKET_OPEN_MILLIS, 10, dec!(100), dec!(0));
    let harness = build_harness(temp.path(), config, date(2020, 1, 2), date(2020, 1, 2), None, None);

    let commands = Arc::new(ChannelCommandQueue::new());
    commands.push(crate::strategies::collaborators::EngineCommand::Stop);
    let (strategy, state) = RecordingStrategy::new("FOO");
    let outcome = run_backtest(
        AlgorithmJob::backtest(),
        Box::new(strategy),
        harness.algorithm.clone(),
        harness.subscriptions.clone(),
        EngineCollaborators {
            transactions: harness.transactions.clone() as Arc<dyn TransactionHandler>,
            results: harness.results.clone(),
            realtime: Arc::new(TimedEventHandler::new()),
            commands,
        },
        &Settings::default(),
        harness.end_utc,
    );
    outcome.unwrap();
    // the command takes effect on the next status check: the first slice
    // still dispatched, the rest of the day did not
    assert_eq!(state.lock().unwrap().slice_times.len(), 1);
    assert_eq!(harness.results.last_status(), Some(AlgorithmStatus::Stopped));
}

struct FixedHistory {
    slices: Vec<TimeSlice>,
}

impl crate::strategies::collaborators::HistoryProvider for FixedHistory {
    fn history(
        &self,
        _configs: &[Arc<SubscriptionConfig>],
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _time_zone: chrono_tz::Tz,
    ) -> Vec<TimeSlice> {
        self.slices.clone()
    }
}

struct WarmupRecorder {
    seen: Arc<Mutex<Vec<(DateTime<Utc>, bool)>>>,
    warmup_complete_calls: Arc<AtomicUsize>,
}

impl Strategy for WarmupRecorder {
    fn on_data(&mut self, slice: &TimeSlice, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        self.seen.lock().unwrap().push((slice.time, algorithm.is_warming_up()));
        Ok(())
    }

    fn on_warmup_complete(&mut self, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        assert!(!algorithm.is_warming_up());
        self.warmup_complete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn warmup_replays_history_before_live_data() {
    use crate::collections::busy_queue::BusyHandoffQueue;
    use crate::collections::cancellation::CancellationToken;
    use crate::helpers::converters::time_convert_utc_to_fixed_offset;
    use crate::strategies::handlers::algorithm_manager::{AlgorithmManager, WarmupFeed};
    use crate::strategies::isolator::IterationClock;

    let portfolio = Arc::new(Portfolio::new("USD", dec!(100_000)));
    let algorithm = Arc::new(AlgorithmHandle::new(New_York, portfolio.clone()));
    let transactions: Arc<dyn TransactionHandler> = Arc::new(BacktestTransactionHandler::new(portfolio));
    let results = Arc::new(BacktestResultHandler::new());
    let realtime = Arc::new(TimedEventHandler::new());
    let commands: Arc<dyn crate::strategies::collaborators::CommandQueue> =
        Arc::new(ChannelCommandQueue::new());

    let base = Utc.with_ymd_and_hms(2020, 1, 2, 14, 31, 0).unwrap();
    let slices: Vec<TimeSlice> = (0..3i64)
        .map(|i| {
            let time = base + chrono::Duration::minutes(i);
            TimeSlice::heartbeat(time, time_convert_utc_to_fixed_offset(&New_York, time))
        })
        .collect();

    let mut job = AlgorithmJob::live();
    job.warmup = Some(WarmupFeed {
        provider: Arc::new(FixedHistory { slices }),
        configs: Vec::new(),
        start: base,
        minimum_resolution: chrono::Duration::minutes(1),
    });

    // the live feed never produces anything, the queue completes immediately
    let queue: Arc<BusyHandoffQueue<TimeSlice>> = Arc::new(BusyHandoffQueue::new(4));
    queue.complete_adding();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let warmup_complete_calls = Arc::new(AtomicUsize::new(0));
    let mut strategy = WarmupRecorder {
        seen: seen.clone(),
        warmup_complete_calls: warmup_complete_calls.clone(),
    };

    let cancel = CancellationToken::new();
    let clock = IterationClock::new();
    let results_handler: Arc<dyn crate::messages::results::ResultHandler> = results.clone();
    let mut manager = AlgorithmManager::new(job);
    manager
        .run(
            &mut strategy,
            &algorithm,
            &queue,
            &transactions,
            &results_handler,
            &realtime,
            &commands,
            &clock,
            &cancel,
        )
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(_, warming)| *warming));
    assert_eq!(warmup_complete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(algorithm.status(), AlgorithmStatus::Completed);
}

#[test]
fn timed_events_fire_on_the_backtest_clock() {
    let temp = TempDir::new().unwrap();
    let config = minute_config("FOO", NormalizationMode::Raw);
    write_minute_day(temp.path(), &config, date(2020, 1, 2), MARKET_OPEN_MILLIS, 10, dec!(100), dec!(0));
    let harness = build_harness(temp.path(), config, date(2020, 1, 2), date(2020, 1, 2), None, None);

    let realtime = Arc::new(TimedEventHandler::new());
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    // 09:35 New York is 14:35 UTC
    realtime.add_event(crate::strategies::handlers::timed_events_handler::ScheduledEvent::new(
        "five-past-open",
        vec![Utc.with_ymd_and_hms(2020, 1, 2, 14, 35, 0).unwrap()],
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    ));
    let (strategy, _state) = RecordingStrategy::new("FOO");
    run_backtest(
        AlgorithmJob::backtest(),
        Box::new(strategy),
        harness.algorithm.clone(),
        harness.subscriptions.clone(),
        EngineCollaborators {
            transactions: harness.transactions.clone() as Arc<dyn TransactionHandler>,
            results: harness.results.clone(),
            realtime,
            commands: Arc::new(ChannelCommandQueue::new()),
        },
        &Settings::default(),
        harness.end_utc,
    )
    .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
