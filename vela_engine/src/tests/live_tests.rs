use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use chrono_tz::America::New_York;
use rust_decimal_macros::dec;

use crate::collections::busy_queue::BusyHandoffQueue;
use crate::collections::cancellation::CancellationToken;
use crate::messages::results::BacktestResultHandler;
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::base_data_type::BaseDataType;
use crate::standardized_types::base_data::tick::Tick;
use crate::standardized_types::base_data::universe::UniverseCollection;
use crate::standardized_types::enums::{NormalizationMode, SecurityType, TickKind};
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::securities::Portfolio;
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol};
use crate::standardized_types::time_slices::TimeSlice;
use crate::strategies::algorithm::AlgorithmHandle;
use crate::strategies::feeds::exchange::DataExchange;
use crate::strategies::feeds::live_feed::LiveFeedDriver;

fn tick_config(symbol: Symbol) -> Arc<SubscriptionConfig> {
    Arc::new(SubscriptionConfig::new(
        symbol,
        BaseDataType::Ticks,
        Resolution::Tick,
        New_York,
        New_York,
        true,
        false,
        false,
        false,
        true,
        TickKind::Trade,
        NormalizationMode::Raw,
    ))
}

fn universe_config(symbol: Symbol) -> Arc<SubscriptionConfig> {
    Arc::new(SubscriptionConfig::new(
        symbol,
        BaseDataType::UniverseCollections,
        Resolution::Second,
        New_York,
        New_York,
        true,
        false,
        false,
        true,
        false,
        TickKind::Trade,
        NormalizationMode::Raw,
    ))
}

struct LiveFixture {
    exchange: Arc<DataExchange>,
    driver: Arc<LiveFeedDriver>,
    queue: Arc<BusyHandoffQueue<TimeSlice>>,
    algorithm: Arc<AlgorithmHandle>,
    cancel: CancellationToken,
}

fn live_fixture() -> LiveFixture {
    let portfolio = Arc::new(Portfolio::new("USD", dec!(100_000)));
    let algorithm = Arc::new(AlgorithmHandle::new(New_York, portfolio));
    let queue = Arc::new(BusyHandoffQueue::new(16));
    let exchange = DataExchange::new(StdDuration::from_millis(1));
    let results = Arc::new(BacktestResultHandler::new());
    let driver = Arc::new(LiveFeedDriver::new(
        exchange.clone(),
        queue.clone(),
        algorithm.clone(),
        results,
    ));
    LiveFixture {
        exchange,
        driver,
        queue,
        algorithm,
        cancel: CancellationToken::new(),
    }
}

#[test]
fn live_driver_emits_data_and_heartbeats() {
    let fixture = live_fixture();
    let symbol = Symbol::new("FOO", SecurityType::Equity, "usa");
    let now = Utc::now();
    let ticks: Vec<BaseDataEnum> = (0..3)
        .map(|i| {
            BaseDataEnum::Tick(Tick::trade(
                symbol.clone(),
                dec!(100),
                dec!(1),
                String::new(),
                String::new(),
                false,
                now - Duration::milliseconds(500 - i * 10),
            ))
        })
        .collect();
    fixture
        .driver
        .add_subscription(tick_config(symbol.clone()), Box::new(ticks.into_iter()));

    fixture.exchange.clone().start(fixture.cancel.clone());
    let driver = fixture.driver.clone();
    let driver_cancel = fixture.cancel.clone();
    let driver_thread = thread::spawn(move || driver.run(&driver_cancel));

    let mut ticks_seen = 0usize;
    let mut heartbeats = 0usize;
    let mut last_time = None;
    let deadline = Instant::now() + StdDuration::from_secs(10);
    while Instant::now() < deadline && (ticks_seen < 3 || heartbeats < 2) {
        if let Some(slice) = fixture.queue.take(&fixture.cancel) {
            if let Some(previous) = last_time {
                assert!(slice.time >= previous);
            }
            last_time = Some(slice.time);
            if slice.has_data() {
                ticks_seen += slice.slice.ticks.get("FOO").map_or(0, Vec::len);
            } else {
                heartbeats += 1;
            }
        }
    }
    fixture.cancel.cancel();
    fixture.exchange.stop();
    driver_thread.join().unwrap();

    assert_eq!(ticks_seen, 3, "the buffered ticks never fully surfaced");
    assert!(heartbeats >= 2, "no heartbeat slices were emitted");
}

#[test]
fn universe_selection_changes_ride_the_next_slice() {
    let fixture = live_fixture();
    let universe_symbol = Symbol::new("ALL-EQUITY", SecurityType::Base, "usa");
    let foo = Symbol::new("FOO", SecurityType::Equity, "usa");
    let selected = foo.clone();
    fixture
        .algorithm
        .register_universe_selector(universe_symbol.clone(), Arc::new(move |_| vec![selected.clone()]));

    let collection = BaseDataEnum::UniverseCollection(UniverseCollection::new(
        universe_symbol.clone(),
        Utc::now() - Duration::milliseconds(100),
        Vec::new(),
    ));
    fixture
        .driver
        .add_subscription(universe_config(universe_symbol), Box::new(vec![collection].into_iter()));

    fixture.exchange.clone().start(fixture.cancel.clone());
    let driver = fixture.driver.clone();
    let driver_cancel = fixture.cancel.clone();
    let driver_thread = thread::spawn(move || driver.run(&driver_cancel));

    let mut added = None;
    let deadline = Instant::now() + StdDuration::from_secs(10);
    while Instant::now() < deadline && added.is_none() {
        if let Some(slice) = fixture.queue.take(&fixture.cancel) {
            if !slice.security_changes.is_empty() {
                added = Some(slice.security_changes.added.clone());
            }
        }
    }
    fixture.cancel.cancel();
    fixture.exchange.stop();
    driver_thread.join().unwrap();

    assert_eq!(added, Some(vec![foo]));
}
