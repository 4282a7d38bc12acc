use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use chrono_tz::America::New_York;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use vela_engine::collections::composition;
use vela_engine::collections::memoizer::MemoizedEnumerable;
use vela_engine::database::paths::{relative_zip_path, zip_entry_name};
use vela_engine::helpers::converters::date_start_utc;
use vela_engine::messages::engine_error::VelaError;
use vela_engine::messages::results::{BacktestResultHandler, ResultMessage};
use vela_engine::settings::Settings;
use vela_engine::standardized_types::base_data::base_data_type::BaseDataType;
use vela_engine::standardized_types::base_data::trade_bar::TradeBar;
use vela_engine::standardized_types::enums::{NormalizationMode, SecurityType};
use vela_engine::standardized_types::market_hours::default_database;
use vela_engine::standardized_types::orders::Order;
use vela_engine::standardized_types::resolution::Resolution;
use vela_engine::standardized_types::securities::{Portfolio, Security};
use vela_engine::standardized_types::subscriptions::{SubscriptionConfig, Symbol, SymbolName};
use vela_engine::standardized_types::time_slices::TimeSlice;
use vela_engine::strategies::algorithm::{AlgorithmHandle, Strategy};
use vela_engine::strategies::collaborators::{
    BacktestTransactionHandler, ChannelCommandQueue, TransactionHandler,
};
use vela_engine::standardized_types::base_data::base_data_enum::BaseDataEnum;
use vela_engine::strategies::consolidators::TimeConsolidator;
use vela_engine::strategies::feeds::fill_forward::FillForwardIterator;
use vela_engine::strategies::feeds::subscription_reader::{NullSignalSink, SubscriptionDataReader};
use vela_engine::strategies::feeds::{Subscription, SubscriptionCollection};
use vela_engine::strategies::handlers::algorithm_manager::AlgorithmJob;
use vela_engine::strategies::handlers::timed_events_handler::{ScheduledEvent, TimedEventHandler};
use vela_engine::strategies::launcher::{run_backtest, EngineCollaborators};

/// Buys on the first bar, rides the position through the day and reports the
/// bars it saw. A minimal exercise of the engine surface.
struct MomentumDemo {
    transactions: Arc<BacktestTransactionHandler>,
    symbol: Symbol,
    bought: bool,
    bars_seen: usize,
}

impl Strategy for MomentumDemo {
    fn on_trade_bars(
        &mut self,
        bars: &HashMap<SymbolName, TradeBar>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        self.bars_seen += bars.len();
        if !self.bought {
            if let Some(bar) = bars.get(&self.symbol.name) {
                println!("Strategy: first bar {} at {}, buying 100", bar.close, bar.time);
                self.transactions.submit(Order::market(
                    self.symbol.clone(),
                    dec!(100),
                    algorithm.current_time(),
                    "demo entry",
                ));
                self.bought = true;
            }
        }
        Ok(())
    }

    fn on_data(&mut self, slice: &TimeSlice, _algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        if slice.data_point_count == 0 {
            println!("Strategy: heartbeat at {}", slice.time);
        }
        Ok(())
    }

    fn on_consolidated_bar(
        &mut self,
        _config: &SubscriptionConfig,
        bar: &TradeBar,
        _algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        println!("Strategy: 5 minute bar closed {} -> {}", bar.open, bar.close);
        Ok(())
    }

    fn on_end_of_algorithm(&mut self, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        println!(
            "Strategy: done, saw {} bar updates, final equity {}",
            self.bars_seen,
            algorithm.portfolio.total_equity()
        );
        Ok(())
    }
}

fn write_demo_day(data_dir: &std::path::Path, config: &SubscriptionConfig, date: NaiveDate) {
    let relative = relative_zip_path(&config.symbol, config.resolution, date, config.tick_kind).unwrap();
    let entry = zip_entry_name(&config.symbol, config.resolution, date, config.tick_kind).unwrap();
    let path = data_dir.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer.start_file(entry, SimpleFileOptions::default()).unwrap();
    // a gently trending session, prices scaled by 10_000
    let open_millis: i64 = 34_200_000;
    let mut rows = Vec::new();
    for i in 0..391i64 {
        let close = 1_000_000 + i * 250;
        rows.push(format!("{},{},{},{},{},{}", open_millis + i * 60_000, close - 100, close + 150, close - 200, close, 1_000 + i));
    }
    writer.write_all(rows.join("\n").as_bytes()).unwrap();
    writer.finish().unwrap();
}

fn main() {
    env_logger::init();
    let settings = Settings::default();

    let temp = TempDir::new().expect("temp data directory");
    let trading_day = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();

    let symbol = Symbol::new("DEMO", SecurityType::Equity, "usa");
    let config = Arc::new(SubscriptionConfig::market_data(
        symbol.clone(),
        BaseDataType::TradeBars,
        Resolution::Minute,
        New_York,
        New_York,
    ));
    write_demo_day(temp.path(), &config, trading_day);

    let portfolio = Arc::new(Portfolio::new("USD", dec!(100_000)));
    let mut security = Security::new(symbol.clone());
    security.normalization = NormalizationMode::Raw;
    portfolio.securities.add(security);

    let algorithm = Arc::new(AlgorithmHandle::new(New_York, portfolio.clone()));
    algorithm.register_consolidator(
        config.as_ref().clone(),
        TimeConsolidator::new(Duration::minutes(5)).unwrap(),
    );

    let hours = default_database()
        .entry(&symbol)
        .expect("market hours for usa equities")
        .clone();
    let calendar = MemoizedEnumerable::new(hours.tradeable_dates(trading_day, trading_day));
    let start_utc = date_start_utc(trading_day, New_York);
    let end_utc = date_start_utc(trading_day + Duration::days(1), New_York);
    let reader = SubscriptionDataReader::new(
        config.clone(),
        start_utc,
        end_utc,
        &calendar,
        None,
        None,
        temp.path().to_path_buf(),
        Arc::new(NullSignalSink),
    );

    // the default market data config fills gaps forward inside the session
    let source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync> =
        Box::new(FillForwardIterator::new(Box::new(reader), config.clone(), hours.clone()));
    let subscriptions = Arc::new(SubscriptionCollection::new());
    subscriptions.add(Subscription::new(config.clone(), source));

    // handlers register at startup under the names the settings carry and
    // the wiring resolves them back out of the registry
    composition::register(
        &settings.transaction_handler,
        Arc::new(BacktestTransactionHandler::new(portfolio.clone())),
    );
    composition::register(&settings.result_handler, Arc::new(BacktestResultHandler::new()));
    let transactions: Arc<BacktestTransactionHandler> =
        composition::single(&settings.transaction_handler).expect("transaction handler registered");
    let results: Arc<BacktestResultHandler> =
        composition::single(&settings.result_handler).expect("result handler registered");
    let realtime = Arc::new(TimedEventHandler::new());
    realtime.add_event(ScheduledEvent::new(
        "lunch-check",
        vec![date_start_utc(trading_day, New_York) + Duration::hours(12)],
        Box::new(|time| println!("Scheduled: lunch check fired at {}", time)),
    ));

    let strategy = MomentumDemo {
        transactions: transactions.clone(),
        symbol,
        bought: false,
        bars_seen: 0,
    };

    let outcome = run_backtest(
        AlgorithmJob::backtest(),
        Box::new(strategy),
        algorithm.clone(),
        subscriptions,
        EngineCollaborators {
            transactions: transactions.clone() as Arc<dyn TransactionHandler>,
            results: results.clone(),
            realtime,
            commands: Arc::new(ChannelCommandQueue::new()),
        },
        &settings,
        end_utc,
    );

    match outcome {
        Ok(()) => println!("Engine: Backtest finished, status {}", algorithm.status()),
        Err(error) => eprintln!("Engine: Backtest failed: {}", error),
    }

    for (time, equity) in results.equity_samples() {
        println!("Result: equity {} at {}", equity.round_dp(2), time);
    }
    for (day, performance) in results.daily_performance() {
        println!("Result: daily performance {} on {}", performance, day);
    }
    let errors: Vec<ResultMessage> = results
        .messages()
        .into_iter()
        .filter(|message| matches!(message, ResultMessage::RuntimeError { .. }))
        .collect();
    if !errors.is_empty() {
        eprintln!("Result: runtime errors {:?}", errors);
    }
    let final_equity: Decimal = algorithm.portfolio.total_equity();
    println!("Result: final equity {}", final_equity.round_dp(2));
}
