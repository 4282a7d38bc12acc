use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::collections::busy_queue::BusyHandoffQueue;
use crate::collections::cancellation::CancellationToken;
use crate::messages::engine_error::VelaError;
use crate::messages::results::ResultHandler;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::enums::{AlgorithmStatus, DelistingPhase, NormalizationMode, StrategyMode};
use crate::standardized_types::orders::{Order, OrderId, SYMBOL_CHANGED_CANCEL_REASON};
use crate::standardized_types::securities::Security;
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol};
use crate::standardized_types::time_slices::TimeSlice;
use crate::strategies::algorithm::{AlgorithmHandle, Strategy};
use crate::strategies::collaborators::{CommandQueue, EngineCommand, HistoryProvider, TransactionHandler};
use crate::strategies::handlers::timed_events_handler::TimedEventHandler;
use crate::strategies::isolator::IterationClock;

/// Warm-up source: historical slices replayed through the loop before live
/// data begins.
pub struct WarmupFeed {
    pub provider: Arc<dyn HistoryProvider>,
    pub configs: Vec<Arc<SubscriptionConfig>>,
    pub start: DateTime<Utc>,
    /// The smallest subscribed resolution, the hand-over threshold to live data.
    pub minimum_resolution: Duration,
}

/// Everything one algorithm run needs beyond the live collaborators.
pub struct AlgorithmJob {
    pub mode: StrategyMode,
    pub liquidate_on_stop: bool,
    pub margin_scan_interval: Duration,
    pub settlement_scan_interval: Duration,
    pub warmup: Option<WarmupFeed>,
}

impl AlgorithmJob {
    pub fn backtest() -> Self {
        AlgorithmJob {
            mode: StrategyMode::Backtest,
            liquidate_on_stop: false,
            margin_scan_interval: Duration::hours(1),
            settlement_scan_interval: Duration::hours(1),
            warmup: None,
        }
    }

    pub fn live() -> Self {
        AlgorithmJob {
            mode: StrategyMode::Live,
            liquidate_on_stop: false,
            margin_scan_interval: Duration::minutes(5),
            settlement_scan_interval: Duration::minutes(30),
            warmup: None,
        }
    }
}

enum LoopControl {
    Continue,
    Stop,
}

/// The central consumer: takes slices off the hand-off queue, performs the
/// per-tick bookkeeping and dispatches the user callbacks, every one under
/// its own error guard. The first callback failure records a runtime error,
/// flips the status and ends the loop, no callback's failure ever escapes
/// into another callback on the same iteration.
pub struct AlgorithmManager {
    job: AlgorithmJob,
    next_margin_call_time: DateTime<Utc>,
    next_settlement_scan_time: DateTime<Utc>,
    previous_day: Option<NaiveDate>,
    previous_day_equity: Decimal,
    delisting_tickets: HashMap<Symbol, OrderId>,
}

impl AlgorithmManager {
    pub fn new(job: AlgorithmJob) -> Self {
        AlgorithmManager {
            job,
            next_margin_call_time: DateTime::<Utc>::MIN_UTC,
            next_settlement_scan_time: DateTime::<Utc>::MIN_UTC,
            previous_day: None,
            previous_day_equity: Decimal::ZERO,
            delisting_tickets: HashMap::new(),
        }
    }

    /// Runs the strategy against the feed until the queue completes, the
    /// status leaves `Running`, cancellation is observed or a callback fails.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        strategy: &mut dyn Strategy,
        algorithm: &Arc<AlgorithmHandle>,
        feed: &Arc<BusyHandoffQueue<TimeSlice>>,
        transactions: &Arc<dyn TransactionHandler>,
        results: &Arc<dyn ResultHandler>,
        realtime: &Arc<TimedEventHandler>,
        commands: &Arc<dyn CommandQueue>,
        clock: &Arc<IterationClock>,
        cancel: &CancellationToken,
    ) -> Result<(), VelaError> {
        algorithm.set_status(AlgorithmStatus::Running);
        results.status_update(AlgorithmStatus::Running);
        self.previous_day_equity = algorithm.portfolio.total_equity();

        self.run_warmup(strategy, algorithm, transactions, results, realtime, commands, clock, cancel);

        if algorithm.status() == AlgorithmStatus::Running {
            while let Some(slice) = feed.take(cancel) {
                match self.process_slice(
                    &slice,
                    strategy,
                    algorithm,
                    transactions,
                    results,
                    realtime,
                    commands,
                    clock,
                    cancel,
                ) {
                    LoopControl::Continue => {}
                    LoopControl::Stop => break,
                }
            }
        }

        self.finish(strategy, algorithm, transactions, results)
    }

    /// Replays historical slices with the warm-up flag set, handing over to
    /// live data once the most recent slice is within the minimum resolution
    /// of the wall clock (or the history is exhausted).
    #[allow(clippy::too_many_arguments)]
    fn run_warmup(
        &mut self,
        strategy: &mut dyn Strategy,
        algorithm: &Arc<AlgorithmHandle>,
        transactions: &Arc<dyn TransactionHandler>,
        results: &Arc<dyn ResultHandler>,
        realtime: &Arc<TimedEventHandler>,
        commands: &Arc<dyn CommandQueue>,
        clock: &Arc<IterationClock>,
        cancel: &CancellationToken,
    ) {
        let warmup = match self.job.warmup.take() {
            Some(warmup) => warmup,
            None => return,
        };
        println!("Engine: Warming up the strategy...");
        algorithm.set_warming_up(true);
        let slices = warmup
            .provider
            .history(&warmup.configs, warmup.start, Utc::now(), algorithm.time_zone);
        for (index, slice) in slices.iter().enumerate() {
            if algorithm.status() != AlgorithmStatus::Running || cancel.is_cancelled() {
                break;
            }
            if index % 100 == 0 {
                results.status_update(algorithm.status());
            }
            if let LoopControl::Stop = self.process_slice(
                slice,
                strategy,
                algorithm,
                transactions,
                results,
                realtime,
                commands,
                clock,
                cancel,
            ) {
                break;
            }
            if Utc::now() - slice.time <= warmup.minimum_resolution {
                break;
            }
        }
        algorithm.set_warming_up(false);
        if algorithm.status() == AlgorithmStatus::Running {
            guard(strategy, algorithm, results, "OnWarmupComplete", |strategy, algorithm| {
                strategy.on_warmup_complete(algorithm)
            });
            println!("Engine: Warm up complete");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_slice(
        &mut self,
        slice: &TimeSlice,
        strategy: &mut dyn Strategy,
        algorithm: &Arc<AlgorithmHandle>,
        transactions: &Arc<dyn TransactionHandler>,
        results: &Arc<dyn ResultHandler>,
        realtime: &Arc<TimedEventHandler>,
        commands: &Arc<dyn CommandQueue>,
        clock: &Arc<IterationClock>,
        cancel: &CancellationToken,
    ) -> LoopControl {
        clock.reset();

        if algorithm.status() != AlgorithmStatus::Running || cancel.is_cancelled() {
            return LoopControl::Stop;
        }

        for command in commands.drain() {
            let success = self.execute_command(&command, strategy, algorithm, transactions, results);
            results.command_result(&command.name(), success);
        }

        // sample the previous day before any of the new day's data applies
        if self.job.mode == StrategyMode::Backtest {
            let slice_day = slice.local_time.date_naive();
            match self.previous_day {
                Some(previous) if previous < slice_day => {
                    self.sample_day(previous, slice.time, algorithm, results);
                    if !guard(strategy, algorithm, results, "OnEndOfDay", |strategy, algorithm| {
                        strategy.on_end_of_day(previous, algorithm)
                    }) {
                        return LoopControl::Stop;
                    }
                    self.previous_day = Some(slice_day);
                }
                None => self.previous_day = Some(slice_day),
                _ => {}
            }
        }

        algorithm.set_current_time(slice.time);

        if !slice.slice.symbol_changes.is_empty() {
            if !guard(strategy, algorithm, results, "OnSymbolChangedEvents", |strategy, algorithm| {
                strategy.on_symbol_changed_events(&slice.slice.symbol_changes, algorithm)
            }) {
                return LoopControl::Stop;
            }
            for changed in slice.slice.symbol_changes.values() {
                let cancelled =
                    transactions.cancel_open_orders(&changed.symbol, SYMBOL_CHANGED_CANCEL_REASON);
                if !cancelled.is_empty() {
                    results.debug_message(&format!(
                        "Cancelled {} open orders for {} on symbol change",
                        cancelled.len(),
                        changed.old_symbol
                    ));
                }
            }
        }

        for symbol in &slice.security_changes.added {
            if !algorithm.portfolio.securities.contains(symbol) {
                algorithm.portfolio.securities.add(Security::new(symbol.clone()));
            }
        }

        {
            let mut cash_book = match algorithm.portfolio.cash_book.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for datum in &slice.cash_book_updates {
                cash_book.update_conversion_rate(datum);
            }
        }
        for (symbol, datum) in &slice.securities_updates {
            algorithm.portfolio.securities.update_market_price(symbol, datum);
            let value = datum.value();
            if value > Decimal::ZERO {
                transactions.update_last_price(symbol, value);
            }
        }

        realtime.set_time(slice.time);
        transactions.set_time(slice.time);
        transactions.process_synchronous_events();

        self.sweep_delisting_tickets(algorithm, transactions);

        if algorithm.runtime_error().is_some() {
            algorithm.set_status(AlgorithmStatus::RuntimeError);
            return LoopControl::Stop;
        }

        if slice.time >= self.next_margin_call_time || self.job.mode.is_live() {
            let (mut margin_orders, warning) = algorithm.portfolio.scan_for_margin_call(slice.time);
            if !margin_orders.is_empty() {
                if !guard(strategy, algorithm, results, "OnMarginCall", |strategy, algorithm| {
                    strategy.on_margin_call(&mut margin_orders, algorithm)
                }) {
                    return LoopControl::Stop;
                }
                for order in margin_orders {
                    transactions.submit(order);
                }
                transactions.process_synchronous_events();
            } else if warning
                && !guard(strategy, algorithm, results, "OnMarginCallWarning", |strategy, algorithm| {
                    strategy.on_margin_call_warning(algorithm)
                })
            {
                return LoopControl::Stop;
            }
            self.next_margin_call_time = slice.time + self.job.margin_scan_interval;
        }

        if slice.time >= self.next_settlement_scan_time {
            algorithm.portfolio.scan_for_cash_settlement(slice.time);
            self.next_settlement_scan_time = slice.time + self.job.settlement_scan_interval;
        }

        if !slice.security_changes.is_empty()
            && !guard(strategy, algorithm, results, "OnSecuritiesChanged", |strategy, algorithm| {
                strategy.on_securities_changed(&slice.security_changes, algorithm)
            })
        {
            return LoopControl::Stop;
        }

        for dividend in slice.slice.dividends.values() {
            algorithm.portfolio.apply_dividend(dividend);
        }
        for split in slice.slice.splits.values() {
            algorithm.portfolio.apply_split(split);
            let raw_subscription = algorithm
                .portfolio
                .securities
                .get(&split.symbol)
                .map(|security| security.normalization == NormalizationMode::Raw)
                .unwrap_or(false);
            if self.job.mode.is_live() || raw_subscription {
                transactions.apply_split_to_open_orders(&split.symbol, split.split_factor);
            }
        }

        for (config, bar) in algorithm.update_consolidators(&slice.consolidator_updates) {
            if !guard(strategy, algorithm, results, "OnConsolidatedBar", |strategy, algorithm| {
                strategy.on_consolidated_bar(&config, &bar, algorithm)
            }) {
                return LoopControl::Stop;
            }
        }

        for (config, data) in &slice.custom_data {
            if !guard(strategy, algorithm, results, "OnCustomData", |strategy, algorithm| {
                strategy.on_custom_data(config, data, algorithm)
            }) {
                return LoopControl::Stop;
            }
        }

        if !self.dispatch_typed(slice, strategy, algorithm, results) {
            return LoopControl::Stop;
        }

        self.handle_delistings(slice, algorithm, transactions, results);

        if !guard(strategy, algorithm, results, "OnData", |strategy, algorithm| {
            strategy.on_data(slice, algorithm)
        }) {
            return LoopControl::Stop;
        }

        transactions.process_synchronous_events();
        results.process_synchronous_events(false);
        LoopControl::Continue
    }

    /// Typed dispatch in slice order: bars, quotes, chains, ticks, then the
    /// corporate action dictionaries.
    fn dispatch_typed(
        &mut self,
        slice: &TimeSlice,
        strategy: &mut dyn Strategy,
        algorithm: &Arc<AlgorithmHandle>,
        results: &Arc<dyn ResultHandler>,
    ) -> bool {
        if !slice.slice.trade_bars.is_empty()
            && !guard(strategy, algorithm, results, "OnTradeBars", |strategy, algorithm| {
                strategy.on_trade_bars(&slice.slice.trade_bars, algorithm)
            })
        {
            return false;
        }
        if !slice.slice.quote_bars.is_empty()
            && !guard(strategy, algorithm, results, "OnQuoteBars", |strategy, algorithm| {
                strategy.on_quote_bars(&slice.slice.quote_bars, algorithm)
            })
        {
            return false;
        }
        if !slice.slice.option_chains.is_empty()
            && !guard(strategy, algorithm, results, "OnOptionChains", |strategy, algorithm| {
                strategy.on_option_chains(&slice.slice.option_chains, algorithm)
            })
        {
            return false;
        }
        if !slice.slice.ticks.is_empty()
            && !guard(strategy, algorithm, results, "OnTicks", |strategy, algorithm| {
                strategy.on_ticks(&slice.slice.ticks, algorithm)
            })
        {
            return false;
        }
        if !slice.slice.dividends.is_empty()
            && !guard(strategy, algorithm, results, "OnDividends", |strategy, algorithm| {
                strategy.on_dividends(&slice.slice.dividends, algorithm)
            })
        {
            return false;
        }
        if !slice.slice.splits.is_empty()
            && !guard(strategy, algorithm, results, "OnSplits", |strategy, algorithm| {
                strategy.on_splits(&slice.slice.splits, algorithm)
            })
        {
            return false;
        }
        if !slice.slice.delistings.is_empty()
            && !guard(strategy, algorithm, results, "OnDelistings", |strategy, algorithm| {
                strategy.on_delistings(&slice.slice.delistings, algorithm)
            })
        {
            return false;
        }
        true
    }

    /// Filled liquidation tickets remove their security once the position is
    /// flat. A partial fill keeps the ticket in the sweep.
    fn sweep_delisting_tickets(
        &mut self,
        algorithm: &Arc<AlgorithmHandle>,
        transactions: &Arc<dyn TransactionHandler>,
    ) {
        let mut completed = Vec::new();
        for (symbol, order_id) in &self.delisting_tickets {
            let filled = transactions
                .ticket(order_id)
                .map(|ticket| ticket.is_filled())
                .unwrap_or(false);
            if !filled {
                continue;
            }
            let flat = algorithm
                .portfolio
                .securities
                .get(symbol)
                .map(|security| !security.has_holdings())
                .unwrap_or(true);
            if flat {
                algorithm.portfolio.securities.remove(symbol);
                completed.push(symbol.clone());
            }
        }
        for symbol in completed {
            self.delisting_tickets.remove(&symbol);
        }
    }

    /// Newly observed delistings: the warning submits a market-on-close
    /// liquidation, the terminal notice removes the security once flat.
    fn handle_delistings(
        &mut self,
        slice: &TimeSlice,
        algorithm: &Arc<AlgorithmHandle>,
        transactions: &Arc<dyn TransactionHandler>,
        results: &Arc<dyn ResultHandler>,
    ) {
        for delisting in slice.slice.delistings.values() {
            match delisting.phase {
                DelistingPhase::Warning => {
                    if self.delisting_tickets.contains_key(&delisting.symbol) {
                        continue;
                    }
                    let quantity = algorithm
                        .portfolio
                        .securities
                        .get(&delisting.symbol)
                        .map(|security| security.holdings_quantity)
                        .unwrap_or(Decimal::ZERO);
                    if quantity != Decimal::ZERO {
                        let order = Order::market_on_close(
                            delisting.symbol.clone(),
                            -quantity,
                            slice.time,
                            "Liquidate from delisting",
                        );
                        let ticket = transactions.submit(order);
                        self.delisting_tickets.insert(delisting.symbol.clone(), ticket.order_id);
                        results.debug_message(&format!(
                            "Submitted liquidation for delisting of {}",
                            delisting.symbol.name
                        ));
                    }
                }
                DelistingPhase::Delisted => {
                    let flat = algorithm
                        .portfolio
                        .securities
                        .get(&delisting.symbol)
                        .map(|security| !security.has_holdings())
                        .unwrap_or(true);
                    if flat {
                        algorithm.portfolio.securities.remove(&delisting.symbol);
                        self.delisting_tickets.remove(&delisting.symbol);
                    } else {
                        // still holding, keep the security until the
                        // liquidation completes
                        algorithm.portfolio.securities.update(&delisting.symbol, |security| {
                            security.is_tradable = false;
                        });
                    }
                }
            }
        }
    }

    fn sample_day(
        &mut self,
        day: NaiveDate,
        time: DateTime<Utc>,
        algorithm: &Arc<AlgorithmHandle>,
        results: &Arc<dyn ResultHandler>,
    ) {
        let equity = algorithm.portfolio.total_equity();
        results.sample_equity(time, equity);
        if self.previous_day_equity > Decimal::ZERO {
            let performance =
                ((equity - self.previous_day_equity) / self.previous_day_equity).round_dp(10);
            results.sample_daily_performance(day, performance);
        }
        if let Some(benchmark) = algorithm.benchmark_value(time) {
            results.sample_benchmark(time, benchmark);
        }
        self.previous_day_equity = equity;
    }

    fn execute_command(
        &mut self,
        command: &EngineCommand,
        strategy: &mut dyn Strategy,
        algorithm: &Arc<AlgorithmHandle>,
        transactions: &Arc<dyn TransactionHandler>,
        results: &Arc<dyn ResultHandler>,
    ) -> bool {
        match command {
            EngineCommand::Stop => {
                algorithm.request_status(AlgorithmStatus::Stopped);
                true
            }
            EngineCommand::Liquidate => {
                self.liquidate(algorithm, transactions);
                algorithm.request_status(AlgorithmStatus::Liquidated);
                true
            }
            EngineCommand::Custom(payload) => {
                guard(strategy, algorithm, results, "OnCommand", |strategy, algorithm| {
                    strategy.on_command(payload, algorithm)
                })
            }
        }
    }

    fn liquidate(&self, algorithm: &Arc<AlgorithmHandle>, transactions: &Arc<dyn TransactionHandler>) {
        let time = algorithm.current_time();
        for security in algorithm.portfolio.securities.snapshot() {
            if security.has_holdings() {
                transactions.submit(Order::market(
                    security.symbol.clone(),
                    -security.holdings_quantity,
                    time,
                    "Liquidated",
                ));
            }
        }
        transactions.process_synchronous_events();
    }

    /// Common exit path: the end-of-algorithm callback under the same guard,
    /// one forced synchronous pass, the optional live liquidation and the
    /// final status update.
    fn finish(
        &mut self,
        strategy: &mut dyn Strategy,
        algorithm: &Arc<AlgorithmHandle>,
        transactions: &Arc<dyn TransactionHandler>,
        results: &Arc<dyn ResultHandler>,
    ) -> Result<(), VelaError> {
        if self.job.mode == StrategyMode::Backtest {
            if let Some(day) = self.previous_day {
                self.sample_day(day, algorithm.current_time(), algorithm, results);
            }
        }

        guard(strategy, algorithm, results, "OnEndOfAlgorithm", |strategy, algorithm| {
            strategy.on_end_of_algorithm(algorithm)
        });

        transactions.process_synchronous_events();
        results.process_synchronous_events(true);

        if let Some(error) = algorithm.runtime_error() {
            algorithm.set_status(AlgorithmStatus::RuntimeError);
            results.status_update(AlgorithmStatus::RuntimeError);
            return Err(VelaError::UserCallbackError(error));
        }

        if self.job.mode.is_live()
            && self.job.liquidate_on_stop
            && algorithm.status() == AlgorithmStatus::Stopped
        {
            self.liquidate(algorithm, transactions);
            algorithm.set_status(AlgorithmStatus::Liquidated);
        }

        if algorithm.status() == AlgorithmStatus::Running {
            algorithm.set_status(AlgorithmStatus::Completed);
        }
        results.status_update(algorithm.status());
        Ok(())
    }
}

/// Runs one user callback under the error guard: an `Err` or a panic records
/// the runtime error, flips the status and reports to the result handler.
/// Returns false when the algorithm must stop.
fn guard(
    strategy: &mut dyn Strategy,
    algorithm: &Arc<AlgorithmHandle>,
    results: &Arc<dyn ResultHandler>,
    context: &str,
    f: impl FnOnce(&mut dyn Strategy, &AlgorithmHandle) -> Result<(), VelaError>,
) -> bool {
    let outcome = catch_unwind(AssertUnwindSafe(|| f(strategy, algorithm)));
    let message = match outcome {
        Ok(Ok(())) => return true,
        Ok(Err(error)) => format!("{}: {}", context, error),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            format!("{}: panicked: {}", context, detail)
        }
    };
    algorithm.set_runtime_error(message.clone());
    algorithm.set_status(AlgorithmStatus::RuntimeError);
    results.runtime_error(&message, None);
    false
}
