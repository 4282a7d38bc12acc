use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::messages::engine_error::VelaError;
use crate::standardized_types::base_data::auxiliary::{Delisting, Dividend, Split, SymbolChangedEvent};
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::option_chain::OptionChain;
use crate::standardized_types::base_data::quote_bar::QuoteBar;
use crate::standardized_types::base_data::tick::Tick;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::base_data::universe::UniverseCollection;
use crate::standardized_types::enums::AlgorithmStatus;
use crate::standardized_types::orders::Order;
use crate::standardized_types::securities::{Portfolio, SecurityChanges};
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol, SymbolName};
use crate::standardized_types::time_slices::TimeSlice;
use crate::strategies::consolidators::TimeConsolidator;

/// Selects the members of a universe from the data its subscription produced.
pub type UniverseSelector = Arc<dyn Fn(&UniverseCollection) -> Vec<Symbol> + Send + Sync>;

/// The user strategy surface. Every callback is dispatched synchronously
/// inside one manager iteration and individually guarded: an `Err` (or a
/// panic) records a runtime error and ends the algorithm.
///
/// The single-argument `on_data` is the preferred entry point, the typed
/// callbacks fire before it when the slice carries matching data.
#[allow(unused_variables)]
pub trait Strategy: Send {
    fn on_data(&mut self, slice: &TimeSlice, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_trade_bars(
        &mut self,
        bars: &HashMap<SymbolName, TradeBar>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_quote_bars(
        &mut self,
        bars: &HashMap<SymbolName, QuoteBar>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_ticks(
        &mut self,
        ticks: &HashMap<SymbolName, Vec<Tick>>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_option_chains(
        &mut self,
        chains: &HashMap<SymbolName, OptionChain>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_splits(
        &mut self,
        splits: &HashMap<SymbolName, Split>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_dividends(
        &mut self,
        dividends: &HashMap<SymbolName, Dividend>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_delistings(
        &mut self,
        delistings: &HashMap<SymbolName, Delisting>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_symbol_changed_events(
        &mut self,
        changes: &HashMap<SymbolName, SymbolChangedEvent>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_securities_changed(
        &mut self,
        changes: &SecurityChanges,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    /// Margin call orders may be modified or cleared before execution.
    fn on_margin_call(
        &mut self,
        requests: &mut Vec<Order>,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_margin_call_warning(&mut self, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        Ok(())
    }

    /// Custom data grouped per subscription, keyed by the data type tag.
    fn on_custom_data(
        &mut self,
        config: &SubscriptionConfig,
        data: &[BaseDataEnum],
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    /// A consolidator closed a bar for the given subscription.
    fn on_consolidated_bar(
        &mut self,
        config: &SubscriptionConfig,
        bar: &TradeBar,
        algorithm: &AlgorithmHandle,
    ) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_end_of_day(&mut self, date: NaiveDate, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_warmup_complete(&mut self, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        Ok(())
    }

    /// Remote command payloads drained from the command queue.
    fn on_command(&mut self, payload: &str, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        Ok(())
    }

    fn on_end_of_algorithm(&mut self, algorithm: &AlgorithmHandle) -> Result<(), VelaError> {
        Ok(())
    }
}

/// Shared algorithm state: the status slot, runtime error slot, clock,
/// portfolio and the registries the manager maintains while the strategy
/// runs. The manager loop is the only writer of `Running`, external setters
/// are restricted to non-running values.
pub struct AlgorithmHandle {
    pub time_zone: Tz,
    pub portfolio: Arc<Portfolio>,
    status: Mutex<AlgorithmStatus>,
    runtime_error: Mutex<Option<String>>,
    current_time: Mutex<DateTime<Utc>>,
    is_warming_up: AtomicBool,
    benchmark: Mutex<Option<Arc<dyn Fn(DateTime<Utc>) -> Decimal + Send + Sync>>>,
    consolidators: Mutex<HashMap<SubscriptionConfig, Vec<TimeConsolidator>>>,
    universe_selectors: DashMap<Symbol, UniverseSelector>,
    universe_members: DashMap<Symbol, Vec<Symbol>>,
}

impl AlgorithmHandle {
    pub fn new(time_zone: Tz, portfolio: Arc<Portfolio>) -> Self {
        AlgorithmHandle {
            time_zone,
            portfolio,
            status: Mutex::new(AlgorithmStatus::Initializing),
            runtime_error: Mutex::new(None),
            current_time: Mutex::new(DateTime::<Utc>::MIN_UTC),
            is_warming_up: AtomicBool::new(false),
            benchmark: Mutex::new(None),
            consolidators: Mutex::new(HashMap::new()),
            universe_selectors: DashMap::new(),
            universe_members: DashMap::new(),
        }
    }

    pub fn status(&self) -> AlgorithmStatus {
        match self.status.lock() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Manager-side transition, any value allowed.
    pub(crate) fn set_status(&self, status: AlgorithmStatus) {
        match self.status.lock() {
            Ok(mut slot) => *slot = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    /// External transition request. `Running` is refused, only the manager
    /// loop marks the algorithm running.
    pub fn request_status(&self, status: AlgorithmStatus) {
        if status == AlgorithmStatus::Running {
            return;
        }
        self.set_status(status);
    }

    pub fn runtime_error(&self) -> Option<String> {
        match self.runtime_error.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// First error wins, later reports are dropped.
    pub fn set_runtime_error(&self, message: impl Into<String>) {
        let mut slot = match self.runtime_error.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(message.into());
        }
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        match self.current_time.lock() {
            Ok(time) => *time,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_current_time(&self, time: DateTime<Utc>) {
        match self.current_time.lock() {
            Ok(mut slot) => *slot = time,
            Err(poisoned) => *poisoned.into_inner() = time,
        }
    }

    pub fn is_warming_up(&self) -> bool {
        self.is_warming_up.load(Ordering::SeqCst)
    }

    pub fn set_warming_up(&self, warming_up: bool) {
        self.is_warming_up.store(warming_up, Ordering::SeqCst);
    }

    pub fn set_benchmark(&self, benchmark: Arc<dyn Fn(DateTime<Utc>) -> Decimal + Send + Sync>) {
        match self.benchmark.lock() {
            Ok(mut slot) => *slot = Some(benchmark),
            Err(poisoned) => *poisoned.into_inner() = Some(benchmark),
        }
    }

    pub fn benchmark_value(&self, time: DateTime<Utc>) -> Option<Decimal> {
        let benchmark = match self.benchmark.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        benchmark.map(|f| f(time))
    }

    /// Registers a consolidator for the subscription, fed by the manager on
    /// every slice carrying data for it.
    pub fn register_consolidator(&self, config: SubscriptionConfig, consolidator: TimeConsolidator) {
        let mut consolidators = match self.consolidators.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        consolidators.entry(config).or_default().push(consolidator);
    }

    /// Feeds the slice's consolidator updates, returning the closed bars with
    /// the subscription that produced them.
    pub(crate) fn update_consolidators(
        &self,
        updates: &[(Arc<SubscriptionConfig>, BaseDataEnum)],
    ) -> Vec<(SubscriptionConfig, TradeBar)> {
        let mut consolidators = match self.consolidators.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut closed = Vec::new();
        for (config, datum) in updates {
            if let Some(list) = consolidators.get_mut(config.as_ref()) {
                for consolidator in list.iter_mut() {
                    if let Some(bar) = consolidator.update(datum) {
                        closed.push((config.as_ref().clone(), bar));
                    }
                }
            }
        }
        closed
    }

    pub fn register_universe_selector(&self, universe_symbol: Symbol, selector: UniverseSelector) {
        self.universe_selectors.insert(universe_symbol, selector);
    }

    pub(crate) fn universe_selector(&self, universe_symbol: &Symbol) -> Option<UniverseSelector> {
        self.universe_selectors
            .get(universe_symbol)
            .map(|entry| entry.value().clone())
    }

    /// Applies one universe selection, diffing against the previous members.
    pub(crate) fn apply_universe_selection(
        &self,
        universe_symbol: &Symbol,
        selected: Vec<Symbol>,
    ) -> SecurityChanges {
        let previous = self
            .universe_members
            .insert(universe_symbol.clone(), selected.clone())
            .unwrap_or_default();
        let added = selected
            .iter()
            .filter(|symbol| !previous.contains(symbol))
            .cloned()
            .collect();
        let removed = previous
            .into_iter()
            .filter(|symbol| !selected.contains(symbol))
            .collect();
        SecurityChanges::new(added, removed)
    }
}
