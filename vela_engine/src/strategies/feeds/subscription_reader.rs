use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::collections::memoizer::{MemoizedCursor, MemoizedEnumerable};
use crate::database::csv_parsers::parse_day_records;
use crate::database::paths::{relative_zip_path, zip_entry_name};
use crate::helpers::converters::date_start_utc;
use crate::market_maps::factor_files::FactorFile;
use crate::market_maps::map_files::MapFile;
use crate::messages::engine_error::VelaError;
use crate::messages::results::ResultHandler;
use crate::standardized_types::base_data::auxiliary::{Delisting, Dividend, Split, SymbolChangedEvent};
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::enums::{DelistingPhase, NormalizationMode};
use crate::standardized_types::market_hours::TradeableDatesIter;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol};
use crate::standardized_types::Price;

/// The tradeable dates calendar shared between the reader and the fill
/// forward stage: both walk the same lazy sequence through their own cursor.
pub type SharedTradingCalendar = Arc<MemoizedEnumerable<TradeableDatesIter>>;

/// Out-of-band reader signals. Neither recovers the datum, the reader moves
/// on to the next date or line.
pub trait FeedSignalSink: Send + Sync {
    fn invalid_source(&self, config: &SubscriptionConfig, message: &str);
    fn reader_error(&self, config: &SubscriptionConfig, message: &str);
}

/// Routes reader signals to the result handler as handled errors.
pub struct ResultHandlerSignalSink {
    results: Arc<dyn ResultHandler>,
}

impl ResultHandlerSignalSink {
    pub fn new(results: Arc<dyn ResultHandler>) -> Self {
        ResultHandlerSignalSink { results }
    }
}

impl FeedSignalSink for ResultHandlerSignalSink {
    fn invalid_source(&self, config: &SubscriptionConfig, message: &str) {
        self.results
            .handled_error(&format!("Invalid source for {}: {}", config, message), None);
    }

    fn reader_error(&self, config: &SubscriptionConfig, message: &str) {
        self.results
            .handled_error(&format!("Reader error for {}: {}", config, message), None);
    }
}

/// Discards reader signals, fixtures only.
pub struct NullSignalSink;

impl FeedSignalSink for NullSignalSink {
    fn invalid_source(&self, _config: &SubscriptionConfig, _message: &str) {}
    fn reader_error(&self, _config: &SubscriptionConfig, _message: &str) {}
}

/// Walks per-day sources for a single security and yields price data
/// interleaved with auxiliary events, applying price normalization.
///
/// Emission rules:
/// * end times never repeat for non-tick resolutions, never decrease for tick
/// * custom data arriving out of order is skipped
/// * data before the period start is dropped, data past the period finish
///   ends the sequence
/// * queued auxiliary events are emitted only while strictly ahead of the
///   next pending price instance, otherwise they are held and re-checked
pub struct SubscriptionDataReader {
    config: Arc<SubscriptionConfig>,
    start_utc: DateTime<Utc>,
    end_utc: DateTime<Utc>,
    data_directory: PathBuf,
    map_file: Option<Arc<MapFile>>,
    factor_file: Option<Arc<FactorFile>>,
    signals: Arc<dyn FeedSignalSink>,
    dates: MemoizedCursor<TradeableDatesIter>,

    day_rows: VecDeque<BaseDataEnum>,
    low_resolution_days: Option<BTreeMap<NaiveDate, Vec<BaseDataEnum>>>,
    aux_queue: VecDeque<BaseDataEnum>,
    pending: Option<BaseDataEnum>,

    previous_end: Option<DateTime<Utc>>,
    previous_raw_close: Option<Price>,
    previous_value: Option<Price>,
    price_scale: Decimal,
    sum_of_dividends: Decimal,

    warning_queued: bool,
    delisted_queued: bool,
    prices_exhausted: bool,
    finished: bool,
}

impl SubscriptionDataReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SubscriptionConfig>,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        calendar: &SharedTradingCalendar,
        map_file: Option<Arc<MapFile>>,
        factor_file: Option<Arc<FactorFile>>,
        data_directory: PathBuf,
        signals: Arc<dyn FeedSignalSink>,
    ) -> Self {
        SubscriptionDataReader {
            config,
            start_utc,
            end_utc,
            data_directory,
            map_file,
            factor_file,
            signals,
            dates: MemoizedCursor::new(calendar.clone()),
            day_rows: VecDeque::new(),
            low_resolution_days: None,
            aux_queue: VecDeque::new(),
            pending: None,
            previous_end: None,
            previous_raw_close: None,
            previous_value: None,
            price_scale: Decimal::ONE,
            sum_of_dividends: Decimal::ZERO,
            warning_queued: false,
            delisted_queued: false,
            prices_exhausted: false,
            finished: false,
        }
    }

    /// Inverts the normalization applied to the most recent price instance.
    pub fn raw_close(&self) -> Option<Price> {
        let value = self.previous_value?;
        let raw = match self.config.normalization {
            NormalizationMode::Raw => value,
            NormalizationMode::Adjusted | NormalizationMode::SplitAdjusted => {
                if self.price_scale == Decimal::ZERO {
                    return None;
                }
                value / self.price_scale
            }
            NormalizationMode::TotalReturn => {
                if self.price_scale == Decimal::ZERO {
                    return None;
                }
                (value - self.sum_of_dividends) / self.price_scale
            }
        };
        Some(raw)
    }

    fn mapped_path_symbol(&self) -> Symbol {
        let mut symbol = self.config.symbol.clone();
        symbol.name = self.config.mapped_symbol();
        symbol
    }

    fn queue_aux(&mut self, datum: BaseDataEnum) {
        self.aux_queue.push_back(datum);
    }

    fn apply_normalization(&self, datum: &mut BaseDataEnum) {
        let mode = self.config.normalization;
        if mode == NormalizationMode::Raw {
            return;
        }
        let scale = self.price_scale;
        let shift = if mode == NormalizationMode::TotalReturn {
            self.sum_of_dividends
        } else {
            Decimal::ZERO
        };
        let adjust = |price: &mut Price| {
            if *price > Decimal::ZERO {
                *price = *price * scale + shift;
            }
        };
        match datum {
            BaseDataEnum::TradeBar(bar) => {
                adjust(&mut bar.open);
                adjust(&mut bar.high);
                adjust(&mut bar.low);
                adjust(&mut bar.close);
            }
            BaseDataEnum::QuoteBar(bar) => {
                adjust(&mut bar.bid_open);
                adjust(&mut bar.bid_high);
                adjust(&mut bar.bid_low);
                adjust(&mut bar.bid_close);
                adjust(&mut bar.ask_open);
                adjust(&mut bar.ask_high);
                adjust(&mut bar.ask_low);
                adjust(&mut bar.ask_close);
            }
            BaseDataEnum::Tick(tick) => {
                adjust(&mut tick.price);
                adjust(&mut tick.bid_price);
                adjust(&mut tick.ask_price);
            }
            _ => {}
        }
    }

    fn read_zip_entry(&self, date: NaiveDate) -> Result<String, VelaError> {
        let symbol = self.mapped_path_symbol();
        let relative = relative_zip_path(&symbol, self.config.resolution, date, self.config.tick_kind)?;
        let entry = zip_entry_name(&symbol, self.config.resolution, date, self.config.tick_kind)?;
        let path = self.data_directory.join(relative);
        let file = File::open(&path)
            .map_err(|e| VelaError::InvalidSource(format!("{}: {}", path.display(), e)))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| VelaError::InvalidSource(format!("{}: {}", path.display(), e)))?;
        let mut zip_entry = archive
            .by_name(&entry)
            .map_err(|e| VelaError::InvalidSource(format!("{} ({}): {}", path.display(), entry, e)))?;
        let mut contents = String::new();
        zip_entry
            .read_to_string(&mut contents)
            .map_err(|e| VelaError::InvalidSource(format!("{}: {}", path.display(), e)))?;
        Ok(contents)
    }

    fn parse_day_source(&self, contents: &str, date: NaiveDate) -> Vec<BaseDataEnum> {
        let day_start = date_start_utc(date, self.config.data_time_zone);
        parse_day_records(&self.config, contents, day_start, |error| {
            self.signals.reader_error(&self.config, &error.to_string());
        })
    }

    /// Loads the day source for intraday resolutions, or slices the single
    /// preloaded file for hour and daily. `false` means nothing to read, the
    /// caller moves to the next date.
    fn load_day(&mut self, date: NaiveDate) -> bool {
        if self.config.resolution.is_intraday() {
            match self.read_zip_entry(date) {
                Ok(contents) => {
                    self.day_rows = self.parse_day_source(&contents, date).into();
                    !self.day_rows.is_empty()
                }
                Err(error) => {
                    self.signals.invalid_source(&self.config, &error.to_string());
                    false
                }
            }
        } else {
            if self.low_resolution_days.is_none() {
                let days = match self.read_zip_entry(date) {
                    Ok(contents) => {
                        let mut days: BTreeMap<NaiveDate, Vec<BaseDataEnum>> = BTreeMap::new();
                        for datum in self.parse_day_source(&contents, date) {
                            let local_date = datum
                                .time_utc()
                                .with_timezone(&self.config.exchange_time_zone)
                                .date_naive();
                            days.entry(local_date).or_default().push(datum);
                        }
                        days
                    }
                    Err(error) => {
                        self.signals.invalid_source(&self.config, &error.to_string());
                        BTreeMap::new()
                    }
                };
                self.low_resolution_days = Some(days);
            }
            if let Some(days) = self.low_resolution_days.as_mut() {
                if let Some(rows) = days.remove(&date) {
                    self.day_rows = rows.into();
                    return true;
                }
            }
            false
        }
    }

    /// Queues the terminal delisting notice dated the day after the map
    /// file's delisting date.
    fn queue_delisted(&mut self, delist_date: NaiveDate) {
        if self.delisted_queued {
            return;
        }
        self.delisted_queued = true;
        let time = date_start_utc(delist_date + Duration::days(1), self.config.exchange_time_zone);
        self.queue_aux(BaseDataEnum::Delisting(Delisting {
            symbol: self.config.symbol.clone(),
            time,
            phase: DelistingPhase::Delisted,
        }));
    }

    /// Advances to the next readable date, running the per-date checks:
    /// delisting state, map file presence, symbol remapping and factor file
    /// updates. Returns `false` when no further price data will come.
    fn advance_date(&mut self) -> bool {
        loop {
            let date = match self.dates.next() {
                Some(date) => date,
                None => {
                    // period ended while delisted data was still pending
                    if self.warning_queued {
                        if let Some(delist) = self.map_file.as_ref().and_then(|m| m.delisting_date()) {
                            self.queue_delisted(delist);
                        }
                    }
                    return false;
                }
            };

            if let Some(map_file) = self.map_file.clone() {
                if let Some(delist) = map_file.delisting_date() {
                    if date == delist && !self.warning_queued {
                        self.warning_queued = true;
                        let time = date_start_utc(date, self.config.exchange_time_zone);
                        self.queue_aux(BaseDataEnum::Delisting(Delisting {
                            symbol: self.config.symbol.clone(),
                            time,
                            phase: DelistingPhase::Warning,
                        }));
                    } else if date > delist {
                        // the delisting date itself may have been skipped
                        if !self.warning_queued {
                            self.warning_queued = true;
                            let time = date_start_utc(delist, self.config.exchange_time_zone);
                            self.queue_aux(BaseDataEnum::Delisting(Delisting {
                                symbol: self.config.symbol.clone(),
                                time,
                                phase: DelistingPhase::Warning,
                            }));
                        }
                        self.queue_delisted(delist);
                        return false;
                    }
                }
                if !map_file.has_data(date) {
                    continue;
                }
                if let Some(mapped) = map_file.mapped_symbol_at(date) {
                    let current = self.config.mapped_symbol();
                    if mapped != current {
                        let time = date_start_utc(date, self.config.exchange_time_zone);
                        self.queue_aux(BaseDataEnum::SymbolChanged(SymbolChangedEvent {
                            symbol: self.config.symbol.clone(),
                            time,
                            old_symbol: current,
                            new_symbol: mapped.clone(),
                        }));
                        self.config.set_mapped_symbol(mapped);
                    }
                }
            }

            if let Some(factor_file) = self.factor_file.clone() {
                if let Some(event) = factor_file.event_on(date) {
                    let reference = self.previous_raw_close.unwrap_or(Decimal::ZERO);
                    let time = date_start_utc(date, self.config.exchange_time_zone);
                    if let Some(split_factor) = event.split_factor {
                        self.queue_aux(BaseDataEnum::Split(Split {
                            symbol: self.config.symbol.clone(),
                            time,
                            reference_price: reference,
                            split_factor,
                        }));
                    }
                    if let Some(ratio) = event.dividend_ratio {
                        if ratio > Decimal::ZERO {
                            let distribution = reference * (Decimal::ONE / ratio - Decimal::ONE);
                            self.queue_aux(BaseDataEnum::Dividend(Dividend {
                                symbol: self.config.symbol.clone(),
                                time,
                                distribution,
                                reference_price: reference,
                            }));
                            self.sum_of_dividends += distribution;
                        }
                    }
                }
                self.price_scale = factor_file.price_scale_factor(date, self.config.normalization);
            }

            if self.load_day(date) {
                return true;
            }
            // nothing readable for the date, aux already queued still flows
            if !self.aux_queue.is_empty() {
                return true;
            }
        }
    }

    /// Produces the next acceptable price instance, or `None` when the
    /// period or the sources are exhausted.
    fn advance_price(&mut self) -> Option<BaseDataEnum> {
        loop {
            while let Some(raw) = self.day_rows.pop_front() {
                let end = raw.time_end_utc();
                if end > self.end_utc {
                    self.day_rows.clear();
                    self.prices_exhausted = true;
                    return None;
                }
                if let Some(previous) = self.previous_end {
                    let skip = if self.config.is_custom_data || self.config.resolution == Resolution::Tick {
                        end < previous
                    } else {
                        end <= previous
                    };
                    if skip {
                        continue;
                    }
                }
                let raw_close = raw.value();
                if end < self.start_utc {
                    self.previous_end = Some(end);
                    self.previous_raw_close = Some(raw_close);
                    continue;
                }
                let mut datum = raw;
                self.apply_normalization(&mut datum);
                self.previous_end = Some(end);
                self.previous_raw_close = Some(raw_close);
                self.previous_value = Some(datum.value());
                return Some(datum);
            }
            if !self.advance_date() {
                self.prices_exhausted = true;
                return None;
            }
        }
    }
}

impl Iterator for SubscriptionDataReader {
    type Item = BaseDataEnum;

    fn next(&mut self) -> Option<BaseDataEnum> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(front_time) = self.aux_queue.front().map(|aux| aux.time_end_utc()) {
                let emit = match (&self.pending, self.prices_exhausted) {
                    (Some(pending), _) => front_time < pending.time_end_utc(),
                    (None, true) => true,
                    (None, false) => false,
                };
                if emit {
                    return self.aux_queue.pop_front();
                }
            }
            if let Some(datum) = self.pending.take() {
                return Some(datum);
            }
            if self.prices_exhausted {
                if self.aux_queue.is_empty() {
                    self.finished = true;
                    return None;
                }
                continue;
            }
            match self.advance_price() {
                Some(datum) => self.pending = Some(datum),
                None => {
                    // one more date pass may have queued auxiliary data
                    continue;
                }
            }
        }
    }
}
