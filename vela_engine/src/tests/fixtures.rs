use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::America::New_York;
use rust_decimal::Decimal;
use zip::write::SimpleFileOptions;

use crate::collections::memoizer::MemoizedEnumerable;
use crate::database::paths::{relative_zip_path, zip_entry_name};
use crate::market_maps::factor_files::FactorFile;
use crate::market_maps::map_files::MapFile;
use crate::standardized_types::base_data::base_data_type::BaseDataType;
use crate::standardized_types::enums::{NormalizationMode, SecurityType, TickKind};
use crate::standardized_types::market_hours::usa_equity_entry;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol};
use crate::strategies::feeds::subscription_reader::{
    NullSignalSink, SharedTradingCalendar, SubscriptionDataReader,
};

pub fn equity_symbol(name: &str) -> Symbol {
    Symbol::new(name, SecurityType::Equity, "usa")
}

pub fn minute_config(name: &str, normalization: NormalizationMode) -> Arc<SubscriptionConfig> {
    Arc::new(SubscriptionConfig::new(
        equity_symbol(name),
        BaseDataType::TradeBars,
        Resolution::Minute,
        New_York,
        New_York,
        false,
        false,
        false,
        false,
        true,
        TickKind::Trade,
        normalization,
    ))
}

/// One scaled minute bar row: `millis,open,high,low,close,volume` with
/// prices as `round(price x 10000)`.
pub fn minute_row(millis: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: i64) -> String {
    let scale = |price: Decimal| (price * Decimal::from(10_000)).round();
    format!(
        "{},{},{},{},{},{}",
        millis,
        scale(open),
        scale(high),
        scale(low),
        scale(close),
        volume
    )
}

/// Writes one zipped day source for the config under `data_dir`.
pub fn write_day_source(data_dir: &Path, config: &SubscriptionConfig, date: NaiveDate, rows: &[String]) {
    let mut symbol = config.symbol.clone();
    symbol.name = config.mapped_symbol();
    let relative = relative_zip_path(&symbol, config.resolution, date, config.tick_kind).unwrap();
    let entry = zip_entry_name(&symbol, config.resolution, date, config.tick_kind).unwrap();
    let path = data_dir.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer.start_file(entry, SimpleFileOptions::default()).unwrap();
    writer.write_all(rows.join("\n").as_bytes()).unwrap();
    writer.finish().unwrap();
}

/// Day source of minute bars with a constant price shape: every bar closes at
/// `base + minute_index * step`.
pub fn write_minute_day(
    data_dir: &Path,
    config: &SubscriptionConfig,
    date: NaiveDate,
    first_minute_millis: i64,
    bar_count: usize,
    base: Decimal,
    step: Decimal,
) {
    let rows: Vec<String> = (0..bar_count)
        .map(|i| {
            let close = base + step * Decimal::from(i as i64);
            minute_row(
                first_minute_millis + (i as i64) * 60_000,
                close,
                close,
                close,
                close,
                100,
            )
        })
        .collect();
    write_day_source(data_dir, config, date, &rows);
}

pub fn calendar(start: NaiveDate, finish: NaiveDate) -> SharedTradingCalendar {
    MemoizedEnumerable::new(usa_equity_entry().tradeable_dates(start, finish))
}

pub fn reader(
    config: Arc<SubscriptionConfig>,
    start: NaiveDate,
    finish: NaiveDate,
    map_file: Option<MapFile>,
    factor_file: Option<FactorFile>,
    data_dir: &Path,
) -> SubscriptionDataReader {
    let start_utc = crate::helpers::converters::date_start_utc(start, New_York);
    let end_utc = crate::helpers::converters::date_start_utc(finish + chrono::Duration::days(1), New_York);
    let calendar = calendar(start, finish);
    SubscriptionDataReader::new(
        config,
        start_utc,
        end_utc,
        &calendar,
        map_file.map(Arc::new),
        factor_file.map(Arc::new),
        data_dir.to_path_buf(),
        Arc::new(NullSignalSink),
    )
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// 09:30 New York in milliseconds since midnight.
pub const MARKET_OPEN_MILLIS: i64 = 34_200_000;
