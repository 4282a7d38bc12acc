use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::helpers::converters::convert_to_utc;
use crate::messages::engine_error::VelaError;
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::base_data_type::BaseDataType;
use crate::standardized_types::base_data::quote_bar::QuoteBar;
use crate::standardized_types::base_data::tick::Tick;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::enums::{SecurityType, TickKind};
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::SubscriptionConfig;

/// Scaled price columns store `round(price x 10000)`.
fn scaled_price(field: &str) -> Result<Decimal, VelaError> {
    let raw: i64 = field
        .trim()
        .parse()
        .map_err(|_| VelaError::ReaderError(format!("Invalid scaled price: {}", field)))?;
    Ok(Decimal::new(raw, 4))
}

fn decimal(field: &str) -> Result<Decimal, VelaError> {
    field
        .trim()
        .parse()
        .map_err(|_| VelaError::ReaderError(format!("Invalid decimal: {}", field)))
}

fn flag(field: &str) -> bool {
    field.trim() == "1"
}

/// Sub-daily time columns are milliseconds since midnight of the file's date
/// in the data time zone. Hour and daily columns are 12 character local
/// timestamps `yyyyMMddHHmm`.
fn row_time(
    field: &str,
    config: &SubscriptionConfig,
    date_start_utc: DateTime<Utc>,
) -> Result<DateTime<Utc>, VelaError> {
    if config.resolution.is_intraday() {
        let millis: i64 = field
            .trim()
            .parse()
            .map_err(|_| VelaError::ReaderError(format!("Invalid time column: {}", field)))?;
        Ok(date_start_utc + Duration::milliseconds(millis))
    } else {
        let local = NaiveDateTime::parse_from_str(field.trim(), "%Y%m%d%H%M")
            .map_err(|_| VelaError::ReaderError(format!("Invalid time column: {}", field)))?;
        Ok(convert_to_utc(local, config.data_time_zone))
    }
}

fn field<'a>(fields: &'a [&'a str], index: usize, line: &str) -> Result<&'a str, VelaError> {
    fields
        .get(index)
        .copied()
        .ok_or_else(|| VelaError::ReaderError(format!("Short line: {}", line)))
}

/// Parses a whole day source, one datum per csv record. Individual record
/// failures are reported through `on_error` and the record is skipped.
pub fn parse_day_records(
    config: &SubscriptionConfig,
    contents: &str,
    date_start_utc: DateTime<Utc>,
    mut on_error: impl FnMut(&VelaError),
) -> Vec<BaseDataEnum> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(contents.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                on_error(&VelaError::ReaderError(error.to_string()));
                continue;
            }
        };
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let fields: Vec<&str> = record.iter().collect();
        let line = fields.join(",");
        match parse_fields(config, &fields, &line, date_start_utc) {
            Ok(datum) => rows.push(datum),
            Err(error) => on_error(&error),
        }
    }
    rows
}

/// Parses one csv line of a day source into a datum, using the subscription's
/// security type and resolution to select the row schema. `date_start_utc` is
/// midnight of the file's date in the data time zone.
pub fn parse_line(
    config: &SubscriptionConfig,
    line: &str,
    date_start_utc: DateTime<Utc>,
) -> Result<BaseDataEnum, VelaError> {
    let fields: Vec<&str> = line.split(',').collect();
    parse_fields(config, &fields, line, date_start_utc)
}

fn parse_fields(
    config: &SubscriptionConfig,
    fields: &[&str],
    line: &str,
    date_start_utc: DateTime<Utc>,
) -> Result<BaseDataEnum, VelaError> {
    match config.symbol.security_type {
        SecurityType::Equity | SecurityType::Base => parse_equity(config, fields, line, date_start_utc),
        SecurityType::Forex | SecurityType::Cfd => parse_forex(config, fields, line, date_start_utc),
        SecurityType::Option => parse_option(config, fields, line, date_start_utc),
        SecurityType::Future | SecurityType::Commodity => Err(VelaError::UnsupportedSecurityType(
            format!("No line format for security type: {}", config.symbol.security_type),
        )),
    }
}

fn parse_equity(
    config: &SubscriptionConfig,
    fields: &[&str],
    line: &str,
    date_start_utc: DateTime<Utc>,
) -> Result<BaseDataEnum, VelaError> {
    let time = row_time(field(fields, 0, line)?, config, date_start_utc)?;
    if config.resolution == Resolution::Tick {
        // millis, priceScaled, quantity, exchange, saleCondition, suspicious
        let tick = Tick::trade(
            config.symbol.clone(),
            scaled_price(field(fields, 1, line)?)?,
            decimal(field(fields, 2, line)?)?,
            field(fields, 3, line)?.trim().to_string(),
            field(fields, 4, line)?.trim().to_string(),
            flag(field(fields, 5, line)?),
            time,
        );
        return Ok(BaseDataEnum::Tick(tick));
    }
    // time, openScaled, highScaled, lowScaled, closeScaled, volume
    let bar = TradeBar::new(
        config.symbol.clone(),
        scaled_price(field(fields, 1, line)?)?,
        scaled_price(field(fields, 2, line)?)?,
        scaled_price(field(fields, 3, line)?)?,
        scaled_price(field(fields, 4, line)?)?,
        decimal(field(fields, 5, line)?)?,
        time,
        config.resolution,
    );
    Ok(BaseDataEnum::TradeBar(bar))
}

fn parse_forex(
    config: &SubscriptionConfig,
    fields: &[&str],
    line: &str,
    date_start_utc: DateTime<Utc>,
) -> Result<BaseDataEnum, VelaError> {
    let time = row_time(field(fields, 0, line)?, config, date_start_utc)?;
    if config.resolution == Resolution::Tick {
        // millis, bid, ask
        let tick = Tick::quote(
            config.symbol.clone(),
            decimal(field(fields, 1, line)?)?,
            Decimal::ZERO,
            decimal(field(fields, 2, line)?)?,
            Decimal::ZERO,
            String::new(),
            false,
            time,
        );
        return Ok(BaseDataEnum::Tick(tick));
    }
    // time, open, high, low, close (unscaled)
    let open = decimal(field(fields, 1, line)?)?;
    let high = decimal(field(fields, 2, line)?)?;
    let low = decimal(field(fields, 3, line)?)?;
    let close = decimal(field(fields, 4, line)?)?;
    if config.data_type == BaseDataType::TradeBars {
        let bar = TradeBar::new(
            config.symbol.clone(),
            open,
            high,
            low,
            close,
            Decimal::ZERO,
            time,
            config.resolution,
        );
        return Ok(BaseDataEnum::TradeBar(bar));
    }
    // the single price series carries both quoted sides
    let bar = QuoteBar::new(
        config.symbol.clone(),
        open,
        high,
        low,
        close,
        open,
        high,
        low,
        close,
        time,
        config.resolution,
    );
    Ok(BaseDataEnum::QuoteBar(bar))
}

fn parse_option(
    config: &SubscriptionConfig,
    fields: &[&str],
    line: &str,
    date_start_utc: DateTime<Utc>,
) -> Result<BaseDataEnum, VelaError> {
    let time = row_time(field(fields, 0, line)?, config, date_start_utc)?;
    if config.resolution == Resolution::Tick {
        return match config.tick_kind {
            // millis, lastScaled, quantity, exchange, saleCondition, suspicious
            TickKind::Trade => {
                let tick = Tick::trade(
                    config.symbol.clone(),
                    scaled_price(field(fields, 1, line)?)?,
                    decimal(field(fields, 2, line)?)?,
                    field(fields, 3, line)?.trim().to_string(),
                    field(fields, 4, line)?.trim().to_string(),
                    flag(field(fields, 5, line)?),
                    time,
                );
                Ok(BaseDataEnum::Tick(tick))
            }
            // millis, bidScaled, bidSize, askScaled, askSize, exchange, suspicious
            TickKind::Quote => {
                let tick = Tick::quote(
                    config.symbol.clone(),
                    scaled_price(field(fields, 1, line)?)?,
                    decimal(field(fields, 2, line)?)?,
                    scaled_price(field(fields, 3, line)?)?,
                    decimal(field(fields, 4, line)?)?,
                    field(fields, 5, line)?.trim().to_string(),
                    flag(field(fields, 6, line)?),
                    time,
                );
                Ok(BaseDataEnum::Tick(tick))
            }
        };
    }
    // bars share the scaled equity format
    parse_equity(config, fields, line, date_start_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standardized_types::base_data::traits::BaseData;
    use crate::standardized_types::enums::NormalizationMode;
    use crate::standardized_types::subscriptions::Symbol;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use rust_decimal_macros::dec;

    fn equity_config(resolution: Resolution) -> SubscriptionConfig {
        SubscriptionConfig::new(
            Symbol::new("FOO", SecurityType::Equity, "usa"),
            if resolution == Resolution::Tick { BaseDataType::Ticks } else { BaseDataType::TradeBars },
            resolution,
            New_York,
            New_York,
            false,
            false,
            false,
            false,
            true,
            TickKind::Trade,
            NormalizationMode::Raw,
        )
    }

    fn day_start() -> DateTime<Utc> {
        // midnight 2020-01-02 New York in UTC
        Utc.with_ymd_and_hms(2020, 1, 2, 5, 0, 0).unwrap()
    }

    #[test]
    fn equity_minute_bar_line() {
        let config = equity_config(Resolution::Minute);
        // 09:30 local = 34200000 millis since midnight
        let datum = parse_line(&config, "34200000,1000000,1010000,995000,1005000,12345", day_start()).unwrap();
        match datum {
            BaseDataEnum::TradeBar(bar) => {
                assert_eq!(bar.open, dec!(100));
                assert_eq!(bar.high, dec!(101));
                assert_eq!(bar.low, dec!(99.5));
                assert_eq!(bar.close, dec!(100.5));
                assert_eq!(bar.volume, dec!(12345));
                assert_eq!(bar.time, Utc.with_ymd_and_hms(2020, 1, 2, 14, 30, 0).unwrap());
                assert_eq!(bar.time_end_utc(), Utc.with_ymd_and_hms(2020, 1, 2, 14, 31, 0).unwrap());
            }
            other => panic!("expected trade bar, got {}", other),
        }
    }

    #[test]
    fn equity_tick_line() {
        let config = equity_config(Resolution::Tick);
        let datum = parse_line(&config, "34200000,1000050,300,P,@,1", day_start()).unwrap();
        match datum {
            BaseDataEnum::Tick(tick) => {
                assert_eq!(tick.price, dec!(100.005));
                assert_eq!(tick.volume, dec!(300));
                assert_eq!(tick.exchange, "P");
                assert!(tick.suspicious);
            }
            other => panic!("expected tick, got {}", other),
        }
    }

    #[test]
    fn daily_bar_uses_timestamp_column() {
        let config = equity_config(Resolution::Daily);
        let datum = parse_line(&config, "202001020000,1000000,1010000,995000,1005000,55", day_start()).unwrap();
        assert_eq!(datum.time_utc(), Utc.with_ymd_and_hms(2020, 1, 2, 5, 0, 0).unwrap());
    }

    #[test]
    fn forex_quote_bar_line() {
        let config = SubscriptionConfig::new(
            Symbol::new("EURUSD", SecurityType::Forex, "oanda"),
            BaseDataType::QuoteBars,
            Resolution::Minute,
            chrono_tz::UTC,
            chrono_tz::UTC,
            false,
            false,
            false,
            false,
            true,
            TickKind::Quote,
            NormalizationMode::Raw,
        );
        let day = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let datum = parse_line(&config, "60000,1.1000,1.1010,1.0990,1.1005", day).unwrap();
        match datum {
            BaseDataEnum::QuoteBar(bar) => {
                assert_eq!(bar.bid_close, dec!(1.1005));
                assert_eq!(bar.ask_close, dec!(1.1005));
                assert_eq!(bar.time, day + Duration::minutes(1));
            }
            other => panic!("expected quote bar, got {}", other),
        }
    }

    #[test]
    fn short_line_is_reader_error() {
        let config = equity_config(Resolution::Minute);
        let error = parse_line(&config, "34200000,1000000", day_start()).unwrap_err();
        assert!(matches!(error, VelaError::ReaderError(_)));
    }
}
