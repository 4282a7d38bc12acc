use std::path::PathBuf;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::messages::engine_error::VelaError;
use crate::standardized_types::enums::{SecurityType, TickKind};
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::{OptionContractSpec, Symbol};

/// Strike prices are serialised as `round(price x 10000)`.
fn strike_scaled(strike: Decimal) -> String {
    (strike * dec!(10000)).round().to_string()
}

fn supported(security_type: SecurityType) -> Result<(), VelaError> {
    match security_type {
        SecurityType::Future | SecurityType::Commodity => Err(VelaError::UnsupportedSecurityType(
            format!("No data format for security type: {}", security_type),
        )),
        _ => Ok(()),
    }
}

fn option_spec(symbol: &Symbol) -> Result<&OptionContractSpec, VelaError> {
    symbol.option.as_ref().ok_or_else(|| {
        VelaError::EngineErrorDebug(format!("Option symbol without contract spec: {}", symbol))
    })
}

/// Relative path of the zip holding data for (symbol, resolution, date).
/// Hour and daily files cover all dates, the `date` is ignored for them.
pub fn relative_zip_path(
    symbol: &Symbol,
    resolution: Resolution,
    date: NaiveDate,
    tick_kind: TickKind,
) -> Result<PathBuf, VelaError> {
    supported(symbol.security_type)?;
    let security_type = symbol.security_type.to_string();
    let market = symbol.market.to_lowercase();
    let res = resolution.to_path_string();

    if symbol.security_type == SecurityType::Option {
        let spec = option_spec(symbol)?;
        let underlying = spec.underlying.to_lowercase();
        let file = if resolution.is_intraday() {
            format!("{}/{}_{}_{}.zip", underlying, date.format("%Y%m%d"), tick_kind, spec.style)
        } else {
            format!("{}_{}_{}.zip", underlying, tick_kind, spec.style)
        };
        return Ok(PathBuf::from(format!("{}/{}/{}/{}", security_type, market, res, file)));
    }

    let ticker = symbol.name.to_lowercase();
    let file = if resolution.is_intraday() {
        format!("{}/{}_{}.zip", ticker, date.format("%Y%m%d"), tick_kind)
    } else {
        format!("{}.zip", ticker)
    };
    Ok(PathBuf::from(format!("{}/{}/{}/{}", security_type, market, res, file)))
}

/// Name of the csv entry inside the zip for (symbol, resolution, date).
pub fn zip_entry_name(
    symbol: &Symbol,
    resolution: Resolution,
    date: NaiveDate,
    tick_kind: TickKind,
) -> Result<String, VelaError> {
    supported(symbol.security_type)?;

    if symbol.security_type == SecurityType::Option {
        let spec = option_spec(symbol)?;
        let underlying = spec.underlying.to_lowercase();
        let contract_part = format!(
            "{}_{}_{}_{}_{}",
            tick_kind,
            spec.style,
            spec.right,
            strike_scaled(spec.strike),
            spec.expiry.format("%Y%m%d")
        );
        return Ok(if resolution.is_intraday() {
            format!(
                "{}_{}_{}_{}.csv",
                date.format("%Y%m%d"),
                underlying,
                resolution.to_path_string(),
                contract_part
            )
        } else {
            format!("{}_{}.csv", underlying, contract_part)
        });
    }

    let ticker = symbol.name.to_lowercase();
    Ok(if resolution.is_intraday() {
        format!(
            "{}_{}_{}_{}.csv",
            date.format("%Y%m%d"),
            ticker,
            resolution.to_path_string(),
            tick_kind
        )
    } else {
        format!("{}.csv", ticker)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standardized_types::enums::{OptionRight, OptionStyle};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()
    }

    #[test]
    fn equity_minute_paths() {
        let symbol = Symbol::new("FOO", SecurityType::Equity, "usa");
        let path = relative_zip_path(&symbol, Resolution::Minute, date(), TickKind::Trade).unwrap();
        assert_eq!(path, PathBuf::from("equity/usa/minute/foo/20200102_trade.zip"));
        let entry = zip_entry_name(&symbol, Resolution::Minute, date(), TickKind::Trade).unwrap();
        assert_eq!(entry, "20200102_foo_minute_trade.csv");
    }

    #[test]
    fn equity_daily_paths() {
        let symbol = Symbol::new("FOO", SecurityType::Equity, "usa");
        let path = relative_zip_path(&symbol, Resolution::Daily, date(), TickKind::Trade).unwrap();
        assert_eq!(path, PathBuf::from("equity/usa/daily/foo.zip"));
        let entry = zip_entry_name(&symbol, Resolution::Daily, date(), TickKind::Trade).unwrap();
        assert_eq!(entry, "foo.csv");
    }

    #[test]
    fn option_minute_paths() {
        let spec = OptionContractSpec {
            underlying: "FOO".to_string(),
            style: OptionStyle::American,
            right: OptionRight::Call,
            strike: dec!(123),
            expiry: NaiveDate::from_ymd_opt(2020, 6, 19).unwrap(),
        };
        let symbol = Symbol::option_contract("usa", spec);
        let path = relative_zip_path(&symbol, Resolution::Minute, date(), TickKind::Quote).unwrap();
        assert_eq!(path, PathBuf::from("option/usa/minute/foo/20200102_quote_american.zip"));
        let entry = zip_entry_name(&symbol, Resolution::Minute, date(), TickKind::Quote).unwrap();
        assert_eq!(entry, "20200102_foo_minute_quote_american_call_1230000_20200619.csv");
    }

    #[test]
    fn option_daily_paths() {
        let spec = OptionContractSpec {
            underlying: "FOO".to_string(),
            style: OptionStyle::European,
            right: OptionRight::Put,
            strike: dec!(45.5),
            expiry: NaiveDate::from_ymd_opt(2020, 6, 19).unwrap(),
        };
        let symbol = Symbol::option_contract("usa", spec);
        let path = relative_zip_path(&symbol, Resolution::Daily, date(), TickKind::Trade).unwrap();
        assert_eq!(path, PathBuf::from("option/usa/daily/foo_trade_european.zip"));
        let entry = zip_entry_name(&symbol, Resolution::Daily, date(), TickKind::Trade).unwrap();
        assert_eq!(entry, "foo_trade_european_put_455000_20200619.csv");
    }

    #[test]
    fn futures_are_rejected() {
        let symbol = Symbol::new("ES", SecurityType::Future, "cme");
        assert_eq!(
            relative_zip_path(&symbol, Resolution::Minute, date(), TickKind::Trade),
            Err(VelaError::UnsupportedSecurityType(
                "No data format for security type: future".to_string()
            ))
        );
        assert!(zip_entry_name(&symbol, Resolution::Minute, date(), TickKind::Trade).is_err());
    }
}
