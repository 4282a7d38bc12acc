use chrono::Duration;
use rust_decimal::Decimal;

use crate::helpers::converters::round_down;
use crate::messages::engine_error::VelaError;
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::{Price, Volume};

/// Aggregates a subscription's price data into larger period trade bars.
/// A bar closes when a datum arrives at or past its period boundary, the
/// closed bar is returned from that `update` call. The emitted bar keeps the
/// source resolution tag, its open time and the consolidator period define
/// the span it covers.
pub struct TimeConsolidator {
    period: Duration,
    current: Option<TradeBar>,
}

impl TimeConsolidator {
    pub fn new(period: Duration) -> Result<Self, VelaError> {
        if period <= Duration::zero() {
            return Err(VelaError::Configuration(format!(
                "Invalid consolidator period: {}",
                period
            )));
        }
        Ok(TimeConsolidator { period, current: None })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// The bar under construction, if any.
    pub fn working_bar(&self) -> Option<&TradeBar> {
        self.current.as_ref()
    }

    fn datum_shape(datum: &BaseDataEnum) -> Option<(Price, Price, Price, Price, Volume)> {
        match datum {
            BaseDataEnum::Tick(tick) => Some((tick.price, tick.price, tick.price, tick.price, tick.volume)),
            BaseDataEnum::TradeBar(bar) => Some((bar.open, bar.high, bar.low, bar.close, bar.volume)),
            BaseDataEnum::QuoteBar(bar) => {
                let close = bar.close();
                Some((close, close, close, close, Decimal::ZERO))
            }
            _ => None,
        }
    }

    /// Feeds one datum, returning the closed bar when the datum crossed the
    /// working bar's boundary.
    pub fn update(&mut self, datum: &BaseDataEnum) -> Option<TradeBar> {
        let (open, high, low, close, volume) = Self::datum_shape(datum)?;
        let time = datum.time_utc();
        let bar_start = round_down(time, self.period);

        let mut closed = None;
        if let Some(working) = &self.current {
            if bar_start > working.time {
                closed = self.current.take();
            }
        }

        match self.current.as_mut() {
            Some(working) => {
                if high > working.high {
                    working.high = high;
                }
                if low < working.low {
                    working.low = low;
                }
                working.close = close;
                working.volume += volume;
            }
            None => {
                let mut bar = TradeBar::new(
                    datum.symbol().clone(),
                    open,
                    high,
                    low,
                    close,
                    volume,
                    bar_start,
                    datum.resolution(),
                );
                bar.is_fill_forward = false;
                self.current = Some(bar);
            }
        }
        closed
    }

    /// Closes the working bar when `time` has passed its boundary, used on
    /// slices that carried no data for the subscription.
    pub fn scan(&mut self, time: chrono::DateTime<chrono::Utc>) -> Option<TradeBar> {
        if let Some(working) = &self.current {
            if time >= working.time + self.period {
                return self.current.take();
            }
        }
        None
    }
}
