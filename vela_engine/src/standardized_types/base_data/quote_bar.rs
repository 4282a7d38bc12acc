use std::fmt;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::{Price, Volume};

/// One bar of quoted prices, bid and ask sides tracked separately.
///
/// # Fields
///
/// - `symbol`: The trading symbol of the asset.
/// - `bid_open`..`bid_close`: The bid side over the period.
/// - `ask_open`..`ask_close`: The ask side over the period.
/// - `bid_size`/`ask_size`: Sizes at the period close.
/// - `time`: The opening time of the bar, UTC.
/// - `resolution`: The resolution of the bar.
#[derive(Clone, PartialEq, Debug)]
pub struct QuoteBar {
    pub symbol: Symbol,
    pub bid_open: Price,
    pub bid_high: Price,
    pub bid_low: Price,
    pub bid_close: Price,
    pub ask_open: Price,
    pub ask_high: Price,
    pub ask_low: Price,
    pub ask_close: Price,
    pub bid_size: Volume,
    pub ask_size: Volume,
    pub time: DateTime<Utc>,
    pub resolution: Resolution,
    pub is_fill_forward: bool,
}

impl QuoteBar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        bid_open: Price,
        bid_high: Price,
        bid_low: Price,
        bid_close: Price,
        ask_open: Price,
        ask_high: Price,
        ask_low: Price,
        ask_close: Price,
        time: DateTime<Utc>,
        resolution: Resolution,
    ) -> Self {
        QuoteBar {
            symbol,
            bid_open,
            bid_high,
            bid_low,
            bid_close,
            ask_open,
            ask_high,
            ask_low,
            ask_close,
            bid_size: Volume::ZERO,
            ask_size: Volume::ZERO,
            time,
            resolution,
            is_fill_forward: false,
        }
    }

    /// Mid of the closing bid and ask, the representative price of the bar.
    pub fn close(&self) -> Price {
        if self.bid_close > Decimal::ZERO && self.ask_close > Decimal::ZERO {
            (self.bid_close + self.ask_close) / Decimal::TWO
        } else if self.bid_close > Decimal::ZERO {
            self.bid_close
        } else {
            self.ask_close
        }
    }

    pub fn fill_forward(previous: &QuoteBar, time: DateTime<Utc>) -> Self {
        let mut bar = previous.clone();
        bar.bid_open = previous.bid_close;
        bar.bid_high = previous.bid_close;
        bar.bid_low = previous.bid_close;
        bar.ask_open = previous.ask_close;
        bar.ask_high = previous.ask_close;
        bar.ask_low = previous.ask_close;
        bar.time = time;
        bar.is_fill_forward = true;
        bar
    }
}

impl BaseData for QuoteBar {
    fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    fn time_utc(&self) -> DateTime<Utc> {
        self.time
    }

    fn time_end_utc(&self) -> DateTime<Utc> {
        self.time + self.resolution.as_duration()
    }

    fn value(&self) -> Price {
        self.close()
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Display for QuoteBar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}, bid: {}, {}, {}, {}, ask: {}, {}, {}, {}, {}",
            self.symbol.name,
            self.resolution,
            self.bid_open,
            self.bid_high,
            self.bid_low,
            self.bid_close,
            self.ask_open,
            self.ask_high,
            self.ask_low,
            self.ask_close,
            self.time
        )
    }
}
