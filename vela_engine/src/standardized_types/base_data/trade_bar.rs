use std::fmt;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};

use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::{Price, Volume};

/// One bar of traded prices over a single resolution period.
///
/// # Fields
///
/// - `symbol`: The trading symbol of the asset.
/// - `open`/`high`/`low`/`close`: Prices over the period.
/// - `volume`: The trading volume over the period.
/// - `time`: The opening time of the bar, UTC. The bar ends one resolution period later.
/// - `resolution`: The resolution of the bar.
/// - `is_fill_forward`: Synthesised by the fill forward stage, carries the previous close.
#[derive(Clone, PartialEq, Debug)]
pub struct TradeBar {
    pub symbol: Symbol,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Volume,
    pub time: DateTime<Utc>,
    pub resolution: Resolution,
    pub is_fill_forward: bool,
}

impl TradeBar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Volume,
        time: DateTime<Utc>,
        resolution: Resolution,
    ) -> Self {
        TradeBar {
            symbol,
            open,
            high,
            low,
            close,
            volume,
            time,
            resolution,
            is_fill_forward: false,
        }
    }

    /// A synthetic continuation bar at `time` carrying the previous close.
    pub fn fill_forward(previous: &TradeBar, time: DateTime<Utc>) -> Self {
        TradeBar {
            symbol: previous.symbol.clone(),
            open: previous.close,
            high: previous.close,
            low: previous.close,
            close: previous.close,
            volume: Volume::ZERO,
            time,
            resolution: previous.resolution,
            is_fill_forward: true,
        }
    }
}

impl BaseData for TradeBar {
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
        self.close
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Display for TradeBar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}, {}, {}, {}, {}, {}, {}",
            self.symbol.name, self.resolution, self.open, self.high, self.low, self.close, self.volume, self.time
        )
    }
}
