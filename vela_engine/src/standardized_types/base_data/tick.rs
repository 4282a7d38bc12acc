use std::fmt;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::enums::TickKind;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::{Price, Volume};

/// A single trade or quote in a financial market.
///
/// # Parameters
/// 1. `symbol` - The symbol of the asset.
/// 2. `kind` - Trade ticks carry `price`/`volume`, quote ticks carry the bid/ask sides.
/// 3. `time` - The time the tick was recorded, UTC.
/// 4. `exchange` - The venue code the tick printed on.
/// 5. `sale_condition` - Raw condition flags from the feed.
/// 6. `suspicious` - Marked by the vendor, excluded from price updates by filtered subscriptions.
#[derive(Clone, PartialEq, Debug)]
pub struct Tick {
    pub symbol: Symbol,
    pub kind: TickKind,
    pub price: Price,
    pub bid_price: Price,
    pub ask_price: Price,
    pub bid_size: Volume,
    pub ask_size: Volume,
    pub volume: Volume,
    pub exchange: String,
    pub sale_condition: String,
    pub suspicious: bool,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn trade(
        symbol: Symbol,
        price: Price,
        volume: Volume,
        exchange: String,
        sale_condition: String,
        suspicious: bool,
        time: DateTime<Utc>,
    ) -> Self {
        Tick {
            symbol,
            kind: TickKind::Trade,
            price,
            bid_price: Decimal::ZERO,
            ask_price: Decimal::ZERO,
            bid_size: Decimal::ZERO,
            ask_size: Decimal::ZERO,
            volume,
            exchange,
            sale_condition,
            suspicious,
            time,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn quote(
        symbol: Symbol,
        bid_price: Price,
        bid_size: Volume,
        ask_price: Price,
        ask_size: Volume,
        exchange: String,
        suspicious: bool,
        time: DateTime<Utc>,
    ) -> Self {
        // mid price where both sides are present, else the populated side
        let price = if bid_price > Decimal::ZERO && ask_price > Decimal::ZERO {
            (bid_price + ask_price) / Decimal::TWO
        } else if bid_price > Decimal::ZERO {
            bid_price
        } else {
            ask_price
        };
        Tick {
            symbol,
            kind: TickKind::Quote,
            price,
            bid_price,
            ask_price,
            bid_size,
            ask_size,
            volume: Decimal::ZERO,
            exchange,
            sale_condition: String::new(),
            suspicious,
            time,
        }
    }
}

impl BaseData for Tick {
    fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    fn time_utc(&self) -> DateTime<Utc> {
        self.time
    }

    fn time_end_utc(&self) -> DateTime<Utc> {
        self.time
    }

    fn value(&self) -> Price {
        self.price
    }

    fn resolution(&self) -> Resolution {
        Resolution::Tick
    }
}

impl Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TickKind::Trade => write!(f, "{}: {} x {} @ {}", self.symbol.name, self.price, self.volume, self.time),
            TickKind::Quote => write!(
                f,
                "{}: bid {} x {}, ask {} x {} @ {}",
                self.symbol.name, self.bid_price, self.bid_size, self.ask_price, self.ask_size, self.time
            ),
        }
    }
}
