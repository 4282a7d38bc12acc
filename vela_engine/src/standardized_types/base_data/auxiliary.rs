use std::fmt;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::standardized_types::enums::DelistingPhase;
use crate::standardized_types::subscriptions::{Symbol, SymbolName};
use crate::standardized_types::Price;

/// A stock split. `split_factor` is the raw factor from the factor file, a
/// 2-for-1 split carries 0.5. `reference_price` is the close of the last bar
/// before the split took effect.
#[derive(Clone, PartialEq, Debug)]
pub struct Split {
    pub symbol: Symbol,
    pub time: DateTime<Utc>,
    pub reference_price: Price,
    pub split_factor: Decimal,
}

impl Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Split {}: factor {} reference {}", self.symbol.name, self.split_factor, self.reference_price)
    }
}

/// A cash dividend. `distribution` is the per-share payout derived from the
/// factor file price ratio and the previous close.
#[derive(Clone, PartialEq, Debug)]
pub struct Dividend {
    pub symbol: Symbol,
    pub time: DateTime<Utc>,
    pub distribution: Price,
    pub reference_price: Price,
}

impl Display for Dividend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dividend {}: {} per share", self.symbol.name, self.distribution)
    }
}

/// Delisting notice. The warning fires on the map file's delisting date, the
/// terminal notice the day after.
#[derive(Clone, PartialEq, Debug)]
pub struct Delisting {
    pub symbol: Symbol,
    pub time: DateTime<Utc>,
    pub phase: DelistingPhase,
}

impl Display for Delisting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delisting {}: {} at {}", self.symbol.name, self.phase, self.time)
    }
}

/// Ticker rename from the map file. The subscription keeps producing data
/// under the original symbol, the mapped name changes underneath.
#[derive(Clone, PartialEq, Debug)]
pub struct SymbolChangedEvent {
    pub symbol: Symbol,
    pub time: DateTime<Utc>,
    pub old_symbol: SymbolName,
    pub new_symbol: SymbolName,
}

impl Display for SymbolChangedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolChanged {} -> {} at {}", self.old_symbol, self.new_symbol, self.time)
    }
}
