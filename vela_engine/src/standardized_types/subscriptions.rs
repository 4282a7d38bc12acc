use std::fmt;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::standardized_types::base_data::base_data_type::BaseDataType;
use crate::standardized_types::enums::{NormalizationMode, OptionRight, OptionStyle, SecurityType, TickKind};
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::Price;

pub type SymbolName = String;

/// Identifies one listed option contract. Carried by option symbols so the
/// data paths and the option chain assembly can be derived from the symbol
/// alone.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct OptionContractSpec {
    pub underlying: SymbolName,
    pub style: OptionStyle,
    pub right: OptionRight,
    pub strike: Price,
    pub expiry: NaiveDate,
}

/// A tradeable identifier: ticker name, asset class and the market the data
/// was recorded on. Option contracts additionally carry their contract spec.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Symbol {
    pub name: SymbolName,
    pub security_type: SecurityType,
    pub market: String,
    pub option: Option<OptionContractSpec>,
}

impl Symbol {
    pub fn new(name: impl Into<SymbolName>, security_type: SecurityType, market: impl Into<String>) -> Self {
        Symbol {
            name: name.into().to_uppercase(),
            security_type,
            market: market.into().to_lowercase(),
            option: None,
        }
    }

    pub fn option_contract(market: impl Into<String>, spec: OptionContractSpec) -> Self {
        let name = format!(
            "{} {}{}{}",
            spec.underlying,
            spec.expiry.format("%y%m%d"),
            match spec.right {
                OptionRight::Call => "C",
                OptionRight::Put => "P",
            },
            spec.strike
        );
        Symbol {
            name,
            security_type: SecurityType::Option,
            market: market.into().to_lowercase(),
            option: Some(spec),
        }
    }

    /// The canonical chain symbol for an option underlying, synthesized so all
    /// contracts of one underlying group under a single key.
    pub fn canonical_option(underlying: &str, market: &str) -> Self {
        Symbol {
            name: format!("?{}", underlying.to_uppercase()),
            security_type: SecurityType::Option,
            market: market.to_lowercase(),
            option: None,
        }
    }

    /// For an option contract, the symbol of its underlying equity.
    pub fn underlying_symbol(&self) -> Option<Symbol> {
        self.option
            .as_ref()
            .map(|spec| Symbol::new(spec.underlying.clone(), SecurityType::Equity, self.market.clone()))
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.security_type, self.market)
    }
}

/// Identifies a single configured source of data for a symbol and resolution.
///
/// # Properties
/// * `symbol` - The symbol of the subscription.
/// * `data_type` - The base data type the source produces.
/// * `resolution` - The resolution of the subscription.
/// * `data_time_zone` - The time zone raw file times are recorded in.
/// * `exchange_time_zone` - The exchange's local time zone.
/// * `extended_market_hours` - Whether pre and post market data is included.
/// * `fill_forward` - Whether gaps are filled with synthetic bars.
/// * `is_custom_data` - User supplied data with relaxed ordering rules.
/// * `is_internal_feed` - Internal plumbing feeds are hidden from user callbacks.
/// * `is_filtered_subscription` - Whether the security data filter applies.
/// * `tick_kind` - Trade or quote files for tick and option sources.
/// * `normalization` - The price normalization the reader applies.
///
/// Two configurations are equal iff all the immutable fields above are equal.
/// The mapped symbol slot is mutable and excluded, it tracks ticker renames
/// while the subscription is alive.
#[derive(Debug)]
pub struct SubscriptionConfig {
    pub symbol: Symbol,
    pub data_type: BaseDataType,
    pub resolution: Resolution,
    pub data_time_zone: Tz,
    pub exchange_time_zone: Tz,
    pub extended_market_hours: bool,
    pub fill_forward: bool,
    pub is_custom_data: bool,
    pub is_internal_feed: bool,
    pub is_filtered_subscription: bool,
    pub tick_kind: TickKind,
    pub normalization: NormalizationMode,
    mapped_symbol: RwLock<SymbolName>,
}

impl SubscriptionConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        data_type: BaseDataType,
        resolution: Resolution,
        data_time_zone: Tz,
        exchange_time_zone: Tz,
        extended_market_hours: bool,
        fill_forward: bool,
        is_custom_data: bool,
        is_internal_feed: bool,
        is_filtered_subscription: bool,
        tick_kind: TickKind,
        normalization: NormalizationMode,
    ) -> Self {
        let mapped_symbol = RwLock::new(symbol.name.clone());
        SubscriptionConfig {
            symbol,
            data_type,
            resolution,
            data_time_zone,
            exchange_time_zone,
            extended_market_hours,
            fill_forward,
            is_custom_data,
            is_internal_feed,
            is_filtered_subscription,
            tick_kind,
            normalization,
            mapped_symbol,
        }
    }

    /// A plain market data subscription with the usual defaults.
    pub fn market_data(
        symbol: Symbol,
        data_type: BaseDataType,
        resolution: Resolution,
        data_time_zone: Tz,
        exchange_time_zone: Tz,
    ) -> Self {
        SubscriptionConfig::new(
            symbol,
            data_type,
            resolution,
            data_time_zone,
            exchange_time_zone,
            false,
            true,
            false,
            false,
            true,
            TickKind::Trade,
            NormalizationMode::default(),
        )
    }

    pub fn mapped_symbol(&self) -> SymbolName {
        match self.mapped_symbol.read() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Called by the subscription reader when the map file renames the ticker.
    pub fn set_mapped_symbol(&self, name: SymbolName) {
        match self.mapped_symbol.write() {
            Ok(mut slot) => *slot = name,
            Err(poisoned) => *poisoned.into_inner() = name,
        }
    }

    pub fn is_universe_subscription(&self) -> bool {
        self.data_type == BaseDataType::UniverseCollections
    }
}

impl Clone for SubscriptionConfig {
    fn clone(&self) -> Self {
        SubscriptionConfig {
            symbol: self.symbol.clone(),
            data_type: self.data_type,
            resolution: self.resolution,
            data_time_zone: self.data_time_zone,
            exchange_time_zone: self.exchange_time_zone,
            extended_market_hours: self.extended_market_hours,
            fill_forward: self.fill_forward,
            is_custom_data: self.is_custom_data,
            is_internal_feed: self.is_internal_feed,
            is_filtered_subscription: self.is_filtered_subscription,
            tick_kind: self.tick_kind,
            normalization: self.normalization,
            mapped_symbol: RwLock::new(self.mapped_symbol()),
        }
    }
}

impl PartialEq for SubscriptionConfig {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.data_type == other.data_type
            && self.resolution == other.resolution
            && self.data_time_zone == other.data_time_zone
            && self.exchange_time_zone == other.exchange_time_zone
            && self.extended_market_hours == other.extended_market_hours
            && self.fill_forward == other.fill_forward
            && self.is_custom_data == other.is_custom_data
            && self.is_internal_feed == other.is_internal_feed
            && self.is_filtered_subscription == other.is_filtered_subscription
            && self.tick_kind == other.tick_kind
            && self.normalization == other.normalization
    }
}

impl Eq for SubscriptionConfig {}

impl Hash for SubscriptionConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.data_type.hash(state);
        self.resolution.hash(state);
        self.data_time_zone.hash(state);
        self.exchange_time_zone.hash(state);
        self.extended_market_hours.hash(state);
        self.fill_forward.hash(state);
        self.is_custom_data.hash(state);
        self.is_internal_feed.hash(state);
        self.is_filtered_subscription.hash(state);
        self.tick_kind.hash(state);
        self.normalization.hash(state);
    }
}

impl Display for SubscriptionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.symbol, self.data_type, self.resolution)
    }
}
