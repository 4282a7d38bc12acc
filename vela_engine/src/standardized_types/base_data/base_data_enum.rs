use std::fmt;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};

use crate::standardized_types::base_data::auxiliary::{Delisting, Dividend, Split, SymbolChangedEvent};
use crate::standardized_types::base_data::base_data_type::BaseDataType;
use crate::standardized_types::base_data::quote_bar::QuoteBar;
use crate::standardized_types::base_data::tick::Tick;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::base_data::universe::UniverseCollection;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::Price;

/// The tagged variant over every kind of datum the pipeline carries.
/// Price variants flow into securities and consolidators, auxiliary variants
/// are routed into their own slice dictionaries, universe collections are
/// consumed during slice assembly.
#[derive(Clone, PartialEq, Debug)]
pub enum BaseDataEnum {
    Tick(Tick),
    TradeBar(TradeBar),
    QuoteBar(QuoteBar),
    Split(Split),
    Dividend(Dividend),
    Delisting(Delisting),
    SymbolChanged(SymbolChangedEvent),
    UniverseCollection(UniverseCollection),
}

impl BaseDataEnum {
    /// Links `BaseDataEnum` to a `BaseDataType`
    pub fn base_data_type(&self) -> BaseDataType {
        match self {
            BaseDataEnum::Tick(_) => BaseDataType::Ticks,
            BaseDataEnum::TradeBar(_) => BaseDataType::TradeBars,
            BaseDataEnum::QuoteBar(_) => BaseDataType::QuoteBars,
            BaseDataEnum::Split(_)
            | BaseDataEnum::Dividend(_)
            | BaseDataEnum::Delisting(_)
            | BaseDataEnum::SymbolChanged(_) => BaseDataType::Auxiliary,
            BaseDataEnum::UniverseCollection(_) => BaseDataType::UniverseCollections,
        }
    }

    pub fn is_auxiliary(&self) -> bool {
        self.base_data_type() == BaseDataType::Auxiliary
    }

    /// Price data updates securities and consolidators, auxiliary and
    /// universe data does not.
    pub fn is_price_data(&self) -> bool {
        matches!(
            self,
            BaseDataEnum::Tick(_) | BaseDataEnum::TradeBar(_) | BaseDataEnum::QuoteBar(_)
        )
    }
}

impl BaseData for BaseDataEnum {
    fn symbol(&self) -> &Symbol {
        match self {
            BaseDataEnum::Tick(tick) => &tick.symbol,
            BaseDataEnum::TradeBar(bar) => &bar.symbol,
            BaseDataEnum::QuoteBar(bar) => &bar.symbol,
            BaseDataEnum::Split(split) => &split.symbol,
            BaseDataEnum::Dividend(dividend) => &dividend.symbol,
            BaseDataEnum::Delisting(delisting) => &delisting.symbol,
            BaseDataEnum::SymbolChanged(changed) => &changed.symbol,
            BaseDataEnum::UniverseCollection(collection) => &collection.symbol,
        }
    }

    fn time_utc(&self) -> DateTime<Utc> {
        match self {
            BaseDataEnum::Tick(tick) => tick.time,
            BaseDataEnum::TradeBar(bar) => bar.time,
            BaseDataEnum::QuoteBar(bar) => bar.time,
            BaseDataEnum::Split(split) => split.time,
            BaseDataEnum::Dividend(dividend) => dividend.time,
            BaseDataEnum::Delisting(delisting) => delisting.time,
            BaseDataEnum::SymbolChanged(changed) => changed.time,
            BaseDataEnum::UniverseCollection(collection) => collection.time,
        }
    }

    fn time_end_utc(&self) -> DateTime<Utc> {
        match self {
            BaseDataEnum::TradeBar(bar) => bar.time_end_utc(),
            BaseDataEnum::QuoteBar(bar) => bar.time_end_utc(),
            _ => self.time_utc(),
        }
    }

    fn value(&self) -> Price {
        match self {
            BaseDataEnum::Tick(tick) => tick.price,
            BaseDataEnum::TradeBar(bar) => bar.close,
            BaseDataEnum::QuoteBar(bar) => bar.close(),
            BaseDataEnum::Split(split) => split.reference_price,
            BaseDataEnum::Dividend(dividend) => dividend.distribution,
            BaseDataEnum::Delisting(_) => Price::ZERO,
            BaseDataEnum::SymbolChanged(_) => Price::ZERO,
            BaseDataEnum::UniverseCollection(_) => Price::ZERO,
        }
    }

    fn resolution(&self) -> Resolution {
        match self {
            BaseDataEnum::Tick(_) => Resolution::Tick,
            BaseDataEnum::TradeBar(bar) => bar.resolution,
            BaseDataEnum::QuoteBar(bar) => bar.resolution,
            _ => Resolution::Daily,
        }
    }
}

impl Display for BaseDataEnum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BaseDataEnum::Tick(tick) => write!(f, "{}", tick),
            BaseDataEnum::TradeBar(bar) => write!(f, "{}", bar),
            BaseDataEnum::QuoteBar(bar) => write!(f, "{}", bar),
            BaseDataEnum::Split(split) => write!(f, "{}", split),
            BaseDataEnum::Dividend(dividend) => write!(f, "{}", dividend),
            BaseDataEnum::Delisting(delisting) => write!(f, "{}", delisting),
            BaseDataEnum::SymbolChanged(changed) => write!(f, "{}", changed),
            BaseDataEnum::UniverseCollection(collection) => {
                write!(f, "Universe {}: {} items at {}", collection.symbol.name, collection.data.len(), collection.time)
            }
        }
    }
}
