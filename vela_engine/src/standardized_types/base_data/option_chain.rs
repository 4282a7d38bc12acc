use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::standardized_types::base_data::quote_bar::QuoteBar;
use crate::standardized_types::base_data::tick::Tick;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::enums::TickKind;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::{Price, Volume};

/// One listed contract inside an option chain, assembled by the time slice
/// builder from whatever ticks and bars arrived for the contract's symbol.
#[derive(Clone, PartialEq, Debug)]
pub struct OptionContract {
    pub symbol: Symbol,
    pub last_price: Price,
    pub bid_price: Price,
    pub bid_size: Volume,
    pub ask_price: Price,
    pub ask_size: Volume,
    pub underlying_last_price: Price,
}

impl OptionContract {
    pub fn new(symbol: Symbol) -> Self {
        OptionContract {
            symbol,
            last_price: Decimal::ZERO,
            bid_price: Decimal::ZERO,
            bid_size: Decimal::ZERO,
            ask_price: Decimal::ZERO,
            ask_size: Decimal::ZERO,
            underlying_last_price: Decimal::ZERO,
        }
    }

    /// Trade ticks refresh the last price, quote ticks the posted sides.
    pub fn update_with_tick(&mut self, tick: &Tick) {
        match tick.kind {
            TickKind::Trade => {
                self.last_price = tick.price;
            }
            TickKind::Quote => {
                if tick.bid_price > Decimal::ZERO {
                    self.bid_price = tick.bid_price;
                    self.bid_size = tick.bid_size;
                }
                if tick.ask_price > Decimal::ZERO {
                    self.ask_price = tick.ask_price;
                    self.ask_size = tick.ask_size;
                }
            }
        }
    }

    pub fn update_with_quote_bar(&mut self, bar: &QuoteBar) {
        if bar.bid_close > Decimal::ZERO {
            self.bid_price = bar.bid_close;
            self.bid_size = bar.bid_size;
        }
        if bar.ask_close > Decimal::ZERO {
            self.ask_price = bar.ask_close;
            self.ask_size = bar.ask_size;
        }
    }

    pub fn update_with_trade_bar(&mut self, bar: &TradeBar) {
        self.last_price = bar.close;
    }
}

/// All contracts of one underlying observed in a single time slice, keyed by
/// the canonical symbol synthesised from the underlying.
#[derive(Clone, PartialEq, Debug)]
pub struct OptionChain {
    pub canonical_symbol: Symbol,
    pub underlying: Symbol,
    pub time: DateTime<Utc>,
    pub underlying_last_price: Price,
    pub contracts: BTreeMap<Symbol, OptionContract>,
    /// Contracts selected by the universe filter, when a filter ran this slice.
    pub filtered_contracts: Vec<Symbol>,
}

impl OptionChain {
    pub fn new(underlying: Symbol, time: DateTime<Utc>) -> Self {
        let canonical_symbol = Symbol::canonical_option(&underlying.name, &underlying.market);
        OptionChain {
            canonical_symbol,
            underlying,
            time,
            underlying_last_price: Decimal::ZERO,
            contracts: BTreeMap::new(),
            filtered_contracts: Vec::new(),
        }
    }

    pub fn contract_mut(&mut self, symbol: &Symbol) -> &mut OptionContract {
        self.contracts
            .entry(symbol.clone())
            .or_insert_with(|| OptionContract::new(symbol.clone()))
    }
}
