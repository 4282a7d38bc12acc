use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use crate::standardized_types::base_data::auxiliary::{Delisting, Dividend, Split, SymbolChangedEvent};
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::option_chain::OptionChain;
use crate::standardized_types::base_data::quote_bar::QuoteBar;
use crate::standardized_types::base_data::tick::Tick;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::securities::SecurityChanges;
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol, SymbolName};

/// The data one subscription contributed to a frontier advance: every datum
/// whose end time is at or before the slice time.
#[derive(Clone, Debug)]
pub struct SubscriptionPacket {
    pub symbol: Symbol,
    pub config: Arc<SubscriptionConfig>,
    pub data: Vec<BaseDataEnum>,
}

/// The per-type view handed to user callbacks, keyed by ticker so strategies
/// index with plain strings.
#[derive(Clone, Debug, Default)]
pub struct SliceView {
    pub trade_bars: HashMap<SymbolName, TradeBar>,
    pub quote_bars: HashMap<SymbolName, QuoteBar>,
    pub ticks: HashMap<SymbolName, Vec<Tick>>,
    pub option_chains: HashMap<SymbolName, OptionChain>,
    pub splits: HashMap<SymbolName, Split>,
    pub dividends: HashMap<SymbolName, Dividend>,
    pub delistings: HashMap<SymbolName, Delisting>,
    pub symbol_changes: HashMap<SymbolName, SymbolChangedEvent>,
}

impl SliceView {
    pub fn is_empty(&self) -> bool {
        self.trade_bars.is_empty()
            && self.quote_bars.is_empty()
            && self.ticks.is_empty()
            && self.option_chains.is_empty()
            && self.splits.is_empty()
            && self.dividends.is_empty()
            && self.delistings.is_empty()
            && self.symbol_changes.is_empty()
    }
}

/// An immutable bundle of data events valid at a single UTC instant,
/// dispatched to the algorithm atomically. Assembled by the slice builder
/// from the packets the feed driver collected up to the frontier.
///
/// A slice with `data_point_count == 0` is a live heartbeat: it still moves
/// the algorithm clock and runs the scheduled scans, it just carries no data.
#[derive(Clone, Debug)]
pub struct TimeSlice {
    /// The frontier, every datum in the slice ended at or before this time.
    pub time: DateTime<Utc>,
    /// The frontier expressed in the algorithm's time zone.
    pub local_time: DateTime<FixedOffset>,
    pub data_point_count: usize,
    /// Every non-internal datum, in packet order.
    pub data: Vec<BaseDataEnum>,
    pub slice: SliceView,
    /// What to feed into each security to refresh its market price.
    pub securities_updates: Vec<(Symbol, BaseDataEnum)>,
    /// Latest price datum for each symbol backing a cash conversion rate.
    pub cash_book_updates: Vec<BaseDataEnum>,
    /// Price data routed into the consolidators registered per subscription.
    pub consolidator_updates: Vec<(Arc<SubscriptionConfig>, BaseDataEnum)>,
    /// Custom data grouped per subscription for typed dispatch.
    pub custom_data: Vec<(Arc<SubscriptionConfig>, Vec<BaseDataEnum>)>,
    pub security_changes: SecurityChanges,
}

impl TimeSlice {
    pub fn heartbeat(time: DateTime<Utc>, local_time: DateTime<FixedOffset>) -> Self {
        TimeSlice {
            time,
            local_time,
            data_point_count: 0,
            data: Vec::new(),
            slice: SliceView::default(),
            securities_updates: Vec::new(),
            cash_book_updates: Vec::new(),
            consolidator_updates: Vec::new(),
            custom_data: Vec::new(),
            security_changes: SecurityChanges::none(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.data_point_count > 0
    }
}
