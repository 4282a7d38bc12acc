use std::fmt;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::{Price, Volume};

pub type OrderId = String;

/// Cancel reason attached to orders cancelled because their ticker was renamed.
pub const SYMBOL_CHANGED_CANCEL_REASON: &str = "Open order cancelled on symbol changed event";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum OrderType {
    Market,
    MarketOnClose,
    Limit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum OrderStatus {
    New,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Invalid,
}

impl OrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::Submitted | OrderStatus::PartiallyFilled)
    }
}

/// A request to trade. Quantity is signed, negative sells.
#[derive(Clone, PartialEq, Debug)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub quantity: Volume,
    pub order_type: OrderType,
    pub limit_price: Option<Price>,
    pub status: OrderStatus,
    pub time: DateTime<Utc>,
    pub tag: String,
}

impl Order {
    pub fn market(symbol: Symbol, quantity: Volume, time: DateTime<Utc>, tag: impl Into<String>) -> Self {
        Order {
            id: Uuid::new_v4().to_string(),
            symbol,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            status: OrderStatus::New,
            time,
            tag: tag.into(),
        }
    }

    pub fn market_on_close(symbol: Symbol, quantity: Volume, time: DateTime<Utc>, tag: impl Into<String>) -> Self {
        Order {
            order_type: OrderType::MarketOnClose,
            ..Order::market(symbol, quantity, time, tag)
        }
    }

    pub fn limit(
        symbol: Symbol,
        quantity: Volume,
        limit_price: Price,
        time: DateTime<Utc>,
        tag: impl Into<String>,
    ) -> Self {
        Order {
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            ..Order::market(symbol, quantity, time, tag)
        }
    }

    /// Split adjustment: a 2-for-1 split (factor 0.5) doubles the quantity and
    /// halves the limit price, keeping the order's notional unchanged.
    pub fn apply_split(&mut self, split_factor: Decimal) {
        if split_factor <= Decimal::ZERO {
            return;
        }
        self.quantity /= split_factor;
        if let Some(price) = self.limit_price.as_mut() {
            *price *= split_factor;
        }
    }
}

impl Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} x {} ({:?})",
            self.order_type, self.symbol.name, self.quantity, self.status
        )
    }
}

/// The transaction handler's view of a working order, polled by the manager
/// loop's delisting sweep.
#[derive(Clone, PartialEq, Debug)]
pub struct OrderTicket {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub quantity: Volume,
    pub quantity_filled: Volume,
    pub average_fill_price: Price,
    pub status: OrderStatus,
}

impl OrderTicket {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standardized_types::enums::SecurityType;
    use rust_decimal_macros::dec;

    #[test]
    fn split_adjustment_preserves_notional() {
        let symbol = Symbol::new("FOO", SecurityType::Equity, "usa");
        let mut order = Order::limit(symbol, dec!(10), dec!(100), Utc::now(), "");
        order.apply_split(dec!(0.5));
        assert_eq!(order.quantity, dec!(20));
        assert_eq!(order.limit_price, Some(dec!(50)));
    }

    #[test]
    fn open_statuses() {
        assert!(OrderStatus::Submitted.is_open());
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(!OrderStatus::Filled.is_open());
        assert!(!OrderStatus::Canceled.is_open());
    }
}
