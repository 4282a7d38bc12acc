use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::standardized_types::orders::{Order, OrderId, OrderStatus, OrderTicket, OrderType};
use crate::standardized_types::securities::Portfolio;
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol};
use crate::standardized_types::time_slices::TimeSlice;
use crate::standardized_types::Price;

/// The seam to order routing and fills. The engine drives it synchronously
/// from the manager loop, concrete brokerage adapters live behind it.
pub trait TransactionHandler: Send + Sync {
    /// The algorithm clock, forwarded once per slice before fills run.
    fn set_time(&self, _time: DateTime<Utc>) {}
    /// Drives fills for working non-market orders, called twice per slice.
    fn process_synchronous_events(&self);
    fn submit(&self, order: Order) -> OrderTicket;
    fn ticket(&self, order_id: &OrderId) -> Option<OrderTicket>;
    /// Open orders, optionally restricted to one symbol.
    fn open_orders(&self, symbol: Option<&Symbol>) -> Vec<Order>;
    /// Cancels every open order for the symbol, returns the cancelled ids.
    fn cancel_open_orders(&self, symbol: &Symbol, reason: &str) -> Vec<OrderId>;
    /// Split adjustment of working orders, live and raw data modes only.
    fn apply_split_to_open_orders(&self, symbol: &Symbol, split_factor: Decimal);
    /// The trade builder consumes the last price of each security update.
    fn update_last_price(&self, symbol: &Symbol, price: Price);
}

/// Synchronous fill model for backtests: market and market-on-close orders
/// fill at the last seen price on the next synchronous pass, limits fill when
/// the price crosses. Fills book into the shared portfolio, sale proceeds
/// optionally settle after a delay.
pub struct BacktestTransactionHandler {
    portfolio: Arc<Portfolio>,
    orders: DashMap<OrderId, Order>,
    tickets: DashMap<OrderId, OrderTicket>,
    last_prices: DashMap<Symbol, Price>,
    settlement_delay: Duration,
    clock: Mutex<DateTime<Utc>>,
}

impl BacktestTransactionHandler {
    pub fn new(portfolio: Arc<Portfolio>) -> Self {
        BacktestTransactionHandler {
            portfolio,
            orders: DashMap::new(),
            tickets: DashMap::new(),
            last_prices: DashMap::new(),
            settlement_delay: Duration::zero(),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Cash account settlement, e.g. T+3 for equities. Zero settles sales
    /// immediately (margin account behavior).
    pub fn with_settlement_delay(mut self, delay: Duration) -> Self {
        self.settlement_delay = delay;
        self
    }

    /// Every order ever submitted, fixtures and diagnostics.
    pub fn all_order_ids(&self) -> Vec<OrderId> {
        self.orders.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    pub fn set_clock(&self, time: DateTime<Utc>) {
        match self.clock.lock() {
            Ok(mut clock) => *clock = time,
            Err(poisoned) => *poisoned.into_inner() = time,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        match self.clock.lock() {
            Ok(clock) => *clock,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn fill(&self, order: &mut Order, fill_price: Price) {
        order.status = OrderStatus::Filled;
        self.portfolio.securities.update(&order.symbol, |security| {
            security.apply_fill(order.quantity, fill_price);
        });
        let notional = order.quantity * fill_price;
        let account_currency = {
            let book = match self.portfolio.cash_book.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            book.account_currency.clone()
        };
        if order.quantity > Decimal::ZERO || self.settlement_delay <= Duration::zero() {
            let mut book = match self.portfolio.cash_book.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            book.deposit(&account_currency, -notional);
        } else {
            // sale proceeds settle later
            self.portfolio
                .add_unsettled_cash(self.now() + self.settlement_delay, &account_currency, -notional);
        }
        if let Some(mut ticket) = self.tickets.get_mut(&order.id) {
            ticket.quantity_filled = order.quantity;
            ticket.average_fill_price = fill_price;
            ticket.status = OrderStatus::Filled;
        }
    }

    fn try_fill(&self, order: &mut Order) {
        let last_price = match self.last_prices.get(&order.symbol) {
            Some(price) => *price,
            None => return,
        };
        if last_price <= Decimal::ZERO {
            return;
        }
        match order.order_type {
            OrderType::Market | OrderType::MarketOnClose => self.fill(order, last_price),
            OrderType::Limit => {
                let limit = match order.limit_price {
                    Some(limit) => limit,
                    None => return,
                };
                let crossed = if order.quantity > Decimal::ZERO {
                    last_price <= limit
                } else {
                    last_price >= limit
                };
                if crossed {
                    self.fill(order, limit);
                }
            }
        }
    }
}

impl TransactionHandler for BacktestTransactionHandler {
    fn set_time(&self, time: DateTime<Utc>) {
        self.set_clock(time);
    }

    fn process_synchronous_events(&self) {
        let open_ids: Vec<OrderId> = self
            .orders
            .iter()
            .filter(|entry| entry.value().status.is_open())
            .map(|entry| entry.key().clone())
            .collect();
        for id in open_ids {
            if let Some(mut entry) = self.orders.get_mut(&id) {
                self.try_fill(entry.value_mut());
            }
        }
    }

    fn submit(&self, mut order: Order) -> OrderTicket {
        order.status = OrderStatus::Submitted;
        let ticket = OrderTicket {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            quantity: order.quantity,
            quantity_filled: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            status: OrderStatus::Submitted,
        };
        self.tickets.insert(order.id.clone(), ticket.clone());
        self.orders.insert(order.id.clone(), order);
        ticket
    }

    fn ticket(&self, order_id: &OrderId) -> Option<OrderTicket> {
        self.tickets.get(order_id).map(|entry| entry.value().clone())
    }

    fn open_orders(&self, symbol: Option<&Symbol>) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|entry| entry.value().status.is_open())
            .filter(|entry| symbol.map_or(true, |s| &entry.value().symbol == s))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn cancel_open_orders(&self, symbol: &Symbol, reason: &str) -> Vec<OrderId> {
        let mut cancelled = Vec::new();
        for mut entry in self.orders.iter_mut() {
            let order = entry.value_mut();
            if order.status.is_open() && &order.symbol == symbol {
                order.status = OrderStatus::Canceled;
                order.tag = reason.to_string();
                cancelled.push(order.id.clone());
            }
        }
        for id in &cancelled {
            if let Some(mut ticket) = self.tickets.get_mut(id) {
                ticket.status = OrderStatus::Canceled;
            }
        }
        cancelled
    }

    fn apply_split_to_open_orders(&self, symbol: &Symbol, split_factor: Decimal) {
        for mut entry in self.orders.iter_mut() {
            let order = entry.value_mut();
            if order.status.is_open() && &order.symbol == symbol {
                order.apply_split(split_factor);
                if let Some(mut ticket) = self.tickets.get_mut(&order.id) {
                    ticket.quantity = order.quantity;
                }
            }
        }
    }

    fn update_last_price(&self, symbol: &Symbol, price: Price) {
        if price > Decimal::ZERO {
            self.last_prices.insert(symbol.clone(), price);
        }
    }
}

/// Warm-up slices synthesised from historical data before live data begins.
pub trait HistoryProvider: Send + Sync {
    fn history(
        &self,
        configs: &[Arc<SubscriptionConfig>],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        algorithm_time_zone: Tz,
    ) -> Vec<TimeSlice>;
}

/// Remote control commands drained once per manager iteration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EngineCommand {
    Stop,
    Liquidate,
    Custom(String),
}

impl EngineCommand {
    pub fn name(&self) -> String {
        match self {
            EngineCommand::Stop => "stop".to_string(),
            EngineCommand::Liquidate => "liquidate".to_string(),
            EngineCommand::Custom(payload) => format!("custom:{}", payload),
        }
    }
}

pub trait CommandQueue: Send + Sync {
    fn drain(&self) -> Vec<EngineCommand>;
}

/// In-process queue, commands pushed from other threads are picked up at the
/// next iteration.
#[derive(Default)]
pub struct ChannelCommandQueue {
    inner: Mutex<VecDeque<EngineCommand>>,
}

impl ChannelCommandQueue {
    pub fn new() -> Self {
        ChannelCommandQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, command: EngineCommand) {
        match self.inner.lock() {
            Ok(mut queue) => queue.push_back(command),
            Err(poisoned) => poisoned.into_inner().push_back(command),
        }
    }
}

impl CommandQueue for ChannelCommandQueue {
    fn drain(&self) -> Vec<EngineCommand> {
        match self.inner.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standardized_types::enums::SecurityType;
    use crate::standardized_types::orders::SYMBOL_CHANGED_CANCEL_REASON;
    use crate::standardized_types::securities::Security;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::new("FOO", SecurityType::Equity, "usa")
    }

    fn handler() -> (Arc<Portfolio>, BacktestTransactionHandler) {
        let portfolio = Arc::new(Portfolio::new("USD", dec!(100_000)));
        portfolio.securities.add(Security::new(symbol()));
        let handler = BacktestTransactionHandler::new(portfolio.clone());
        (portfolio, handler)
    }

    #[test]
    fn market_orders_fill_at_last_price() {
        let (portfolio, handler) = handler();
        handler.update_last_price(&symbol(), dec!(50));
        let ticket = handler.submit(Order::market(symbol(), dec!(10), Utc::now(), ""));
        handler.process_synchronous_events();
        let ticket = handler.ticket(&ticket.order_id).unwrap();
        assert!(ticket.is_filled());
        assert_eq!(ticket.average_fill_price, dec!(50));
        let security = portfolio.securities.get(&symbol()).unwrap();
        assert_eq!(security.holdings_quantity, dec!(10));
        // cash reduced by the notional
        assert_eq!(
            portfolio.total_equity(),
            dec!(99_500) + security.holdings_quantity * security.price
        );
    }

    #[test]
    fn limit_orders_wait_for_a_cross() {
        let (_portfolio, handler) = handler();
        handler.update_last_price(&symbol(), dec!(50));
        let ticket = handler.submit(Order::limit(symbol(), dec!(10), dec!(45), Utc::now(), ""));
        handler.process_synchronous_events();
        assert!(!handler.ticket(&ticket.order_id).unwrap().is_filled());
        handler.update_last_price(&symbol(), dec!(44));
        handler.process_synchronous_events();
        let ticket = handler.ticket(&ticket.order_id).unwrap();
        assert!(ticket.is_filled());
        assert_eq!(ticket.average_fill_price, dec!(45));
    }

    #[test]
    fn cancel_open_orders_tags_the_reason() {
        let (_portfolio, handler) = handler();
        handler.submit(Order::limit(symbol(), dec!(10), dec!(45), Utc::now(), ""));
        let cancelled = handler.cancel_open_orders(&symbol(), SYMBOL_CHANGED_CANCEL_REASON);
        assert_eq!(cancelled.len(), 1);
        let order = handler.orders.get(&cancelled[0]).unwrap().clone();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.tag, SYMBOL_CHANGED_CANCEL_REASON);
        assert!(handler.open_orders(Some(&symbol())).is_empty());
    }

    #[test]
    fn split_adjusts_open_orders() {
        let (_portfolio, handler) = handler();
        handler.submit(Order::limit(symbol(), dec!(10), dec!(100), Utc::now(), ""));
        handler.apply_split_to_open_orders(&symbol(), dec!(0.5));
        let orders = handler.open_orders(Some(&symbol()));
        assert_eq!(orders[0].quantity, dec!(20));
        assert_eq!(orders[0].limit_price, Some(dec!(50)));
    }

    #[test]
    fn delayed_settlement_books_unsettled_cash() {
        let portfolio = Arc::new(Portfolio::new("USD", dec!(0)));
        portfolio.securities.add(Security::new(symbol()));
        portfolio.securities.update(&symbol(), |security| {
            security.apply_fill(dec!(10), dec!(50));
        });
        let handler =
            BacktestTransactionHandler::new(portfolio.clone()).with_settlement_delay(Duration::days(3));
        handler.set_clock(Utc::now());
        handler.update_last_price(&symbol(), dec!(50));
        handler.submit(Order::market(symbol(), dec!(-10), Utc::now(), ""));
        handler.process_synchronous_events();
        // proceeds pending settlement, not yet in the cash book
        assert_eq!(portfolio.unsettled_cash_total(), dec!(500));
    }
}
