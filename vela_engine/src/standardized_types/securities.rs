use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::standardized_types::base_data::auxiliary::{Dividend, Split};
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::enums::NormalizationMode;
use crate::standardized_types::orders::Order;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::{Price, Volume};

/// One registered security: the latest market price and the position held.
#[derive(Clone, Debug)]
pub struct Security {
    pub symbol: Symbol,
    pub price: Price,
    pub last_update: Option<DateTime<Utc>>,
    pub holdings_quantity: Volume,
    pub holdings_average_price: Price,
    pub leverage: Decimal,
    pub normalization: NormalizationMode,
    pub is_tradable: bool,
}

impl Security {
    pub fn new(symbol: Symbol) -> Self {
        Security {
            symbol,
            price: Decimal::ZERO,
            last_update: None,
            holdings_quantity: Decimal::ZERO,
            holdings_average_price: Decimal::ZERO,
            leverage: dec!(2),
            normalization: NormalizationMode::default(),
            is_tradable: true,
        }
    }

    /// Refresh the market price from a datum. Auxiliary data never moves the
    /// price, suspicious ticks are ignored.
    pub fn update_market_price(&mut self, datum: &BaseDataEnum) {
        if !datum.is_price_data() {
            return;
        }
        if let BaseDataEnum::Tick(tick) = datum {
            if tick.suspicious {
                return;
            }
        }
        let value = datum.value();
        if value > Decimal::ZERO {
            self.price = value;
            self.last_update = Some(datum.time_end_utc());
        }
    }

    pub fn holdings_value(&self) -> Decimal {
        self.holdings_quantity * self.price
    }

    pub fn absolute_holdings_value(&self) -> Decimal {
        self.holdings_value().abs()
    }

    pub fn has_holdings(&self) -> bool {
        self.holdings_quantity != Decimal::ZERO
    }

    /// Margin consumed by the position at the security's leverage.
    pub fn margin_used(&self) -> Decimal {
        if self.leverage <= Decimal::ZERO {
            return self.absolute_holdings_value();
        }
        self.absolute_holdings_value() / self.leverage
    }

    /// Books a fill into the position at `fill_price`.
    pub fn apply_fill(&mut self, quantity: Volume, fill_price: Price) {
        let new_quantity = self.holdings_quantity + quantity;
        if new_quantity == Decimal::ZERO {
            self.holdings_quantity = Decimal::ZERO;
            self.holdings_average_price = Decimal::ZERO;
            return;
        }
        let same_direction = self.holdings_quantity.is_sign_positive() == new_quantity.is_sign_positive()
            || self.holdings_quantity == Decimal::ZERO;
        if same_direction && self.holdings_quantity.abs() < new_quantity.abs() {
            // increasing the position, blend the average price
            let total_cost = self.holdings_average_price * self.holdings_quantity + fill_price * quantity;
            self.holdings_average_price = total_cost / new_quantity;
        } else if !same_direction {
            // flipped through zero, the remainder opens at the fill price
            self.holdings_average_price = fill_price;
        }
        self.holdings_quantity = new_quantity;
    }

    /// Split adjustment always applies to holdings, a 2-for-1 split (factor
    /// 0.5) doubles the share count and halves the basis.
    pub fn apply_split_to_holdings(&mut self, split_factor: Decimal) {
        if split_factor <= Decimal::ZERO {
            return;
        }
        self.holdings_quantity /= split_factor;
        self.holdings_average_price *= split_factor;
        if self.price > Decimal::ZERO {
            self.price *= split_factor;
        }
    }
}

impl Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} x {} @ {}", self.symbol, self.holdings_quantity, self.price, self.holdings_average_price)
    }
}

/// Lock free registry of the algorithm's securities. Written only during
/// universe change handling, read everywhere else.
#[derive(Default)]
pub struct SecurityRegistry {
    inner: DashMap<Symbol, Security>,
}

impl SecurityRegistry {
    pub fn new() -> Self {
        SecurityRegistry { inner: DashMap::new() }
    }

    pub fn add(&self, security: Security) {
        self.inner.entry(security.symbol.clone()).or_insert(security);
    }

    pub fn remove(&self, symbol: &Symbol) -> Option<Security> {
        self.inner.remove(symbol).map(|(_, security)| security)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.inner.contains_key(symbol)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Security> {
        self.inner.get(symbol).map(|entry| entry.clone())
    }

    pub fn update<F: FnOnce(&mut Security)>(&self, symbol: &Symbol, f: F) {
        if let Some(mut entry) = self.inner.get_mut(symbol) {
            f(entry.value_mut());
        }
    }

    pub fn update_market_price(&self, symbol: &Symbol, datum: &BaseDataEnum) {
        self.update(symbol, |security| security.update_market_price(datum));
    }

    /// A consistent snapshot of the registered symbols.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Security> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Added and removed securities produced by universe selection, carried on
/// each time slice and reset by the feed driver after publication.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SecurityChanges {
    pub added: Vec<Symbol>,
    pub removed: Vec<Symbol>,
}

impl SecurityChanges {
    pub fn none() -> Self {
        SecurityChanges::default()
    }

    pub fn new(added: Vec<Symbol>, removed: Vec<Symbol>) -> Self {
        SecurityChanges { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn merge(&mut self, other: SecurityChanges) {
        for symbol in other.added {
            if !self.added.contains(&symbol) {
                self.added.push(symbol);
            }
        }
        for symbol in other.removed {
            if !self.removed.contains(&symbol) {
                self.removed.push(symbol);
            }
        }
    }
}

/// One currency's cash. `conversion_symbol` is the security whose price
/// converts this currency into the account currency, updated from cash book
/// update entries each slice.
#[derive(Clone, Debug)]
pub struct Cash {
    pub currency: String,
    pub amount: Decimal,
    pub conversion_rate: Decimal,
    pub conversion_symbol: Option<Symbol>,
}

impl Cash {
    pub fn value_in_account_currency(&self) -> Decimal {
        self.amount * self.conversion_rate
    }
}

/// The account's cash holdings by currency.
#[derive(Debug)]
pub struct CashBook {
    pub account_currency: String,
    cashes: HashMap<String, Cash>,
}

impl CashBook {
    pub fn new(account_currency: impl Into<String>, starting_cash: Decimal) -> Self {
        let account_currency = account_currency.into().to_uppercase();
        let mut cashes = HashMap::new();
        cashes.insert(
            account_currency.clone(),
            Cash {
                currency: account_currency.clone(),
                amount: starting_cash,
                conversion_rate: Decimal::ONE,
                conversion_symbol: None,
            },
        );
        CashBook { account_currency, cashes }
    }

    pub fn add_currency(&mut self, currency: impl Into<String>, amount: Decimal, conversion_symbol: Option<Symbol>) {
        let currency = currency.into().to_uppercase();
        self.cashes.entry(currency.clone()).or_insert(Cash {
            currency,
            amount,
            conversion_rate: Decimal::ZERO,
            conversion_symbol,
        });
    }

    pub fn cash(&self, currency: &str) -> Option<&Cash> {
        self.cashes.get(&currency.to_uppercase())
    }

    pub fn deposit(&mut self, currency: &str, amount: Decimal) {
        let currency = currency.to_uppercase();
        if let Some(cash) = self.cashes.get_mut(&currency) {
            cash.amount += amount;
        } else {
            self.cashes.insert(
                currency.clone(),
                Cash {
                    currency,
                    amount,
                    conversion_rate: Decimal::ZERO,
                    conversion_symbol: None,
                },
            );
        }
    }

    /// Symbols backing conversion rates, the slice assembler copies the
    /// latest datum for these into cash book update entries.
    pub fn conversion_symbols(&self) -> Vec<(String, Symbol)> {
        self.cashes
            .values()
            .filter_map(|cash| cash.conversion_symbol.clone().map(|symbol| (cash.currency.clone(), symbol)))
            .collect()
    }

    /// Applies one cash book update entry: the datum's value becomes the
    /// conversion rate of every holding backed by its symbol.
    pub fn update_conversion_rate(&mut self, datum: &BaseDataEnum) {
        let value = datum.value();
        if value <= Decimal::ZERO {
            return;
        }
        for cash in self.cashes.values_mut() {
            if cash.conversion_symbol.as_ref() == Some(datum.symbol()) {
                cash.conversion_rate = value;
            }
        }
    }

    pub fn total_value_in_account_currency(&self) -> Decimal {
        self.cashes.values().map(Cash::value_in_account_currency).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cash> {
        self.cashes.values()
    }
}

#[derive(Clone, Debug)]
struct UnsettledCash {
    available_at: DateTime<Utc>,
    currency: String,
    amount: Decimal,
}

/// The algorithm's portfolio: cash book, positions (via the security
/// registry) and the margin and settlement scans the manager loop drives.
pub struct Portfolio {
    pub cash_book: Mutex<CashBook>,
    pub securities: SecurityRegistry,
    /// Fraction of equity below which a margin call warning is issued.
    pub margin_buffer: Decimal,
    unsettled: Mutex<Vec<UnsettledCash>>,
}

impl Portfolio {
    pub fn new(account_currency: impl Into<String>, starting_cash: Decimal) -> Self {
        Portfolio {
            cash_book: Mutex::new(CashBook::new(account_currency, starting_cash)),
            securities: SecurityRegistry::new(),
            margin_buffer: dec!(0.05),
            unsettled: Mutex::new(Vec::new()),
        }
    }

    fn cash_book_lock(&self) -> std::sync::MutexGuard<'_, CashBook> {
        match self.cash_book.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn total_equity(&self) -> Decimal {
        let cash = self.cash_book_lock().total_value_in_account_currency();
        let holdings: Decimal = self.securities.snapshot().iter().map(Security::holdings_value).sum();
        cash + holdings
    }

    pub fn total_margin_used(&self) -> Decimal {
        self.securities.snapshot().iter().map(Security::margin_used).sum()
    }

    pub fn margin_remaining(&self) -> Decimal {
        self.total_equity() - self.total_margin_used()
    }

    /// Margin call scan. Returns liquidation orders when margin is exhausted,
    /// or the warning flag when remaining margin is inside the buffer.
    pub fn scan_for_margin_call(&self, time: DateTime<Utc>) -> (Vec<Order>, bool) {
        let equity = self.total_equity();
        let remaining = self.margin_remaining();
        if equity <= Decimal::ZERO {
            return (Vec::new(), false);
        }
        if remaining >= Decimal::ZERO {
            let warning = remaining < equity * self.margin_buffer && self.total_margin_used() > Decimal::ZERO;
            return (Vec::new(), warning);
        }
        // under water, unwind the largest position far enough to cover the deficit
        let mut securities = self.securities.snapshot();
        securities.retain(Security::has_holdings);
        securities.sort_by(|a, b| b.absolute_holdings_value().cmp(&a.absolute_holdings_value()));
        let mut orders = Vec::new();
        let mut deficit = -remaining;
        for security in securities {
            if deficit <= Decimal::ZERO {
                break;
            }
            if security.price <= Decimal::ZERO || security.leverage <= Decimal::ZERO {
                continue;
            }
            let per_share_margin = security.price / security.leverage;
            let mut shares = (deficit / per_share_margin).ceil();
            if shares > security.holdings_quantity.abs() {
                shares = security.holdings_quantity.abs();
            }
            if shares <= Decimal::ZERO {
                continue;
            }
            let direction = if security.holdings_quantity.is_sign_positive() {
                -Decimal::ONE
            } else {
                Decimal::ONE
            };
            orders.push(Order::market(security.symbol.clone(), direction * shares, time, "Margin Call"));
            deficit -= shares * per_share_margin;
        }
        (orders, false)
    }

    /// Books a sale's proceeds for delayed settlement.
    pub fn add_unsettled_cash(&self, available_at: DateTime<Utc>, currency: &str, amount: Decimal) {
        let mut unsettled = match self.unsettled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        unsettled.push(UnsettledCash {
            available_at,
            currency: currency.to_uppercase(),
            amount,
        });
    }

    pub fn unsettled_cash_total(&self) -> Decimal {
        let unsettled = match self.unsettled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        unsettled.iter().map(|entry| entry.amount).sum()
    }

    /// Cash settlement scan, moves matured proceeds into the cash book.
    pub fn scan_for_cash_settlement(&self, time: DateTime<Utc>) {
        let matured: Vec<UnsettledCash> = {
            let mut unsettled = match self.unsettled.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let (ready, waiting): (Vec<UnsettledCash>, Vec<UnsettledCash>) =
                unsettled.drain(..).partition(|entry| entry.available_at <= time);
            *unsettled = waiting;
            ready
        };
        if matured.is_empty() {
            return;
        }
        let mut cash_book = self.cash_book_lock();
        for entry in matured {
            cash_book.deposit(&entry.currency, entry.amount);
        }
    }

    /// Dividend payout. Price-adjusted modes already fold the distribution
    /// into the price series, so cash only moves for raw and split adjusted
    /// subscriptions.
    pub fn apply_dividend(&self, dividend: &Dividend) {
        let security = match self.securities.get(&dividend.symbol) {
            Some(security) => security,
            None => return,
        };
        if !security.has_holdings() {
            return;
        }
        match security.normalization {
            NormalizationMode::Raw | NormalizationMode::SplitAdjusted => {}
            NormalizationMode::Adjusted | NormalizationMode::TotalReturn => return,
        }
        let payout = security.holdings_quantity * dividend.distribution;
        let account_currency = self.cash_book_lock().account_currency.clone();
        self.cash_book_lock().deposit(&account_currency, payout);
    }

    /// Split application. Holdings are always adjusted, open orders only in
    /// live trading or for raw data subscriptions.
    pub fn apply_split(&self, split: &Split) {
        self.securities
            .update(&split.symbol, |security| security.apply_split_to_holdings(split.split_factor));
    }
}
