use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::standardized_types::enums::NormalizationMode;
use crate::standardized_types::subscriptions::{Symbol, SymbolName};

/// One factor regime. `date` is the ex-date: the cumulative factors of this
/// row scale data strictly before it, data on or after the ex-date falls
/// through to the next row (or to 1 past the last row).
///
/// `price_factor` accumulates dividend ratios, `split_factor` accumulates
/// split factors, the two columns are independent.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FactorFileRow {
    pub date: NaiveDate,
    pub price_factor: Decimal,
    pub split_factor: Decimal,
}

/// The corporate action detected at one ex-date, raw per-event factors
/// recovered from the cumulative columns.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FactorEvent {
    pub date: NaiveDate,
    /// 0.5 for a 2-for-1 split, `None` when the split column did not change.
    pub split_factor: Option<Decimal>,
    /// The dividend price ratio, e.g. 0.99, `None` when no dividend.
    pub dividend_ratio: Option<Decimal>,
}

/// Per symbol table of multiplicative price factors and split factors at
/// specific dates. Rows are kept sorted ascending by ex-date.
#[derive(Clone, Debug, Default)]
pub struct FactorFile {
    pub symbol: SymbolName,
    rows: Vec<FactorFileRow>,
}

impl FactorFile {
    pub fn new(symbol: impl Into<SymbolName>, mut rows: Vec<FactorFileRow>) -> Self {
        rows.sort_by_key(|row| row.date);
        FactorFile {
            symbol: symbol.into().to_uppercase(),
            rows,
        }
    }

    fn factors_for(&self, date: NaiveDate) -> (Decimal, Decimal) {
        for row in &self.rows {
            if row.date > date {
                return (row.price_factor, row.split_factor);
            }
        }
        (Decimal::ONE, Decimal::ONE)
    }

    /// The scale factor applied to prices dated `date` under the given
    /// normalization mode. Total return scales by splits only, dividends are
    /// re-added as a running sum by the reader.
    pub fn price_scale_factor(&self, date: NaiveDate, mode: NormalizationMode) -> Decimal {
        let (price_factor, split_factor) = self.factors_for(date);
        match mode {
            NormalizationMode::Raw => Decimal::ONE,
            NormalizationMode::Adjusted => price_factor * split_factor,
            NormalizationMode::SplitAdjusted | NormalizationMode::TotalReturn => split_factor,
        }
    }

    /// The corporate action taking effect on `date`, if any.
    pub fn event_on(&self, date: NaiveDate) -> Option<FactorEvent> {
        let index = self.rows.iter().position(|row| row.date == date)?;
        let row = &self.rows[index];
        let (next_price, next_split) = self
            .rows
            .get(index + 1)
            .map(|next| (next.price_factor, next.split_factor))
            .unwrap_or((Decimal::ONE, Decimal::ONE));
        if next_price == Decimal::ZERO || next_split == Decimal::ZERO {
            return None;
        }
        let split_factor = row.split_factor / next_split;
        let dividend_ratio = row.price_factor / next_price;
        Some(FactorEvent {
            date,
            split_factor: if split_factor == Decimal::ONE { None } else { Some(split_factor) },
            dividend_ratio: if dividend_ratio == Decimal::ONE { None } else { Some(dividend_ratio) },
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Source of factor files, keyed by symbol.
pub trait FactorFileProvider: Send + Sync {
    fn factor_file(&self, symbol: &Symbol) -> Option<Arc<FactorFile>>;
}

#[derive(Default)]
pub struct InMemoryFactorFileProvider {
    files: DashMap<SymbolName, Arc<FactorFile>>,
}

impl InMemoryFactorFileProvider {
    pub fn new() -> Self {
        InMemoryFactorFileProvider { files: DashMap::new() }
    }

    pub fn from_files(files: Vec<FactorFile>) -> Self {
        let provider = InMemoryFactorFileProvider::new();
        for file in files {
            provider.insert(file);
        }
        provider
    }

    pub fn insert(&self, file: FactorFile) {
        self.files.insert(file.symbol.clone(), Arc::new(file));
    }
}

impl FactorFileProvider for InMemoryFactorFileProvider {
    fn factor_file(&self, symbol: &Symbol) -> Option<Arc<FactorFile>> {
        self.files.get(&symbol.name).map(|entry| entry.value().clone())
    }
}

/// Provider with no factor files, prices pass through unscaled.
#[derive(Default)]
pub struct EmptyFactorFileProvider;

impl FactorFileProvider for EmptyFactorFileProvider {
    fn factor_file(&self, _symbol: &Symbol) -> Option<Arc<FactorFile>> {
        None
    }
}

pub type SharedFactorFileProvider = Arc<dyn FactorFileProvider>;
