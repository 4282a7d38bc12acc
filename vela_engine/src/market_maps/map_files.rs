use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::standardized_types::subscriptions::{Symbol, SymbolName};

/// Map file rows dated past this are open ended, the security is listed.
fn listed_sentinel() -> NaiveDate {
    NaiveDate::from_ymd_opt(2050, 1, 1).unwrap()
}

/// One row of a map file: `date` is the last date `ticker` applies.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MapFileRow {
    pub date: NaiveDate,
    pub ticker: SymbolName,
}

/// Per security table of ticker remappings and the first and last trading
/// dates. Rows are kept sorted ascending by date.
#[derive(Clone, Debug, Default)]
pub struct MapFile {
    pub permtick: SymbolName,
    rows: Vec<MapFileRow>,
}

impl MapFile {
    pub fn new(permtick: impl Into<SymbolName>, mut rows: Vec<MapFileRow>) -> Self {
        rows.sort_by_key(|row| row.date);
        MapFile {
            permtick: permtick.into().to_uppercase(),
            rows,
        }
    }

    /// A single-row map file for a security that never remaps or delists.
    pub fn listed_forever(permtick: impl Into<SymbolName>, first_date: NaiveDate) -> Self {
        let permtick = permtick.into().to_uppercase();
        MapFile::new(
            permtick.clone(),
            vec![
                MapFileRow { date: first_date, ticker: permtick.clone() },
                MapFileRow { date: listed_sentinel(), ticker: permtick },
            ],
        )
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|row| row.date)
    }

    /// The last trading date when the security delists, `None` while listed.
    pub fn delisting_date(&self) -> Option<NaiveDate> {
        let last = self.rows.last()?;
        if last.date >= listed_sentinel() {
            None
        } else {
            Some(last.date)
        }
    }

    /// Whether the map file covers the given date, absent dates are skipped
    /// by the subscription reader.
    pub fn has_data(&self, date: NaiveDate) -> bool {
        match (self.first_date(), self.rows.last()) {
            (Some(first), Some(last)) => date >= first && date <= last.date,
            _ => false,
        }
    }

    /// The ticker in effect on `date`: the first row dated at or after it.
    pub fn mapped_symbol_at(&self, date: NaiveDate) -> Option<SymbolName> {
        self.rows
            .iter()
            .find(|row| row.date >= date)
            .map(|row| row.ticker.clone())
    }
}

/// Source of map files, keyed by symbol.
pub trait MapFileProvider: Send + Sync {
    fn map_file(&self, symbol: &Symbol) -> Option<Arc<MapFile>>;
}

/// In-memory provider, the backtest fixture and custom data default.
#[derive(Default)]
pub struct InMemoryMapFileProvider {
    files: DashMap<SymbolName, Arc<MapFile>>,
}

impl InMemoryMapFileProvider {
    pub fn new() -> Self {
        InMemoryMapFileProvider { files: DashMap::new() }
    }

    pub fn from_files(files: Vec<MapFile>) -> Self {
        let provider = InMemoryMapFileProvider::new();
        for file in files {
            provider.insert(file);
        }
        provider
    }

    pub fn insert(&self, file: MapFile) {
        self.files.insert(file.permtick.clone(), Arc::new(file));
    }
}

impl MapFileProvider for InMemoryMapFileProvider {
    fn map_file(&self, symbol: &Symbol) -> Option<Arc<MapFile>> {
        self.files.get(&symbol.name).map(|entry| entry.value().clone())
    }
}

/// Convenience for building row vectors in fixtures.
pub fn map_rows(rows: &[(NaiveDate, &str)]) -> Vec<MapFileRow> {
    rows.iter()
        .map(|(date, ticker)| MapFileRow {
            date: *date,
            ticker: ticker.to_uppercase(),
        })
        .collect()
}

/// Provider with no map files, used for custom data and non-equity feeds.
#[derive(Default)]
pub struct EmptyMapFileProvider;

impl MapFileProvider for EmptyMapFileProvider {
    fn map_file(&self, _symbol: &Symbol) -> Option<Arc<MapFile>> {
        None
    }
}

pub type SharedMapFileProvider = Arc<dyn MapFileProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn remap_file() -> MapFile {
        MapFile::new(
            "BAZ",
            map_rows(&[
                (date(2019, 6, 1), "BAR"),
                (date(2020, 1, 9), "BAR"),
                (date(2050, 1, 1), "BAZ"),
            ]),
        )
    }

    #[test]
    fn mapped_symbol_tracks_renames() {
        let file = remap_file();
        assert_eq!(file.mapped_symbol_at(date(2019, 12, 1)), Some("BAR".to_string()));
        assert_eq!(file.mapped_symbol_at(date(2020, 1, 9)), Some("BAR".to_string()));
        assert_eq!(file.mapped_symbol_at(date(2020, 1, 10)), Some("BAZ".to_string()));
        assert_eq!(file.delisting_date(), None);
    }

    #[test]
    fn delisting_date_is_last_row() {
        let file = MapFile::new(
            "GONE",
            map_rows(&[(date(2019, 1, 1), "GONE"), (date(2020, 3, 13), "GONE")]),
        );
        assert_eq!(file.delisting_date(), Some(date(2020, 3, 13)));
        assert!(file.has_data(date(2020, 3, 13)));
        assert!(!file.has_data(date(2020, 3, 14)));
        assert!(!file.has_data(date(2018, 12, 31)));
    }
}
