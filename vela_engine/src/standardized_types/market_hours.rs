use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};

use crate::messages::engine_error::VelaError;
use crate::standardized_types::enums::SecurityType;
use crate::standardized_types::subscriptions::Symbol;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[serde(rename = "premarket")]
    PreMarket,
    Market,
    #[serde(rename = "postmarket")]
    PostMarket,
}

/// Half-open `[start, end)` interval in exchange local time.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct MarketHoursSegment {
    pub kind: SessionKind,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MarketHoursSegment {
    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start && time < self.end
    }
}

/// One market's hours: the two time zones, per-weekday session segments and
/// the holiday calendar.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MarketHoursEntry {
    #[serde(rename = "dataTimeZone")]
    pub data_time_zone: String,
    #[serde(rename = "exchangeTimeZone")]
    pub exchange_time_zone: String,
    #[serde(default)]
    pub sunday: Vec<MarketHoursSegment>,
    #[serde(default)]
    pub monday: Vec<MarketHoursSegment>,
    #[serde(default)]
    pub tuesday: Vec<MarketHoursSegment>,
    #[serde(default)]
    pub wednesday: Vec<MarketHoursSegment>,
    #[serde(default)]
    pub thursday: Vec<MarketHoursSegment>,
    #[serde(default)]
    pub friday: Vec<MarketHoursSegment>,
    #[serde(default)]
    pub saturday: Vec<MarketHoursSegment>,
    /// Invariant culture `M/d/yyyy`, no zero padding.
    #[serde(default)]
    pub holidays: Vec<String>,
}

impl MarketHoursEntry {
    pub fn data_tz(&self) -> Result<Tz, VelaError> {
        Tz::from_str(&self.data_time_zone)
            .map_err(|_| VelaError::Configuration(format!("Unknown time zone: {}", self.data_time_zone)))
    }

    pub fn exchange_tz(&self) -> Result<Tz, VelaError> {
        Tz::from_str(&self.exchange_time_zone)
            .map_err(|_| VelaError::Configuration(format!("Unknown time zone: {}", self.exchange_time_zone)))
    }

    pub fn segments_for(&self, weekday: Weekday) -> &[MarketHoursSegment] {
        match weekday {
            Weekday::Sun => &self.sunday,
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays
            .iter()
            .any(|holiday| parse_invariant_date(holiday) == Some(date))
    }

    /// A date is open when its weekday carries at least one `market` segment
    /// and it is not a holiday.
    pub fn is_date_open(&self, date: NaiveDate) -> bool {
        if self.is_holiday(date) {
            return false;
        }
        self.segments_for(date.weekday())
            .iter()
            .any(|segment| segment.kind == SessionKind::Market)
    }

    pub fn is_open_at(&self, date: NaiveDate, time: NaiveTime, extended: bool) -> bool {
        if self.is_holiday(date) {
            return false;
        }
        self.segments_for(date.weekday()).iter().any(|segment| {
            segment.contains(time) && (extended || segment.kind == SessionKind::Market)
        })
    }

    /// Start of the first regular session of the date, `None` when closed.
    pub fn market_open(&self, date: NaiveDate, extended: bool) -> Option<NaiveTime> {
        if self.is_holiday(date) {
            return None;
        }
        self.segments_for(date.weekday())
            .iter()
            .filter(|segment| extended || segment.kind == SessionKind::Market)
            .map(|segment| segment.start)
            .min()
    }

    pub fn market_close(&self, date: NaiveDate, extended: bool) -> Option<NaiveTime> {
        if self.is_holiday(date) {
            return None;
        }
        self.segments_for(date.weekday())
            .iter()
            .filter(|segment| extended || segment.kind == SessionKind::Market)
            .map(|segment| segment.end)
            .max()
    }

    /// Open dates between `start` and `finish` inclusive, in calendar order.
    /// The iterator is lazy, long ranges cost nothing until walked.
    pub fn tradeable_dates(&self, start: NaiveDate, finish: NaiveDate) -> TradeableDatesIter {
        TradeableDatesIter {
            entry: self.clone(),
            next: start,
            finish,
        }
    }
}

/// Lazy walk over an entry's open dates.
#[derive(Clone, Debug)]
pub struct TradeableDatesIter {
    entry: MarketHoursEntry,
    next: NaiveDate,
    finish: NaiveDate,
}

impl Iterator for TradeableDatesIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        while self.next <= self.finish {
            let date = self.next;
            self.next += Duration::days(1);
            if self.entry.is_date_open(date) {
                return Some(date);
            }
        }
        None
    }
}

fn parse_invariant_date(value: &str) -> Option<NaiveDate> {
    let mut parts = value.split('/');
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// The market hours database, keyed `<securityType-market-symbol>`.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MarketHoursDatabase {
    pub entries: HashMap<String, MarketHoursEntry>,
}

impl MarketHoursDatabase {
    pub fn from_json(json: &str) -> Result<Self, VelaError> {
        serde_json::from_str(json)
            .map_err(|e| VelaError::Configuration(format!("Market hours database: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, VelaError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VelaError::Configuration(format!("Market hours database {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    pub fn key(security_type: SecurityType, market: &str, symbol: &str) -> String {
        format!("{}-{}-{}", security_type, market.to_lowercase(), symbol.to_uppercase())
    }

    /// Exact symbol entry, falling back to the market wildcard.
    pub fn entry(&self, symbol: &Symbol) -> Option<&MarketHoursEntry> {
        let exact = Self::key(symbol.security_type, &symbol.market, &symbol.name);
        if let Some(entry) = self.entries.get(&exact) {
            return Some(entry);
        }
        let wildcard = format!("{}-{}-[*]", symbol.security_type, symbol.market.to_lowercase());
        self.entries.get(&wildcard)
    }
}

/// The built-in fallback database: a usa equity wildcard entry. Deployments
/// point `market-hours-database.json` at the real thing, the fallback keeps
/// fixtures and demos self-contained.
static DEFAULT_DATABASE: Lazy<MarketHoursDatabase> = Lazy::new(|| {
    let mut database = MarketHoursDatabase::default();
    database.entries.insert(
        MarketHoursDatabase::key(SecurityType::Equity, "usa", "[*]"),
        usa_equity_entry(),
    );
    database
});

pub fn default_database() -> &'static MarketHoursDatabase {
    &DEFAULT_DATABASE
}

/// A weekday 09:30-16:00 equity entry with 04:00 pre and 20:00 post market,
/// the usual fixture for usa equity markets.
pub fn usa_equity_entry() -> MarketHoursEntry {
    let market = |start: (u32, u32), end: (u32, u32)| MarketHoursSegment {
        kind: SessionKind::Market,
        start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
    };
    let pre = MarketHoursSegment {
        kind: SessionKind::PreMarket,
        start: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
    };
    let post = MarketHoursSegment {
        kind: SessionKind::PostMarket,
        start: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
    };
    let weekday = vec![pre, market((9, 30), (16, 0)), post];
    MarketHoursEntry {
        data_time_zone: "America/New_York".to_string(),
        exchange_time_zone: "America/New_York".to_string(),
        sunday: Vec::new(),
        monday: weekday.clone(),
        tuesday: weekday.clone(),
        wednesday: weekday.clone(),
        thursday: weekday.clone(),
        friday: weekday,
        saturday: Vec::new(),
        holidays: vec!["1/1/2020".to_string(), "7/3/2020".to_string(), "12/25/2020".to_string()],
    }
}
