use std::fmt;

use chrono::Duration;
use serde_derive::{Deserialize, Serialize};

/// The resolution of a data point, which determines the time period it covers.
#[derive(Serialize, Deserialize, Clone, PartialOrd, Eq, Ord, PartialEq, Copy, Debug, Hash)]
pub enum Resolution {
    Tick,
    Second,
    Minute,
    Hour,
    Daily,
}

impl Resolution {
    /// The period one data point of this resolution covers. Ticks return zero
    /// as this fn is used to determine close times of bars from the opening time.
    pub fn as_duration(&self) -> Duration {
        match self {
            Resolution::Tick => Duration::zero(),
            Resolution::Second => Duration::seconds(1),
            Resolution::Minute => Duration::minutes(1),
            Resolution::Hour => Duration::hours(1),
            Resolution::Daily => Duration::days(1),
        }
    }

    /// Sub-daily resolutions are stored one zip file per date, hour and daily
    /// data live in a single file per symbol.
    pub fn is_intraday(&self) -> bool {
        matches!(self, Resolution::Tick | Resolution::Second | Resolution::Minute)
    }

    pub fn from_str(resolution_string: &str) -> Option<Self> {
        match resolution_string.to_lowercase().as_str() {
            "tick" => Some(Resolution::Tick),
            "second" => Some(Resolution::Second),
            "minute" => Some(Resolution::Minute),
            "hour" => Some(Resolution::Hour),
            "daily" => Some(Resolution::Daily),
            _ => None,
        }
    }

    /// The lowercase name used in data file paths.
    pub fn to_path_string(&self) -> String {
        match self {
            Resolution::Tick => "tick".to_string(),
            Resolution::Second => "second".to_string(),
            Resolution::Minute => "minute".to_string(),
            Resolution::Hour => "hour".to_string(),
            Resolution::Daily => "daily".to_string(),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Tick => write!(f, "Tick"),
            Resolution::Second => write!(f, "Second"),
            Resolution::Minute => write!(f, "Minute"),
            Resolution::Hour => write!(f, "Hour"),
            Resolution::Daily => write!(f, "Daily"),
        }
    }
}
