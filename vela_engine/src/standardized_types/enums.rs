use strum_macros::{Display, EnumString};

/// The mode the engine is launched in, `Backtest` replays historical data at
/// full speed, the live modes drive the frontier from the wall clock.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Display)]
pub enum StrategyMode {
    Backtest,
    Live,
    LivePaperTrading,
}

impl StrategyMode {
    pub fn is_live(&self) -> bool {
        !matches!(self, StrategyMode::Backtest)
    }
}

/// The asset class of a security, used to resolve data paths and line formats.
/// `Future` and `Commodity` are declared but have no data format, requesting
/// them from the path or line generators is an error.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SecurityType {
    Equity,
    Forex,
    Cfd,
    Option,
    Future,
    Commodity,
    /// User supplied custom data.
    Base,
}

/// The kind of tick data stored in a file, also selects the quote or trade
/// line format for option files.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TickKind {
    Trade,
    Quote,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OptionStyle {
    American,
    European,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OptionRight {
    Call,
    Put,
}

/// How historical prices are scaled by the subscription reader.
///
/// * `Raw` - no scaling.
/// * `Adjusted` - cumulative price scale factor, splits and dividends folded in.
/// * `SplitAdjusted` - split factor only.
/// * `TotalReturn` - split factor plus the running sum of dividend distributions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Display, Default)]
pub enum NormalizationMode {
    Raw,
    #[default]
    Adjusted,
    SplitAdjusted,
    TotalReturn,
}

/// Lifecycle status of the algorithm. Only the manager loop writes `Running`,
/// external setters are restricted to the non-running values.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Display)]
pub enum AlgorithmStatus {
    Initializing,
    Running,
    Stopped,
    RuntimeError,
    Liquidated,
    Deleted,
    Completed,
}

impl AlgorithmStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AlgorithmStatus::Stopped
                | AlgorithmStatus::RuntimeError
                | AlgorithmStatus::Liquidated
                | AlgorithmStatus::Deleted
                | AlgorithmStatus::Completed
        )
    }
}

/// Delistings arrive in two phases, a warning on the last trading day and the
/// terminal delisted notice the day after.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Display)]
pub enum DelistingPhase {
    Warning,
    Delisted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn security_type_round_trips_lowercase() {
        assert_eq!(SecurityType::Equity.to_string(), "equity");
        assert_eq!(SecurityType::from_str("cfd").unwrap(), SecurityType::Cfd);
        assert_eq!(SecurityType::from_str("OPTION").unwrap(), SecurityType::Option);
    }

    #[test]
    fn tick_kind_serializes_for_paths() {
        assert_eq!(TickKind::Trade.to_string(), "trade");
        assert_eq!(TickKind::Quote.to_string(), "quote");
    }
}
