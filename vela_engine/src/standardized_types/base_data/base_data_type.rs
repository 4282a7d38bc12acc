use std::fmt;
use std::fmt::Display;

/// The tag half of the tagged datum variant, used to key subscriptions and
/// custom data dispatch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum BaseDataType {
    Ticks,
    TradeBars,
    QuoteBars,
    OptionChains,
    Auxiliary,
    UniverseCollections,
}

impl BaseDataType {
    pub fn from_str(string_ref: &str) -> Result<Self, String> {
        match string_ref.to_lowercase().as_str() {
            "ticks" => Ok(BaseDataType::Ticks),
            "tradebars" => Ok(BaseDataType::TradeBars),
            "quotebars" => Ok(BaseDataType::QuoteBars),
            "optionchains" => Ok(BaseDataType::OptionChains),
            "auxiliary" => Ok(BaseDataType::Auxiliary),
            "universecollections" => Ok(BaseDataType::UniverseCollections),
            _ => Err(format!("Unknown BaseDataType: {}", string_ref)),
        }
    }
}

impl Display for BaseDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseDataType::Ticks => write!(f, "Ticks"),
            BaseDataType::TradeBars => write!(f, "TradeBars"),
            BaseDataType::QuoteBars => write!(f, "QuoteBars"),
            BaseDataType::OptionChains => write!(f, "OptionChains"),
            BaseDataType::Auxiliary => write!(f, "Auxiliary"),
            BaseDataType::UniverseCollections => write!(f, "UniverseCollections"),
        }
    }
}
