use chrono::{DateTime, Utc};

use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::subscriptions::Symbol;

/// A bundle of data points produced by a universe selection subscription at a
/// single instant. For option universes `filtered_contracts` carries the
/// contracts that survived the user's filter, the slice assembler consumes
/// the collection to refresh the canonical chain instead of routing it on.
#[derive(Clone, PartialEq, Debug)]
pub struct UniverseCollection {
    pub symbol: Symbol,
    pub time: DateTime<Utc>,
    pub data: Vec<BaseDataEnum>,
    pub filtered_contracts: Option<Vec<Symbol>>,
}

impl UniverseCollection {
    pub fn new(symbol: Symbol, time: DateTime<Utc>, data: Vec<BaseDataEnum>) -> Self {
        UniverseCollection {
            symbol,
            time,
            data,
            filtered_contracts: None,
        }
    }
}
