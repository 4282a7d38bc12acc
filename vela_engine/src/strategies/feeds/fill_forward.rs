use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::quote_bar::QuoteBar;
use crate::standardized_types::base_data::trade_bar::TradeBar;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::market_hours::MarketHoursEntry;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::SubscriptionConfig;

/// Synthesises continuation bars at resolution boundaries the source skipped,
/// carrying the previous close forward with zero volume. Boundaries outside
/// the market's sessions produce nothing, so overnight and weekend gaps stay
/// empty. Ticks and auxiliary data pass through untouched.
pub struct FillForwardIterator {
    source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>,
    config: Arc<SubscriptionConfig>,
    hours: MarketHoursEntry,
    enabled: bool,
    next_real: Option<BaseDataEnum>,
    previous_bar: Option<BaseDataEnum>,
    last_open_time: Option<DateTime<Utc>>,
}

impl FillForwardIterator {
    pub fn new(
        source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>,
        config: Arc<SubscriptionConfig>,
        hours: MarketHoursEntry,
    ) -> Self {
        let enabled = config.fill_forward && config.resolution != Resolution::Tick;
        FillForwardIterator {
            source,
            config,
            hours,
            enabled,
            next_real: None,
            previous_bar: None,
            last_open_time: None,
        }
    }

    fn synthesize(&self, time: DateTime<Utc>) -> Option<BaseDataEnum> {
        match self.previous_bar.as_ref()? {
            BaseDataEnum::TradeBar(bar) => Some(BaseDataEnum::TradeBar(TradeBar::fill_forward(bar, time))),
            BaseDataEnum::QuoteBar(bar) => Some(BaseDataEnum::QuoteBar(QuoteBar::fill_forward(bar, time))),
            _ => None,
        }
    }

    fn boundary_is_open(&self, time: DateTime<Utc>) -> bool {
        let local = time.with_timezone(&self.config.exchange_time_zone);
        self.hours
            .is_open_at(local.date_naive(), local.time(), self.config.extended_market_hours)
    }
}

impl Iterator for FillForwardIterator {
    type Item = BaseDataEnum;

    fn next(&mut self) -> Option<BaseDataEnum> {
        if !self.enabled {
            return self.source.next();
        }
        let step = self.config.resolution.as_duration();
        loop {
            if self.next_real.is_none() {
                self.next_real = self.source.next();
            }
            let real = match self.next_real.as_ref() {
                Some(real) => real,
                // the sequence never fills past its last real datum
                None => return None,
            };
            if !real.is_price_data() {
                return self.next_real.take();
            }
            if let Some(last_open) = self.last_open_time {
                let expected = last_open + step;
                if real.time_utc() > expected {
                    self.last_open_time = Some(expected);
                    if self.boundary_is_open(expected) {
                        if let Some(synthetic) = self.synthesize(expected) {
                            return Some(synthetic);
                        }
                    }
                    continue;
                }
            }
            let datum = self.next_real.take()?;
            self.last_open_time = Some(datum.time_utc());
            self.previous_bar = Some(datum.clone());
            return Some(datum);
        }
    }
}
