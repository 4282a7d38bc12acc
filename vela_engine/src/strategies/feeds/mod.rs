use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::subscriptions::{SubscriptionConfig, Symbol};

pub mod backtest_feed;
pub mod exchange;
pub mod fill_forward;
pub mod live_feed;
pub mod slice_builder;
pub mod subscription_reader;

/// A live subscription: the configuration, its lazy datum sequence and the
/// "current" slot holding the next datum not yet consumed by the frontier.
/// Owned exclusively by the feed driver for iteration while alive.
pub struct Subscription {
    pub config: Arc<SubscriptionConfig>,
    source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>,
    current: Option<BaseDataEnum>,
    exhausted: bool,
}

impl Subscription {
    pub fn new(config: Arc<SubscriptionConfig>, source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>) -> Self {
        let mut subscription = Subscription {
            config,
            source,
            current: None,
            exhausted: false,
        };
        subscription.move_next();
        subscription
    }

    pub fn current(&self) -> Option<&BaseDataEnum> {
        self.current.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.current.is_none()
    }

    fn move_next(&mut self) -> bool {
        self.current = self.source.next();
        if self.current.is_none() {
            self.exhausted = true;
        }
        self.current.is_some()
    }

    /// Drains every datum whose end time is at or before the frontier.
    pub fn take_up_to(&mut self, frontier: DateTime<Utc>) -> Vec<BaseDataEnum> {
        let mut taken = Vec::new();
        while let Some(current) = &self.current {
            if current.time_end_utc() > frontier {
                break;
            }
            if let Some(datum) = self.current.take() {
                taken.push(datum);
            }
            self.move_next();
        }
        taken
    }
}

/// The feed's subscription collection, keyed symbol then configuration.
/// Add and remove are lock free, iteration observes a consistent snapshot of
/// keys. Each subscription sits behind its own mutex because the driver is
/// the only party iterating it.
#[derive(Default)]
pub struct SubscriptionCollection {
    inner: DashMap<Arc<SubscriptionConfig>, Mutex<Subscription>>,
}

impl SubscriptionCollection {
    pub fn new() -> Self {
        SubscriptionCollection { inner: DashMap::new() }
    }

    pub fn add(&self, subscription: Subscription) {
        self.inner
            .insert(subscription.config.clone(), Mutex::new(subscription));
    }

    pub fn remove(&self, config: &SubscriptionConfig) -> bool {
        self.inner.remove(config).is_some()
    }

    pub fn contains(&self, config: &SubscriptionConfig) -> bool {
        self.inner.contains_key(config)
    }

    /// Snapshot of the registered configurations.
    pub fn configs(&self) -> Vec<Arc<SubscriptionConfig>> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Configurations registered for one symbol.
    pub fn configs_for(&self, symbol: &Symbol) -> Vec<Arc<SubscriptionConfig>> {
        self.inner
            .iter()
            .filter(|entry| &entry.key().symbol == symbol)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Runs `f` with exclusive access to the subscription for `config`.
    pub fn with_subscription<R>(
        &self,
        config: &SubscriptionConfig,
        f: impl FnOnce(&mut Subscription) -> R,
    ) -> Option<R> {
        let entry = self.inner.get(config)?;
        let mut subscription: MutexGuard<'_, Subscription> = match entry.value().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(f(&mut subscription))
    }
}
