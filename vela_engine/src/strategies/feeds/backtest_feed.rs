use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::collections::busy_queue::BusyHandoffQueue;
use crate::collections::cancellation::CancellationToken;
use crate::helpers::converters::round_down;
use crate::messages::engine_error::VelaError;
use crate::messages::results::ResultHandler;
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::securities::SecurityChanges;
use crate::standardized_types::time_slices::{SubscriptionPacket, TimeSlice};
use crate::strategies::algorithm::AlgorithmHandle;
use crate::strategies::feeds::slice_builder::create_time_slice;
use crate::strategies::feeds::SubscriptionCollection;

/// Replays historical data: advances the frontier to the next ordered
/// boundary, pulls every subscription up to it, assembles one slice and
/// publishes it into the hand-off queue. Terminates when the subscriptions
/// are exhausted or the period end is reached.
pub struct BacktestFeedDriver {
    pub subscriptions: Arc<SubscriptionCollection>,
    queue: Arc<BusyHandoffQueue<TimeSlice>>,
    algorithm: Arc<AlgorithmHandle>,
    results: Arc<dyn ResultHandler>,
    end_utc: DateTime<Utc>,
    pending_changes: Mutex<SecurityChanges>,
}

impl BacktestFeedDriver {
    pub fn new(
        subscriptions: Arc<SubscriptionCollection>,
        queue: Arc<BusyHandoffQueue<TimeSlice>>,
        algorithm: Arc<AlgorithmHandle>,
        results: Arc<dyn ResultHandler>,
        end_utc: DateTime<Utc>,
    ) -> Self {
        BacktestFeedDriver {
            subscriptions,
            queue,
            algorithm,
            results,
            end_utc,
            pending_changes: Mutex::new(SecurityChanges::none()),
        }
    }

    /// Queues security changes for the next published slice, used when
    /// securities are added outside universe selection.
    pub fn enqueue_security_changes(&self, changes: SecurityChanges) {
        let mut pending = match self.pending_changes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.merge(changes);
    }

    fn take_pending_changes(&self) -> SecurityChanges {
        let mut pending = match self.pending_changes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *pending)
    }

    /// The next frontier: the minimum current-datum end time across the
    /// subscriptions, rounded down by the minimum registered resolution.
    fn next_frontier(&self, last_frontier: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let mut min_end: Option<DateTime<Utc>> = None;
        let mut min_resolution = Resolution::Daily;
        for config in self.subscriptions.configs() {
            if config.resolution < min_resolution {
                min_resolution = config.resolution;
            }
            let current_end = self
                .subscriptions
                .with_subscription(&config, |subscription| {
                    subscription.current().map(|datum| datum.time_end_utc())
                })
                .flatten();
            if let Some(end) = current_end {
                min_end = Some(match min_end {
                    Some(existing) => existing.min(end),
                    None => end,
                });
            }
        }
        let min_end = min_end?;
        let rounded = round_down(min_end, min_resolution.as_duration());
        // a rounded frontier that fails to advance would publish empty slices
        // forever, fall back to the raw boundary
        match last_frontier {
            Some(last) if rounded <= last => Some(min_end),
            _ => Some(rounded),
        }
    }

    fn collect_packets(&self, frontier: DateTime<Utc>) -> Vec<SubscriptionPacket> {
        let mut packets = Vec::new();
        for config in self.subscriptions.configs() {
            let data = self
                .subscriptions
                .with_subscription(&config, |subscription| subscription.take_up_to(frontier))
                .unwrap_or_default();
            if !data.is_empty() {
                packets.push(SubscriptionPacket {
                    symbol: config.symbol.clone(),
                    config,
                    data,
                });
            }
        }
        packets
    }

    /// Runs any universe selections whose subscriptions produced data in this
    /// pass. Backtest selection is synchronous, the changes ride this slice.
    fn run_universe_selection(&self, packets: &[SubscriptionPacket]) -> SecurityChanges {
        let mut changes = SecurityChanges::none();
        for packet in packets {
            if !packet.config.is_universe_subscription() {
                continue;
            }
            let selector = match self.algorithm.universe_selector(&packet.symbol) {
                Some(selector) => selector,
                None => continue,
            };
            for datum in &packet.data {
                if let BaseDataEnum::UniverseCollection(collection) = datum {
                    let selected = selector(collection);
                    changes.merge(self.algorithm.apply_universe_selection(&packet.symbol, selected));
                }
            }
        }
        changes
    }

    pub fn run(&self, cancel: &CancellationToken) {
        if let Err(error) = self.run_inner(cancel) {
            if error != VelaError::Cancelled {
                self.algorithm.set_runtime_error(error.to_string());
                self.results.runtime_error(&error.to_string(), None);
            }
        }
        self.queue.complete_adding();
    }

    fn run_inner(&self, cancel: &CancellationToken) -> Result<(), VelaError> {
        println!("Engine: Backtest feed started, {} subscriptions", self.subscriptions.len());
        let cash_conversions = {
            let book = match self.algorithm.portfolio.cash_book.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            book.conversion_symbols()
        };
        let mut last_frontier: Option<DateTime<Utc>> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(VelaError::Cancelled);
            }
            let frontier = match self.next_frontier(last_frontier) {
                Some(frontier) => frontier,
                // every subscription exhausted
                None => break,
            };
            if frontier > self.end_utc {
                break;
            }
            let packets = self.collect_packets(frontier);
            let mut changes = self.take_pending_changes();
            changes.merge(self.run_universe_selection(&packets));
            if packets.is_empty() && changes.is_empty() {
                last_frontier = Some(frontier);
                continue;
            }
            let slice = create_time_slice(
                frontier,
                self.algorithm.time_zone,
                &cash_conversions,
                packets,
                changes,
            );
            self.queue.add(slice, cancel)?;
            last_frontier = Some(frontier);
        }
        println!("Engine: Backtest feed completed");
        Ok(())
    }
}
