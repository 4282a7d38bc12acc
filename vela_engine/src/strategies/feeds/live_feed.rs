use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::collections::busy_queue::BusyHandoffQueue;
use crate::collections::cancellation::CancellationToken;
use crate::collections::dedup_queue::FixedSizeDedupQueue;
use crate::helpers::converters::floor_to_second;
use crate::messages::engine_error::VelaError;
use crate::messages::results::ResultHandler;
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::securities::SecurityChanges;
use crate::standardized_types::subscriptions::SubscriptionConfig;
use crate::standardized_types::time_slices::{SubscriptionPacket, TimeSlice};
use crate::strategies::algorithm::AlgorithmHandle;
use crate::strategies::feeds::exchange::DataExchange;
use crate::strategies::feeds::slice_builder::create_time_slice;

/// Push buffer between the exchange worker and the live driver. The exchange
/// data handler enqueues, the driver drains everything at or before the wall
/// clock frontier on each pass.
pub struct EnqueueableBuffer {
    items: Mutex<VecDeque<BaseDataEnum>>,
}

impl EnqueueableBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(EnqueueableBuffer {
            items: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push(&self, datum: BaseDataEnum) {
        match self.items.lock() {
            Ok(mut items) => items.push_back(datum),
            Err(poisoned) => poisoned.into_inner().push_back(datum),
        }
    }

    fn drain_up_to(&self, frontier: DateTime<Utc>) -> Vec<BaseDataEnum> {
        let mut items = match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut drained = Vec::new();
        while let Some(front) = items.front() {
            if front.time_end_utc() > frontier {
                break;
            }
            if let Some(datum) = items.pop_front() {
                drained.push(datum);
            }
        }
        drained
    }
}

/// Drives the frontier by wall clock. Each pass drains the per-subscription
/// buffers fed by the fan-out exchange, emits at least one slice per rounded
/// second as a heartbeat, and gates universe recomputes on the hand-off
/// queue's idle handle so the consumer has processed everything in flight.
///
/// The heartbeat is best effort: cancellation can delay or suppress it, and a
/// universe selection's changes always ride the next published slice rather
/// than interleaving with one.
pub struct LiveFeedDriver {
    exchange: Arc<DataExchange>,
    queue: Arc<BusyHandoffQueue<TimeSlice>>,
    algorithm: Arc<AlgorithmHandle>,
    results: Arc<dyn ResultHandler>,
    buffers: DashMap<Arc<SubscriptionConfig>, Arc<EnqueueableBuffer>>,
    pending_changes: Mutex<SecurityChanges>,
    aux_seen: Mutex<FixedSizeDedupQueue<String>>,
}

impl LiveFeedDriver {
    pub fn new(
        exchange: Arc<DataExchange>,
        queue: Arc<BusyHandoffQueue<TimeSlice>>,
        algorithm: Arc<AlgorithmHandle>,
        results: Arc<dyn ResultHandler>,
    ) -> Self {
        LiveFeedDriver {
            exchange,
            queue,
            algorithm,
            results,
            buffers: DashMap::new(),
            pending_changes: Mutex::new(SecurityChanges::none()),
            aux_seen: Mutex::new(FixedSizeDedupQueue::new(4096)),
        }
    }

    /// Registers a subscription: its source is advanced by the exchange
    /// worker and routed into this driver's buffer for the symbol.
    pub fn add_subscription(
        &self,
        config: Arc<SubscriptionConfig>,
        source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>,
    ) {
        let buffer = EnqueueableBuffer::new();
        let sink = buffer.clone();
        self.exchange
            .set_data_handler(config.symbol.clone(), Arc::new(move |datum| sink.push(datum)));
        self.exchange
            .add_enumerator(config.symbol.clone(), source, None, None);
        self.buffers.insert(config, buffer);
    }

    pub fn remove_subscription(&self, config: &SubscriptionConfig) {
        let key: Vec<Arc<SubscriptionConfig>> = self
            .buffers
            .iter()
            .filter(|entry| entry.key().as_ref() == config)
            .map(|entry| entry.key().clone())
            .collect();
        for config in key {
            self.exchange.remove_enumerator(&config.symbol);
            self.exchange.remove_data_handler(&config.symbol);
            self.buffers.remove(&config);
        }
    }

    fn aux_key(datum: &BaseDataEnum) -> Option<String> {
        if !datum.is_auxiliary() {
            return None;
        }
        Some(format!(
            "{}|{:?}|{}",
            datum.symbol(),
            datum.base_data_type(),
            datum.time_end_utc()
        ))
    }

    /// Drops auxiliary events already surfaced on a previous pass.
    fn dedup_auxiliary(&self, data: Vec<BaseDataEnum>) -> Vec<BaseDataEnum> {
        let mut seen = match self.aux_seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        data.into_iter()
            .filter(|datum| match Self::aux_key(datum) {
                Some(key) => seen.add(key),
                None => true,
            })
            .collect()
    }

    fn collect_packets(&self, frontier: DateTime<Utc>) -> Vec<SubscriptionPacket> {
        let mut packets = Vec::new();
        for entry in self.buffers.iter() {
            let data = entry.value().drain_up_to(frontier);
            let data = self.dedup_auxiliary(data);
            if !data.is_empty() {
                packets.push(SubscriptionPacket {
                    symbol: entry.key().symbol.clone(),
                    config: entry.key().clone(),
                    data,
                });
            }
        }
        packets
    }

    /// Universe recompute: block until the consumer drained the queue, then
    /// apply the selection. The resulting changes ride the next slice.
    fn run_universe_selection(
        &self,
        packets: &[SubscriptionPacket],
        cancel: &CancellationToken,
    ) -> Result<(), VelaError> {
        for packet in packets {
            if !packet.config.is_universe_subscription() {
                continue;
            }
            let selector = match self.algorithm.universe_selector(&packet.symbol) {
                Some(selector) => selector,
                None => continue,
            };
            let collections: Vec<&BaseDataEnum> = packet
                .data
                .iter()
                .filter(|datum| matches!(datum, BaseDataEnum::UniverseCollection(_)))
                .collect();
            if collections.is_empty() {
                continue;
            }
            // guarantee the consumer has processed the prior slice
            if !self.queue.wait_idle(cancel) {
                return Err(VelaError::Cancelled);
            }
            for datum in collections {
                if let BaseDataEnum::UniverseCollection(collection) = datum {
                    let selected = selector(collection);
                    let changes = self.algorithm.apply_universe_selection(&packet.symbol, selected);
                    let mut pending = match self.pending_changes.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    pending.merge(changes);
                }
            }
        }
        Ok(())
    }

    fn take_pending_changes(&self) -> SecurityChanges {
        let mut pending = match self.pending_changes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *pending)
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
        println!("Engine: Live feed started");
        let mut last_emitted_second: Option<DateTime<Utc>> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(VelaError::Cancelled);
            }
            let frontier = Utc::now();
            let packets = self.collect_packets(frontier);
            self.run_universe_selection(&packets, cancel)?;

            let current_second = floor_to_second(frontier);
            let heartbeat_due = last_emitted_second.map_or(true, |last| current_second > last);

            if !packets.is_empty() || heartbeat_due {
                let cash_conversions = {
                    let book = match self.algorithm.portfolio.cash_book.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    book.conversion_symbols()
                };
                let changes = self.take_pending_changes();
                let slice = create_time_slice(
                    frontier,
                    self.algorithm.time_zone,
                    &cash_conversions,
                    packets,
                    changes,
                );
                self.queue.add(slice, cancel)?;
                last_emitted_second = Some(current_second);
            }

            thread::sleep(StdDuration::from_millis(10));
        }
    }
}
