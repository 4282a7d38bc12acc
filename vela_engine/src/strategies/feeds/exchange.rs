use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;

use crate::collections::cancellation::CancellationToken;
use crate::messages::engine_error::VelaError;
use crate::standardized_types::base_data::base_data_enum::BaseDataEnum;
use crate::standardized_types::base_data::traits::BaseData;
use crate::standardized_types::subscriptions::Symbol;

pub type DataHandler = Arc<dyn Fn(BaseDataEnum) + Send + Sync>;
pub type ShouldAdvance = Arc<dyn Fn() -> bool + Send + Sync>;
pub type FinishedHandler = Arc<dyn Fn(&Symbol) + Send + Sync>;
/// Returns true when the error is fatal and the worker must stop.
pub type ErrorFilter = Arc<dyn Fn(&VelaError) -> bool + Send + Sync>;

struct EnumeratorHandle {
    symbol: Symbol,
    source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>,
    should_advance: Option<ShouldAdvance>,
    /// Self-handling enumerators consume their own items, used for universe
    /// feed packaging. Everything else routes through the data handlers.
    handler: Option<DataHandler>,
    on_finished: Option<FinishedHandler>,
}

/// Multiplexes N pull based sources onto per-symbol handlers from a single
/// worker thread. Within one symbol consumers see items in source order,
/// across symbols the only order is the per-pass round robin: global ordering
/// is re-established downstream by the time slice assembler.
pub struct DataExchange {
    enumerators: DashMap<Symbol, EnumeratorHandle>,
    data_handlers: DashMap<Symbol, DataHandler>,
    error_filter: Mutex<Option<ErrorFilter>>,
    idle_sleep: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_cancel: Mutex<Option<CancellationToken>>,
}

impl DataExchange {
    pub fn new(idle_sleep: Duration) -> Arc<Self> {
        Arc::new(DataExchange {
            enumerators: DashMap::new(),
            data_handlers: DashMap::new(),
            error_filter: Mutex::new(None),
            idle_sleep,
            worker: Mutex::new(None),
            worker_cancel: Mutex::new(None),
        })
    }

    pub fn add_enumerator(
        &self,
        symbol: Symbol,
        source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>,
        should_advance: Option<ShouldAdvance>,
        on_finished: Option<FinishedHandler>,
    ) {
        self.enumerators.insert(
            symbol.clone(),
            EnumeratorHandle {
                symbol,
                source,
                should_advance,
                handler: None,
                on_finished,
            },
        );
    }

    /// A self-handling enumerator: items go to `handler` regardless of any
    /// registered data handler.
    pub fn add_self_handling_enumerator(
        &self,
        symbol: Symbol,
        source: Box<dyn Iterator<Item = BaseDataEnum> + Send + Sync>,
        handler: DataHandler,
        should_advance: Option<ShouldAdvance>,
        on_finished: Option<FinishedHandler>,
    ) {
        self.enumerators.insert(
            symbol.clone(),
            EnumeratorHandle {
                symbol,
                source,
                should_advance,
                handler: Some(handler),
                on_finished,
            },
        );
    }

    pub fn set_data_handler(&self, symbol: Symbol, handler: DataHandler) {
        self.data_handlers.insert(symbol, handler);
    }

    pub fn remove_enumerator(&self, symbol: &Symbol) -> bool {
        self.enumerators.remove(symbol).is_some()
    }

    pub fn remove_data_handler(&self, symbol: &Symbol) -> bool {
        self.data_handlers.remove(symbol).is_some()
    }

    pub fn set_error_handler(&self, filter: ErrorFilter) {
        match self.error_filter.lock() {
            Ok(mut slot) => *slot = Some(filter),
            Err(poisoned) => *poisoned.into_inner() = Some(filter),
        }
    }

    fn error_is_fatal(&self, error: &VelaError) -> bool {
        let filter = match self.error_filter.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match filter {
            Some(filter) => filter(error),
            None => {
                log::error!("Exchange error with no handler installed: {}", error);
                false
            }
        }
    }

    fn route(&self, handle: &EnumeratorHandle, item: BaseDataEnum) {
        if let Some(handler) = &handle.handler {
            handler(item);
            return;
        }
        if let Some(handler) = self.data_handlers.get(item.symbol()) {
            let handler = handler.value().clone();
            handler(item);
        }
        // no handler registered for the symbol, dropped silently
    }

    /// One pass over the current snapshot of enumerators. Returns true when
    /// any enumerator produced an item.
    fn run_pass(&self, cancel: &CancellationToken) -> Result<bool, ()> {
        let symbols: Vec<Symbol> = self.enumerators.iter().map(|entry| entry.key().clone()).collect();
        let mut advanced_any = false;
        for symbol in symbols {
            if cancel.is_cancelled() {
                return Err(());
            }
            // the handle is taken out for the advance so handlers are free to
            // mutate the registrations without deadlocking
            let mut handle = match self.enumerators.remove(&symbol) {
                Some((_, handle)) => handle,
                None => continue,
            };
            if let Some(should_advance) = &handle.should_advance {
                if !should_advance() {
                    self.enumerators.insert(symbol, handle);
                    continue;
                }
            }
            let step = catch_unwind(AssertUnwindSafe(|| handle.source.next()));
            match step {
                Ok(Some(item)) => {
                    advanced_any = true;
                    self.route(&handle, item);
                    self.enumerators.insert(symbol, handle);
                }
                Ok(None) => {
                    // end of stream: notify, dispose, unregister
                    if let Some(on_finished) = handle.on_finished.take() {
                        on_finished(&handle.symbol);
                    }
                    drop(handle);
                }
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "enumerator advance panicked".to_string());
                    let error = VelaError::EngineErrorDebug(message);
                    let fatal = self.error_is_fatal(&error);
                    if fatal {
                        return Err(());
                    }
                    self.enumerators.insert(symbol, handle);
                }
            }
        }
        Ok(advanced_any)
    }

    /// Starts the worker. Idempotent while a worker is running.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        let mut worker = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if worker.is_some() {
            return;
        }
        match self.worker_cancel.lock() {
            Ok(mut slot) => *slot = Some(cancel.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(cancel.clone()),
        }
        let exchange = self.clone();
        let idle_sleep = self.idle_sleep;
        let handle = thread::Builder::new()
            .name("data-exchange".to_string())
            .spawn(move || {
                while !cancel.is_cancelled() {
                    match exchange.run_pass(&cancel) {
                        Ok(true) => {}
                        Ok(false) => {
                            if !idle_sleep.is_zero() {
                                thread::sleep(idle_sleep);
                            }
                        }
                        Err(()) => break,
                    }
                }
            })
            .expect("failed to spawn exchange worker");
        *worker = Some(handle);
    }

    pub fn stop(&self) {
        let cancel = match self.worker_cancel.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for DataExchange {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standardized_types::base_data::tick::Tick;
    use crate::standardized_types::enums::SecurityType;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn symbol(name: &str) -> Symbol {
        Symbol::new(name, SecurityType::Equity, "usa")
    }

    fn ticks(name: &str, count: usize) -> Vec<BaseDataEnum> {
        (0..count)
            .map(|i| {
                BaseDataEnum::Tick(Tick::trade(
                    symbol(name),
                    dec!(100) + rust_decimal::Decimal::from(i as i64),
                    dec!(1),
                    String::new(),
                    String::new(),
                    false,
                    Utc.with_ymd_and_hms(2020, 1, 2, 14, 30, 0).unwrap() + chrono::Duration::seconds(i as i64),
                ))
            })
            .collect()
    }

    fn wait_until(deadline_ms: u64, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(deadline_ms) {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn routes_items_in_source_order_per_symbol() {
        let exchange = DataExchange::new(Duration::from_millis(1));
        let received: Arc<Mutex<Vec<BaseDataEnum>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        exchange.set_data_handler(
            symbol("FOO"),
            Arc::new(move |item| sink.lock().unwrap().push(item)),
        );
        exchange.add_enumerator(symbol("FOO"), Box::new(ticks("FOO", 5).into_iter()), None, None);

        let cancel = CancellationToken::new();
        exchange.clone().start(cancel.clone());
        assert!(wait_until(2000, || received.lock().unwrap().len() == 5));
        exchange.stop();

        let received = received.lock().unwrap();
        let times: Vec<_> = received.iter().map(|item| item.time_utc()).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn finished_enumerators_are_unregistered() {
        let exchange = DataExchange::new(Duration::from_millis(1));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        exchange.set_data_handler(symbol("FOO"), Arc::new(|_| {}));
        exchange.add_enumerator(
            symbol("FOO"),
            Box::new(ticks("FOO", 2).into_iter()),
            None,
            Some(Arc::new(move |_| flag.store(true, Ordering::SeqCst))),
        );
        let cancel = CancellationToken::new();
        exchange.clone().start(cancel.clone());
        assert!(wait_until(2000, || finished.load(Ordering::SeqCst)));
        exchange.stop();
        assert!(!exchange.remove_enumerator(&symbol("FOO")));
    }

    #[test]
    fn missing_handlers_drop_items_silently() {
        let exchange = DataExchange::new(Duration::from_millis(1));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        exchange.add_enumerator(
            symbol("NOHANDLER"),
            Box::new(ticks("NOHANDLER", 3).into_iter()),
            None,
            Some(Arc::new(move |_| flag.store(true, Ordering::SeqCst))),
        );
        let cancel = CancellationToken::new();
        exchange.clone().start(cancel);
        assert!(wait_until(2000, || finished.load(Ordering::SeqCst)));
        exchange.stop();
    }

    #[test]
    fn should_advance_gates_the_enumerator() {
        let exchange = DataExchange::new(Duration::from_millis(1));
        let received: Arc<Mutex<Vec<BaseDataEnum>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        exchange.set_data_handler(
            symbol("FOO"),
            Arc::new(move |item| sink.lock().unwrap().push(item)),
        );
        let gate = Arc::new(AtomicBool::new(false));
        let gate_view = gate.clone();
        exchange.add_enumerator(
            symbol("FOO"),
            Box::new(ticks("FOO", 3).into_iter()),
            Some(Arc::new(move || gate_view.load(Ordering::SeqCst))),
            None,
        );
        let cancel = CancellationToken::new();
        exchange.clone().start(cancel);
        thread::sleep(Duration::from_millis(50));
        assert!(received.lock().unwrap().is_empty());
        gate.store(true, Ordering::SeqCst);
        assert!(wait_until(2000, || received.lock().unwrap().len() == 3));
        exchange.stop();
    }

    #[test]
    fn self_handling_enumerator_keeps_its_items() {
        let exchange = DataExchange::new(Duration::from_millis(1));
        let own: Arc<Mutex<Vec<BaseDataEnum>>> = Arc::new(Mutex::new(Vec::new()));
        let shared: Arc<Mutex<Vec<BaseDataEnum>>> = Arc::new(Mutex::new(Vec::new()));
        let own_sink = own.clone();
        let shared_sink = shared.clone();
        exchange.set_data_handler(
            symbol("FOO"),
            Arc::new(move |item| shared_sink.lock().unwrap().push(item)),
        );
        exchange.add_self_handling_enumerator(
            symbol("FOO"),
            Box::new(ticks("FOO", 4).into_iter()),
            Arc::new(move |item| own_sink.lock().unwrap().push(item)),
            None,
            None,
        );
        let cancel = CancellationToken::new();
        exchange.clone().start(cancel);
        assert!(wait_until(2000, || own.lock().unwrap().len() == 4));
        exchange.stop();
        assert!(shared.lock().unwrap().is_empty());
    }
}
