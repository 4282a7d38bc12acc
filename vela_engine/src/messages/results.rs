use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::collections::circular_queue::CircularQueue;
use crate::standardized_types::enums::AlgorithmStatus;
use crate::standardized_types::Price;

/// Messages the core posts to the result handler. `HandledError` is
/// recoverable surface noise, `RuntimeError` is fatal and accompanies the
/// algorithm's terminal status.
#[derive(Clone, PartialEq, Debug)]
pub enum ResultMessage {
    Debug(String),
    Log(String),
    HandledError { message: String, stack_trace: Option<String> },
    RuntimeError { message: String, stack_trace: Option<String> },
    StatusUpdate(AlgorithmStatus),
    CommandResult { command: String, success: bool },
}

/// The seam between the manager loop and the results/statistics machinery.
/// Transport and chart computation live behind it, outside the core.
pub trait ResultHandler: Send + Sync {
    fn debug_message(&self, message: &str);
    fn log_message(&self, message: &str);
    fn handled_error(&self, message: &str, stack_trace: Option<&str>);
    fn runtime_error(&self, message: &str, stack_trace: Option<&str>);
    fn status_update(&self, status: AlgorithmStatus);
    fn command_result(&self, command: &str, success: bool);
    fn sample_equity(&self, time: DateTime<Utc>, equity: Price);
    fn sample_daily_performance(&self, date: NaiveDate, performance: Decimal);
    fn sample_benchmark(&self, time: DateTime<Utc>, value: Decimal);
    /// Drains queued work on the manager's cadence, `force` on the final call.
    fn process_synchronous_events(&self, force: bool);
}

/// Collecting handler used by backtests and the test suites. Keeps every
/// message, the samples by time, and the most recent log lines in a bounded
/// window.
pub struct BacktestResultHandler {
    messages: Mutex<Vec<ResultMessage>>,
    recent_logs: Mutex<CircularQueue<String>>,
    equity_samples: Mutex<BTreeMap<DateTime<Utc>, Price>>,
    daily_performance: Mutex<BTreeMap<NaiveDate, Decimal>>,
    benchmark_samples: Mutex<BTreeMap<DateTime<Utc>, Decimal>>,
}

impl BacktestResultHandler {
    pub fn new() -> Self {
        BacktestResultHandler {
            messages: Mutex::new(Vec::new()),
            recent_logs: Mutex::new(CircularQueue::new(1000)),
            equity_samples: Mutex::new(BTreeMap::new()),
            daily_performance: Mutex::new(BTreeMap::new()),
            benchmark_samples: Mutex::new(BTreeMap::new()),
        }
    }

    fn push(&self, message: ResultMessage) {
        match self.messages.lock() {
            Ok(mut messages) => messages.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }

    pub fn messages(&self) -> Vec<ResultMessage> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn equity_samples(&self) -> BTreeMap<DateTime<Utc>, Price> {
        match self.equity_samples.lock() {
            Ok(samples) => samples.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn daily_performance(&self) -> BTreeMap<NaiveDate, Decimal> {
        match self.daily_performance.lock() {
            Ok(samples) => samples.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_status(&self) -> Option<AlgorithmStatus> {
        self.messages().iter().rev().find_map(|message| match message {
            ResultMessage::StatusUpdate(status) => Some(*status),
            _ => None,
        })
    }

    pub fn runtime_errors(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                ResultMessage::RuntimeError { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl Default for BacktestResultHandler {
    fn default() -> Self {
        BacktestResultHandler::new()
    }
}

impl ResultHandler for BacktestResultHandler {
    fn debug_message(&self, message: &str) {
        self.push(ResultMessage::Debug(message.to_string()));
    }

    fn log_message(&self, message: &str) {
        match self.recent_logs.lock() {
            Ok(mut logs) => {
                logs.add(message.to_string());
            }
            Err(poisoned) => {
                poisoned.into_inner().add(message.to_string());
            }
        }
        self.push(ResultMessage::Log(message.to_string()));
    }

    fn handled_error(&self, message: &str, stack_trace: Option<&str>) {
        self.push(ResultMessage::HandledError {
            message: message.to_string(),
            stack_trace: stack_trace.map(str::to_string),
        });
    }

    fn runtime_error(&self, message: &str, stack_trace: Option<&str>) {
        self.push(ResultMessage::RuntimeError {
            message: message.to_string(),
            stack_trace: stack_trace.map(str::to_string),
        });
    }

    fn status_update(&self, status: AlgorithmStatus) {
        self.push(ResultMessage::StatusUpdate(status));
    }

    fn command_result(&self, command: &str, success: bool) {
        self.push(ResultMessage::CommandResult {
            command: command.to_string(),
            success,
        });
    }

    fn sample_equity(&self, time: DateTime<Utc>, equity: Price) {
        match self.equity_samples.lock() {
            Ok(mut samples) => {
                samples.insert(time, equity);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(time, equity);
            }
        }
    }

    fn sample_daily_performance(&self, date: NaiveDate, performance: Decimal) {
        match self.daily_performance.lock() {
            Ok(mut samples) => {
                samples.insert(date, performance);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(date, performance);
            }
        }
    }

    fn sample_benchmark(&self, time: DateTime<Utc>, value: Decimal) {
        match self.benchmark_samples.lock() {
            Ok(mut samples) => {
                samples.insert(time, value);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(time, value);
            }
        }
    }

    fn process_synchronous_events(&self, _force: bool) {}
}

/// Result storage keys. The transport that writes them lives outside the
/// core, the key shapes are part of the contract.
pub fn backtest_result_key(user_id: u64, project_id: u64, backtest_id: &str) -> String {
    format!("backtests/{}/{}/{}.json", user_id, project_id, backtest_id)
}

pub fn backtest_log_key(user_id: u64, project_id: u64, algorithm_id: &str) -> String {
    format!("backtests/{}/{}/{}-log.txt", user_id, project_id, algorithm_id)
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LiveResultKeyKind {
    Minute,
    TenMinute,
    /// Per chart second samples, the chart name is escaped into the key.
    Second(String),
}

fn escape_chart_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

pub fn live_result_key(
    user_id: u64,
    project_id: u64,
    deploy_id: &str,
    kind: &LiveResultKeyKind,
    date: NaiveDate,
    hour: Option<u32>,
) -> String {
    let suffix = match kind {
        LiveResultKeyKind::Minute => "minute".to_string(),
        LiveResultKeyKind::TenMinute => "10minute".to_string(),
        LiveResultKeyKind::Second(chart_name) => format!("second_{}", escape_chart_name(chart_name)),
    };
    let stamp = match hour {
        Some(hour) => format!("{}-{:02}", date.format("%Y-%m-%d"), hour),
        None => date.format("%Y-%m-%d").to_string(),
    };
    format!("live/{}/{}/{}-{}_{}.json", user_id, project_id, deploy_id, suffix, stamp)
}
