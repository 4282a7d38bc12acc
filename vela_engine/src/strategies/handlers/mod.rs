pub mod algorithm_manager;
pub mod timed_events_handler;
