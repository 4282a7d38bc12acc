use rust_decimal::Decimal;

pub mod base_data;
pub mod enums;
pub mod market_hours;
pub mod orders;
pub mod resolution;
pub mod securities;
pub mod subscriptions;
pub mod time_slices;

pub type Price = Decimal;
pub type Volume = Decimal;
