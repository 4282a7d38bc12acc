pub mod auxiliary;
pub mod base_data_enum;
pub mod base_data_type;
pub mod option_chain;
pub mod quote_bar;
pub mod tick;
pub mod trade_bar;
pub mod traits;
pub mod universe;
