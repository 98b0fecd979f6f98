//! Bus participants hosted alongside the gateway.

pub mod datetime;

pub use datetime::{DateTimeBroadcaster, DateTimeHelper};
