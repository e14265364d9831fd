pub mod analysis;
pub mod config;
pub mod error;
pub mod local;
pub mod processing;
pub mod sinks;

pub use error::{MeterError, Result};
