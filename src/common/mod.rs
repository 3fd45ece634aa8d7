//! Shared utilities that glue the different components together.
pub mod config;
pub mod error;
pub mod ids;
pub mod log;

pub use error::{contract_violation, TrainCode, TrainError, TrainResult};
