//! Route handlers, one module per resource.

pub mod clients;
pub mod commands;
pub mod logs;
pub mod metrics;
pub mod register;
pub mod stats;
pub mod timeseries;
