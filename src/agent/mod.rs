//! Edge agent runtime.
//!
//! Drives exporters on an interval, batches samples, pushes them to the
//! server, ships logs incrementally with persisted cursors, and executes
//! remote commands received by poll or stream.

pub mod commands;
pub mod exporters;
pub mod http;
pub mod logs;
pub mod registration;
pub mod runtime;
pub mod stream;

pub use http::AgentClient;
pub use runtime::AgentRuntime;
