//! Hearth: an event-driven static-file HTTP server.
//!
//! One reactor thread multiplexes every socket through epoll, dispatching
//! per-connection read/write work to a fixed worker pool and expiring idle
//! connections through a keyed min-heap timer. Form-encoded POSTs to the
//! login and register routes are verified against a pluggable user store.

pub mod config;
pub mod connection;
pub mod logging;
pub mod metrics;
pub mod reactor;
pub mod signal;
pub mod timer;
pub mod users;
pub mod workers;

pub use config::{Config, TriggerMode};
pub use reactor::Reactor;
