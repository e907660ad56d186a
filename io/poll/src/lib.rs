//! Readiness polling and buffered scatter I/O.
//!
//! This crate provides the two lowest-level building blocks of the server:
//! a thin wrapper over epoll with explicit one-shot and edge-trigger control,
//! and a growable byte buffer that can drain a nonblocking socket with a
//! single vectored read.

pub mod buffer;
pub mod poller;

pub use buffer::Buffer;
pub use poller::{Event, Events, Interest, Poller};
