//! HTTP/1.1 protocol support for the hearth server.
//!
//! [`Request`] is an incremental four-phase parser fed from a connection's
//! read buffer; it holds its state across reads, so a body split over many
//! edge-triggered wakeups still assembles into exactly one request.
//! [`Response`] resolves a path under the document root and produces a
//! status line, headers, and either a memory-mapped file body or an inline
//! HTML error page.

pub mod mapped;
pub mod request;
pub mod response;

pub use mapped::MappedFile;
pub use request::{Parse, Request};
pub use response::Response;
