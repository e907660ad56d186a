//! Server metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently open connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "connections_refused",
    description = "Connections turned away at the admission limit"
)]
pub static CONNECTIONS_REFUSED: Counter = Counter::new();

#[metric(
    name = "connections_timed_out",
    description = "Connections closed by the idle deadline"
)]
pub static CONNECTIONS_TIMED_OUT: Counter = Counter::new();

#[metric(name = "requests_parsed", description = "Complete requests parsed")]
pub static REQUESTS_PARSED: Counter = Counter::new();

#[metric(name = "responses_sent", description = "Responses fully flushed")]
pub static RESPONSES_SENT: Counter = Counter::new();

#[metric(name = "parse_errors", description = "Malformed requests answered with 400")]
pub static PARSE_ERRORS: Counter = Counter::new();
