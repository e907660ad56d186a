//! Signal-driven reactor stop.
//!
//! The reactor is a single thread parked in an epoll wait, so stopping it
//! takes two things a signal conveniently does at once: flip a flag the
//! loop checks each iteration, and interrupt the wait (`EINTR`) so that
//! check happens now. There is no connection draining; in-flight worker
//! tasks finish, the loop exits, and process teardown closes the sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Install SIGINT/SIGTERM handlers that stop the reactor loop.
///
/// Returns the flag to hand to `Reactor::run`. The first signal requests a
/// stop and lets the current iteration finish; a second signal means the
/// loop never came back around, so the process exits on the spot.
///
/// # Example
///
/// ```ignore
/// let mut reactor = Reactor::new(&config, store)?;
/// let stop = signal::reactor_stop_flag();
/// reactor.run(&stop); // returns after the first SIGINT/SIGTERM
/// ```
pub fn reactor_stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let requested = stop.clone();

    ctrlc::set_handler(move || {
        if requested.swap(true, Ordering::SeqCst) {
            tracing::warn!("reactor did not stop after the first signal, exiting now");
            std::process::exit(1);
        }
        tracing::info!("stop requested, reactor exits after this iteration");
    })
    .expect("failed to set signal handler");

    stop
}
