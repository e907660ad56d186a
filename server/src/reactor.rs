//! The event loop.
//!
//! One thread owns the listener, the poller wait loop, the idle timer, and
//! the fd-to-connection map. Readiness events become either inline accept
//! work or read/write tasks handed to the worker pool; workers finish by
//! rearming the connection's one-shot poller interest, which is what keeps
//! at most one task in flight per connection.
//!
//! Close paths: the reactor closes synchronously on hangup/error events and
//! on idle-deadline expiry (buffered writes are not drained first); workers
//! close on read EOF and on write failures. A worker-side close leaves the
//! timer entry to lapse; its later expiry finds the connection already
//! closed and does nothing.

use crate::config::Config;
use crate::connection::Connection;
use crate::metrics;
use crate::timer::HeapTimer;
use crate::users::UserStore;
use crate::workers::WorkerPool;
use io_poll::{Event, Events, Interest, Poller};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Admission limit on concurrently open connections.
const MAX_FD: usize = 65536;

/// Listen backlog.
const BACKLOG: i32 = 4096;

/// Events per poller wait.
const MAX_EVENTS: usize = 1024;

/// State shared between the reactor thread and worker tasks.
struct Shared<U> {
    poller: Poller,
    store: U,
    root: PathBuf,
    user_count: Arc<AtomicUsize>,
    /// Base interest bits for connection sockets (one-shot, hangup, edge
    /// when configured); readable/writable is or-ed in per rearm.
    conn_interest: Interest,
    conn_edge: bool,
}

/// The connection engine: accept, dispatch, rearm, expire.
pub struct Reactor<U: UserStore> {
    listener: TcpListener,
    listen_edge: bool,
    timeout: Option<Duration>,
    shared: Arc<Shared<U>>,
    events: Events,
    timer: HeapTimer<RawFd>,
    conns: HashMap<RawFd, Arc<Mutex<Connection>>>,
    pool: WorkerPool,
}

impl<U: UserStore> Reactor<U> {
    /// Bind the listener and assemble the engine. Socket setup failure here
    /// is fatal at startup.
    pub fn new(config: &Config, store: U) -> io::Result<Reactor<U>> {
        let mode = config.listener.trigger_mode;
        let root = std::env::current_dir()?.join(&config.listener.root);

        let listener = bind_listener(config.listener.port)?;
        let poller = Poller::new()?;

        let mut listen_interest = Interest::READABLE | Interest::HANGUP;
        if mode.listen_edge() {
            listen_interest |= Interest::EDGE;
        }
        let mut conn_interest = Interest::ONESHOT | Interest::HANGUP;
        if mode.conn_edge() {
            conn_interest |= Interest::EDGE;
        }
        poller.add(listener.as_raw_fd(), listen_interest)?;

        let timeout = (config.listener.timeout_ms > 0)
            .then(|| Duration::from_millis(config.listener.timeout_ms));

        tracing::info!(
            port = listener.local_addr()?.port(),
            listen_mode = if mode.listen_edge() { "ET" } else { "LT" },
            conn_mode = if mode.conn_edge() { "ET" } else { "LT" },
            timeout_ms = config.listener.timeout_ms,
            workers = config.threads(),
            root = %root.display(),
            "server init"
        );

        Ok(Reactor {
            listener,
            listen_edge: mode.listen_edge(),
            timeout,
            shared: Arc::new(Shared {
                poller,
                store,
                root,
                user_count: Arc::new(AtomicUsize::new(0)),
                conn_interest,
                conn_edge: mode.conn_edge(),
            }),
            events: Events::with_capacity(MAX_EVENTS),
            timer: HeapTimer::new(),
            conns: HashMap::new(),
            pool: WorkerPool::new(config.threads()),
        })
    }

    /// The bound listener address (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the open-connection counter.
    pub fn user_counter(&self) -> Arc<AtomicUsize> {
        self.shared.user_count.clone()
    }

    /// Run until `shutdown` flips. Signals interrupt the poller wait, so
    /// the flag is observed promptly.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        tracing::info!("server start");
        while !shutdown.load(Ordering::Relaxed) {
            let mut wait_timeout = None;
            if self.timeout.is_some() {
                for fd in self.timer.tick() {
                    metrics::CONNECTIONS_TIMED_OUT.increment();
                    tracing::debug!(fd, "idle deadline expired");
                    self.close_conn(fd);
                }
                wait_timeout = self.timer.next_deadline();
            }

            match self.shared.poller.wait(&mut self.events, wait_timeout) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!(%err, "poller wait failed");
                    break;
                }
            }

            let ready: Vec<Event> = self.events.iter().collect();
            for event in ready {
                let fd = event.fd();
                if fd == self.listener.as_raw_fd() {
                    self.deal_listen();
                } else if event.is_closed() {
                    self.close_conn(fd);
                } else if event.is_readable() {
                    self.deal_read(fd);
                } else if event.is_writable() {
                    self.deal_write(fd);
                } else {
                    tracing::error!(fd, mask = event.mask(), "unexpected event");
                }
            }
        }
        tracing::info!("server stop");
    }

    /// Accept loop: drains the backlog when the listener is edge-triggered,
    /// accepts once otherwise.
    fn deal_listen(&mut self) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    return;
                }
            };
            metrics::CONNECTIONS_ACCEPTED.increment();

            if self.shared.user_count.load(Ordering::Relaxed) >= MAX_FD {
                metrics::CONNECTIONS_REFUSED.increment();
                send_busy(stream);
                tracing::warn!("clients are full");
                return;
            }
            self.add_client(stream, peer);

            if !self.listen_edge {
                return;
            }
        }
    }

    fn add_client(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nonblocking(true) {
            tracing::warn!(%err, %peer, "failed to set client nonblocking");
            return;
        }
        let fd = stream.as_raw_fd();
        let conn = Connection::new(stream, peer, self.shared.user_count.clone());
        // An entry left behind by a worker-side close is replaced here when
        // the kernel reuses its fd.
        self.conns.insert(fd, Arc::new(Mutex::new(conn)));

        if let Some(timeout) = self.timeout {
            self.timer.add(fd as u64, timeout, fd);
        }
        let interest = Interest::READABLE | self.shared.conn_interest;
        if let Err(err) = self.shared.poller.add(fd, interest) {
            tracing::error!(%err, fd, "failed to register client");
            self.close_conn(fd);
        }
    }

    /// Any activity pushes the idle deadline out.
    fn extend_time(&mut self, fd: RawFd) {
        if let Some(timeout) = self.timeout {
            self.timer.adjust(fd as u64, timeout);
        }
    }

    fn deal_read(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.get(&fd).cloned() else {
            debug_assert!(false, "read event for unknown fd {}", fd);
            return;
        };
        self.extend_time(fd);
        let shared = self.shared.clone();
        self.pool.submit(move || on_read(&shared, &conn));
    }

    fn deal_write(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.get(&fd).cloned() else {
            debug_assert!(false, "write event for unknown fd {}", fd);
            return;
        };
        self.extend_time(fd);
        let shared = self.shared.clone();
        self.pool.submit(move || on_write(&shared, &conn));
    }

    /// Reactor-side close: hangup/error events and expired deadlines.
    fn close_conn(&mut self, fd: RawFd) {
        if let Some(conn) = self.conns.remove(&fd) {
            let mut conn = conn.lock().unwrap();
            if !conn.is_closed() {
                let _ = self.shared.poller.delete(fd);
                conn.close();
            }
        }
        self.timer.cancel(fd as u64);
    }
}

/// Read task: pull input, then parse-and-respond.
fn on_read<U: UserStore>(shared: &Shared<U>, conn: &Arc<Mutex<Connection>>) {
    let mut conn = conn.lock().unwrap();
    if conn.is_closed() {
        return;
    }
    match conn.read_from_socket(shared.conn_edge) {
        Ok(0) => {
            close_from_worker(shared, &mut conn);
            return;
        }
        Err(err) if err.kind() != io::ErrorKind::WouldBlock => {
            tracing::debug!(fd = conn.fd(), %err, "read failed");
            close_from_worker(shared, &mut conn);
            return;
        }
        _ => {}
    }
    on_process(shared, &mut conn);
}

/// Parse whatever arrived and rearm for the next readiness direction.
fn on_process<U: UserStore>(shared: &Shared<U>, conn: &mut Connection) {
    let direction = if conn.process(&shared.root, &shared.store) {
        Interest::WRITABLE
    } else {
        Interest::READABLE
    };
    rearm(shared, conn, direction);
}

/// Write task: flush pending output, then rearm or close.
fn on_write<U: UserStore>(shared: &Shared<U>, conn: &Arc<Mutex<Connection>>) {
    let mut conn = conn.lock().unwrap();
    if conn.is_closed() {
        return;
    }
    match conn.write_to_socket(shared.conn_edge) {
        Ok(_) => {
            if conn.to_write_bytes() == 0 {
                metrics::RESPONSES_SENT.increment();
                if conn.keep_alive() {
                    rearm(shared, &mut conn, Interest::READABLE);
                } else {
                    close_from_worker(shared, &mut conn);
                }
            } else {
                // Level-triggered drain threshold reached with bytes still
                // pending: the socket stayed writable, keep the write armed.
                rearm(shared, &mut conn, Interest::WRITABLE);
            }
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            rearm(shared, &mut conn, Interest::WRITABLE);
        }
        Err(err) => {
            tracing::debug!(fd = conn.fd(), %err, "write failed");
            close_from_worker(shared, &mut conn);
        }
    }
}

/// The single rearm point: one `modify` per delivered event.
fn rearm<U: UserStore>(shared: &Shared<U>, conn: &mut Connection, direction: Interest) {
    let interest = direction | shared.conn_interest;
    if let Err(err) = shared.poller.modify(conn.fd(), interest) {
        tracing::error!(fd = conn.fd(), %err, "rearm failed");
        close_from_worker(shared, conn);
    }
}

/// Worker-side close: deregister and shut the connection down; the timer
/// entry (reactor-owned) is left to lapse.
fn close_from_worker<U: UserStore>(shared: &Shared<U>, conn: &mut Connection) {
    if conn.is_closed() {
        return;
    }
    let _ = shared.poller.delete(conn.fd());
    conn.close();
}

/// Reply to a connection past the admission limit and drop it.
fn send_busy(mut stream: TcpStream) {
    if let Err(err) = stream.write_all(b"Server busy!") {
        tracing::warn!(%err, "failed to send busy reply");
    }
}

fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::FixedUserStore;

    #[test]
    fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener(0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_reactor_new_reports_bound_address() {
        let config: Config = toml::from_str("[listener]\nport = 0").unwrap();
        let reactor = Reactor::new(&config, FixedUserStore::new(false)).unwrap();
        assert_ne!(reactor.local_addr().unwrap().port(), 0);
        assert_eq!(reactor.user_counter().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_two_reactors_bind_distinct_ports() {
        let config: Config = toml::from_str("[listener]\nport = 0").unwrap();
        let a = Reactor::new(&config, FixedUserStore::new(false)).unwrap();
        let b = Reactor::new(&config, FixedUserStore::new(false)).unwrap();
        assert_ne!(
            a.local_addr().unwrap().port(),
            b.local_addr().unwrap().port()
        );
    }
}
