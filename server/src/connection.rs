//! Per-connection state.
//!
//! Owns the socket and both buffers, drives the request parser and the
//! response builder, and performs the gathering writes that send (header
//! bytes, mapped file) with single syscalls. A connection is mutated by at
//! most one worker at a time; the reactor's one-shot rearm discipline is
//! what guarantees it, and the mutex around each connection only makes
//! that structural exclusivity expressible in safe Rust.

use crate::metrics;
use crate::users::UserStore;
use io_poll::Buffer;
use protocol_http::{Parse, Request, Response};
use std::io::{self, IoSlice, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In level-triggered mode the writer keeps draining while more than this
/// many bytes are pending.
const WRITE_DRAIN_THRESHOLD: usize = 10240;

pub struct Connection {
    stream: Option<TcpStream>,
    fd: RawFd,
    peer: SocketAddr,
    closed: bool,
    keep_alive: bool,
    read_buf: Buffer,
    write_buf: Buffer,
    request: Request,
    response: Response,
    /// Bytes of the mapped file already written to the socket.
    file_written: usize,
    user_count: Arc<AtomicUsize>,
}

impl Connection {
    /// Take ownership of an accepted socket. Counts the user in.
    pub fn new(stream: TcpStream, peer: SocketAddr, user_count: Arc<AtomicUsize>) -> Connection {
        let fd = stream.as_raw_fd();
        let users = user_count.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::CONNECTIONS_ACTIVE.increment();
        tracing::info!(fd, %peer, users, "client in");
        Connection {
            stream: Some(stream),
            fd,
            peer,
            closed: false,
            keep_alive: false,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            request: Request::new(),
            response: Response::new(),
            file_written: 0,
            user_count,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Keep-alive decision for the response currently being written.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Bytes still pending: unwritten header plus unwritten file remainder.
    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.readable_len()
            + self.response.file_len().saturating_sub(self.file_written)
    }

    /// Pull available input into the read buffer.
    ///
    /// Loops until `WouldBlock` when `edge` is set (edge-triggered sockets
    /// must be drained), reads once otherwise. `Ok(0)` means the peer shut
    /// down with nothing new buffered; `WouldBlock` with no prior progress
    /// surfaces as an error the caller treats as "no data yet".
    pub fn read_from_socket(&mut self, edge: bool) -> io::Result<usize> {
        let mut total = 0;
        loop {
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Ok(0),
            };
            match self.read_buf.read_from(stream) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    total += n;
                    if !edge {
                        return Ok(total);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if total == 0 {
                        return Err(err);
                    }
                    return Ok(total);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Consume buffered input; true iff a response is now ready to send.
    pub fn process(&mut self, root: &Path, store: &dyn UserStore) -> bool {
        if self.read_buf.readable_len() == 0 {
            return false;
        }
        match self.request.parse(&mut self.read_buf) {
            Parse::Incomplete => return false,
            Parse::Complete => {
                metrics::REQUESTS_PARSED.increment();
                self.route(store);
                self.keep_alive = self.request.keep_alive();
                tracing::debug!(fd = self.fd, path = self.request.path(), "request");
                self.response
                    .init(root, self.request.path(), self.keep_alive, Some(200));
            }
            Parse::Error => {
                metrics::PARSE_ERRORS.increment();
                tracing::debug!(fd = self.fd, "malformed request");
                self.keep_alive = false;
                self.response.init(root, "/400.html", false, Some(400));
            }
        }
        self.request.reset();
        self.response.build(&mut self.write_buf);
        self.file_written = 0;
        true
    }

    /// Login/register POSTs consult the user store and pick the outcome
    /// page; everything else passes through.
    fn route(&mut self, store: &dyn UserStore) {
        if !self.request.is_post() {
            return;
        }
        let is_login = match self.request.path() {
            "/login.html" => true,
            "/register.html" => false,
            _ => return,
        };
        let name = self.request.form_value("username").unwrap_or("");
        let password = self.request.form_value("password").unwrap_or("");
        let verified = store.verify(name, password, is_login);
        tracing::info!(user = name, is_login, verified, "user verify");
        self.request
            .set_path(if verified { "/welcome.html" } else { "/error.html" });
    }

    /// Gathering write of (header remainder, file remainder).
    ///
    /// Loops while edge-triggered, or while more than the drain threshold
    /// is pending, as long as progress continues. Offsets into the owned
    /// buffers advance by the bytes written; nothing holds raw pointers
    /// across calls.
    pub fn write_to_socket(&mut self, edge: bool) -> io::Result<usize> {
        let mut total = 0;
        loop {
            if self.to_write_bytes() == 0 {
                return Ok(total);
            }
            let header_len = self.write_buf.readable_len();
            let result = {
                let file_rest = match self.response.file() {
                    Some(file) => &file[self.file_written..],
                    None => &[][..],
                };
                let iovs = [
                    IoSlice::new(self.write_buf.readable()),
                    IoSlice::new(file_rest),
                ];
                match self.stream.as_mut() {
                    Some(stream) => stream.write_vectored(&iovs),
                    None => return Err(io::ErrorKind::NotConnected.into()),
                }
            };
            match result {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    if n > header_len {
                        self.write_buf.clear();
                        self.file_written += n - header_len;
                    } else {
                        self.write_buf.consume(n);
                    }
                    total += n;
                    if self.to_write_bytes() == 0 {
                        return Ok(total);
                    }
                    if !edge && self.to_write_bytes() <= WRITE_DRAIN_THRESHOLD {
                        return Ok(total);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Close out: drop the mapping, close the socket, count the user out.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.response.init(Path::new(""), "", false, None);
        self.stream.take();
        let users = self.user_count.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::CONNECTIONS_ACTIVE.decrement();
        tracing::info!(fd = self.fd, peer = %self.peer, users, "client out");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
