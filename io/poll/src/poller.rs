//! Thin epoll wrapper.
//!
//! Unlike higher-level polling abstractions, this wrapper exposes the
//! one-shot and edge-trigger bits directly: the reactor's per-connection
//! mutual exclusion depends on `EPOLLONESHOT` suppressing event delivery
//! until an explicit rearm.
//!
//! Registration operations (`add`/`modify`/`delete`) take `&self` (the
//! kernel serializes `epoll_ctl` calls), so worker threads can rearm a
//! connection through a shared `Arc<Poller>` while the reactor thread owns
//! the `Events` buffer passed to `wait`.

use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Interest set for a registered file descriptor.
///
/// A bit mask over the `EPOLL*` flags. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    /// Readable readiness (`EPOLLIN`).
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    /// Writable readiness (`EPOLLOUT`).
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    /// Peer shut down its write half (`EPOLLRDHUP`).
    pub const HANGUP: Interest = Interest(libc::EPOLLRDHUP as u32);
    /// Disarm after one event delivery (`EPOLLONESHOT`).
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);
    /// Edge-triggered delivery (`EPOLLET`).
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);

    /// An empty interest set.
    pub const fn none() -> Interest {
        Interest(0)
    }

    /// The raw `EPOLL*` bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

/// A single readiness event returned by [`Poller::wait`].
#[derive(Debug, Clone, Copy)]
pub struct Event {
    fd: RawFd,
    mask: u32,
}

impl Event {
    /// The file descriptor this event fired for.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The raw event mask.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Readable readiness.
    pub fn is_readable(&self) -> bool {
        self.mask & libc::EPOLLIN as u32 != 0
    }

    /// Writable readiness.
    pub fn is_writable(&self) -> bool {
        self.mask & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hangup or socket error; the connection is done for.
    pub fn is_closed(&self) -> bool {
        self.mask & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// Reusable event buffer filled by [`Poller::wait`].
pub struct Events {
    list: Vec<libc::epoll_event>,
    count: usize,
}

impl Events {
    /// Create a buffer that can receive up to `capacity` events per wait.
    pub fn with_capacity(capacity: usize) -> Events {
        assert!(capacity > 0);
        Events {
            list: vec![libc::epoll_event { events: 0, u64: 0 }; capacity],
            count: 0,
        }
    }

    /// Number of events received by the last wait.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if the last wait returned no events.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate over the events received by the last wait.
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        // epoll_event is packed on some targets; copy the fields out.
        self.list[..self.count].iter().map(|e| {
            let mask = e.events;
            let fd = e.u64 as RawFd;
            Event { fd, mask }
        })
    }
}

/// Wrapper over an epoll instance.
pub struct Poller {
    epfd: OwnedFd,
}

impl Poller {
    /// Create a new epoll instance.
    pub fn new() -> io::Result<Poller> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Poller {
            epfd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Register `fd` with the given interest set.
    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    /// Replace the interest set for `fd`.
    ///
    /// This is the rearm operation: after a one-shot event fires, the fd is
    /// silent until `modify` is called for it again.
    pub fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    /// Remove `fd` from the interest list.
    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe {
            libc::epoll_ctl(
                self.epfd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait for readiness, filling `events`.
    ///
    /// `timeout` of `None` blocks indefinitely. Returns the number of events
    /// received. `EINTR` surfaces as `ErrorKind::Interrupted`; callers treat
    /// it as a normal wakeup.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
            None => -1,
        };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                events.list.as_mut_ptr(),
                events.list.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            events.count = 0;
            return Err(io::Error::last_os_error());
        }
        events.count = n as usize;
        Ok(events.count)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        assert!(fd >= 0);
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: fd as u64,
        };
        let res = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
