//! Readiness notification on top of Linux `epoll`.
//!
//! Client sockets are registered edge-triggered and one-shot: once an event
//! has been reported for a descriptor it stays silent until [`Poller::modify`]
//! re-arms it. That is what guarantees a single worker per connection.

use std::io;
use std::ops::BitOr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Set of `epoll` event flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    pub const PEER_CLOSED: Interest = Interest(libc::EPOLLRDHUP as u32);
    pub const ERROR: Interest = Interest(libc::EPOLLERR as u32);
    pub const HANGUP: Interest = Interest(libc::EPOLLHUP as u32);
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);

    /// Read, hang-up and error, edge-triggered, one-shot.
    pub const fn client() -> Interest {
        Interest(
            Self::READABLE.0
                | Self::PEER_CLOSED.0
                | Self::ERROR.0
                | Self::HANGUP.0
                | Self::EDGE.0
                | Self::ONESHOT.0,
        )
    }

    pub const fn listener() -> Interest {
        Interest(Self::READABLE.0 | Self::EDGE.0)
    }

    pub const fn wakeup() -> Interest {
        Self::READABLE
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_oneshot(self) -> bool {
        self.contains(Self::ONESHOT)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// One ready descriptor out of a wait batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    token: u64,
    flags: u32,
}

impl Event {
    pub fn new(token: u64, observed: Interest) -> Self {
        Self { token, flags: observed.bits() }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.flags & libc::EPOLLIN as u32 != 0
    }

    pub fn is_peer_closed(&self) -> bool {
        self.flags & libc::EPOLLRDHUP as u32 != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & libc::EPOLLERR as u32 != 0
    }

    pub fn is_hangup(&self) -> bool {
        self.flags & libc::EPOLLHUP as u32 != 0
    }
}

/// Ready-event buffer filled by [`EventReactor::wait`].
pub struct Events {
    raw: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; capacity],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.raw.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.raw[..self.len].iter().map(|raw| {
            // copy out of the (possibly packed) kernel struct before use
            let flags = raw.events;
            let token = raw.u64;
            Event { token, flags }
        })
    }
}

/// Interest-set control operations.
///
/// Each call reports failure to the caller; nothing is swallowed here.
pub trait Poller: Send + Sync {
    fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()>;
    fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()>;
    fn deregister(&self, fd: RawFd) -> io::Result<()>;
}

/// Owner of the `epoll` instance.
#[derive(Debug)]
pub struct EventReactor {
    epfd: OwnedFd,
}

impl EventReactor {
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, the result is checked before use.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a fresh descriptor nobody else owns.
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epfd })
    }

    /// Blocks until at least one registered descriptor is ready (or the
    /// timeout elapses) and stores the batch in `events`.
    ///
    /// `None` waits indefinitely. An interrupted wait surfaces as
    /// `ErrorKind::Interrupted`.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        };
        let max = events.raw.len().min(i32::MAX as usize) as i32;

        // SAFETY: the buffer holds `max` initialised entries and outlives the call.
        let n = unsafe {
            libc::epoll_wait(self.epfd.as_raw_fd(), events.raw.as_mut_ptr(), max, timeout_ms)
        };
        if n < 0 {
            events.len = 0;
            return Err(io::Error::last_os_error());
        }
        events.len = n as usize;
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };
        // SAFETY: `event` is a valid epoll_event for the duration of the call.
        let rc = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Poller for EventReactor {
    fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: a null event pointer is permitted for EPOLL_CTL_DEL.
        let rc = unsafe {
            libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
