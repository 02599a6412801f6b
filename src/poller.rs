use std::os::fd::RawFd;
use std::time::Duration;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

/// Interest bits the reactor cares about, independent of the raw `nix` flag
/// names so callers don't have to know the epoll ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(EpollFlags);

impl Interest {
    pub const READABLE: Interest = Interest(EpollFlags::EPOLLIN);
    pub const WRITABLE: Interest = Interest(EpollFlags::EPOLLOUT);
    pub const PEER_CLOSED: Interest = Interest(EpollFlags::EPOLLRDHUP);
    pub const ERROR: Interest = Interest(EpollFlags::EPOLLERR);
    pub const HANGUP: Interest = Interest(EpollFlags::EPOLLHUP);
    pub const EDGE_TRIGGERED: Interest = Interest(EpollFlags::EPOLLET);
    pub const ONE_SHOT: Interest = Interest(EpollFlags::EPOLLONESHOT);

    pub fn union(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0.contains(other.0)
    }

    fn raw(self) -> EpollFlags {
        self.0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        self.union(rhs)
    }
}

/// One readiness notification: the fd it concerns and which interests fired.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub interest: Interest,
}

/// Thin wrapper over a single epoll instance. Tokens are raw fds -- the
/// reactor never needs more than the fd to look up connection state, since
/// every fd maps to exactly one live connection, timer, or listener at a time.
pub struct Poller {
    epoll: Epoll,
    wait_buf: Vec<EpollEvent>,
    translated: Vec<Event>,
}

impl Poller {
    pub fn new(wait_capacity: usize) -> nix::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::empty())?;
        let cap = wait_capacity.max(1);
        Ok(Self {
            epoll,
            wait_buf: vec![EpollEvent::empty(); cap],
            translated: Vec::with_capacity(cap),
        })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> nix::Result<()> {
        let ev = EpollEvent::new(interest.raw(), fd as u64);
        self.epoll.add(borrow_fd(fd), ev)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest) -> nix::Result<()> {
        let ev = EpollEvent::new(interest.raw(), fd as u64);
        self.epoll.modify(borrow_fd(fd), &ev)
    }

    pub fn remove(&self, fd: RawFd) -> nix::Result<()> {
        self.epoll.delete(borrow_fd(fd))
    }

    /// Blocks until at least one event is ready or `timeout` elapses
    /// (`None` blocks indefinitely). Returns the slice of ready events,
    /// valid until the next call to `wait`.
    pub fn wait(&mut self, timeout: Option<Duration>) -> nix::Result<&[Event]> {
        let timeout = match timeout {
            Some(d) => EpollTimeout::try_from(d.as_millis() as isize).unwrap_or(EpollTimeout::NONE),
            None => EpollTimeout::NONE,
        };
        let n = self.epoll.wait(&mut self.wait_buf, timeout)?;

        // SAFETY: EpollEvent and Event share no memory; we translate in place
        // into a scratch area reusing wait_buf's event data via a second pass.
        self.translated.clear();
        for ev in &self.wait_buf[..n] {
            self.translated.push(Event { fd: ev.data() as RawFd, interest: Interest(ev.events()) });
        }
        Ok(&self.translated)
    }
}

fn borrow_fd(fd: RawFd) -> std::os::fd::BorrowedFd<'static> {
    // SAFETY: the returned BorrowedFd does not outlive this call; `nix`'s
    // Epoll methods only borrow it for the duration of the syscall.
    unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }
}
