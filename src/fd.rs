use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Owns a raw OS file descriptor and closes it on drop. Every fd the reactor
/// hands out -- accepted sockets, opened static files, CGI pipe ends -- flows
/// through one of these so a bail-out partway through setup (say, `mmap`
/// failing after `open` succeeds) still closes the descriptor.
#[derive(Debug)]
pub struct ScopedFd(OwnedFd);

impl ScopedFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self(fd)
    }

    /// # Safety
    /// `fd` must be an open, uniquely-owned descriptor not already tracked by
    /// another owner.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    pub fn as_owned(&self) -> &OwnedFd {
        &self.0
    }

    pub fn into_owned(self) -> OwnedFd {
        self.0
    }
}

impl AsRawFd for ScopedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for ScopedFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}
