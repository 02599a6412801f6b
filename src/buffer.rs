use std::cell::RefCell;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::RawFd;

use nix::sys::uio::{readv, writev};

/// Size of the thread-local bounce buffer used to soak up whatever a single
/// `readv` gives us beyond the connection buffer's current tail capacity.
const BOUNCE_SIZE: usize = 64 * 1024;

thread_local! {
    static BOUNCE: RefCell<Box<[u8; BOUNCE_SIZE]>> = RefCell::new(Box::new([0u8; BOUNCE_SIZE]));
}

/// Growable byte queue with separate read (`R`) and write (`W`) cursors,
/// `0 <= R <= W <= capacity`. `readable()` is `W - R`; `writable_tail()` is
/// `capacity - W`. Used for both the per-connection request buffer and the
/// outgoing header buffer.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { data: vec![0u8; cap], read_pos: 0, write_pos: 0 }
    }

    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn writable_tail(&self) -> usize {
        self.data.len() - self.write_pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    pub fn is_empty(&self) -> bool {
        self.readable() == 0
    }

    /// Discards the first `n` bytes of the readable region.
    pub fn advance_read(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n).min(self.write_pos);
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    /// Compacts in place if that alone frees enough room; otherwise grows the
    /// backing vector. Compaction is preferred because it touches no allocator.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.writable_tail() >= n {
            return;
        }

        let readable = self.readable();
        if readable + n <= self.data.len() {
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
            return;
        }

        let needed = self.write_pos + n;
        let new_cap = needed.next_power_of_two().max(4096);
        self.data.resize(new_cap, 0);
    }

    /// Drains a vectored read from `fd` into the tail of the buffer plus a
    /// thread-local bounce buffer, so one syscall can pull in more than the
    /// current tail affords without growing first. Returns bytes read, or
    /// `Ok(0)` on EOF. `WouldBlock` is surfaced to the caller, which loops
    /// until it sees that (edge-triggered mode) or stops after one call
    /// (level-triggered).
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        self.ensure_writable(4096);

        BOUNCE.with(|bounce| {
            let mut bounce = bounce.borrow_mut();
            let tail_len = self.data.len() - self.write_pos;

            let n = {
                let mut iov = [
                    IoSliceMut::new(&mut self.data[self.write_pos..]),
                    IoSliceMut::new(bounce.as_mut_slice()),
                ];
                readv(fd, &mut iov).map_err(io::Error::from)?
            };

            if n <= tail_len {
                self.write_pos += n;
            } else {
                self.write_pos = self.data.len();
                let overflow = n - tail_len;
                self.append(&bounce[..overflow]);
            }

            Ok(n)
        })
    }

    /// Vectored write of `iovecs` to `fd`. Returns bytes written.
    pub fn writev_to_fd(fd: RawFd, iovecs: &[IoSlice<'_>]) -> io::Result<usize> {
        writev(fd, iovecs).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_advance_round_trip() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.as_slice(), b"hello world");
        buf.advance_read(6);
        assert_eq!(buf.as_slice(), b"world");
    }

    #[test]
    fn ensure_writable_compacts_before_growing() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"0123456789");
        buf.advance_read(8);
        let cap_before = buf.data.len();
        buf.append(b"abcdefgh");
        assert_eq!(buf.data.len(), cap_before, "compaction should have made room without growing");
        assert_eq!(buf.as_slice(), b"89abcdefgh");
    }

    #[test]
    fn ensure_writable_grows_when_compaction_is_not_enough() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"12345678");
        buf.append(b"more data that does not fit");
        assert!(buf.data.len() > 8);
    }

    #[test]
    fn invariant_view_equals_suffix_of_concatenated_appends() {
        let mut buf = Buffer::with_capacity(4);
        let chunks: [&[u8]; 3] = [b"ab", b"cde", b"fghij"];
        let mut model = Vec::new();
        for c in chunks {
            buf.append(c);
            model.extend_from_slice(c);
        }
        buf.advance_read(3);
        assert_eq!(buf.as_slice(), &model[3..]);
    }
}
