use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::os::fd::RawFd;

use crate::buffer::Buffer;
use crate::cgi::{self, CgiEnv};
use crate::config::AppConfig;
use crate::date::DateCache;
use crate::fd::ScopedFd;
use crate::http::request::Request;
use crate::http::response::Response;

const EDGE_TRIGGERED_READ_CAP: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    Processing,
    Writing,
    Closed,
}

/// Binds one accepted socket to the request/response state machine. Lives in
/// the reactor's connection table keyed by fd; the reactor is the only
/// thread that inserts or removes an entry, but a worker closure mutates
/// everything else inside it while it holds the task.
pub struct Connection {
    fd: ScopedFd,
    pub peer_addr: SocketAddr,
    pub server_addr: SocketAddr,
    read_buf: Buffer,
    write_buf: Vec<u8>,
    write_pos: usize,
    body_consumed: usize,
    request: Request,
    response: Option<Response>,
    pub state: ConnState,
    edge_triggered: bool,
}

impl Connection {
    pub fn init(fd: ScopedFd, peer_addr: SocketAddr, server_addr: SocketAddr, edge_triggered: bool) -> Self {
        Self {
            fd,
            peer_addr,
            server_addr,
            read_buf: Buffer::with_capacity(8 * 1024),
            write_buf: Vec::new(),
            write_pos: 0,
            body_consumed: 0,
            request: Request::new(),
            response: None,
            state: ConnState::Reading,
            edge_triggered,
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        use std::os::fd::AsRawFd;
        self.fd.as_raw_fd()
    }

    pub fn keep_alive(&self) -> bool {
        self.request.keep_alive()
    }

    pub fn pending_write_bytes(&self) -> usize {
        self.write_buf.len().saturating_sub(self.write_pos) + self.body_slice().len()
    }

    /// Drains the socket into the read buffer. Level-triggered mode reads
    /// once; edge-triggered loops until `EAGAIN` or `EDGE_TRIGGERED_READ_CAP`
    /// bytes have been consumed this call, per the edge-trigger contract.
    pub fn read(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        loop {
            match self.read_buf.read_from_fd(self.raw_fd()) {
                Ok(0) => {
                    return if total == 0 {
                        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"))
                    } else {
                        Ok(total)
                    };
                }
                Ok(n) => {
                    total += n;
                    if !self.edge_triggered || total >= EDGE_TRIGGERED_READ_CAP {
                        return Ok(total);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(err) => return Err(err),
            }
        }
    }

    /// Re-initializes the request, parses the buffered bytes, and builds a
    /// response (static file or CGI). Returns `true` when a response is
    /// ready to write; `false` on a malformed request line (caller still
    /// gets a 400 response queued, then closes after writing it).
    pub fn process(&mut self, cfg: &AppConfig, date_cache: &DateCache) -> bool {
        self.request.reset();
        let parsed_ok = self.request.parse(&mut self.read_buf);

        if !parsed_ok {
            self.queue_bad_request();
            return true;
        }

        if !self.request.is_finished() {
            return false;
        }

        if self.request.is_cgi() {
            self.build_cgi_response(cfg);
        } else {
            let response = Response::build(cfg, &self.request.path, self.keep_alive(), date_cache);
            self.write_buf = response.header_bytes.clone();
            self.response = Some(response);
        }

        self.write_pos = 0;
        self.body_consumed = 0;
        self.state = ConnState::Writing;
        true
    }

    fn queue_bad_request(&mut self) {
        let body = b"<html><body><h1>400 Bad Request</h1></body></html>";
        let mut buf = Vec::new();
        buf.extend_from_slice(b"HTTP/1.1 400 Bad Request\r\n");
        buf.extend_from_slice(b"Connection: close\r\n");
        buf.extend_from_slice(b"Content-Type: text/html\r\n");
        buf.extend_from_slice(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
        buf.extend_from_slice(body);
        self.write_buf = buf;
        self.write_pos = 0;
        self.body_consumed = 0;
        self.response = None;
        self.state = ConnState::Writing;
    }

    fn build_cgi_response(&mut self, cfg: &AppConfig) {
        let full_path = self.request.path.clone();
        let (script, query) = match full_path.split_once('?') {
            Some((s, q)) => (s.to_string(), q.to_string()),
            None => (full_path, String::new()),
        };
        let relative = script.strip_prefix("/cgi-bin/").unwrap_or(&script).to_string();
        let script_path = format!("{}/{}", cfg.cgi_dir.trim_end_matches('/'), relative);

        if !std::path::Path::new(&script_path).exists() {
            self.response = None;
            let body = b"<html><body><h1>404 Not Found</h1></body></html>";
            let mut buf = Vec::new();
            buf.extend_from_slice(b"HTTP/1.1 404 Not Found\r\n");
            buf.extend_from_slice(b"Connection: close\r\n");
            buf.extend_from_slice(b"Content-Type: text/html\r\n");
            buf.extend_from_slice(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
            buf.extend_from_slice(body);
            self.write_buf = buf;
            return;
        }

        let env = CgiEnv {
            script_path: &script_path,
            path_info: &script,
            query_string: &query,
            server_addr: self.server_addr,
            peer_addr: self.peer_addr,
        };
        self.write_buf = cgi::run(&self.request, env);
        self.response = None;
    }

    /// `writev`s the header buffer and the mmap'd body as two scatter-gather
    /// entries in one syscall, advancing through short writes until fully
    /// drained or `EAGAIN`.
    pub fn write(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        loop {
            let header_slice = &self.write_buf[self.write_pos.min(self.write_buf.len())..];
            let body_slice = self.body_slice();

            if header_slice.is_empty() && body_slice.is_empty() {
                return Ok(total);
            }

            let n = match (header_slice.is_empty(), body_slice.is_empty()) {
                (false, false) => {
                    let iov = [IoSlice::new(header_slice), IoSlice::new(body_slice)];
                    Buffer::writev_to_fd(self.raw_fd(), &iov)
                }
                (false, true) => {
                    let iov = [IoSlice::new(header_slice)];
                    Buffer::writev_to_fd(self.raw_fd(), &iov)
                }
                (true, false) => {
                    let iov = [IoSlice::new(body_slice)];
                    Buffer::writev_to_fd(self.raw_fd(), &iov)
                }
                (true, true) => unreachable!(),
            };

            let n = match n {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(err) => return Err(err),
            };
            total += n;

            let header_consumed = n.min(header_slice.len());
            self.write_pos += header_consumed;
            self.body_consumed += n - header_consumed;
        }
    }

    fn body_slice(&self) -> &[u8] {
        let full = match &self.response {
            Some(r) => r.body_slice(),
            None => &[],
        };
        if self.body_consumed >= full.len() {
            &[]
        } else {
            &full[self.body_consumed..]
        }
    }

    pub fn close(&mut self) {
        self.response = None;
        self.state = ConnState::Closed;
    }
}
