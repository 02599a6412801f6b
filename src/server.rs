use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::sys::resource::{setrlimit, Resource};
use nix::sys::socket::{
    accept4, bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag,
    SockProtocol, SockType, SockaddrIn,
};

use crate::config::AppConfig;
use crate::date::{self, DateCache};
use crate::fd::ScopedFd;
use crate::http::connection::{ConnState, Connection};
use crate::poller::{Event, Interest, Poller};
use crate::timer::TimerWheel;
use crate::workers::WorkerPool;

/// Soft cap on concurrent connections, 100 below the hard fd ceiling the
/// reactor raises at startup -- accept starts rejecting with "Server busy!"
/// before `RLIMIT_NOFILE` is actually exhausted.
const MAX_FD: usize = 65536;
const NEAR_LIMIT: usize = MAX_FD - 100;

struct TriggerMode {
    connections_edge_triggered: bool,
    listener_edge_triggered: bool,
}

impl TriggerMode {
    fn from_bits(bits: u8) -> Self {
        // Invalid combinations (anything beyond bits 0-1) default to both
        // edge-triggered, matching the original's "treat unknown as ET".
        match bits & 0b11 {
            0 => Self { connections_edge_triggered: false, listener_edge_triggered: false },
            1 => Self { connections_edge_triggered: true, listener_edge_triggered: false },
            2 => Self { connections_edge_triggered: false, listener_edge_triggered: true },
            _ => Self { connections_edge_triggered: true, listener_edge_triggered: true },
        }
    }
}

/// One slot in the connection table: the reactor thread owns insert/remove
/// of the entry itself, but the `Mutex<Connection>` inside is what a worker
/// actually holds while it runs `read`/`process`/`write` -- `ONE_SHOT`
/// already guarantees only one worker ever touches a given fd's connection
/// at a time, so this per-connection lock is never contended; it exists so
/// the *table* lock only has to be held for the lookup, not for the whole
/// (possibly CGI-blocking) closure.
type ConnHandle = Arc<Mutex<Connection>>;
type ConnTable = Arc<Mutex<HashMap<RawFd, ConnHandle>>>;

/// Owns the listener, poller, timer heap, and connection table, and runs the
/// single-threaded dispatch loop. Request parsing and response construction
/// happen off this thread, in the worker pool.
pub struct Server {
    cfg: Arc<AppConfig>,
    listener: ScopedFd,
    server_addr: SocketAddr,
    poller: Poller,
    timers: TimerWheel,
    connections: ConnTable,
    workers: WorkerPool,
    date_cache: Arc<DateCache>,
    trigger: TriggerMode,
    user_count: Arc<AtomicUsize>,
    closed: bool,
}

impl Server {
    pub fn new(cfg: AppConfig) -> crate::error::Result<Self> {
        raise_fd_limit();

        let (listener, server_addr) = match bind_listener(&cfg) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!("failed to initialize listening socket: {err}");
                return Ok(Self::closed_stub(cfg));
            }
        };

        let trigger = TriggerMode::from_bits(cfg.trigger_mode);
        let poller = Poller::new(cfg.poller_capacity)?;
        let listener_interest = if trigger.listener_edge_triggered {
            Interest::READABLE | Interest::EDGE_TRIGGERED
        } else {
            Interest::READABLE
        };
        poller.add(listener.as_raw_fd(), listener_interest)?;

        Ok(Self {
            trigger,
            poller,
            timers: TimerWheel::new(),
            connections: Arc::new(Mutex::new(HashMap::new())),
            workers: WorkerPool::new(cfg.workers, cfg.queue_capacity),
            date_cache: date::start(),
            user_count: Arc::new(AtomicUsize::new(0)),
            listener,
            server_addr,
            cfg: Arc::new(cfg),
            closed: false,
        })
    }

    fn closed_stub(cfg: AppConfig) -> Self {
        Self {
            trigger: TriggerMode::from_bits(cfg.trigger_mode),
            poller: Poller::new(1).expect("fallback poller creation cannot fail"),
            timers: TimerWheel::new(),
            connections: Arc::new(Mutex::new(HashMap::new())),
            workers: WorkerPool::new(1, 2),
            date_cache: date::start(),
            user_count: Arc::new(AtomicUsize::new(0)),
            listener: unsafe { ScopedFd::from_raw(-1) },
            server_addr: "0.0.0.0:0".parse().unwrap(),
            cfg: Arc::new(cfg),
            closed: true,
        }
    }

    /// Runs the dispatch loop until the process is signaled to stop. Returns
    /// immediately without entering the loop if startup failed.
    pub fn run(mut self) {
        if self.closed {
            tracing::error!("server not started: listener failed to initialize");
            return;
        }

        tracing::info!("listening on {}", self.server_addr);

        loop {
            let now = Instant::now();
            let timeout = if self.cfg.idle_timeout_ms == 0 {
                None
            } else {
                self.timers.next_deadline(now).or(Some(Duration::from_secs(3600)))
            };

            for fd in self.timers.expired(now) {
                self.close_connection(fd);
            }

            let events: Vec<Event> = match self.poller.wait(timeout) {
                Ok(events) => events.to_vec(),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => {
                    tracing::error!("poll.wait failed: {err}");
                    continue;
                }
            };

            for event in events {
                if event.fd == self.listener.as_raw_fd() {
                    self.accept_loop();
                    continue;
                }

                if event.interest.contains(Interest::ERROR) || event.interest.contains(Interest::HANGUP) {
                    self.close_connection(event.fd);
                    continue;
                }

                if event.interest.contains(Interest::READABLE) {
                    self.refresh_deadline(event.fd, now);
                    self.submit_read(event.fd);
                } else if event.interest.contains(Interest::WRITABLE) {
                    self.refresh_deadline(event.fd, now);
                    self.submit_write(event.fd);
                }
            }
        }
    }

    fn accept_loop(&mut self) {
        loop {
            let owned = match accept4(
                self.listener.as_raw_fd(),
                SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            ) {
                Ok(owned) => owned,
                Err(nix::errno::Errno::EAGAIN) => return,
                Err(err) => {
                    tracing::warn!("accept4 failed: {err}");
                    return;
                }
            };
            let fd = owned.as_raw_fd();

            let count = self.connections.lock().unwrap().len();
            if count >= MAX_FD || count >= NEAR_LIMIT {
                let _ = nix::sys::socket::send(fd, b"Server busy!", nix::sys::socket::MsgFlags::empty());
                drop(owned);
                continue;
            }

            let peer_addr = peer_addr_of(fd).unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());
            let scoped = ScopedFd::new(owned);
            let conn = Connection::init(scoped, peer_addr, self.server_addr, self.trigger.connections_edge_triggered);

            self.connections.lock().unwrap().insert(fd, Arc::new(Mutex::new(conn)));
            self.user_count.fetch_add(1, Ordering::Relaxed);

            if self.cfg.idle_timeout_ms > 0 {
                self.timers.set(fd, Instant::now(), Duration::from_millis(self.cfg.idle_timeout_ms));
            }

            let interest = Interest::READABLE | Interest::PEER_CLOSED | Interest::ONE_SHOT;
            let interest = if self.trigger.connections_edge_triggered {
                interest | Interest::EDGE_TRIGGERED
            } else {
                interest
            };
            if let Err(err) = self.poller.add(fd, interest) {
                tracing::warn!("failed to register accepted fd {fd}: {err}");
                self.close_connection(fd);
            }

            if !self.trigger.listener_edge_triggered {
                return;
            }
        }
    }

    fn refresh_deadline(&mut self, fd: RawFd, now: Instant) {
        if self.cfg.idle_timeout_ms > 0 {
            self.timers.set(fd, now, Duration::from_millis(self.cfg.idle_timeout_ms));
        }
    }

    fn submit_read(&self, fd: RawFd) {
        let connections = self.connections.clone();
        let cfg = self.cfg.clone();
        let date_cache = self.date_cache.clone();
        let poller = PollerHandle::from(&self.poller);
        let user_count = self.user_count.clone();

        self.workers.submit(Box::new(move || {
            let Some(handle) = connections.lock().unwrap().get(&fd).cloned() else { return };
            let mut conn = handle.lock().unwrap();

            match conn.read() {
                Ok(_) => {
                    let ready = conn.process(&cfg, &date_cache);
                    if ready {
                        let _ = poller.modify(fd, Interest::WRITABLE | Interest::ONE_SHOT);
                    } else {
                        let _ = poller.modify(fd, Interest::READABLE | Interest::PEER_CLOSED | Interest::ONE_SHOT);
                    }
                }
                Err(_) => {
                    drop(conn);
                    connections.lock().unwrap().remove(&fd);
                    let _ = poller.remove(fd);
                    user_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }));
    }

    fn submit_write(&self, fd: RawFd) {
        let connections = self.connections.clone();
        let poller = PollerHandle::from(&self.poller);
        let user_count = self.user_count.clone();

        self.workers.submit(Box::new(move || {
            let Some(handle) = connections.lock().unwrap().get(&fd).cloned() else { return };
            let mut conn = handle.lock().unwrap();

            match conn.write() {
                Ok(_) if conn.pending_write_bytes() == 0 => {
                    if conn.keep_alive() {
                        conn.state = ConnState::Reading;
                        let _ = poller.modify(fd, Interest::READABLE | Interest::PEER_CLOSED | Interest::ONE_SHOT);
                    } else {
                        drop(conn);
                        connections.lock().unwrap().remove(&fd);
                        let _ = poller.remove(fd);
                        user_count.fetch_sub(1, Ordering::Relaxed);
                    }
                }
                Ok(_) => {
                    let _ = poller.modify(fd, Interest::WRITABLE | Interest::ONE_SHOT);
                }
                Err(_) => {
                    drop(conn);
                    connections.lock().unwrap().remove(&fd);
                    let _ = poller.remove(fd);
                    user_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }));
    }

    fn close_connection(&mut self, fd: RawFd) {
        self.timers.remove(fd);
        let _ = self.poller.remove(fd);
        if self.connections.lock().unwrap().remove(&fd).is_some() {
            self.user_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// A `Poller` reference workers can call `modify`/`remove` on from inside a
/// task closure. Those two operations only touch kernel epoll state and an
/// already-registered fd, so they're safe to invoke off the reactor thread;
/// only `add` and `wait` are reactor-thread-only.
#[derive(Clone, Copy)]
struct PollerHandle(*const Poller);

unsafe impl Send for PollerHandle {}

impl PollerHandle {
    fn from(poller: &Poller) -> Self {
        Self(poller as *const Poller)
    }

    fn modify(&self, fd: RawFd, interest: Interest) -> nix::Result<()> {
        unsafe { (*self.0).modify(fd, interest) }
    }

    fn remove(&self, fd: RawFd) -> nix::Result<()> {
        unsafe { (*self.0).remove(fd) }
    }
}

fn raise_fd_limit() {
    if let Err(err) = setrlimit(Resource::RLIMIT_NOFILE, MAX_FD as u64, MAX_FD as u64) {
        tracing::warn!("could not raise RLIMIT_NOFILE to {MAX_FD}: {err}");
    }
}

fn bind_listener(cfg: &AppConfig) -> crate::error::Result<(ScopedFd, SocketAddr)> {
    if !(1024..=65535).contains(&cfg.port) {
        return Err(format!("port {} out of allowed range 1024-65535", cfg.port).into());
    }

    let owned = socket(AddressFamily::Inet, SockType::Stream, SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC, SockProtocol::Tcp)?;
    let scoped = ScopedFd::new(owned);

    setsockopt(&scoped, sockopt::ReuseAddr, &true)?;
    setsockopt(&scoped, sockopt::ReusePort, &true)?;
    setsockopt(&scoped, sockopt::TcpNoDelay, &true)?;
    setsockopt(&scoped, sockopt::RcvBuf, &(256 * 1024))?;
    setsockopt(&scoped, sockopt::SndBuf, &(256 * 1024))?;
    if cfg.linger {
        setsockopt(&scoped, sockopt::Linger, &nix::libc::linger { l_onoff: 1, l_linger: 0 })?;
    }

    let addr: std::net::Ipv4Addr = cfg.host.parse().map_err(|_| format!("invalid host '{}'", cfg.host))?;
    let sockaddr = SockaddrIn::from(std::net::SocketAddrV4::new(addr, cfg.port));
    bind(scoped.as_raw_fd(), &sockaddr)?;
    listen(&scoped, Backlog::new(1024).expect("1024 is a valid backlog"))?;

    let server_addr = SocketAddr::new(std::net::IpAddr::V4(addr), cfg.port);
    Ok((scoped, server_addr))
}

fn peer_addr_of(fd: RawFd) -> Option<SocketAddr> {
    use nix::sys::socket::getpeername;
    // SAFETY: `fd` is a just-accepted socket still owned by the caller for
    // the duration of this call.
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let addr: SockaddrIn = getpeername(&borrowed).ok()?;
    Some(SocketAddr::new(std::net::IpAddr::V4(addr.ip()), addr.port()))
}
