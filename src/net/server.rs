//! Epoll-driven TCP server with a one-shot dispatch model.
//!
//! One dedicated poller thread blocks in `epoll_wait` over the listening
//! socket, a self-pipe wake channel, and every accepted connection. Client
//! sockets are armed `EPOLLIN | EPOLLONESHOT`: once a socket is reported
//! ready it will not be reported again until explicitly re-armed, so at most
//! one worker is ever handling a given connection and callbacks on the same
//! socket never interleave — without any per-socket lock discipline in the
//! handler.
//!
//! Per-socket lifecycle:
//!
//! ```text
//! accept -> ARMED --EPOLLIN--> DISPATCHED --handler keeps open--> ARMED
//!                                        \--handler closes/peer eof--> REMOVED
//! ```
//!
//! The poller only harvests readiness and accepts; the re-arm/remove half of
//! the cycle lives with the session workers (see
//! [`worker`](super::worker)). The self-pipe serves two purposes: shutdown
//! wakeups, and re-entering `epoll_wait` after a worker changes the
//! interest list.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use super::NetError;
use super::listener::TcpListener;
use super::stream::TcpStream;
use super::worker::{Dispatch, SessionWorkers};

/// Handler verdict for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Re-arm the socket and wait for more data.
    KeepOpen,
    /// Remove the socket from the server and close it.
    Close,
}

pub(super) type Handler = Arc<dyn Fn(&mut TcpStream) -> SessionControl + Send + Sync>;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    Ok(())
}

/// Poll state shared between the poller thread and the session workers:
/// the epoll instance, the self-pipe, and the table of live connections.
pub(super) struct PollShared {
    epoll_fd: RawFd,
    wake_read: RawFd,
    wake_write: RawFd,
    running: AtomicBool,
    sockets: Mutex<HashMap<RawFd, Arc<Mutex<TcpStream>>>>,
}

impl PollShared {
    /// Create the epoll instance and the self-pipe, with the pipe's read
    /// end already watched.
    pub(super) fn new() -> io::Result<Self> {
        let epoll_fd = cvt(unsafe { libc::epoll_create1(0) })?;
        let mut pipe_fds = [0 as libc::c_int; 2];
        if let Err(e) = cvt(unsafe { libc::pipe(pipe_fds.as_mut_ptr()) }) {
            unsafe { libc::close(epoll_fd) };
            return Err(e);
        }

        let shared = Self {
            epoll_fd,
            wake_read: pipe_fds[0],
            wake_write: pipe_fds[1],
            running: AtomicBool::new(false),
            sockets: Mutex::new(HashMap::new()),
        };
        set_nonblocking(shared.wake_read)?;
        shared.register(shared.wake_read, false)?;
        Ok(shared)
    }

    /// Kick the poller out of `epoll_wait`.
    pub(super) fn wake(&self) {
        let byte = [b'w'];
        unsafe { libc::write(self.wake_write, byte.as_ptr().cast(), 1) };
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.wake_read, buf.as_mut_ptr().cast(), buf.len()) };
            if n < buf.len() as isize {
                break;
            }
        }
    }

    fn register(&self, fd: RawFd, oneshot: bool) -> io::Result<()> {
        let mut flags = libc::EPOLLIN as u32;
        if oneshot {
            flags |= libc::EPOLLONESHOT as u32;
        }
        let mut event = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        cvt(unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) })?;
        Ok(())
    }

    /// Re-enable one-shot readiness reporting for `fd`.
    pub(super) fn rearm(&self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32 | libc::EPOLLONESHOT as u32,
            u64: fd as u64,
        };
        cvt(unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut event) })?;
        Ok(())
    }

    /// Remove the socket from epoll and drop the server's reference; the
    /// connection closes once the last in-flight handler releases it.
    pub(super) fn remove(&self, fd: RawFd) {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, &mut event) };
        self.sockets.lock().unwrap().remove(&fd);
    }

    /// Start tracking an accepted connection.
    pub(super) fn track(&self, fd: RawFd, socket: Arc<Mutex<TcpStream>>) {
        self.sockets.lock().unwrap().insert(fd, socket);
    }

    pub(super) fn tracked(&self, fd: RawFd) -> Option<Arc<Mutex<TcpStream>>> {
        self.sockets.lock().unwrap().get(&fd).cloned()
    }

    pub(super) fn tracked_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }
}

impl Drop for PollShared {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
            libc::close(self.wake_read);
            libc::close(self.wake_write);
        }
    }
}

/// Epoll acceptor plus session worker crew.
pub struct TcpServer {
    shared: Arc<PollShared>,
    listener: Mutex<Option<TcpListener>>,
    workers: Mutex<Option<Arc<SessionWorkers>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    n_threads: usize,
    port: u16,
}

impl TcpServer {
    /// Bind `addr` (port 0 for an OS-assigned one); `n_threads` session
    /// workers are spawned at [`start`](Self::start). The server accepts
    /// nothing until then.
    pub fn bind(addr: SocketAddrV4, n_threads: usize) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        let shared = Arc::new(PollShared::new()?);
        shared.register(listener.as_raw_fd(), false)?;

        let port = listener.port();
        Ok(Self {
            shared,
            listener: Mutex::new(Some(listener)),
            workers: Mutex::new(None),
            poller: Mutex::new(None),
            n_threads,
            port,
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of connections currently tracked.
    pub fn connection_count(&self) -> usize {
        self.shared.tracked_count()
    }

    /// Spawn the worker crew and the poller thread. `handler` runs on a
    /// worker whenever a connection has data; its verdict decides whether
    /// the socket is re-armed or closed.
    pub fn start<F>(&self, handler: F) -> Result<(), NetError>
    where
        F: Fn(&mut TcpStream) -> SessionControl + Send + Sync + 'static,
    {
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or(NetError::Protocol("server already started"))?;

        self.shared.running.store(true, Ordering::SeqCst);

        let handler: Handler = Arc::new(handler);
        let workers = Arc::new(SessionWorkers::spawn(
            self.n_threads,
            Arc::clone(&self.shared),
            handler,
        ));
        *self.workers.lock().unwrap() = Some(Arc::clone(&workers));

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("tcp-poller".to_string())
            .spawn(move || poll_loop(shared, listener, workers))
            .map_err(NetError::Io)?;

        *self.poller.lock().unwrap() = Some(handle);
        info!("server listening on port {}", self.port);
        Ok(())
    }

    /// Ask the poller to exit without waiting for it. Safe to call from a
    /// worker thread.
    pub fn request_stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake();
    }

    /// Wait for the poller thread to exit.
    pub fn join(&self) {
        let handle = self.poller.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn stop(&self) {
        self.request_stop();
        self.join();
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(shared: Arc<PollShared>, listener: TcpListener, workers: Arc<SessionWorkers>) {
    let listener_fd = listener.as_raw_fd();
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; 16];

    while shared.running.load(Ordering::SeqCst) {
        let n = unsafe {
            libc::epoll_wait(shared.epoll_fd, events.as_mut_ptr(), events.len() as i32, -1)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("epoll_wait failed: {err}");
            break;
        }

        for event in &events[..n as usize] {
            let fd = event.u64 as RawFd;
            if fd == listener_fd {
                accept_ready(&shared, &listener);
            } else if fd == shared.wake_read {
                shared.drain_wake();
            } else if let Some(socket) = shared.tracked(fd) {
                workers.submit(Dispatch { fd, socket });
            }
        }
    }
    debug!("poller exiting");
}

fn accept_ready(shared: &Arc<PollShared>, listener: &TcpListener) {
    loop {
        match listener.try_accept() {
            Ok(Some(stream)) => {
                let fd = stream.as_raw_fd();
                shared.track(fd, Arc::new(Mutex::new(stream)));
                if let Err(e) = shared.register(fd, true) {
                    warn!("failed to watch new connection: {e}");
                    shared.remove(fd);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            }
        }
    }
}
