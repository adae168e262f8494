//! Client-side connection pool with leasing semantics.
//!
//! A [`TcpPool`] manages up to `max` connections to a single server
//! address. [`get`](TcpPool::get) leases one — dialing a new connection
//! while under the cap, waiting for a returned one otherwise. Leases are
//! scoped: the [`Session`] guard hands the stream back on drop, and an
//! errored stream is closed and its slot reclaimed instead of being reused.

use std::net::SocketAddrV4;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use log::trace;

use super::{NetError, TcpStream};
use crate::sync::Semaphore;

pub struct TcpPool {
    addr: SocketAddrV4,
    max: usize,
    state: Mutex<PoolState>,
    returned: Semaphore,
}

struct PoolState {
    open: usize,
    idle: Vec<TcpStream>,
}

impl TcpPool {
    pub fn new(addr: SocketAddrV4, max: usize) -> Arc<Self> {
        assert!(max > 0);
        Arc::new(Self {
            addr,
            max,
            state: Mutex::new(PoolState {
                open: 0,
                idle: Vec::new(),
            }),
            returned: Semaphore::new(),
        })
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// Lease a stream, blocking while the pool is at capacity with no idle
    /// connection.
    pub fn get(self: &Arc<Self>) -> Result<Session, NetError> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(stream) = state.idle.pop() {
                    return Ok(Session {
                        stream: Some(stream),
                        pool: Arc::clone(self),
                    });
                }
                if state.open < self.max {
                    state.open += 1;
                    drop(state);
                    match TcpStream::connect(self.addr) {
                        Ok(stream) => {
                            trace!("pool dialed {} ({} open)", self.addr, self.open_count());
                            return Ok(Session {
                                stream: Some(stream),
                                pool: Arc::clone(self),
                            });
                        }
                        Err(e) => {
                            self.state.lock().unwrap().open -= 1;
                            return Err(e);
                        }
                    }
                }
            }
            self.returned.wait();
        }
    }

    /// Number of connections currently open (leased or idle).
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open
    }

    fn release(&self, stream: TcpStream) {
        let mut state = self.state.lock().unwrap();
        if stream.is_open() {
            state.idle.push(stream);
        } else {
            // Broken connection: drop it and free the slot.
            state.open -= 1;
        }
        drop(state);
        self.returned.post();
    }
}

/// Scoped lease of a pooled stream; returns it to the pool on drop.
pub struct Session {
    stream: Option<TcpStream>,
    pool: Arc<TcpPool>,
}

impl Session {
    /// Close the underlying connection; the pool reclaims the slot when the
    /// session drops.
    pub fn kill(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
    }
}

impl Deref for Session {
    type Target = TcpStream;

    fn deref(&self) -> &TcpStream {
        self.stream.as_ref().expect("session holds a stream")
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("session holds a stream")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.release(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;
    use std::time::Duration;

    use super::super::listener::TcpListener;
    use super::*;

    /// Accept connections forever, echoing one u32 per request.
    fn echo_server() -> SocketAddrV4 {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.addr();
        thread::spawn(move || {
            while let Ok(mut stream) = listener.accept() {
                thread::spawn(move || {
                    while let Ok(v) = stream.recv_u32() {
                        if stream.send_u32(v).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    #[test]
    fn leases_and_reuses_connections() {
        let addr = echo_server();
        let pool = TcpPool::new(addr, 2);

        {
            let mut session = pool.get().unwrap();
            session.send_u32(11).unwrap();
            assert_eq!(session.recv_u32().unwrap(), 11);
        }
        assert_eq!(pool.open_count(), 1);

        // The released stream is reused rather than redialed.
        {
            let mut session = pool.get().unwrap();
            session.send_u32(22).unwrap();
            assert_eq!(session.recv_u32().unwrap(), 22);
        }
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn waits_at_capacity() {
        let addr = echo_server();
        let pool = TcpPool::new(addr, 1);

        let held = pool.get().unwrap();
        let pool2 = Arc::clone(&pool);
        let waiter = thread::spawn(move || {
            let mut session = pool2.get().unwrap();
            session.send_u32(5).unwrap();
            session.recv_u32().unwrap()
        });

        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert_eq!(waiter.join().unwrap(), 5);
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn errored_streams_are_reclaimed() {
        let addr = echo_server();
        let pool = TcpPool::new(addr, 1);

        {
            let mut session = pool.get().unwrap();
            session.kill();
        }
        assert_eq!(pool.open_count(), 0);

        // The slot is free again and a fresh dial succeeds.
        let mut session = pool.get().unwrap();
        session.send_u32(9).unwrap();
        assert_eq!(session.recv_u32().unwrap(), 9);
    }
}
