//! Blocking TCP building blocks.
//!
//! This module provides the transport primitives the rest of the crate is
//! built on: a typed blocking [`TcpStream`], a [`TcpListener`], a leasing
//! [`TcpPool`] for client connections, and the epoll-driven [`TcpServer`]
//! that dispatches ready sockets to a worker pool.
//!
//! # Key Components
//!
//! - [`TcpStream`]: typed little-endian send/receive with a sticky error
//!   flag — after the first failed or partial transfer, every later
//!   operation short-circuits until the stream is discarded.
//! - [`TcpServer`]: one poller thread plus `n` workers; one-shot epoll
//!   arming guarantees at most one worker is active per connection.
//! - [`TcpPool`] / [`Session`]: capped client-side connection leasing.
//!
//! # See Also
//! - [`crate::actor`]: the actor runtime wiring these pieces together.
pub mod listener;
pub mod pool;
pub mod server;
pub mod stream;
mod worker;

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

pub use listener::TcpListener;
pub use pool::{Session, TcpPool};
pub use server::{SessionControl, TcpServer};
pub use stream::TcpStream;

/// List of possible errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("malformed address '{0}'")]
    Addr(String),
    #[error("stream is closed or errored")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

/// Parse an `A.B.C.D[:port]` address; the port defaults to 0.
pub fn parse_addr(text: &str) -> Result<SocketAddrV4, NetError> {
    let (ip, port) = match text.split_once(':') {
        Some((ip, port)) => (
            ip,
            port.parse::<u16>()
                .map_err(|_| NetError::Addr(text.to_string()))?,
        ),
        None => (text, 0),
    };
    let ip: Ipv4Addr = ip.parse().map_err(|_| NetError::Addr(text.to_string()))?;
    Ok(SocketAddrV4::new(ip, port))
}
