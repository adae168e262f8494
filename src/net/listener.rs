//! TCP listener wrapper.

use std::net::{SocketAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, RawFd};

use super::{NetError, TcpStream};

/// Bound listening socket. Binding port 0 asks the OS for a free port; the
/// effective one is reported by [`addr`](Self::addr).
pub struct TcpListener {
    inner: std::net::TcpListener,
    addr: SocketAddrV4,
}

impl TcpListener {
    pub fn bind(addr: SocketAddrV4) -> Result<Self, NetError> {
        let inner = std::net::TcpListener::bind(addr)?;
        let addr = match inner.local_addr()? {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => return Err(NetError::Protocol("expected an ipv4 listener")),
        };
        Ok(Self { inner, addr })
    }

    /// The bound address, with the OS-assigned port filled in.
    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Accept one connection.
    pub fn accept(&self) -> Result<TcpStream, NetError> {
        let (stream, peer) = self.inner.accept()?;
        let peer = match peer {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => return Err(NetError::Protocol("expected an ipv4 peer")),
        };
        // Accepted sockets do not inherit the listener's non-blocking mode
        // flag reliably; force blocking for the typed read/write loops.
        stream.set_nonblocking(false)?;
        Ok(TcpStream::from_accepted(stream, peer))
    }

    pub(crate) fn set_nonblocking(&self, nonblocking: bool) -> Result<(), NetError> {
        self.inner.set_nonblocking(nonblocking)?;
        Ok(())
    }

    pub(crate) fn try_accept(&self) -> Result<Option<TcpStream>, NetError> {
        match self.accept() {
            Ok(stream) => Ok(Some(stream)),
            Err(NetError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
