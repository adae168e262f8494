//! Blocking TCP stream with typed primitives.
//!
//! All integers travel little-endian and fixed-width. The stream carries a
//! sticky error flag: the first failed or partial transfer marks it
//! errored, and every subsequent operation fails fast with
//! [`NetError::Closed`]. Callers recover by constructing a fresh stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddrV4};
use std::os::fd::{AsRawFd, RawFd};

use super::NetError;

pub struct TcpStream {
    inner: std::net::TcpStream,
    peer: SocketAddrV4,
    errored: bool,
}

impl TcpStream {
    /// Dial `addr`.
    pub fn connect(addr: SocketAddrV4) -> Result<Self, NetError> {
        let inner = std::net::TcpStream::connect(addr)?;
        Ok(Self {
            inner,
            peer: addr,
            errored: false,
        })
    }

    /// Wrap an accepted socket.
    pub(crate) fn from_accepted(inner: std::net::TcpStream, peer: SocketAddrV4) -> Self {
        Self {
            inner,
            peer,
            errored: false,
        }
    }

    /// The remote end of the connection.
    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// False once the stream has errored or been closed.
    pub fn is_open(&self) -> bool {
        !self.errored
    }

    /// Shut the connection down; the stream is unusable afterwards.
    pub fn close(&mut self) {
        let _ = self.inner.shutdown(Shutdown::Both);
        self.errored = true;
    }

    pub fn send_u8(&mut self, v: u8) -> Result<(), NetError> {
        self.send_raw(&[v])
    }

    pub fn send_u32(&mut self, v: u32) -> Result<(), NetError> {
        self.send_raw(&v.to_le_bytes())
    }

    pub fn send_u64(&mut self, v: u64) -> Result<(), NetError> {
        self.send_raw(&v.to_le_bytes())
    }

    pub fn send_i32(&mut self, v: i32) -> Result<(), NetError> {
        self.send_raw(&v.to_le_bytes())
    }

    pub fn send_i64(&mut self, v: i64) -> Result<(), NetError> {
        self.send_raw(&v.to_le_bytes())
    }

    pub fn send_f32(&mut self, v: f32) -> Result<(), NetError> {
        self.send_raw(&v.to_le_bytes())
    }

    pub fn send_f64(&mut self, v: f64) -> Result<(), NetError> {
        self.send_raw(&v.to_le_bytes())
    }

    /// Send string bytes; the length travels separately.
    pub fn send_str(&mut self, v: &str) -> Result<(), NetError> {
        self.send_raw(v.as_bytes())
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        if self.errored {
            return Err(NetError::Closed);
        }
        self.write_all(bytes).map_err(NetError::Io)
    }

    pub fn recv_u8(&mut self) -> Result<u8, NetError> {
        let mut buf = [0u8; 1];
        self.recv_raw(&mut buf)?;
        Ok(buf[0])
    }

    pub fn recv_u32(&mut self) -> Result<u32, NetError> {
        let mut buf = [0u8; 4];
        self.recv_raw(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn recv_u64(&mut self) -> Result<u64, NetError> {
        let mut buf = [0u8; 8];
        self.recv_raw(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn recv_i32(&mut self) -> Result<i32, NetError> {
        let mut buf = [0u8; 4];
        self.recv_raw(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn recv_i64(&mut self) -> Result<i64, NetError> {
        let mut buf = [0u8; 8];
        self.recv_raw(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn recv_f32(&mut self) -> Result<f32, NetError> {
        let mut buf = [0u8; 4];
        self.recv_raw(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn recv_f64(&mut self) -> Result<f64, NetError> {
        let mut buf = [0u8; 8];
        self.recv_raw(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Receive exactly `len` bytes as a UTF-8 string.
    pub fn recv_str(&mut self, len: usize) -> Result<String, NetError> {
        let mut buf = vec![0u8; len];
        self.recv_raw(&mut buf)?;
        String::from_utf8(buf).map_err(|_| NetError::Protocol("invalid utf-8 string"))
    }

    /// Receive exactly `buf.len()` bytes.
    pub fn recv_raw(&mut self, buf: &mut [u8]) -> Result<(), NetError> {
        if self.errored {
            return Err(NetError::Closed);
        }
        self.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                NetError::Closed
            } else {
                NetError::Io(e)
            }
        })
    }
}

// The Read/Write impls let wire codecs stream directly while keeping the
// sticky error flag accurate.
impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.errored {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream errored"));
        }
        match self.inner.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.errored = true;
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"))
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.errored = true;
                Err(e)
            }
        }
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.errored {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream errored"));
        }
        match self.inner.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.errored = true;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;

    use super::super::listener::TcpListener;
    use super::*;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.addr();
        let handle = thread::spawn(move || listener.accept().unwrap());
        let client = TcpStream::connect(addr).unwrap();
        let server = handle.join().unwrap();
        (client, server)
    }

    #[test]
    fn typed_round_trip() {
        let (mut client, mut server) = pair();

        client.send_u8(7).unwrap();
        client.send_u32(0xDEAD_BEEF).unwrap();
        client.send_u64(u64::MAX - 1).unwrap();
        client.send_i32(-5).unwrap();
        client.send_i64(i64::MIN).unwrap();
        client.send_f64(2.5).unwrap();
        client.send_str("ping").unwrap();

        assert_eq!(server.recv_u8().unwrap(), 7);
        assert_eq!(server.recv_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(server.recv_u64().unwrap(), u64::MAX - 1);
        assert_eq!(server.recv_i32().unwrap(), -5);
        assert_eq!(server.recv_i64().unwrap(), i64::MIN);
        assert_eq!(server.recv_f64().unwrap(), 2.5);
        assert_eq!(server.recv_str(4).unwrap(), "ping");
    }

    #[test]
    fn integers_are_little_endian() {
        let (mut client, mut server) = pair();
        client.send_u32(0x0102_0304).unwrap();
        let mut raw = [0u8; 4];
        server.recv_raw(&mut raw).unwrap();
        assert_eq!(raw, [4, 3, 2, 1]);
    }

    #[test]
    fn errors_are_sticky() {
        let (mut client, server) = pair();
        drop(server);

        assert!(matches!(client.recv_u32(), Err(NetError::Closed)));
        assert!(!client.is_open());
        // Later operations short-circuit without touching the socket.
        assert!(matches!(client.send_u32(1), Err(NetError::Closed)));
        assert!(matches!(client.recv_u8(), Err(NetError::Closed)));
    }

    #[test]
    fn close_marks_stream_unusable() {
        let (mut client, _server) = pair();
        client.close();
        assert!(!client.is_open());
        assert!(matches!(client.send_u8(0), Err(NetError::Closed)));
    }
}
