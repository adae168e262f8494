//! Page persistence backends.
//!
//! The allocator hands evicted pages to a [`BlockPersister`] and asks for
//! them back on the next access. Two backends exist: [`LocalPersister`]
//! writes one file per page address under a root directory, and
//! [`RemotePersister`] speaks the block repository protocol over TCP
//! (see [`repo`](super::repo)).
//!
//! `load` consumes the persisted entry: a page is either resident or
//! persisted, never both. A missing entry surfaces as
//! [`PersistError::Missing`], which the allocator uses to tell a freshly
//! allocated page apart from corruption.

use std::fs;
use std::io;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, trace};

use super::PersistError;
use crate::net::TcpStream;

/// Operation codes of the block repository protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoOp {
    Store = 1,
    Exists = 2,
    Load = 3,
    Erase = 4,
    Register = 5,
    Close = 6,
}

impl TryFrom<u32> for RepoOp {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            1 => Ok(RepoOp::Store),
            2 => Ok(RepoOp::Exists),
            3 => Ok(RepoOp::Load),
            4 => Ok(RepoOp::Erase),
            5 => Ok(RepoOp::Register),
            6 => Ok(RepoOp::Close),
            other => Err(other),
        }
    }
}

/// Cumulative persister counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PersistStats {
    pub loads: u64,
    pub saves: u64,
    pub load_elapsed: Duration,
    pub save_elapsed: Duration,
}

/// Load/save/erase of raw page bytes keyed by page address.
pub trait BlockPersister: Send {
    /// True if bytes for `addr` are held by the backend.
    fn exists(&mut self, addr: u64) -> Result<bool, PersistError>;

    /// Fill `buf` with the persisted bytes of `addr` and drop the entry.
    fn load(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), PersistError>;

    /// Persist the bytes of `addr`.
    fn save(&mut self, addr: u64, buf: &[u8]) -> Result<(), PersistError>;

    /// Drop the persisted entry for `addr`, if any.
    fn erase(&mut self, addr: u64) -> Result<(), PersistError>;

    /// Counters accumulated since construction.
    fn stats(&self) -> PersistStats;
}

/// Filesystem-backed persister: one file per page, named by its decimal
/// address, under a root directory.
#[derive(Debug)]
pub struct LocalPersister {
    root: PathBuf,
    stats: PersistStats,
}

impl LocalPersister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stats: PersistStats::default(),
        }
    }

    fn path(&self, addr: u64) -> PathBuf {
        self.root.join(addr.to_string())
    }
}

impl BlockPersister for LocalPersister {
    fn exists(&mut self, addr: u64) -> Result<bool, PersistError> {
        Ok(self.path(addr).is_file())
    }

    fn load(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), PersistError> {
        let path = self.path(addr);
        let start = Instant::now();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PersistError::Missing(addr));
            }
            Err(e) => return Err(e.into()),
        };
        if data.len() != buf.len() {
            return Err(PersistError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("page file {} has {} bytes, expected {}", addr, data.len(), buf.len()),
            )));
        }
        buf.copy_from_slice(&data);
        fs::remove_file(&path)?;

        self.stats.loads += 1;
        self.stats.load_elapsed += start.elapsed();
        trace!("loaded page {addr} from {}", path.display());
        Ok(())
    }

    fn save(&mut self, addr: u64, buf: &[u8]) -> Result<(), PersistError> {
        let start = Instant::now();
        fs::write(self.path(addr), buf)?;
        self.stats.saves += 1;
        self.stats.save_elapsed += start.elapsed();
        trace!("saved page {addr} ({} bytes)", buf.len());
        Ok(())
    }

    fn erase(&mut self, addr: u64) -> Result<(), PersistError> {
        match fs::remove_file(self.path(addr)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn stats(&self) -> PersistStats {
        self.stats
    }
}

/// Persister backed by a remote block repository.
///
/// Registers once at construction to obtain a client id; the repository
/// namespaces every stored page by it. Each operation runs on a fresh
/// connection, mirroring the repository's one-operation-per-session model.
#[derive(Debug)]
pub struct RemotePersister {
    addr: SocketAddrV4,
    client_id: u32,
    stats: PersistStats,
}

impl RemotePersister {
    pub fn connect(addr: SocketAddrV4) -> Result<Self, PersistError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.send_u32(RepoOp::Register as u32)?;
        let client_id = stream.recv_u32()?;
        debug!("registered with repository {addr} as client {client_id}");

        Ok(Self {
            addr,
            client_id,
            stats: PersistStats::default(),
        })
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    fn open(&self, op: RepoOp, addr: u64) -> Result<TcpStream, PersistError> {
        let mut stream = TcpStream::connect(self.addr)?;
        stream.send_u32(op as u32)?;
        stream.send_u32(self.client_id)?;
        stream.send_u32(addr as u32)?;
        Ok(stream)
    }
}

impl BlockPersister for RemotePersister {
    fn exists(&mut self, addr: u64) -> Result<bool, PersistError> {
        let mut stream = self.open(RepoOp::Exists, addr)?;
        Ok(stream.recv_u32()? == 1)
    }

    fn load(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), PersistError> {
        // The LOAD reply carries no status word, only bytes; probe first so
        // a missing entry is not mistaken for a dead connection.
        if !self.exists(addr)? {
            return Err(PersistError::Missing(addr));
        }

        let start = Instant::now();
        let mut stream = self.open(RepoOp::Load, addr)?;
        stream.recv_raw(buf)?;
        self.stats.loads += 1;
        self.stats.load_elapsed += start.elapsed();
        trace!("loaded page {addr} from repository");
        Ok(())
    }

    fn save(&mut self, addr: u64, buf: &[u8]) -> Result<(), PersistError> {
        let start = Instant::now();
        let mut stream = self.open(RepoOp::Store, addr)?;
        stream.send_raw(buf)?;
        self.stats.saves += 1;
        self.stats.save_elapsed += start.elapsed();
        trace!("saved page {addr} to repository ({} bytes)", buf.len());
        Ok(())
    }

    fn erase(&mut self, addr: u64) -> Result<(), PersistError> {
        self.open(RepoOp::Erase, addr)?;
        Ok(())
    }

    fn stats(&self) -> PersistStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn save_load_round_trip() {
        let temp = TempDir::new("persist").unwrap();
        let mut persister = LocalPersister::new(temp.path());

        let page: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        persister.save(7, &page).unwrap();
        assert!(persister.exists(7).unwrap());

        let mut loaded = vec![0u8; 4096];
        persister.load(7, &mut loaded).unwrap();
        assert_eq!(loaded, page);
    }

    #[test]
    fn load_removes_the_file() {
        let temp = TempDir::new("persist").unwrap();
        let mut persister = LocalPersister::new(temp.path());

        persister.save(3, &[1u8; 64]).unwrap();
        let mut buf = [0u8; 64];
        persister.load(3, &mut buf).unwrap();

        assert!(!persister.exists(3).unwrap());
        assert!(matches!(
            persister.load(3, &mut buf),
            Err(PersistError::Missing(3))
        ));
    }

    #[test]
    fn missing_page_is_distinguished() {
        let temp = TempDir::new("persist").unwrap();
        let mut persister = LocalPersister::new(temp.path());

        let mut buf = [0u8; 16];
        assert!(matches!(
            persister.load(42, &mut buf),
            Err(PersistError::Missing(42))
        ));
    }

    #[test]
    fn erase_is_idempotent() {
        let temp = TempDir::new("persist").unwrap();
        let mut persister = LocalPersister::new(temp.path());

        persister.save(5, &[0u8; 8]).unwrap();
        persister.erase(5).unwrap();
        persister.erase(5).unwrap();
        assert!(!persister.exists(5).unwrap());
    }

    #[test]
    fn counters_accumulate() {
        let temp = TempDir::new("persist").unwrap();
        let mut persister = LocalPersister::new(temp.path());

        persister.save(1, &[0u8; 8]).unwrap();
        persister.save(2, &[0u8; 8]).unwrap();
        let mut buf = [0u8; 8];
        persister.load(1, &mut buf).unwrap();

        let stats = persister.stats();
        assert_eq!(stats.saves, 2);
        assert_eq!(stats.loads, 1);
    }
}
