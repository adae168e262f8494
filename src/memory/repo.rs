//! Standalone remote block repository.
//!
//! A [`BlockRepository`] serves page bytes over TCP for any number of
//! [`RemotePersister`](super::RemotePersister) clients. Pages live in a
//! RAM-resident map up to a fixed budget; the overflow spills to a local
//! persister on disk. Clients register once for a client id, and the
//! repository namespaces their pages as `(client_id << 32) | block_addr`.
//!
//! Every connection carries exactly one operation and is closed afterwards;
//! each operation is atomic under the repository mutex. The resident-map
//! eviction victim is simply the first entry of the map — deliberately
//! simpler than the allocator-side LRU, since clients re-load hot pages
//! anyway.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use super::persist::{BlockPersister, LocalPersister, RepoOp};
use super::PersistError;
use crate::net::{NetError, SessionControl, TcpServer, TcpStream};

struct RepoState {
    loaded: HashMap<u64, Vec<u8>>,
    persister: LocalPersister,
    max_resident: usize,
    next_client: u32,
}

impl RepoState {
    /// Spill the first resident entry, returning its buffer for reuse.
    fn evict(&mut self) -> Result<Option<Vec<u8>>, PersistError> {
        let Some(key) = self.loaded.keys().next().copied() else {
            return Ok(None);
        };
        let mem = self.loaded.remove(&key).expect("key just listed");
        self.persister.save(key, &mem)?;
        debug!("repository spilled page {key:#x}");
        Ok(Some(mem))
    }
}

/// TCP server holding client pages, RAM-first with disk spill.
pub struct BlockRepository {
    server: TcpServer,
    state: Arc<Mutex<RepoState>>,
    page_size: u32,
}

impl BlockRepository {
    /// Bind `addr`, keeping at most `max_resident` pages of `page_size`
    /// bytes in RAM and spilling the rest under `dir`.
    pub fn bind(
        addr: SocketAddrV4,
        max_resident: usize,
        page_size: u32,
        dir: impl Into<PathBuf>,
        n_threads: usize,
    ) -> Result<Self, NetError> {
        let server = TcpServer::bind(addr, n_threads)?;
        Ok(Self {
            server,
            state: Arc::new(Mutex::new(RepoState {
                loaded: HashMap::new(),
                persister: LocalPersister::new(dir),
                max_resident: max_resident.max(1),
                next_client: 0,
            })),
            page_size,
        })
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn start(&self) -> Result<(), NetError> {
        let state = Arc::clone(&self.state);
        let page_size = self.page_size;
        self.server.start(move |stream| {
            handle_session(&state, page_size, stream);
            // One operation per connection.
            SessionControl::Close
        })?;
        info!("block repository serving on port {}", self.port());
        Ok(())
    }

    /// Ask the server to stop without waiting; safe from signal handlers.
    pub fn request_stop(&self) {
        self.server.request_stop();
    }

    pub fn stop(&self) {
        self.server.stop();
    }

    pub fn join(&self) {
        self.server.join();
    }

    /// Number of pages currently resident in RAM.
    pub fn resident_count(&self) -> usize {
        self.state.lock().unwrap().loaded.len()
    }
}

fn handle_session(state: &Mutex<RepoState>, page_size: u32, stream: &mut TcpStream) {
    let Ok(op) = stream.recv_u32() else { return };
    let Ok(op) = RepoOp::try_from(op) else {
        warn!("unknown repository op {op:?}");
        return;
    };

    if op == RepoOp::Close {
        return;
    }
    if op == RepoOp::Register {
        let mut state = state.lock().unwrap();
        state.next_client += 1;
        let id = state.next_client;
        drop(state);
        info!("repository client {id} registered");
        let _ = stream.send_u32(id);
        return;
    }

    let Ok(client) = stream.recv_u32() else { return };
    let Ok(addr) = stream.recv_u32() else { return };
    let key = ((client as u64) << 32) | addr as u64;

    let result = match op {
        RepoOp::Store => store(state, key, page_size, stream),
        RepoOp::Exists => exists(state, key, stream),
        RepoOp::Load => load(state, key, page_size, stream),
        RepoOp::Erase => erase(state, key),
        RepoOp::Register | RepoOp::Close => unreachable!("handled above"),
    };
    if let Err(e) = result {
        warn!("repository {op:?} on page {key:#x} failed: {e}");
    }
}

fn store(
    state: &Mutex<RepoState>,
    key: u64,
    page_size: u32,
    stream: &mut TcpStream,
) -> Result<(), PersistError> {
    let mut state = state.lock().unwrap();

    let mut mem = match state.loaded.remove(&key) {
        Some(mem) => mem,
        None => {
            let reclaimed = if state.loaded.len() >= state.max_resident {
                state.evict()?
            } else {
                None
            };
            reclaimed.unwrap_or_else(|| vec![0u8; page_size as usize])
        }
    };

    stream.recv_raw(&mut mem)?;
    state.loaded.insert(key, mem);
    Ok(())
}

fn exists(state: &Mutex<RepoState>, key: u64, stream: &mut TcpStream) -> Result<(), PersistError> {
    let mut state = state.lock().unwrap();
    let found = state.loaded.contains_key(&key) || state.persister.exists(key)?;
    stream.send_u32(found as u32)?;
    Ok(())
}

/// Send the page back and drop it; a load consumes the entry.
fn load(
    state: &Mutex<RepoState>,
    key: u64,
    page_size: u32,
    stream: &mut TcpStream,
) -> Result<(), PersistError> {
    let mut state = state.lock().unwrap();

    let mem = match state.loaded.remove(&key) {
        Some(mem) => mem,
        None => {
            let mut mem = vec![0u8; page_size as usize];
            state.persister.load(key, &mut mem)?;
            mem
        }
    };
    stream.send_raw(&mem)?;
    Ok(())
}

fn erase(state: &Mutex<RepoState>, key: u64) -> Result<(), PersistError> {
    let mut state = state.lock().unwrap();
    if state.loaded.remove(&key).is_none() {
        state.persister.erase(key)?;
    }
    Ok(())
}
