//! The actor system: registry, dispatch, and request correlation.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};

use super::base::Actor;
use super::message::{self, ActorMessage, Protocol};
use super::reference::ActorRef;
use super::ActorError;
use crate::config::ConfigNode;
use crate::memory::list::{ArrayListBase, WIRE_BUFFER_SIZE};
use crate::memory::Allocator;
use crate::net::{SessionControl, TcpPool, TcpServer, TcpStream};
use crate::sync::Semaphore;

/// Connections kept per peer system.
const POOL_CAP: usize = 4;

struct ActorEntry {
    handler: Box<dyn Actor>,
    lock: Mutex<()>,
    atomic: bool,
}

/// Correlation state for in-flight requests. One mutex covers waiters and
/// both response stashes, so store-then-wake and consume-then-unregister
/// are atomic.
#[derive(Default)]
struct RequestTable {
    pending: HashMap<u64, Arc<Semaphore>>,
    responses: HashMap<u64, ConfigNode>,
    lists: HashMap<u64, ArrayListBase>,
}

/// A process-local registry of named actors plus the TCP server that routes
/// traffic to them.
///
/// Created with [`bind`](Self::bind); actors are registered under unique
/// names with [`add`](Self::add) and addressed through [`ActorRef`]s from
/// [`local_actor`](Self::local_actor) / [`remote_actor`](Self::remote_actor).
pub struct ActorSystem {
    server: TcpServer,
    port: u16,
    actors: Mutex<HashMap<String, Arc<ActorEntry>>>,
    requests: Mutex<RequestTable>,
    pools: Mutex<HashMap<SocketAddrV4, Arc<TcpPool>>>,
    last_uid: AtomicU64,
    alloc: Allocator,
}

impl ActorSystem {
    /// Bind `addr` (port 0 for an OS-assigned port) and start serving with
    /// `n_threads` workers, using the global allocator for large payloads.
    pub fn bind(addr: SocketAddrV4, n_threads: usize) -> Result<Arc<Self>, ActorError> {
        Self::bind_with(addr, n_threads, Allocator::global())
    }

    /// Like [`bind`](Self::bind) with an explicit allocator for received
    /// list payloads.
    pub fn bind_with(
        addr: SocketAddrV4,
        n_threads: usize,
        alloc: Allocator,
    ) -> Result<Arc<Self>, ActorError> {
        let server = TcpServer::bind(addr, n_threads)?;
        let port = server.port();

        let system = Arc::new(Self {
            server,
            port,
            actors: Mutex::new(HashMap::new()),
            requests: Mutex::new(RequestTable::default()),
            pools: Mutex::new(HashMap::new()),
            last_uid: AtomicU64::new(0),
            alloc,
        });

        let weak: Weak<Self> = Arc::downgrade(&system);
        system.server.start(move |stream| match weak.upgrade() {
            Some(system) => system.on_session(stream),
            None => SessionControl::Close,
        })?;

        info!("actor system listening on port {port}");
        Ok(system)
    }

    /// The port of the listening server.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register `actor` under `name` and fire `on_start` synchronously.
    pub fn add<A: Actor + 'static>(self: &Arc<Self>, name: &str, actor: A) -> Result<(), ActorError> {
        if name.len() > message::MAX_NAME_LEN {
            return Err(ActorError::NameTooLong);
        }
        let entry = Arc::new(ActorEntry {
            atomic: actor.atomic(),
            handler: Box::new(actor),
            lock: Mutex::new(()),
        });

        {
            let mut actors = self.actors.lock().unwrap();
            if actors.contains_key(name) {
                return Err(ActorError::Duplicate(name.to_string()));
            }
            actors.insert(name.to_string(), Arc::clone(&entry));
        }

        entry.handler.on_start(self);
        debug!("actor '{name}' registered");
        Ok(())
    }

    /// Remove the actor, firing `on_quit`. Unknown names are ignored.
    pub fn remove(self: &Arc<Self>, name: &str) {
        let entry = self.actors.lock().unwrap().remove(name);
        if let Some(entry) = entry {
            entry.handler.on_quit(self);
            debug!("actor '{name}' removed");
        }
    }

    /// A reference to an actor registered in this system.
    ///
    /// Local references use the TCP loopback to the system's own server so
    /// local and remote sends have identical semantics.
    pub fn local_actor(self: &Arc<Self>, name: &str) -> Result<ActorRef, ActorError> {
        if !self.actors.lock().unwrap().contains_key(name) {
            return Err(ActorError::Unknown(name.to_string()));
        }
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, self.port);
        Ok(ActorRef::new(name.to_string(), addr, true, Arc::clone(self)))
    }

    /// A reference to an actor in the system at `addr`, verified with an
    /// existence round-trip.
    pub fn remote_actor(self: &Arc<Self>, name: &str, addr: SocketAddrV4) -> Result<ActorRef, ActorError> {
        let pool = self.pool_for(addr);
        let mut session = pool.get()?;
        session.send_u32(Protocol::ExistReq as u32)?;
        message::write_name(&mut session, name)?;
        if session.recv_u32()? != 1 {
            return Err(ActorError::Unknown(name.to_string()));
        }

        let is_local = addr.port() == self.port && addr.ip().is_loopback();
        Ok(ActorRef::new(name.to_string(), addr, is_local, Arc::clone(self)))
    }

    /// Ask the server to stop accepting traffic without waiting for it.
    pub fn request_stop(&self) {
        self.server.request_stop();
    }

    /// Stop the system: quit every actor, fail in-flight futures, and shut
    /// the server down.
    pub fn stop(self: &Arc<Self>) {
        self.server.request_stop();
        self.server.join();
        self.teardown();
    }

    /// Wait for the server to stop (e.g. on a kill frame), then tear down.
    pub fn join(self: &Arc<Self>) {
        self.server.join();
        self.teardown();
    }

    fn teardown(self: &Arc<Self>) {
        let drained: Vec<_> = {
            let mut actors = self.actors.lock().unwrap();
            actors.drain().collect()
        };
        for (name, entry) in drained {
            entry.handler.on_quit(self);
            debug!("actor '{name}' removed");
        }

        // Unblock every in-flight future; with its response missing, each
        // surfaces an error to its caller.
        let table = self.requests.lock().unwrap();
        for waiter in table.pending.values() {
            waiter.post();
        }
    }

    /*
     * ================================================================
     * Request correlation
     * ================================================================
     */

    pub(super) fn next_uid(&self) -> u64 {
        self.last_uid.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(super) fn register_request(&self, uid: u64) -> Arc<Semaphore> {
        let waiter = Arc::new(Semaphore::new());
        self.requests
            .lock()
            .unwrap()
            .pending
            .insert(uid, Arc::clone(&waiter));
        waiter
    }

    pub(super) fn unregister_request(&self, uid: u64) {
        let mut table = self.requests.lock().unwrap();
        table.pending.remove(&uid);
        table.responses.remove(&uid);
        table.lists.remove(&uid);
    }

    pub(super) fn take_response(&self, uid: u64) -> Option<ConfigNode> {
        let mut table = self.requests.lock().unwrap();
        table.pending.remove(&uid);
        table.responses.remove(&uid)
    }

    pub(super) fn take_list_response(&self, uid: u64) -> Option<ArrayListBase> {
        let mut table = self.requests.lock().unwrap();
        table.pending.remove(&uid);
        table.lists.remove(&uid)
    }

    /*
     * ================================================================
     * Outbound traffic
     * ================================================================
     */

    fn pool_for(&self, addr: SocketAddrV4) -> Arc<TcpPool> {
        let mut pools = self.pools.lock().unwrap();
        Arc::clone(
            pools
                .entry(addr)
                .or_insert_with(|| TcpPool::new(addr, POOL_CAP)),
        )
    }

    /// Send one frame to the system at `addr` over a pooled connection.
    pub(super) fn send_frame(&self, addr: SocketAddrV4, frame: &ActorMessage) -> Result<(), ActorError> {
        let pool = self.pool_for(addr);
        let mut session = pool.get()?;
        frame.write_to(&mut session)
    }

    fn send_response(
        &self,
        addr: SocketAddrV4,
        uid: u64,
        content: ConfigNode,
    ) -> Result<(), ActorError> {
        self.send_frame(addr, &ActorMessage::response(uid, content))
    }

    fn send_list_response(
        &self,
        addr: SocketAddrV4,
        uid: u64,
        list: &ArrayListBase,
    ) -> Result<(), ActorError> {
        let pool = self.pool_for(addr);
        let mut session = pool.get()?;
        session.send_u32(Protocol::RespBig as u32)?;
        session.send_u64(uid)?;
        list.send_to(&mut *session, WIRE_BUFFER_SIZE)?;
        Ok(())
    }

    /*
     * ================================================================
     * Inbound dispatch
     * ================================================================
     */

    fn on_session(self: Arc<Self>, stream: &mut TcpStream) -> SessionControl {
        let Ok(id) = stream.recv_u32() else {
            return SessionControl::Close;
        };
        let Ok(kind) = Protocol::try_from(id) else {
            warn!("unknown frame id {id}, closing session");
            return SessionControl::Close;
        };

        match kind {
            Protocol::ExistReq => self.on_exist(stream),
            Protocol::Msg => self.on_msg(stream),
            Protocol::Req => self.on_request(stream),
            Protocol::ReqBig => self.on_request_big(stream),
            Protocol::Resp => self.on_response(stream),
            Protocol::RespBig => self.on_response_big(stream),
            Protocol::KillAll => {
                info!("kill frame received, stopping system");
                self.server.request_stop();
                SessionControl::Close
            }
        }
    }

    fn on_exist(&self, stream: &mut TcpStream) -> SessionControl {
        let Ok(name) = message::read_name(stream) else {
            return SessionControl::Close;
        };
        let exists = self.actors.lock().unwrap().contains_key(&name);
        match stream.send_u32(exists as u32) {
            Ok(()) => SessionControl::KeepOpen,
            Err(_) => SessionControl::Close,
        }
    }

    fn on_msg(self: Arc<Self>, stream: &mut TcpStream) -> SessionControl {
        let Ok(frame) = ActorMessage::read_body(stream, Protocol::Msg) else {
            return SessionControl::Close;
        };
        let Some(content) = frame.content else {
            return SessionControl::Close;
        };

        let entry = self.actors.lock().unwrap().get(&frame.target).cloned();
        let Some(entry) = entry else {
            debug!("message for unknown actor '{}'", frame.target);
            return SessionControl::Close;
        };

        let _guard = entry.atomic.then(|| entry.lock.lock().unwrap());
        if let Err(e) = entry.handler.on_message(&self, &content) {
            warn!("actor '{}' failed on message: {e}", frame.target);
        }
        SessionControl::KeepOpen
    }

    fn on_request(self: Arc<Self>, stream: &mut TcpStream) -> SessionControl {
        let peer_ip = *stream.peer().ip();
        let Ok(frame) = ActorMessage::read_body(stream, Protocol::Req) else {
            return SessionControl::Close;
        };
        let Some(content) = frame.content.clone() else {
            return SessionControl::Close;
        };

        let entry = self.actors.lock().unwrap().get(&frame.target).cloned();
        let Some(entry) = entry else {
            debug!("request for unknown actor '{}'", frame.target);
            return SessionControl::Close;
        };

        let result = {
            let _guard = entry.atomic.then(|| entry.lock.lock().unwrap());
            entry.handler.on_request(&self, &content)
        };
        match result {
            Ok(reply) => {
                let sender = frame.sender_addr(peer_ip);
                if let Err(e) = self.send_response(sender, frame.uid, reply) {
                    warn!("failed to respond to {sender}: {e}");
                    return SessionControl::Close;
                }
                SessionControl::KeepOpen
            }
            Err(e) => {
                // No response travels; the requester's future times out.
                warn!("actor '{}' failed on request: {e}", frame.target);
                SessionControl::Close
            }
        }
    }

    fn on_request_big(self: Arc<Self>, stream: &mut TcpStream) -> SessionControl {
        let peer_ip = *stream.peer().ip();
        let Ok(frame) = ActorMessage::read_body(stream, Protocol::ReqBig) else {
            return SessionControl::Close;
        };
        let Some(content) = frame.content.clone() else {
            return SessionControl::Close;
        };

        let entry = self.actors.lock().unwrap().get(&frame.target).cloned();
        let Some(entry) = entry else {
            debug!("list request for unknown actor '{}'", frame.target);
            return SessionControl::Close;
        };

        let result = {
            let _guard = entry.atomic.then(|| entry.lock.lock().unwrap());
            entry.handler.on_request_list(&self, &content)
        };
        match result {
            Ok(list) => {
                let sender = frame.sender_addr(peer_ip);
                if let Err(e) = self.send_list_response(sender, frame.uid, &list) {
                    warn!("failed to send list response to {sender}: {e}");
                    return SessionControl::Close;
                }
                SessionControl::KeepOpen
            }
            Err(e) => {
                warn!("actor '{}' failed on list request: {e}", frame.target);
                SessionControl::Close
            }
        }
    }

    fn on_response(&self, stream: &mut TcpStream) -> SessionControl {
        let Ok(frame) = ActorMessage::read_body(stream, Protocol::Resp) else {
            return SessionControl::Close;
        };
        let Some(content) = frame.content else {
            return SessionControl::Close;
        };

        let mut table = self.requests.lock().unwrap();
        match table.pending.get(&frame.uid).cloned() {
            Some(waiter) => {
                table.responses.insert(frame.uid, content);
                waiter.post();
            }
            None => debug!("dropping response {} with no waiter", frame.uid),
        }
        SessionControl::KeepOpen
    }

    fn on_response_big(&self, stream: &mut TcpStream) -> SessionControl {
        let Ok(frame) = ActorMessage::read_body(stream, Protocol::RespBig) else {
            return SessionControl::Close;
        };
        // Always drain the payload so the connection stays frame-aligned;
        // an abandoned list frees its pages on drop.
        let list = match ArrayListBase::recv_from(stream, &self.alloc, WIRE_BUFFER_SIZE) {
            Ok(list) => list,
            Err(e) => {
                warn!("failed to receive list response {}: {e}", frame.uid);
                return SessionControl::Close;
            }
        };

        let mut table = self.requests.lock().unwrap();
        match table.pending.get(&frame.uid).cloned() {
            Some(waiter) => {
                table.lists.insert(frame.uid, list);
                waiter.post();
            }
            None => debug!("dropping list response {} with no waiter", frame.uid),
        }
        SessionControl::KeepOpen
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        let table = self.requests.lock().unwrap();
        table.pending.len() + table.responses.len() + table.lists.len()
    }
}

/// Ask the system at `addr` to terminate.
pub fn kill_system(addr: SocketAddrV4) -> Result<(), ActorError> {
    let mut stream = TcpStream::connect(addr)?;
    stream.send_u32(Protocol::KillAll as u32)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::thread;
    use std::time::Duration;

    use tempdir::TempDir;

    use super::*;
    use crate::memory::{CacheArrayList, LocalPersister};

    fn test_system() -> Arc<ActorSystem> {
        ActorSystem::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 4).unwrap()
    }

    struct Echo;

    impl Actor for Echo {
        fn on_request(
            &self,
            _system: &Arc<ActorSystem>,
            msg: &ConfigNode,
        ) -> Result<ConfigNode, ActorError> {
            Ok(msg.clone())
        }
    }

    struct Sink {
        received: Arc<AtomicU32>,
    }

    impl Actor for Sink {
        fn on_message(
            &self,
            _system: &Arc<ActorSystem>,
            msg: &ConfigNode,
        ) -> Result<(), ActorError> {
            self.received
                .fetch_add(msg.int_or("v", 0) as u32, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn request_resolves_with_echo() {
        let system = test_system();
        system.add("echo", Echo).unwrap();

        let echo = system.local_actor("echo").unwrap();
        let mut msg = ConfigNode::dict();
        msg.set("v", 42i64);

        let started = std::time::Instant::now();
        let reply = echo
            .request(msg, Duration::from_secs(5))
            .unwrap()
            .wait()
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(reply.int_or("v", 0), 42);
        assert_eq!(system.pending_count(), 0);

        system.stop();
    }

    #[test]
    fn messages_reach_actors_across_systems() {
        let server = test_system();
        let received = Arc::new(AtomicU32::new(0));
        server
            .add(
                "sink",
                Sink {
                    received: Arc::clone(&received),
                },
            )
            .unwrap();

        let client = test_system();
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.port());
        let sink = client.remote_actor("sink", addr).unwrap();

        for v in [1i64, 2, 3] {
            let mut msg = ConfigNode::dict();
            msg.set("v", v);
            sink.send(msg).unwrap();
        }

        for _ in 0..100 {
            if received.load(Ordering::SeqCst) == 6 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(received.load(Ordering::SeqCst), 6);

        client.stop();
        server.stop();
    }

    #[test]
    fn cross_system_request() {
        let server = test_system();
        server.add("echo", Echo).unwrap();

        let client = test_system();
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.port());
        let echo = client.remote_actor("echo", addr).unwrap();

        let mut msg = ConfigNode::dict();
        msg.set("from", "client");
        let reply = echo
            .request(msg, Duration::from_secs(5))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(reply.str_or("from", ""), "client");

        client.stop();
        server.stop();
    }

    #[test]
    fn unknown_remote_actor_is_rejected() {
        let server = test_system();
        let client = test_system();
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.port());

        assert!(matches!(
            client.remote_actor("nobody", addr),
            Err(ActorError::Unknown(_))
        ));

        client.stop();
        server.stop();
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let system = test_system();
        system.add("echo", Echo).unwrap();
        assert!(matches!(
            system.add("echo", Echo),
            Err(ActorError::Duplicate(_))
        ));
        system.stop();
    }

    struct Sleeper;

    impl Actor for Sleeper {
        fn on_request(
            &self,
            _system: &Arc<ActorSystem>,
            _msg: &ConfigNode,
        ) -> Result<ConfigNode, ActorError> {
            thread::sleep(Duration::from_millis(400));
            Ok(ConfigNode::Bool(true))
        }
    }

    #[test]
    fn timeout_unregisters_and_drops_late_response() {
        let system = test_system();
        system.add("sleeper", Sleeper).unwrap();

        let sleeper = system.local_actor("sleeper").unwrap();
        let future = sleeper
            .request(ConfigNode::dict(), Duration::from_millis(50))
            .unwrap();
        assert!(matches!(future.wait(), Err(ActorError::Timeout)));
        assert_eq!(system.pending_count(), 0);

        // The response eventually arrives and is dropped without a waiter.
        thread::sleep(Duration::from_millis(500));
        assert_eq!(system.pending_count(), 0);

        system.stop();
    }

    struct Overlap {
        active: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
    }

    impl Actor for Overlap {
        fn on_request(
            &self,
            _system: &Arc<ActorSystem>,
            _msg: &ConfigNode,
        ) -> Result<ConfigNode, ActorError> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(30));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ConfigNode::Bool(true))
        }
    }

    #[test]
    fn atomic_actor_serializes_invocations() {
        let system = test_system();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        system
            .add(
                "guarded",
                Overlap {
                    active: Arc::clone(&active),
                    overlaps: Arc::clone(&overlaps),
                },
            )
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let system = Arc::clone(&system);
                thread::spawn(move || {
                    let guarded = system.local_actor("guarded").unwrap();
                    guarded
                        .request(ConfigNode::dict(), Duration::from_secs(10))
                        .unwrap()
                        .wait()
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        system.stop();
    }

    struct Counter;

    impl Actor for Counter {
        fn on_request_list(
            &self,
            system: &Arc<ActorSystem>,
            msg: &ConfigNode,
        ) -> Result<ArrayListBase, ActorError> {
            let n = msg.int_or("n", 0) as i32;
            let mut list = CacheArrayList::<i32>::new_in(&system.alloc)?;
            let mut buf = [0i32; 1024];
            let mut pusher = list.pusher(0, &mut buf);
            for i in 0..n {
                pusher.push(i)?;
            }
            pusher.flush()?;
            drop(pusher);
            Ok(list.into_base())
        }
    }

    #[test]
    fn large_response_round_trips() {
        let temp = TempDir::new("actors").unwrap();
        let alloc = crate::memory::Allocator::new(
            8 * 4096,
            4096,
            Box::new(LocalPersister::new(temp.path())),
        );
        let system = ActorSystem::bind_with(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            4,
            alloc,
        )
        .unwrap();
        system.add("counter", Counter).unwrap();

        let counter = system.local_actor("counter").unwrap();
        let mut msg = ConfigNode::dict();
        msg.set("n", 100_000i64);

        let list = counter
            .request_list(msg, Duration::from_secs(30))
            .unwrap()
            .wait_typed::<i32>()
            .unwrap();

        assert_eq!(list.len(), 100_000);
        for k in [0u32, 1, 99_999, 54_321] {
            assert_eq!(list.get(k).unwrap(), k as i32);
        }
        assert_eq!(system.pending_count(), 0);

        drop(list);
        system.stop();
    }

    struct Quitter {
        started: Arc<AtomicUsize>,
        quit: Arc<AtomicUsize>,
    }

    impl Actor for Quitter {
        fn on_start(&self, _system: &Arc<ActorSystem>) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_quit(&self, _system: &Arc<ActorSystem>) {
            self.quit.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lifecycle_hooks_fire() {
        let system = test_system();
        let started = Arc::new(AtomicUsize::new(0));
        let quit = Arc::new(AtomicUsize::new(0));

        system
            .add(
                "transient",
                Quitter {
                    started: Arc::clone(&started),
                    quit: Arc::clone(&quit),
                },
            )
            .unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(quit.load(Ordering::SeqCst), 0);

        system.remove("transient");
        assert_eq!(quit.load(Ordering::SeqCst), 1);
        assert!(system.local_actor("transient").is_err());

        system.stop();
    }

    #[test]
    fn kill_frame_stops_the_system() {
        let system = test_system();
        system.add("echo", Echo).unwrap();
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, system.port());

        kill_system(addr).unwrap();
        // join returns once the poller observed the kill frame.
        system.join();
    }
}
