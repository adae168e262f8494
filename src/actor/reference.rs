//! Actor references and request futures.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::message::ActorMessage;
use super::system::ActorSystem;
use super::ActorError;
use crate::config::ConfigNode;
use crate::memory::{ArrayListBase, CacheArrayList, Pod};
use crate::sync::Semaphore;

/// Value-type reference to a local or remote actor.
///
/// A reference is independent of the referenced actor's lifetime; sending
/// to an actor that has exited simply fails.
#[derive(Clone)]
pub struct ActorRef {
    name: String,
    addr: SocketAddrV4,
    is_local: bool,
    system: Arc<ActorSystem>,
}

impl ActorRef {
    pub(super) fn new(
        name: String,
        addr: SocketAddrV4,
        is_local: bool,
        system: Arc<ActorSystem>,
    ) -> Self {
        Self {
            name,
            addr,
            is_local,
            system,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Fire-and-forget message.
    pub fn send(&self, content: ConfigNode) -> Result<(), ActorError> {
        let frame = ActorMessage::msg(self.name.clone(), self.system.port(), content);
        self.system.send_frame(self.addr, &frame)
    }

    /// Send a request; the reply is awaited through the returned future.
    ///
    /// A zero `timeout` waits indefinitely. The timeout is measured from
    /// this call, not from [`RequestFuture::wait`].
    pub fn request(
        &self,
        content: ConfigNode,
        timeout: Duration,
    ) -> Result<RequestFuture, ActorError> {
        let uid = self.system.next_uid();
        let waiter = self.system.register_request(uid);
        let frame = ActorMessage::request(uid, self.name.clone(), self.system.port(), content);

        if let Err(e) = self.system.send_frame(self.addr, &frame) {
            self.system.unregister_request(uid);
            return Err(e);
        }
        Ok(RequestFuture {
            inner: FutureInner {
                uid,
                system: Arc::clone(&self.system),
                waiter,
                created: Instant::now(),
                timeout,
            },
        })
    }

    /// Send a request whose reply is a flat list rather than a config tree.
    pub fn request_list(
        &self,
        content: ConfigNode,
        timeout: Duration,
    ) -> Result<ListRequestFuture, ActorError> {
        let uid = self.system.next_uid();
        let waiter = self.system.register_request(uid);
        let frame = ActorMessage::request_big(uid, self.name.clone(), self.system.port(), content);

        if let Err(e) = self.system.send_frame(self.addr, &frame) {
            self.system.unregister_request(uid);
            return Err(e);
        }
        Ok(ListRequestFuture {
            inner: FutureInner {
                uid,
                system: Arc::clone(&self.system),
                waiter,
                created: Instant::now(),
                timeout,
            },
        })
    }
}

struct FutureInner {
    uid: u64,
    system: Arc<ActorSystem>,
    waiter: Arc<Semaphore>,
    created: Instant,
    timeout: Duration,
}

impl FutureInner {
    /// Park until the response is posted or the deadline passes.
    fn block(&self) -> Result<(), ActorError> {
        if self.timeout.is_zero() {
            self.waiter.wait();
            return Ok(());
        }

        let elapsed = self.created.elapsed();
        if elapsed >= self.timeout || !self.waiter.wait_timeout(self.timeout - elapsed) {
            self.system.unregister_request(self.uid);
            return Err(ActorError::Timeout);
        }
        Ok(())
    }
}

/// Awaitable reply to [`ActorRef::request`], correlated by uid.
///
/// Dropping the future without waiting leaves the uid registered; the
/// response, if it ever arrives, is stashed until system teardown.
pub struct RequestFuture {
    inner: FutureInner,
}

impl RequestFuture {
    pub fn uid(&self) -> u64 {
        self.inner.uid
    }

    /// Block for the response.
    ///
    /// On timeout the pending uid is unregistered, so a late response is
    /// dropped rather than delivered to a future waiter.
    pub fn wait(self) -> Result<ConfigNode, ActorError> {
        self.inner.block()?;
        self.inner
            .system
            .take_response(self.inner.uid)
            .ok_or(ActorError::ResponseMissing(self.inner.uid))
    }
}

/// Awaitable reply to [`ActorRef::request_list`].
pub struct ListRequestFuture {
    inner: FutureInner,
}

impl ListRequestFuture {
    pub fn uid(&self) -> u64 {
        self.inner.uid
    }

    /// Block for the raw, type-erased list.
    pub fn wait(self) -> Result<ArrayListBase, ActorError> {
        self.inner.block()?;
        self.inner
            .system
            .take_list_response(self.inner.uid)
            .ok_or(ActorError::ResponseMissing(self.inner.uid))
    }

    /// Block for the list and check its element type.
    pub fn wait_typed<T: Pod>(self) -> Result<CacheArrayList<T>, ActorError> {
        Ok(self.wait()?.into_typed::<T>()?)
    }
}
