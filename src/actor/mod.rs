//! Actor runtime over TCP.
//!
//! An [`ActorSystem`] hosts named actors inside one process and routes
//! messages, requests and responses between processes. Requests are
//! correlated by a per-system monotonic uid and awaited through
//! [`RequestFuture`]s; large results travel as
//! [`CacheArrayList`](crate::memory::CacheArrayList) payloads in the
//! allocator's page-sized wire framing.
//!
//! # Overview
//!
//! - [`Actor`]: the handler trait. `on_start` fires synchronously at
//!   registration, `on_message`/`on_request`/`on_request_list` on server
//!   workers as traffic arrives, `on_quit` at removal.
//! - [`ActorRef`]: value-type reference to a local or remote actor.
//! - [`ActorSystem`]: registry, TCP dispatch, and request correlation.
//!
//! # Example
//! ```no_run
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use floe::actor::{Actor, ActorError, ActorSystem};
//! use floe::config::ConfigNode;
//!
//! struct Echo;
//!
//! impl Actor for Echo {
//!     fn on_request(
//!         &self,
//!         _system: &Arc<ActorSystem>,
//!         msg: &ConfigNode,
//!     ) -> Result<ConfigNode, ActorError> {
//!         Ok(msg.clone())
//!     }
//! }
//!
//! let system = ActorSystem::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 4).unwrap();
//! system.add("echo", Echo).unwrap();
//!
//! let echo = system.local_actor("echo").unwrap();
//! let mut msg = ConfigNode::dict();
//! msg.set("v", 42i64);
//! let reply = echo
//!     .request(msg, Duration::from_secs(5))
//!     .unwrap()
//!     .wait()
//!     .unwrap();
//! assert_eq!(reply.int_or("v", 0), 42);
//! ```
pub mod base;
pub mod message;
pub mod reference;
pub mod system;

use thiserror::Error;

pub use base::Actor;
pub use message::{ActorMessage, Protocol};
pub use reference::{ActorRef, ListRequestFuture, RequestFuture};
pub use system::{ActorSystem, kill_system};

use crate::config::ConfigError;
use crate::memory::MemoryError;
use crate::net::NetError;

/// List of possible errors raised by the actor runtime.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("an actor named '{0}' already exists")]
    Duplicate(String),

    #[error("no actor named '{0}'")]
    Unknown(String),

    #[error("actor name exceeds {} bytes", message::MAX_NAME_LEN)]
    NameTooLong,

    #[error("request timed out")]
    Timeout,

    #[error("no response recorded for request {0}")]
    ResponseMissing(u64),

    #[error("actor does not handle {0}")]
    Unsupported(&'static str),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("payload error: {0}")]
    Config(#[from] ConfigError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}
