//! The actor handler trait.

use std::sync::Arc;

use super::system::ActorSystem;
use super::ActorError;
use crate::config::ConfigNode;
use crate::memory::ArrayListBase;

/// Behavior of a registered actor. Every hook has a default, so an actor
/// implements only what it handles.
///
/// An atomic actor (the default) is entered by one server worker at a time;
/// the system serializes `on_message`/`on_request` calls through a per-actor
/// mutex. A non-atomic actor may be entered concurrently and is responsible
/// for its own synchronization.
pub trait Actor: Send + Sync {
    /// True if invocations must be serialized.
    fn atomic(&self) -> bool {
        true
    }

    /// Called synchronously while the actor is being registered.
    fn on_start(&self, _system: &Arc<ActorSystem>) {}

    /// A one-way message arrived. Errors are logged and swallowed.
    fn on_message(&self, _system: &Arc<ActorSystem>, _msg: &ConfigNode) -> Result<(), ActorError> {
        Ok(())
    }

    /// A request arrived; the returned node is sent back to the requester.
    /// An error closes the session and the requester's future times out.
    fn on_request(
        &self,
        _system: &Arc<ActorSystem>,
        _msg: &ConfigNode,
    ) -> Result<ConfigNode, ActorError> {
        Err(ActorError::Unsupported("requests"))
    }

    /// A request expecting a large flat result arrived.
    fn on_request_list(
        &self,
        _system: &Arc<ActorSystem>,
        _msg: &ConfigNode,
    ) -> Result<ArrayListBase, ActorError> {
        Err(ActorError::Unsupported("list requests"))
    }

    /// Called while the actor is being removed from the system.
    fn on_quit(&self, _system: &Arc<ActorSystem>) {}
}
