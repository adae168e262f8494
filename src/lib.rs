pub mod actor;
pub mod config;
pub mod memory;
pub mod net;
pub mod sync;

pub use actor::{Actor, ActorRef, ActorSystem};
pub use config::ConfigNode;
pub use memory::{Allocator, CacheArray, CacheArrayList};
