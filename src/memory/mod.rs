//! Paged, spill-to-disk memory substrate.
//!
//! This module manages a process-wide pool of fixed-size pages that can hold
//! far more data than the configured RAM budget: pages beyond the budget are
//! evicted through a pluggable [`BlockPersister`] and transparently reloaded
//! on access.
//!
//! # Overview
//!
//! The layers, bottom up:
//!
//! - [`free_list`]: in-page bookkeeping for variable-size sub-allocations.
//! - [`persist`]: load/save/erase of raw page bytes, to the local filesystem
//!   or to a remote block repository over TCP.
//! - [`allocator`]: the [`PagedAllocator`], which serves sub-allocations,
//!   keeps at most a fixed number of pages resident, and evicts the least
//!   recently used page when it needs room.
//! - [`array`] / [`list`]: paged sequence collections layered on top of the
//!   allocator — a fixed-length [`CacheArray`] and an append-only
//!   [`CacheArrayList`].
//! - [`repo`]: the standalone remote block repository server.
//!
//! # Key Components
//!
//! - [`Allocator`]: shared handle to a [`PagedAllocator`]; every collection
//!   borrows one, and [`Allocator::global`] provides the process default.
//! - [`AllocatedSegment`]: address of a served sub-allocation.
//! - [`Pod`]: marker for element types that can live in cache collections.
//!
//! # See Also
//! - [`crate::actor`]: ships [`CacheArrayList`] values between processes.
pub mod allocator;
pub mod array;
pub mod free_list;
pub mod list;
pub mod persist;
pub mod repo;

use std::io;

use thiserror::Error;

pub use allocator::{AllocatedSegment, Allocator, PagedAllocator};
pub use array::CacheArray;
pub use list::{ArrayListBase, CacheArrayList};
pub use persist::{BlockPersister, LocalPersister, RemotePersister};
pub use repo::BlockRepository;

/// List of possible errors raised by the memory subsystem.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("allocation error: {cause}")]
    Alloc { cause: AllocError },

    #[error("persister error: {cause}")]
    Persist { cause: PersistError },

    #[error("index {index} out of range (len {len})")]
    OutOfBounds { index: u64, len: u64 },

    #[error("element size {actual} does not match stored size {stored}")]
    ElementMismatch { stored: u32, actual: u32 },

    #[error("array geometry mismatch")]
    GeometryMismatch,

    #[error("transfer error: {0}")]
    Transfer(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("cannot allocate {requested}B, per-allocation limit is {max}B")]
    TooLarge { requested: u64, max: u32 },
    #[error("page {0} has no usable free region, possible corruption")]
    Corrupted(u32),
    #[error("unknown page address {0}")]
    BadAddress(u32),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no persisted bytes for page {0}")]
    Missing(u64),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("repository connection failed: {0}")]
    Net(#[from] crate::net::NetError),
}

impl From<AllocError> for MemoryError {
    fn from(cause: AllocError) -> Self {
        MemoryError::Alloc { cause }
    }
}

impl From<PersistError> for MemoryError {
    fn from(cause: PersistError) -> Self {
        MemoryError::Persist { cause }
    }
}

/// Marker for element types that cache collections may store.
///
/// # Safety
///
/// Implementors must be plain-old-data: no padding, no pointers, and every
/// bit pattern of the underlying bytes must be a valid value. Collections
/// persist elements as raw bytes and reinterpret them on load.
pub unsafe trait Pod: Copy + Send + 'static {}

unsafe impl Pod for u8 {}
unsafe impl Pod for u16 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for u64 {}
unsafe impl Pod for i8 {}
unsafe impl Pod for i16 {}
unsafe impl Pod for i32 {}
unsafe impl Pod for i64 {}
unsafe impl Pod for f32 {}
unsafe impl Pod for f64 {}

/// View a slice of elements as raw bytes.
pub(crate) fn as_bytes<T: Pod>(values: &[T]) -> &[u8] {
    // Sound per the Pod contract: no padding, all bit patterns valid.
    unsafe { std::slice::from_raw_parts(values.as_ptr() as *const u8, size_of_val(values)) }
}

/// View a slice of elements as mutable raw bytes.
pub(crate) fn as_bytes_mut<T: Pod>(values: &mut [T]) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(values.as_mut_ptr() as *mut u8, size_of_val(values)) }
}
