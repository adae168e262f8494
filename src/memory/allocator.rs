//! Paged allocator with a bounded resident set and LRU eviction.
//!
//! The [`PagedAllocator`] manages an address space of fixed-size pages. Each
//! page carries its own free list (see [`free_list`](super::free_list)) and
//! serves variable-size sub-allocations; at most `max_pages` pages are held
//! in RAM at any time, the rest live with the configured
//! [`BlockPersister`](super::BlockPersister) and are reloaded on demand.
//!
//! # Responsibilities
//!
//! - Serving [`AllocatedSegment`]s of up to [`max_user_alloc`](PagedAllocator::max_user_alloc)
//!   bytes, preferring pages already resident.
//! - Serving multi-page runs for payloads larger than a page
//!   ([`allocate_multi`](PagedAllocator::allocate_multi)).
//! - Evicting the least recently used page through the persister whenever a
//!   page must be materialized and the resident budget is exhausted.
//! - Releasing pages that become empty and trimming trailing empty metadata.
//!
//! # Concurrency
//!
//! A single mutex serializes every state change, held across persister I/O.
//! That is coarse, and intentional: the allocator is bound by disk or
//! network latency, not CPU, and the collections above it amortize access
//! through staging buffers. [`Allocator`] is the shared, cloneable handle;
//! [`Allocator::global`] exposes the process-wide instance.
//!
//! # Example
//! ```no_run
//! use floe::memory::{Allocator, LocalPersister};
//!
//! let alloc = Allocator::new(64 * 1024, 4096, Box::new(LocalPersister::new(".")));
//! let seg = alloc.allocate(100).unwrap();
//! alloc.write(seg, b"hello", 0).unwrap();
//!
//! let mut buf = [0u8; 5];
//! alloc.read(seg, &mut buf, 0).unwrap();
//! assert_eq!(&buf, b"hello");
//! alloc.free(seg).unwrap();
//! ```

use std::sync::{Arc, Mutex, OnceLock};

use log::{trace, warn};

use super::free_list;
use super::persist::{BlockPersister, LocalPersister, PersistStats};
use super::{AllocError, MemoryError, PersistError};

/// Default page size, 4 MiB.
pub const DEFAULT_PAGE_SIZE: u32 = 4 * 1024 * 1024;
/// Default resident budget of the global allocator, in pages.
pub const DEFAULT_RESIDENT_PAGES: u64 = 10;

const COPY_CHUNK: usize = 64 * 1024;

/// Address of a served sub-allocation: a 1-based page address plus the
/// in-page offset of the first user byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedSegment {
    pub block_addr: u32,
    pub offset: u32,
}

/// Result of a multi-page allocation: `n_full_blocks` dedicated pages at
/// contiguous addresses starting at `first_block_addr`, each carrying
/// `bytes_per_full_block` payload bytes, plus a tail segment `rest`
/// (always present, possibly zero-length).
#[derive(Debug, Clone, Copy)]
pub struct MultiAlloc {
    pub rest: AllocatedSegment,
    pub first_block_addr: u32,
    pub n_full_blocks: u32,
    pub bytes_per_full_block: u32,
}

#[derive(Debug)]
struct PageMeta {
    lru: u64,
    max_free: u32,
    mem: Option<Box<[u8]>>,
}

/// The page manager. Use through the [`Allocator`] handle.
pub struct PagedAllocator {
    max_pages: usize,
    page_size: u32,
    max_user_alloc: u32,
    pages: Vec<PageMeta>,
    resident: usize,
    tick: u64,
    persister: Box<dyn BlockPersister>,
}

impl PagedAllocator {
    /// `total_size` bounds resident RAM; the resident budget is
    /// `total_size / page_size` pages (at least one).
    pub fn new(total_size: u64, page_size: u32, persister: Box<dyn BlockPersister>) -> Self {
        assert!(page_size as usize > free_list::HEADER_SIZE + free_list::PREFIX_SIZE);
        Self {
            max_pages: ((total_size / page_size as u64) as usize).max(1),
            page_size,
            max_user_alloc: page_size
                - (free_list::HEADER_SIZE + free_list::PREFIX_SIZE) as u32,
            pages: Vec::new(),
            resident: 0,
            tick: 0,
            persister,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Largest single allocation a page can serve.
    pub fn max_user_alloc(&self) -> u32 {
        self.max_user_alloc
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn resident_count(&self) -> usize {
        self.resident
    }

    pub fn is_resident(&self, addr: u32) -> bool {
        addr != 0
            && self
                .pages
                .get(addr as usize - 1)
                .is_some_and(|meta| meta.mem.is_some())
    }

    pub fn persister_stats(&self) -> PersistStats {
        self.persister.stats()
    }

    /// Allocate `size` user bytes.
    ///
    /// Resident pages are scanned in LRU order first, then evicted pages
    /// whose cached `max_free` still admits the request, and only then is a
    /// new page created. `force_new` skips the scans and always creates a
    /// fresh page; multi-page runs use it to obtain contiguous addresses.
    pub fn allocate(&mut self, size: u32, force_new: bool) -> Result<AllocatedSegment, MemoryError> {
        if size > self.max_user_alloc {
            return Err(AllocError::TooLarge {
                requested: size as u64,
                max: self.max_user_alloc,
            }
            .into());
        }

        if !force_new {
            // Resident pages, least recently used first.
            let mut resident: Vec<u32> = (1..=self.pages.len() as u32)
                .filter(|addr| self.pages[*addr as usize - 1].mem.is_some())
                .collect();
            resident.sort_by_key(|addr| (self.pages[*addr as usize - 1].lru, *addr));

            for addr in resident {
                if self.pages[addr as usize - 1].max_free >= size {
                    if let Some(seg) = self.try_allocate_in(addr, size) {
                        return Ok(seg);
                    }
                }
            }

            // Evicted pages whose cached max_free still admits the request.
            for addr in 1..=self.pages.len() as u32 {
                let meta = &self.pages[addr as usize - 1];
                if meta.mem.is_none() && meta.max_free >= size {
                    self.materialize(addr)?;
                    if let Some(seg) = self.try_allocate_in(addr, size) {
                        return Ok(seg);
                    }
                }
            }
        }

        let addr = self.create_page()?;
        self.try_allocate_in(addr, size)
            .ok_or_else(|| AllocError::Corrupted(addr).into())
    }

    /// Allocate a dedicated page: a single allocation spanning the whole
    /// payload. Returns its address; the user bytes start at
    /// [`free_list::FULL_PAGE_OFFSET`].
    pub fn allocate_page(&mut self) -> Result<u32, MemoryError> {
        let seg = self.allocate(self.max_user_alloc, true)?;
        debug_assert_eq!(seg.offset, free_list::FULL_PAGE_OFFSET);
        Ok(seg.block_addr)
    }

    /// Greedy multi-page decomposition of a `total`-byte allocation.
    ///
    /// Full pages are peeled off in strides of `unit`-aligned payload bytes
    /// so that no `unit`-sized element ever straddles a page boundary; the
    /// remainder lands in the `rest` segment.
    pub fn allocate_multi(&mut self, total: u64, unit: u32) -> Result<MultiAlloc, MemoryError> {
        let unit = unit.max(1);
        let per_page = (self.max_user_alloc / unit) * unit;
        if per_page == 0 {
            return Err(AllocError::TooLarge {
                requested: unit as u64,
                max: self.max_user_alloc,
            }
            .into());
        }

        let n_full = (total / per_page as u64) as u32;
        let rest_bytes = (total - n_full as u64 * per_page as u64) as u32;

        let mut first = 0;
        for i in 0..n_full {
            let addr = self.allocate_page()?;
            if i == 0 {
                first = addr;
            }
        }
        let rest = self.allocate(rest_bytes, false)?;

        Ok(MultiAlloc {
            rest,
            first_block_addr: first,
            n_full_blocks: n_full,
            bytes_per_full_block: per_page,
        })
    }

    /// Free a segment; a page left empty is released and trailing empty
    /// pages are trimmed from the metadata vector.
    pub fn free(&mut self, seg: AllocatedSegment) -> Result<(), MemoryError> {
        let idx = self.check_addr(seg.block_addr)?;
        self.materialize(seg.block_addr)?;

        let page = self.pages[idx].mem.as_deref_mut().expect("page resident");
        free_list::free(page, seg.offset);
        let empty = free_list::is_empty(page);
        let max_free = free_list::max_free_run(page);
        self.pages[idx].max_free = max_free;

        if empty {
            self.release_page(seg.block_addr);
        }
        Ok(())
    }

    /// Free a batch, resident segments first to avoid reloading pages that
    /// are about to be discarded anyway.
    pub fn free_many(&mut self, segs: &[AllocatedSegment]) -> Result<(), MemoryError> {
        let (resident, cold): (Vec<&AllocatedSegment>, Vec<&AllocatedSegment>) = segs
            .iter()
            .partition(|seg| self.is_resident(seg.block_addr));
        for seg in resident.into_iter().chain(cold) {
            self.free(*seg)?;
        }
        Ok(())
    }

    /// Release a dedicated page without walking its free list.
    pub fn free_page(&mut self, addr: u32) -> Result<(), MemoryError> {
        self.check_addr(addr)?;
        self.release_page(addr);
        Ok(())
    }

    /// Copy bytes out of a segment, starting `sub_offset` bytes into it.
    pub fn read(
        &mut self,
        seg: AllocatedSegment,
        buf: &mut [u8],
        sub_offset: u32,
    ) -> Result<(), MemoryError> {
        let idx = self.check_range(seg, sub_offset, buf.len())?;
        self.materialize(seg.block_addr)?;
        let page = self.pages[idx].mem.as_deref().expect("page resident");
        let start = (seg.offset + sub_offset) as usize;
        buf.copy_from_slice(&page[start..start + buf.len()]);
        Ok(())
    }

    /// Copy bytes into a segment, starting `sub_offset` bytes into it.
    pub fn write(
        &mut self,
        seg: AllocatedSegment,
        buf: &[u8],
        sub_offset: u32,
    ) -> Result<(), MemoryError> {
        let idx = self.check_range(seg, sub_offset, buf.len())?;
        self.materialize(seg.block_addr)?;
        let page = self.pages[idx].mem.as_deref_mut().expect("page resident");
        let start = (seg.offset + sub_offset) as usize;
        page[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`, staged through a bounded
    /// scratch buffer so the operation works even with a single-page
    /// resident budget.
    pub fn copy(
        &mut self,
        src: AllocatedSegment,
        dst: AllocatedSegment,
        len: u32,
    ) -> Result<(), MemoryError> {
        let mut scratch = vec![0u8; (len as usize).min(COPY_CHUNK)];
        let mut done = 0u32;
        while done < len {
            let n = (len - done).min(scratch.len() as u32);
            self.read(src, &mut scratch[..n as usize], done)?;
            self.write(dst, &scratch[..n as usize], done)?;
            done += n;
        }
        Ok(())
    }

    fn check_addr(&self, addr: u32) -> Result<usize, MemoryError> {
        if addr == 0 || addr as usize > self.pages.len() {
            return Err(AllocError::BadAddress(addr).into());
        }
        Ok(addr as usize - 1)
    }

    fn check_range(
        &self,
        seg: AllocatedSegment,
        sub_offset: u32,
        len: usize,
    ) -> Result<usize, MemoryError> {
        let idx = self.check_addr(seg.block_addr)?;
        let end = seg.offset as u64 + sub_offset as u64 + len as u64;
        if end > self.page_size as u64 {
            return Err(MemoryError::OutOfBounds {
                index: end,
                len: self.page_size as u64,
            });
        }
        Ok(idx)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn try_allocate_in(&mut self, addr: u32, size: u32) -> Option<AllocatedSegment> {
        let idx = addr as usize - 1;
        let page = self.pages[idx].mem.as_deref_mut()?;
        let offset = free_list::allocate(page, size)?;
        let max_free = free_list::max_free_run(page);
        self.pages[idx].max_free = max_free;
        self.pages[idx].lru = self.tick + 1;
        self.tick += 1;
        Some(AllocatedSegment {
            block_addr: addr,
            offset,
        })
    }

    /// Ensure the page's bytes are in RAM, loading (and evicting) as needed.
    fn materialize(&mut self, addr: u32) -> Result<(), MemoryError> {
        let idx = self.check_addr(addr)?;
        if self.pages[idx].mem.is_none() {
            self.make_room()?;

            let mut buf = vec![0u8; self.page_size as usize].into_boxed_slice();
            match self.persister.load(addr as u64, &mut buf) {
                Ok(()) => {}
                // Never persisted: a fresh or released page; start it empty.
                Err(PersistError::Missing(_)) => free_list::create(&mut buf),
                Err(e) => return Err(e.into()),
            }

            self.pages[idx].mem = Some(buf);
            self.resident += 1;
        }
        let tick = self.next_tick();
        self.pages[idx].lru = tick;
        Ok(())
    }

    fn create_page(&mut self) -> Result<u32, MemoryError> {
        self.make_room()?;

        let mut buf = vec![0u8; self.page_size as usize].into_boxed_slice();
        free_list::create(&mut buf);

        let tick = self.next_tick();
        self.pages.push(PageMeta {
            lru: tick,
            max_free: self.max_user_alloc,
            mem: Some(buf),
        });
        self.resident += 1;

        let addr = self.pages.len() as u32;
        trace!("created page {addr} ({} resident)", self.resident);
        Ok(addr)
    }

    fn make_room(&mut self) -> Result<(), MemoryError> {
        while self.resident >= self.max_pages {
            self.evict_lru()?;
        }
        Ok(())
    }

    /// Write the least recently used resident page through the persister
    /// and release its RAM. A save failure is fatal for the allocator.
    fn evict_lru(&mut self) -> Result<(), MemoryError> {
        let victim = (1..=self.pages.len() as u32)
            .filter(|addr| self.pages[*addr as usize - 1].mem.is_some())
            .min_by_key(|addr| (self.pages[*addr as usize - 1].lru, *addr))
            .expect("a resident page to evict");

        let idx = victim as usize - 1;
        let mem = self.pages[idx].mem.take().expect("victim resident");
        self.persister.save(victim as u64, &mem)?;
        self.resident -= 1;
        trace!("evicted page {victim} ({} resident)", self.resident);
        Ok(())
    }

    /// Drop a page's bytes (RAM or persisted) and trim trailing empties.
    fn release_page(&mut self, addr: u32) {
        let idx = addr as usize - 1;
        if self.pages[idx].mem.take().is_some() {
            self.resident -= 1;
        } else if let Err(e) = self.persister.erase(addr as u64) {
            warn!("failed to erase page {addr}: {e}");
        }
        self.pages[idx].max_free = self.max_user_alloc;

        while let Some(last) = self.pages.last() {
            if last.max_free != self.max_user_alloc {
                break;
            }
            if last.mem.is_some() {
                self.resident -= 1;
            }
            self.pages.pop();
        }
        trace!("released page {addr}, {} pages remain", self.pages.len());
    }
}

/// Shared, cloneable handle to a [`PagedAllocator`].
///
/// All collection types borrow one; every operation takes the allocator
/// mutex for its duration. Geometry is cached on the handle so hot paths do
/// not lock just to compute element strides.
#[derive(Clone)]
pub struct Allocator {
    inner: Arc<Mutex<PagedAllocator>>,
    page_size: u32,
    max_user_alloc: u32,
}

static GLOBAL: OnceLock<Allocator> = OnceLock::new();

impl Allocator {
    pub fn new(total_size: u64, page_size: u32, persister: Box<dyn BlockPersister>) -> Self {
        let inner = PagedAllocator::new(total_size, page_size, persister);
        let max_user_alloc = inner.max_user_alloc();
        Self {
            inner: Arc::new(Mutex::new(inner)),
            page_size,
            max_user_alloc,
        }
    }

    /// The process-wide allocator: 4 MiB pages, ten of them resident,
    /// spilling to files in the current directory.
    pub fn global() -> Allocator {
        GLOBAL
            .get_or_init(|| {
                Allocator::new(
                    DEFAULT_RESIDENT_PAGES * DEFAULT_PAGE_SIZE as u64,
                    DEFAULT_PAGE_SIZE,
                    Box::new(LocalPersister::new(".")),
                )
            })
            .clone()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn max_user_alloc(&self) -> u32 {
        self.max_user_alloc
    }

    /// True if both handles reach the same underlying allocator.
    pub fn same_as(&self, other: &Allocator) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PagedAllocator> {
        self.inner.lock().unwrap()
    }

    pub fn allocate(&self, size: u32) -> Result<AllocatedSegment, MemoryError> {
        self.lock().allocate(size, false)
    }

    pub fn allocate_page(&self) -> Result<u32, MemoryError> {
        self.lock().allocate_page()
    }

    pub fn allocate_multi(&self, total: u64, unit: u32) -> Result<MultiAlloc, MemoryError> {
        self.lock().allocate_multi(total, unit)
    }

    pub fn free(&self, seg: AllocatedSegment) -> Result<(), MemoryError> {
        self.lock().free(seg)
    }

    pub fn free_many(&self, segs: &[AllocatedSegment]) -> Result<(), MemoryError> {
        self.lock().free_many(segs)
    }

    pub fn free_page(&self, addr: u32) -> Result<(), MemoryError> {
        self.lock().free_page(addr)
    }

    pub fn read(
        &self,
        seg: AllocatedSegment,
        buf: &mut [u8],
        sub_offset: u32,
    ) -> Result<(), MemoryError> {
        self.lock().read(seg, buf, sub_offset)
    }

    pub fn write(
        &self,
        seg: AllocatedSegment,
        buf: &[u8],
        sub_offset: u32,
    ) -> Result<(), MemoryError> {
        self.lock().write(seg, buf, sub_offset)
    }

    pub fn copy(
        &self,
        src: AllocatedSegment,
        dst: AllocatedSegment,
        len: u32,
    ) -> Result<(), MemoryError> {
        self.lock().copy(src, dst, len)
    }

    pub fn is_resident(&self, addr: u32) -> bool {
        self.lock().is_resident(addr)
    }

    pub fn page_count(&self) -> usize {
        self.lock().page_count()
    }

    pub fn resident_count(&self) -> usize {
        self.lock().resident_count()
    }

    pub fn persister_stats(&self) -> PersistStats {
        self.lock().persister_stats()
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn test_alloc(temp: &TempDir, pages: u64, page_size: u32) -> Allocator {
        Allocator::new(
            pages * page_size as u64,
            page_size,
            Box::new(LocalPersister::new(temp.path())),
        )
    }

    #[test]
    fn single_page_lifecycle() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 1, 4096);

        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(200).unwrap();
        assert_eq!(a.block_addr, 1);
        assert_eq!(b.block_addr, 1);

        alloc.write(a, &[0xAA; 100], 0).unwrap();
        alloc.write(b, &[0xBB; 200], 0).unwrap();

        let mut buf = [0u8; 100];
        alloc.read(a, &mut buf, 0).unwrap();
        assert!(buf.iter().all(|&x| x == 0xAA));

        alloc.free(a).unwrap();
        alloc.free(b).unwrap();
        assert_eq!(alloc.page_count(), 0);

        // The whole payload is available again at the same address.
        let big = alloc.allocate(alloc.max_user_alloc()).unwrap();
        assert_eq!(big.block_addr, 1);
    }

    #[test]
    fn spill_respects_resident_budget() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 2, 4096);

        // 4088B payload serves eight 500B allocations (504B reserved each);
        // 24 of them need three pages.
        let segs: Vec<_> = (0..24)
            .map(|i| {
                let seg = alloc.allocate(500).unwrap();
                alloc.write(seg, &[i as u8; 500], 0).unwrap();
                seg
            })
            .collect();

        assert_eq!(alloc.page_count(), 3);
        assert_eq!(alloc.resident_count(), 2);
        assert_eq!(alloc.persister_stats().saves, 1);

        // Reading an evicted segment loads its page and evicts another.
        let cold = segs
            .iter()
            .find(|seg| !alloc.is_resident(seg.block_addr))
            .copied()
            .unwrap();
        let mut buf = [0u8; 500];
        alloc.read(cold, &mut buf, 0).unwrap();
        assert!(alloc.is_resident(cold.block_addr));
        assert_eq!(alloc.resident_count(), 2);

        // Every segment reads back intact regardless of eviction history.
        for (i, seg) in segs.iter().enumerate() {
            alloc.read(*seg, &mut buf, 0).unwrap();
            assert!(buf.iter().all(|&x| x == i as u8), "segment {i}");
        }
    }

    #[test]
    fn eviction_picks_least_recently_used() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 2, 4096);

        let a = alloc.allocate(500).unwrap();
        let b = {
            let mut inner = alloc.lock();
            let seg = inner.allocate(500, true).unwrap();
            seg
        };
        assert_ne!(a.block_addr, b.block_addr);

        // Touch page A so page B is the LRU victim.
        let mut buf = [0u8; 500];
        alloc.read(a, &mut buf, 0).unwrap();
        {
            let mut inner = alloc.lock();
            inner.allocate(500, true).unwrap();
        }
        assert!(alloc.is_resident(a.block_addr));
        assert!(!alloc.is_resident(b.block_addr));
    }

    #[test]
    fn rejects_oversized_allocation() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 1, 4096);

        let res = alloc.allocate(alloc.max_user_alloc() + 1);
        assert!(matches!(
            res,
            Err(MemoryError::Alloc {
                cause: AllocError::TooLarge { .. }
            })
        ));
    }

    #[test]
    fn multi_allocation_is_contiguous() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 2, 4096);

        // Three full pages of u64 payload plus a remainder.
        let per_page = (alloc.max_user_alloc() / 8) * 8;
        let total = per_page as u64 * 3 + 40;
        let multi = alloc.allocate_multi(total, 8).unwrap();

        assert_eq!(multi.n_full_blocks, 3);
        assert_eq!(multi.bytes_per_full_block, per_page);
        assert_ne!(multi.rest.block_addr, 0);
        // Contiguous run, rest on its own page after it.
        let addrs: Vec<u32> = (0..3).map(|i| multi.first_block_addr + i).collect();
        assert_eq!(addrs, vec![1, 2, 3]);
        assert_eq!(multi.rest.block_addr, 4);
    }

    #[test]
    fn zero_sized_rest_is_served() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 2, 4096);

        let per_page = (alloc.max_user_alloc() / 4) * 4;
        let multi = alloc.allocate_multi(per_page as u64, 4).unwrap();
        assert_eq!(multi.n_full_blocks, 1);
        assert_ne!(multi.rest.block_addr, 0);
    }

    #[test]
    fn free_page_trims_trailing_metadata() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 2, 4096);

        let a = alloc.allocate_page().unwrap();
        let b = alloc.allocate_page().unwrap();
        let c = alloc.allocate_page().unwrap();
        assert_eq!((a, b, c), (1, 2, 3));

        alloc.free_page(b).unwrap();
        assert_eq!(alloc.page_count(), 3);

        alloc.free_page(c).unwrap();
        // Pages 2 and 3 are both empty and trailing.
        assert_eq!(alloc.page_count(), 1);

        alloc.free_page(a).unwrap();
        assert_eq!(alloc.page_count(), 0);
        assert_eq!(alloc.allocate_page().unwrap(), 1);
    }

    #[test]
    fn free_many_survives_mixed_residency() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 2, 4096);

        let segs: Vec<_> = (0..24).map(|_| alloc.allocate(500).unwrap()).collect();
        assert_eq!(alloc.page_count(), 3);

        alloc.free_many(&segs).unwrap();
        assert_eq!(alloc.page_count(), 0);
    }

    #[test]
    fn copy_between_segments() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 1, 4096);

        let src = alloc.allocate(300).unwrap();
        let dst = alloc.allocate(300).unwrap();

        let data: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        alloc.write(src, &data, 0).unwrap();
        alloc.copy(src, dst, 300).unwrap();

        let mut buf = vec![0u8; 300];
        alloc.read(dst, &mut buf, 0).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn out_of_range_access_fails() {
        let temp = TempDir::new("alloc").unwrap();
        let alloc = test_alloc(&temp, 1, 4096);

        let seg = alloc.allocate(100).unwrap();
        let mut buf = [0u8; 8];
        assert!(alloc.read(seg, &mut buf, 4090).is_err());
        assert!(
            alloc
                .read(AllocatedSegment { block_addr: 9, offset: 12 }, &mut buf, 0)
                .is_err()
        );
    }
}
