//! Fixed-length paged arrays.
//!
//! A [`CacheArray`] stores its elements in a contiguous run of dedicated
//! pages plus a tail segment, all served by an [`Allocator`]. The working
//! set the allocator keeps resident can be far smaller than the array:
//! access transparently loads and evicts pages.
//!
//! Single-element [`get`](CacheArray::get)/[`set`](CacheArray::set) round
//! through the allocator on every call; bulk work should use the batched
//! accessors, the [`Pusher`]/[`Puller`] cursors, or the block-wise
//! [`map`](CacheArray::map)/[`generate`](CacheArray::generate)/
//! [`reduce`](CacheArray::reduce) primitives, which stage elements through a
//! caller-supplied buffer.
//!
//! Block-wise operations visit pages that are already resident first and
//! touch cold pages last, which keeps thrashing down when the working set
//! exceeds the resident budget.

use std::marker::PhantomData;
use std::mem::MaybeUninit;

use log::warn;

use super::allocator::{AllocatedSegment, Allocator};
use super::free_list::FULL_PAGE_OFFSET;
use super::{MemoryError, Pod, as_bytes, as_bytes_mut};

/// A fixed-length array of `T` backed by paged, spillable storage.
pub struct CacheArray<T: Pod> {
    alloc: Allocator,
    rest: AllocatedSegment,
    first_block: u32,
    n_blocks: u32,
    len: u32,
    elems_per_block: u32,
    _marker: PhantomData<T>,
}

const fn esize<T: Pod>() -> u32 {
    size_of::<T>() as u32
}

impl<T: Pod> CacheArray<T> {
    /// Allocate an array of `len` elements from the global allocator.
    pub fn new(len: u32) -> Result<Self, MemoryError> {
        Self::new_in(len, &Allocator::global())
    }

    /// Allocate an array of `len` elements from `alloc`.
    pub fn new_in(len: u32, alloc: &Allocator) -> Result<Self, MemoryError> {
        let multi = alloc.allocate_multi(len as u64 * esize::<T>() as u64, esize::<T>())?;
        Ok(Self {
            alloc: alloc.clone(),
            rest: multi.rest,
            first_block: multi.first_block_addr,
            n_blocks: multi.n_full_blocks,
            len,
            elems_per_block: multi.bytes_per_full_block / esize::<T>(),
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pages backing the array, tail segment included.
    pub fn block_count(&self) -> u32 {
        if self.len == 0 { 0 } else { self.n_blocks + 1 }
    }

    fn full_seg(&self, block: u32) -> AllocatedSegment {
        AllocatedSegment {
            block_addr: self.first_block + block,
            offset: FULL_PAGE_OFFSET,
        }
    }

    /// Segment and element offset within it for global index `i`.
    fn locate(&self, i: u32) -> (AllocatedSegment, u32) {
        let block = i / self.elems_per_block;
        if block < self.n_blocks {
            (self.full_seg(block), i % self.elems_per_block)
        } else {
            (self.rest, i - self.n_blocks * self.elems_per_block)
        }
    }

    fn check(&self, i: u32, n: u32) -> Result<(), MemoryError> {
        if i as u64 + n as u64 > self.len as u64 {
            return Err(MemoryError::OutOfBounds {
                index: i as u64 + n as u64,
                len: self.len as u64,
            });
        }
        Ok(())
    }

    pub fn get(&self, i: u32) -> Result<T, MemoryError> {
        self.check(i, 1)?;
        let (seg, off) = self.locate(i);

        let mut value = MaybeUninit::<T>::uninit();
        // Pod: every bit pattern read back from storage is a valid T.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, size_of::<T>())
        };
        self.alloc.read(seg, bytes, off * esize::<T>())?;
        Ok(unsafe { value.assume_init() })
    }

    pub fn set(&mut self, i: u32, value: T) -> Result<(), MemoryError> {
        self.check(i, 1)?;
        let (seg, off) = self.locate(i);
        self.alloc
            .write(seg, as_bytes(std::slice::from_ref(&value)), off * esize::<T>())
    }

    /// Read `buf.len()` elements starting at `i`, splitting at page
    /// boundaries.
    pub fn get_n(&self, i: u32, buf: &mut [T]) -> Result<(), MemoryError> {
        let n = buf.len() as u32;
        if n == 0 {
            return Ok(());
        }
        self.check(i, n)?;

        let (seg, off) = self.locate(i);
        let block = i / self.elems_per_block;
        if block < self.n_blocks {
            let fits = (self.elems_per_block - off).min(n);
            let (head, tail) = buf.split_at_mut(fits as usize);
            self.alloc.read(seg, as_bytes_mut(head), off * esize::<T>())?;
            if !tail.is_empty() {
                return self.get_n(i + fits, tail);
            }
            Ok(())
        } else {
            self.alloc.read(seg, as_bytes_mut(buf), off * esize::<T>())
        }
    }

    /// Write `buf.len()` elements starting at `i`, splitting at page
    /// boundaries.
    pub fn set_n(&mut self, i: u32, buf: &[T]) -> Result<(), MemoryError> {
        let n = buf.len() as u32;
        if n == 0 {
            return Ok(());
        }
        self.check(i, n)?;

        let (seg, off) = self.locate(i);
        let block = i / self.elems_per_block;
        if block < self.n_blocks {
            let fits = (self.elems_per_block - off).min(n);
            let (head, tail) = buf.split_at(fits as usize);
            self.alloc.write(seg, as_bytes(head), off * esize::<T>())?;
            if !tail.is_empty() {
                return self.set_n(i + fits, tail);
            }
            Ok(())
        } else {
            self.alloc.write(seg, as_bytes(buf), off * esize::<T>())
        }
    }

    /// Buffered write cursor starting at `start`; flushes whenever `buf`
    /// fills and on drop.
    pub fn pusher<'a>(&'a mut self, start: u32, buf: &'a mut [T]) -> Pusher<'a, T> {
        let limit = self.len;
        Pusher {
            array: self,
            next: start,
            filled: 0,
            limit,
            buf,
        }
    }

    /// Buffered read cursor starting at `start`.
    pub fn puller<'a>(&'a self, start: u32, buf: &'a mut [T]) -> Puller<'a, T> {
        let limit = self.len;
        Puller {
            array: self,
            next: start,
            idx: 0,
            avail: 0,
            limit,
            buf,
        }
    }

    /// Non-owning view of `[begin, end)` with rebased indices.
    pub fn slice(&mut self, begin: u32, end: u32) -> Result<Slice<'_, T>, MemoryError> {
        if begin > end || end > self.len {
            return Err(MemoryError::OutOfBounds {
                index: end as u64,
                len: self.len as u64,
            });
        }
        Ok(Slice {
            array: self,
            beg: begin,
            len: end - begin,
        })
    }

    /// The array's storage chunks, resident pages first, then the tail
    /// segment, then cold pages in address order.
    fn chunks(&self) -> Vec<(AllocatedSegment, u32, u32)> {
        let mut warm = Vec::new();
        let mut cold = Vec::new();
        for block in 0..self.n_blocks {
            let seg = self.full_seg(block);
            let entry = (seg, block * self.elems_per_block, self.elems_per_block);
            if self.alloc.is_resident(seg.block_addr) {
                warm.push(entry);
            } else {
                cold.push(entry);
            }
        }

        let covered = self.n_blocks * self.elems_per_block;
        if self.len > covered {
            warm.push((self.rest, covered, self.len - covered));
        }
        warm.extend(cold);
        warm
    }

    /// Apply `f` to every element in place, staging through `buf`.
    pub fn map(&mut self, buf: &mut [T], mut f: impl FnMut(T) -> T) -> Result<(), MemoryError> {
        assert!(!buf.is_empty());
        for (seg, _, n_elems) in self.chunks() {
            let mut done = 0;
            while done < n_elems {
                let n = (n_elems - done).min(buf.len() as u32) as usize;
                let stage = &mut buf[..n];
                self.alloc
                    .read(seg, as_bytes_mut(stage), done * esize::<T>())?;
                for value in stage.iter_mut() {
                    *value = f(*value);
                }
                self.alloc.write(seg, as_bytes(stage), done * esize::<T>())?;
                done += n as u32;
            }
        }
        Ok(())
    }

    /// Fill the array with `f(global_index)`, staging through `buf`.
    pub fn generate(&mut self, buf: &mut [T], mut f: impl FnMut(u64) -> T) -> Result<(), MemoryError> {
        assert!(!buf.is_empty());
        for (seg, start, n_elems) in self.chunks() {
            let mut done = 0;
            while done < n_elems {
                let n = (n_elems - done).min(buf.len() as u32) as usize;
                let stage = &mut buf[..n];
                for (j, value) in stage.iter_mut().enumerate() {
                    *value = f(start as u64 + done as u64 + j as u64);
                }
                self.alloc.write(seg, as_bytes(stage), done * esize::<T>())?;
                done += n as u32;
            }
        }
        Ok(())
    }

    /// Fold every element into `init` with `f`, staging through `buf`.
    ///
    /// Pages are visited resident-first, so `f` should be insensitive to
    /// element order.
    pub fn reduce(
        &self,
        buf: &mut [T],
        init: T,
        mut f: impl FnMut(T, T) -> T,
    ) -> Result<T, MemoryError> {
        assert!(!buf.is_empty());
        let mut acc = init;
        for (seg, _, n_elems) in self.chunks() {
            let mut done = 0;
            while done < n_elems {
                let n = (n_elems - done).min(buf.len() as u32) as usize;
                let stage = &mut buf[..n];
                self.alloc
                    .read(seg, as_bytes_mut(stage), done * esize::<T>())?;
                for value in stage.iter() {
                    acc = f(acc, *value);
                }
                done += n as u32;
            }
        }
        Ok(acc)
    }

    /// Page-wise byte copy from `src`, which must have identical geometry.
    ///
    /// Pages resident on both sides are copied first.
    pub fn copy_raw(&mut self, src: &CacheArray<T>) -> Result<(), MemoryError> {
        if src.len != self.len
            || src.n_blocks != self.n_blocks
            || src.elems_per_block != self.elems_per_block
            || !src.alloc.same_as(&self.alloc)
        {
            return Err(MemoryError::GeometryMismatch);
        }

        let block_bytes = self.elems_per_block * esize::<T>();
        let mut cold = Vec::new();
        for block in 0..self.n_blocks {
            let from = src.full_seg(block);
            let to = self.full_seg(block);
            if self.alloc.is_resident(from.block_addr) && self.alloc.is_resident(to.block_addr) {
                self.alloc.copy(from, to, block_bytes)?;
            } else {
                cold.push((from, to));
            }
        }

        let covered = self.n_blocks * self.elems_per_block;
        self.alloc
            .copy(src.rest, self.rest, (self.len - covered) * esize::<T>())?;

        for (from, to) in cold {
            self.alloc.copy(from, to, block_bytes)?;
        }
        Ok(())
    }

    /// Copy `n` elements from `src[src_start..]` into `self[dst_start..]`,
    /// staging through `buf`. The arrays may have different geometry.
    pub fn copy_from(
        &mut self,
        dst_start: u32,
        src: &CacheArray<T>,
        src_start: u32,
        n: u32,
        buf: &mut [T],
    ) -> Result<(), MemoryError> {
        assert!(!buf.is_empty());
        self.check(dst_start, n)?;
        src.check(src_start, n)?;

        let mut done = 0;
        while done < n {
            let step = (n - done).min(buf.len() as u32) as usize;
            src.get_n(src_start + done, &mut buf[..step])?;
            self.set_n(dst_start + done, &buf[..step])?;
            done += step as u32;
        }
        Ok(())
    }

    /// Free the backing storage. Called automatically on drop.
    pub fn dispose(&mut self) -> Result<(), MemoryError> {
        if self.rest.block_addr == 0 {
            return Ok(());
        }
        let mut segs = vec![self.rest];
        for block in 0..self.n_blocks {
            segs.push(self.full_seg(block));
        }
        self.rest = AllocatedSegment {
            block_addr: 0,
            offset: 0,
        };
        self.first_block = 0;
        self.n_blocks = 0;
        self.len = 0;
        self.alloc.free_many(&segs)
    }
}

impl<T: Pod> Drop for CacheArray<T> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!("failed to free cache array storage: {e}");
        }
    }
}

/// Buffered write cursor over a [`CacheArray`] or a [`Slice`] of one.
pub struct Pusher<'a, T: Pod> {
    array: &'a mut CacheArray<T>,
    next: u32,
    filled: usize,
    limit: u32,
    buf: &'a mut [T],
}

impl<T: Pod> Pusher<'_, T> {
    pub fn push(&mut self, value: T) -> Result<(), MemoryError> {
        if self.buf.is_empty() {
            // Degenerate staging buffer: write through unbuffered.
            let end = self.next as u64 + 1;
            if end > self.limit as u64 {
                return Err(MemoryError::OutOfBounds {
                    index: end,
                    len: self.limit as u64,
                });
            }
            self.array.set_n(self.next, std::slice::from_ref(&value))?;
            self.next += 1;
            return Ok(());
        }

        self.buf[self.filled] = value;
        self.filled += 1;
        if self.filled == self.buf.len() {
            self.flush()?;
        }
        Ok(())
    }

    /// Write out buffered elements.
    pub fn flush(&mut self) -> Result<(), MemoryError> {
        if self.filled == 0 {
            return Ok(());
        }
        let end = self.next as u64 + self.filled as u64;
        if end > self.limit as u64 {
            return Err(MemoryError::OutOfBounds {
                index: end,
                len: self.limit as u64,
            });
        }
        self.array.set_n(self.next, &self.buf[..self.filled])?;
        self.next += self.filled as u32;
        self.filled = 0;
        Ok(())
    }
}

impl<T: Pod> Drop for Pusher<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("pusher dropped {} unwritten elements: {e}", self.filled);
        }
    }
}

/// Buffered read cursor; dropping it has no effect on the array.
pub struct Puller<'a, T: Pod> {
    array: &'a CacheArray<T>,
    next: u32,
    idx: usize,
    avail: usize,
    limit: u32,
    buf: &'a mut [T],
}

impl<T: Pod> Puller<'_, T> {
    /// The next element, or `None` past the end.
    pub fn next(&mut self) -> Result<Option<T>, MemoryError> {
        if self.buf.is_empty() {
            // Degenerate staging buffer: read through unbuffered.
            if self.next >= self.limit {
                return Ok(None);
            }
            let value = self.array.get(self.next)?;
            self.next += 1;
            return Ok(Some(value));
        }

        if self.idx >= self.avail {
            let n = (self.limit.saturating_sub(self.next)).min(self.buf.len() as u32);
            if n == 0 {
                return Ok(None);
            }
            self.array.get_n(self.next, &mut self.buf[..n as usize])?;
            self.next += n;
            self.avail = n as usize;
            self.idx = 0;
        }
        let value = self.buf[self.idx];
        self.idx += 1;
        Ok(Some(value))
    }
}

/// Non-owning view over a contiguous range of a [`CacheArray`].
pub struct Slice<'a, T: Pod> {
    array: &'a mut CacheArray<T>,
    beg: u32,
    len: u32,
}

impl<T: Pod> Slice<'_, T> {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, i: u32, n: u32) -> Result<(), MemoryError> {
        if i as u64 + n as u64 > self.len as u64 {
            return Err(MemoryError::OutOfBounds {
                index: i as u64 + n as u64,
                len: self.len as u64,
            });
        }
        Ok(())
    }

    pub fn get(&self, i: u32) -> Result<T, MemoryError> {
        self.check(i, 1)?;
        self.array.get(self.beg + i)
    }

    pub fn set(&mut self, i: u32, value: T) -> Result<(), MemoryError> {
        self.check(i, 1)?;
        self.array.set(self.beg + i, value)
    }

    pub fn get_n(&self, i: u32, buf: &mut [T]) -> Result<(), MemoryError> {
        self.check(i, buf.len() as u32)?;
        self.array.get_n(self.beg + i, buf)
    }

    pub fn set_n(&mut self, i: u32, buf: &[T]) -> Result<(), MemoryError> {
        self.check(i, buf.len() as u32)?;
        self.array.set_n(self.beg + i, buf)
    }

    /// Write cursor over the slice; flushes past the slice end fail.
    pub fn pusher<'b>(&'b mut self, buf: &'b mut [T]) -> Pusher<'b, T> {
        let next = self.beg;
        let limit = self.beg + self.len;
        Pusher {
            array: &mut *self.array,
            next,
            filled: 0,
            limit,
            buf,
        }
    }

    /// Read cursor over the slice.
    pub fn puller<'b>(&'b self, buf: &'b mut [T]) -> Puller<'b, T> {
        Puller {
            array: &*self.array,
            next: self.beg,
            idx: 0,
            avail: 0,
            limit: self.beg + self.len,
            buf,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::super::persist::LocalPersister;
    use super::*;

    fn small_alloc(temp: &TempDir) -> Allocator {
        Allocator::new(2 * 4096, 4096, Box::new(LocalPersister::new(temp.path())))
    }

    #[test]
    fn set_get_survive_eviction() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        // 5000 u32 span five pages against a two-page budget.
        let mut array = CacheArray::<u32>::new_in(5000, &alloc).unwrap();
        for i in 0..5000 {
            array.set(i, i * 3).unwrap();
        }
        for i in (0..5000).rev() {
            assert_eq!(array.get(i).unwrap(), i * 3);
        }
    }

    #[test]
    fn batched_matches_individual_writes() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut a = CacheArray::<u32>::new_in(2500, &alloc).unwrap();
        let mut b = CacheArray::<u32>::new_in(2500, &alloc).unwrap();

        // Range straddling the first page boundary (1021 u32 per page).
        let values: Vec<u32> = (0..600).map(|i| i + 7).collect();
        let start = 800;

        a.set_n(start, &values).unwrap();
        for (k, v) in values.iter().enumerate() {
            b.set(start + k as u32, *v).unwrap();
        }

        let mut got_a = vec![0u32; 600];
        let mut got_b = vec![0u32; 600];
        a.get_n(start, &mut got_a).unwrap();
        b.get_n(start, &mut got_b).unwrap();
        assert_eq!(got_a, values);
        assert_eq!(got_b, values);
    }

    #[test]
    fn out_of_range_fails_without_partial_update() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut array = CacheArray::<u32>::new_in(100, &alloc).unwrap();
        assert!(array.set(100, 1).is_err());
        assert!(array.get(100).is_err());
        assert!(array.set_n(90, &[0u32; 20]).is_err());
        // No partial write happened.
        for i in 90..100 {
            assert_eq!(array.get(i).unwrap(), 0);
        }
    }

    #[test]
    fn pusher_flushes_on_drop() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut array = CacheArray::<u64>::new_in(1000, &alloc).unwrap();
        let mut buf = [0u64; 16];
        {
            let mut pusher = array.pusher(100, &mut buf);
            for k in 0..37 {
                pusher.push(k + 1).unwrap();
            }
            // 37 pushes with a 16-slot buffer: 5 remain unflushed here.
        }
        for k in 0..37 {
            assert_eq!(array.get(100 + k as u32).unwrap(), k + 1);
        }
    }

    #[test]
    fn puller_reads_through() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut array = CacheArray::<u32>::new_in(3000, &alloc).unwrap();
        let mut buf = [0u32; 256];
        array.generate(&mut buf, |i| i as u32 * 2).unwrap();

        let mut read_buf = [0u32; 100];
        let mut puller = array.puller(10, &mut read_buf);
        for i in 10..3000 {
            assert_eq!(puller.next().unwrap(), Some(i * 2));
        }
        assert_eq!(puller.next().unwrap(), None);
    }

    #[test]
    fn generate_map_reduce() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut array = CacheArray::<u32>::new_in(50_000, &alloc).unwrap();
        let mut buf = vec![0u32; 8192];

        array.generate(&mut buf, |i| i as u32).unwrap();
        array.map(&mut buf, |x| x + 1).unwrap();

        assert_eq!(array.get(12_345).unwrap(), 12_346);
        assert_eq!(array.get(0).unwrap(), 1);
        assert_eq!(array.get(49_999).unwrap(), 50_000);

        let sum = array
            .reduce(&mut buf, 0u32, |a, b| a.wrapping_add(b))
            .unwrap();
        let expected = (1..=50_000u64).sum::<u64>() as u32;
        assert_eq!(sum, expected);
    }

    #[test]
    fn slice_rebases_indices() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut array = CacheArray::<u32>::new_in(2000, &alloc).unwrap();
        let mut buf = [0u32; 64];
        array.generate(&mut buf, |i| i as u32).unwrap();

        let mut slice = array.slice(500, 600).unwrap();
        assert_eq!(slice.len(), 100);
        assert_eq!(slice.get(0).unwrap(), 500);
        assert_eq!(slice.get(99).unwrap(), 599);
        assert!(slice.get(100).is_err());

        slice.set(0, 9999).unwrap();
        assert_eq!(array.get(500).unwrap(), 9999);
    }

    #[test]
    fn slice_pusher_respects_bounds() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut array = CacheArray::<u32>::new_in(100, &alloc).unwrap();
        let mut buf = [0u32; 8];
        let mut slice = array.slice(90, 100).unwrap();
        let mut pusher = slice.pusher(&mut buf);
        for _ in 0..8 {
            pusher.push(1).unwrap();
        }
        for _ in 0..7 {
            pusher.push(2).unwrap();
        }
        // Sixteenth element fills the buffer; that flush runs past the
        // slice end.
        assert!(pusher.push(2).is_err());
    }

    #[test]
    fn zero_capacity_cursors_write_through() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut array = CacheArray::<u32>::new_in(10, &alloc).unwrap();
        let mut empty: [u32; 0] = [];
        {
            let mut pusher = array.pusher(7, &mut empty);
            pusher.push(70).unwrap();
            pusher.push(80).unwrap();
            pusher.push(90).unwrap();
            // The array ends at index 9; no panic, an error.
            assert!(pusher.push(100).is_err());
        }
        assert_eq!(array.get(7).unwrap(), 70);
        assert_eq!(array.get(9).unwrap(), 90);

        let mut puller = array.puller(8, &mut empty);
        assert_eq!(puller.next().unwrap(), Some(80));
        assert_eq!(puller.next().unwrap(), Some(90));
        assert_eq!(puller.next().unwrap(), None);
    }

    #[test]
    fn copy_raw_and_copy_from() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        let mut src = CacheArray::<u32>::new_in(3000, &alloc).unwrap();
        let mut buf = [0u32; 128];
        src.generate(&mut buf, |i| i as u32 + 5).unwrap();

        let mut dst = CacheArray::<u32>::new_in(3000, &alloc).unwrap();
        dst.copy_raw(&src).unwrap();
        assert_eq!(dst.get(0).unwrap(), 5);
        assert_eq!(dst.get(2999).unwrap(), 3004);

        let mut other = CacheArray::<u32>::new_in(500, &alloc).unwrap();
        other.copy_from(0, &src, 1000, 500, &mut buf).unwrap();
        assert_eq!(other.get(0).unwrap(), 1005);
        assert_eq!(other.get(499).unwrap(), 1504);

        let mut mismatched = CacheArray::<u32>::new_in(2999, &alloc).unwrap();
        assert!(matches!(
            mismatched.copy_raw(&src),
            Err(MemoryError::GeometryMismatch)
        ));
    }

    #[test]
    fn drop_releases_storage() {
        let temp = TempDir::new("array").unwrap();
        let alloc = small_alloc(&temp);

        {
            let _array = CacheArray::<u64>::new_in(5000, &alloc).unwrap();
            assert!(alloc.page_count() > 0);
        }
        assert_eq!(alloc.page_count(), 0);
    }
}
