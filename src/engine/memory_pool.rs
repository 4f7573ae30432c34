//! Preallocated pool of fixed-size sample blocks.
//!
//! All blocks are allocated up front. `allocate` and block release pop and
//! push a lock-free free list (a Treiber stack whose head carries a
//! generation tag in its upper 32 bits, so a recycled index cannot satisfy a
//! stale compare-and-swap). Exhaustion returns `None` instead of waiting.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use super::error::{EngineError, EngineResult};
use crate::dsp::Counter;

/// Free-list link value meaning "no block".
const NIL: u32 = 0;
const INDEX_MASK: u64 = 0xFFFF_FFFF;

#[inline]
fn pack(tag: u64, link: u32) -> u64 {
    (tag << 32) | link as u64
}

/// Pool occupancy and traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub block_size: usize,
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub peak_in_use: usize,
    pub allocations: u64,
    pub failures: u64,
}

pub struct MemoryPool {
    storage: Box<[UnsafeCell<f32>]>,
    /// `next[i]` is the link (index + 1, or NIL) stored in free block `i`.
    next: Box<[AtomicU32]>,
    head: AtomicU64,
    block_size: usize,
    block_count: usize,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    allocations: Counter,
    failures: Counter,
}

// SAFETY: block memory is only reachable through a `PoolBlock`, and the free
// list hands each block index to at most one `PoolBlock` at a time.
unsafe impl Sync for MemoryPool {}
unsafe impl Send for MemoryPool {}

impl MemoryPool {
    /// Allocates `block_count` blocks of `block_size` samples each.
    pub fn new(block_size: usize, block_count: usize) -> EngineResult<Self> {
        if block_size == 0 || block_count == 0 || block_count >= u32::MAX as usize {
            return Err(EngineError::InvalidPoolLayout {
                block_size,
                block_count,
            });
        }

        let storage: Box<[UnsafeCell<f32>]> = (0..block_size * block_count)
            .map(|_| UnsafeCell::new(0.0))
            .collect();
        // Block i links to block i + 1; the last block ends the list.
        let next: Box<[AtomicU32]> = (0..block_count)
            .map(|i| {
                let link = if i + 1 < block_count { i as u32 + 2 } else { NIL };
                AtomicU32::new(link)
            })
            .collect();

        log::debug!(
            "memory pool: {} blocks x {} samples ({} KiB)",
            block_count,
            block_size,
            block_size * block_count * std::mem::size_of::<f32>() / 1024
        );

        Ok(Self {
            storage,
            next,
            head: AtomicU64::new(pack(0, 1)),
            block_size,
            block_count,
            in_use: AtomicUsize::new(0),
            peak_in_use: AtomicUsize::new(0),
            allocations: Counter::new(),
            failures: Counter::new(),
        })
    }

    /// Pops a zeroed block, or `None` when the pool is exhausted.
    ///
    /// REAL-TIME SAFE: lock-free, no allocation.
    pub fn allocate(&self) -> Option<PoolBlock<'_>> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let link = (head & INDEX_MASK) as u32;
            if link == NIL {
                self.failures.increment();
                return None;
            }
            let index = (link - 1) as usize;
            let next = self.next[index].load(Ordering::Relaxed);
            let new_head = pack((head >> 32).wrapping_add(1), next);
            match self.head.compare_exchange_weak(
                head,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allocations.increment();
                    let in_use = self.in_use.fetch_add(1, Ordering::Relaxed) + 1;
                    self.peak_in_use.fetch_max(in_use, Ordering::Relaxed);
                    let mut block = PoolBlock { pool: self, index };
                    block.fill(0.0);
                    return Some(block);
                }
                Err(current) => head = current,
            }
        }
    }

    /// Startup-time allocation that reports exhaustion as an error.
    pub fn try_allocate(&self) -> EngineResult<PoolBlock<'_>> {
        self.allocate().ok_or(EngineError::PoolExhausted)
    }

    fn release(&self, index: usize) {
        let link = index as u32 + 1;
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            self.next[index].store((head & INDEX_MASK) as u32, Ordering::Relaxed);
            let new_head = pack((head >> 32).wrapping_add(1), link);
            match self.head.compare_exchange_weak(
                head,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn available(&self) -> usize {
        self.block_count - self.in_use.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.block_size,
            total_blocks: self.block_count,
            free_blocks: self.available(),
            peak_in_use: self.peak_in_use.load(Ordering::Relaxed),
            allocations: self.allocations.get(),
            failures: self.failures.get(),
        }
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool").field("stats", &self.stats()).finish()
    }
}

/// Exclusive handle to one pool block. Returns the block on drop.
pub struct PoolBlock<'a> {
    pool: &'a MemoryPool,
    index: usize,
}

impl PoolBlock<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Deref for PoolBlock<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        let start = self.index * self.pool.block_size;
        let cells = &self.pool.storage[start..start + self.pool.block_size];
        // SAFETY: this handle owns the block exclusively; UnsafeCell<f32> has
        // the same layout as f32.
        unsafe { std::slice::from_raw_parts(cells.as_ptr() as *const f32, cells.len()) }
    }
}

impl DerefMut for PoolBlock<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        let start = self.index * self.pool.block_size;
        let cells = &self.pool.storage[start..start + self.pool.block_size];
        // SAFETY: as above; `&mut self` guarantees no other view of this block.
        unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }
}

impl Drop for PoolBlock<'_> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejects_empty_layout() {
        assert!(matches!(
            MemoryPool::new(0, 4),
            Err(EngineError::InvalidPoolLayout { .. })
        ));
        assert!(MemoryPool::new(64, 0).is_err());
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let pool = MemoryPool::new(16, 3).unwrap();
        let a = pool.allocate().expect("first block");
        let b = pool.allocate().expect("second block");
        let c = pool.allocate().expect("third block");
        assert!(pool.allocate().is_none(), "fourth allocation must fail");
        assert!(matches!(pool.try_allocate(), Err(EngineError::PoolExhausted)));
        assert_eq!(pool.available(), 0);

        let mut indices = vec![a.index(), b.index(), c.index()];
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2], "every block handed out once");

        drop(b);
        assert_eq!(pool.available(), 1);
        assert!(pool.allocate().is_some(), "released block is reusable");

        let stats = pool.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.peak_in_use, 3);
        assert_eq!(stats.allocations, 4);
    }

    #[test]
    fn test_blocks_are_zeroed_and_independent() {
        let pool = MemoryPool::new(8, 2).unwrap();
        {
            let mut a = pool.allocate().unwrap();
            let mut b = pool.allocate().unwrap();
            a.fill(1.0);
            b.fill(2.0);
            assert!(a.iter().all(|&s| s == 1.0));
            assert!(b.iter().all(|&s| s == 2.0));
            assert_eq!(a.len(), 8);
        }
        let a = pool.allocate().unwrap();
        assert!(a.iter().all(|&s| s == 0.0), "recycled blocks come back zeroed");
    }

    #[test]
    fn test_concurrent_allocate_release() {
        let pool = Arc::new(MemoryPool::new(32, 8).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..2000 {
                        if let Some(mut block) = pool.allocate() {
                            let tag = (t * 10_000 + i) as f32;
                            block.fill(tag);
                            assert!(block.iter().all(|&s| s == tag), "block shared between owners");
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.available(), 8, "every block returned");
    }
}
