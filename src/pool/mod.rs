use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ffi::CACHELINE_SIZE;
use crate::memory::{self, Allocation, MemoryType};
use crate::queue::{Mode, Queue};
use crate::sample::{Sample, SamplePtr};

#[cfg(test)]
mod test;

/// Fixed-size block allocator backing samples.
///
/// One contiguous region from a [`MemoryType`], divided into
/// cache-line-aligned blocks of uniform size. The free list is an MPMC
/// queue seeded with the block addresses, so `get` and `put` are wait-free
/// in the uncontended path and safe from any thread.
///
/// A pool must outlive every sample it issued; nodes and paths own their
/// pools in an [`Arc`] held for the whole started phase.
pub struct Pool {
    blocksz: usize,
    count: usize,
    capacity_per_block: u16,
    // Free block addresses. usize rather than pointers keeps the queue Send.
    free: Queue<usize>,
    // Keeps the region alive; blocks point into it.
    region: Allocation,
}

impl Pool {
    /// Create a pool of `count` blocks of at least `blocksz` bytes each.
    ///
    /// The block size is rounded up to a multiple of the cache line; the
    /// per-sample value capacity is whatever of the rounded block remains
    /// after the sample header.
    pub fn new(count: usize, blocksz: usize, mem: &Arc<dyn MemoryType>) -> Result<Arc<Self>> {
        let align = *CACHELINE_SIZE;
        let blocksz = blocksz.max(Sample::size_for(1)).next_multiple_of(align);
        let len = count * blocksz;

        let region = memory::alloc(mem, len, align)?;
        tracing::debug!(target: "pool", "allocated {len:#x} bytes for {count} blocks of {blocksz}");

        let values = (blocksz - Sample::size_for(0)) / size_of::<crate::signal::SignalData>();
        let capacity_per_block = values.min(u16::MAX as usize) as u16;

        let free = Queue::new(count, Mode::Mpmc);
        for i in 0..count {
            let addr = region.as_ptr() as usize + i * blocksz;
            // The ring capacity is count rounded up, pushes cannot fail here.
            let _ = free.push(addr);
        }

        Ok(Arc::new(Self {
            blocksz,
            count,
            capacity_per_block,
            free,
            region,
        }))
    }

    /// Pool sized for samples of `values` channels.
    pub fn for_samples(count: usize, values: usize, mem: &Arc<dyn MemoryType>) -> Result<Arc<Self>> {
        Self::new(count, Sample::size_for(values), mem)
    }

    /// Take one block and initialize it as a fresh sample with refcount 1.
    ///
    /// Returns `None` when the pool is exhausted.
    pub fn get(self: &Arc<Self>) -> Option<SamplePtr> {
        let addr = self.free.pop()?;
        let block = NonNull::new(addr as *mut u8)?;
        Some(unsafe { Sample::init(block, self.capacity_per_block, Arc::as_ptr(self)) })
    }

    /// Take up to `cnt` blocks; returns how many were available.
    pub fn get_many(self: &Arc<Self>, out: &mut Vec<SamplePtr>, cnt: usize) -> usize {
        let mut taken = 0;
        while taken < cnt {
            match self.get() {
                Some(smp) => {
                    out.push(smp);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    /// Return a block. Called from `Sample::decref` when the count hits zero.
    pub(crate) fn put(&self, smp: SamplePtr) {
        let addr = smp.as_non_null().as_ptr() as usize;
        debug_assert_eq!((addr - self.region.as_ptr() as usize) % self.blocksz, 0);
        // Cannot fail: at most `count` blocks exist.
        let _ = self.free.push(addr);
    }

    pub fn blocksz(&self) -> usize {
        self.blocksz
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Per-sample value capacity of this pool's blocks.
    pub fn sample_capacity(&self) -> usize {
        self.capacity_per_block as usize
    }

    /// Blocks currently on the free list.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Convenience error for callers that need a sample or cannot proceed.
    pub fn get_or_err(self: &Arc<Self>) -> Result<SamplePtr> {
        self.get()
            .ok_or_else(|| Error::runtime("sample pool exhausted"))
    }
}
