//! Pluggable backing memory for pools and DMA-capable nodes.
//!
//! Every [`Pool`][crate::pool::Pool] draws its block region from one
//! [`MemoryType`]. The stock types cover the common cases (heap for tests
//! and cold paths, anonymous mmap for large regions, hugetlb mappings for
//! TLB-friendly high-rate pools); node implementations with special
//! requirements can layer [`Managed`] arenas over externally provided blocks
//! or wrap another type with a [`Dma`] registration step.

use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, LazyLock, Mutex};

use crate::error::{Error, Result};
use crate::ffi::syscall::{mmap_anonymous, munmap};
use crate::ffi::HUGEPAGE_SIZE;


/// One region handed out by a memory type.
pub struct Allocation {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
    /// Opaque per-type bookkeeping, e.g. the key a DMA registrar returned.
    pub descriptor: Option<u64>,
    mem: Arc<dyn MemoryType>,
}

// The region is plain bytes; accessors hand out raw pointers only.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        let mem = Arc::clone(&self.mem);
        if let Err(e) = mem.free(self) {
            tracing::error!(target: "memory", "failed to free {} bytes: {e}", self.len);
        }
    }
}

/// Capability set of a backing memory implementation.
pub trait MemoryType: Send + Sync {
    fn name(&self) -> &'static str;

    /// Allocate `len` bytes aligned to `align`.
    fn raw_alloc(&self, len: usize, align: usize) -> Result<NonNull<u8>>;

    /// Return a region to the backing store. Called exactly once per
    /// allocation, from [`Allocation::drop`].
    fn free(&self, alloc: &mut Allocation) -> Result<()>;
}

/// Allocate from `mem`, tying the region's lifetime to the returned record.
pub fn alloc(mem: &Arc<dyn MemoryType>, len: usize, align: usize) -> Result<Allocation> {
    let ptr = mem.raw_alloc(len, align)?;
    tracing::debug!(target: "memory", "allocated {len:#x} bytes from '{}'", mem.name());
    Ok(Allocation {
        ptr,
        len,
        align,
        descriptor: None,
        mem: Arc::clone(mem),
    })
}

/// Plain heap allocations; the default for small pools and tests.
pub struct Heap;

impl MemoryType for Heap {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn raw_alloc(&self, len: usize, align: usize) -> Result<NonNull<u8>> {
        let layout =
            Layout::from_size_align(len, align).map_err(|_| Error::MemoryAllocation)?;
        // Zeroed so pool consumers never observe stale bytes.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(Error::MemoryAllocation)
    }

    fn free(&self, alloc: &mut Allocation) -> Result<()> {
        let layout = Layout::from_size_align(alloc.len, alloc.align)
            .map_err(|_| Error::MemoryAllocation)?;
        unsafe { std::alloc::dealloc(alloc.ptr.as_ptr(), layout) };
        Ok(())
    }
}

/// Anonymous mmap regions, optionally backed by 2 MiB huge pages.
///
/// Hugetlb mappings need CAP_IPC_LOCK or a configured hugepage reserve;
/// allocation fails cleanly without either so callers can fall back.
pub struct Mmap {
    huge: bool,
}

impl Mmap {
    pub fn plain() -> Self {
        Self { huge: false }
    }

    pub fn hugetlb() -> Self {
        Self { huge: true }
    }
}

impl MemoryType for Mmap {
    fn name(&self) -> &'static str {
        if self.huge {
            "mmap_hugetlb"
        } else {
            "mmap"
        }
    }

    fn raw_alloc(&self, len: usize, align: usize) -> Result<NonNull<u8>> {
        // mmap returns page aligned regions; larger alignments than a page
        // (or a huge page) are not supported by this type.
        let (flags, granule) = if self.huge {
            (libc::MAP_HUGETLB, HUGEPAGE_SIZE)
        } else {
            (0, *crate::ffi::PAGE_SIZE)
        };

        if align > granule {
            return Err(Error::MemoryAllocation);
        }

        let len = len.div_ceil(granule) * granule;
        let ptr = unsafe { mmap_anonymous(len, flags) }.map_err(|_| Error::MemoryAllocation)?;
        NonNull::new(ptr).ok_or(Error::MemoryAllocation)
    }

    fn free(&self, alloc: &mut Allocation) -> Result<()> {
        let granule = if self.huge {
            HUGEPAGE_SIZE
        } else {
            *crate::ffi::PAGE_SIZE
        };
        let len = alloc.len.div_ceil(granule) * granule;
        unsafe { munmap(alloc.ptr.as_ptr(), len)? };
        Ok(())
    }
}

/// Arena carved out of an existing block, e.g. a shared-memory region set up
/// by an external collaborator. First-fit with coalescing on free.
pub struct Managed {
    base: *mut u8,
    len: usize,
    // (offset, len) of free spans, ordered by offset.
    free: Mutex<Vec<(usize, usize)>>,
}

unsafe impl Send for Managed {}
unsafe impl Sync for Managed {}

impl Managed {
    /// # Safety
    ///
    /// `base..base+len` must be valid writable memory outliving the arena.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self {
            base,
            len,
            free: Mutex::new(vec![(0, len)]),
        }
    }
}

impl MemoryType for Managed {
    fn name(&self) -> &'static str {
        "managed"
    }

    fn raw_alloc(&self, len: usize, align: usize) -> Result<NonNull<u8>> {
        let mut free = self.free.lock().unwrap();

        for i in 0..free.len() {
            let (off, span) = free[i];
            let base = self.base as usize + off;
            let pad = base.next_multiple_of(align) - base;

            if pad + len > span {
                continue;
            }

            // Shrink or split the span.
            free.remove(i);
            if pad > 0 {
                free.insert(i, (off, pad));
            }
            let rest = span - pad - len;
            if rest > 0 {
                let at = if pad > 0 { i + 1 } else { i };
                free.insert(at, (off + pad + len, rest));
            }

            let ptr = unsafe { self.base.add(off + pad) };
            return NonNull::new(ptr).ok_or(Error::MemoryAllocation);
        }

        Err(Error::MemoryAllocation)
    }

    fn free(&self, alloc: &mut Allocation) -> Result<()> {
        let off = alloc.ptr.as_ptr() as usize - self.base as usize;
        assert!(off + alloc.len <= self.len);

        let mut free = self.free.lock().unwrap();
        let at = free.partition_point(|&(o, _)| o < off);
        free.insert(at, (off, alloc.len));

        // Coalesce with neighbours.
        if at + 1 < free.len() && free[at].0 + free[at].1 == free[at + 1].0 {
            free[at].1 += free[at + 1].1;
            free.remove(at + 1);
        }
        if at > 0 && free[at - 1].0 + free[at - 1].1 == free[at].0 {
            free[at - 1].1 += free[at].1;
            free.remove(at);
        }

        Ok(())
    }
}

/// Registers allocations of an inner type with an IOMMU protection domain.
///
/// The registrar returns a descriptor (e.g. an lkey) that is stored in the
/// allocation record for the owning node to use in its transfer descriptors.
pub struct Dma {
    inner: Arc<dyn MemoryType>,
    registrar: Box<dyn Fn(*mut u8, usize) -> Result<u64> + Send + Sync>,
}

impl Dma {
    pub fn new(
        inner: Arc<dyn MemoryType>,
        registrar: impl Fn(*mut u8, usize) -> Result<u64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            registrar: Box::new(registrar),
        }
    }

    /// Allocate and register in one step.
    pub fn alloc_registered(self: &Arc<Self>, len: usize, align: usize) -> Result<Allocation> {
        let mem: Arc<dyn MemoryType> = Arc::clone(self) as _;
        let mut allocation = alloc(&mem, len, align)?;
        allocation.descriptor = Some((self.registrar)(allocation.as_ptr(), len)?);
        Ok(allocation)
    }
}

impl MemoryType for Dma {
    fn name(&self) -> &'static str {
        "dma"
    }

    fn raw_alloc(&self, len: usize, align: usize) -> Result<NonNull<u8>> {
        self.inner.raw_alloc(len, align)
    }

    fn free(&self, alloc: &mut Allocation) -> Result<()> {
        self.inner.free(alloc)
    }
}

static TYPES: LazyLock<HashMap<&'static str, Arc<dyn MemoryType>>> = LazyLock::new(|| {
    let mut map: HashMap<&'static str, Arc<dyn MemoryType>> = HashMap::new();
    map.insert("heap", Arc::new(Heap));
    map.insert("mmap", Arc::new(Mmap::plain()));
    map.insert("mmap_hugetlb", Arc::new(Mmap::hugetlb()));
    map
});

/// Look up a stock memory type by its configuration name.
pub fn lookup(name: &str) -> Option<Arc<dyn MemoryType>> {
    TYPES.get(name).cloned()
}

pub fn default_type() -> Arc<dyn MemoryType> {
    lookup("heap").unwrap()
}
