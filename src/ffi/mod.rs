pub mod syscall;

use std::sync::LazyLock;

/// Size of one cache line in bytes.
///
/// Pool block sizes and queue head/tail slots are aligned to this to avoid
/// false sharing between producer and consumer threads.
pub static CACHELINE_SIZE: LazyLock<usize> = LazyLock::new(|| {
    let linesz = unsafe { libc::sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE) };
    if linesz > 0 {
        linesz as usize
    } else {
        64
    }
});

pub static PAGE_SIZE: LazyLock<usize> =
    LazyLock::new(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize);

/// Default size of a huge page.
pub const HUGEPAGE_SIZE: usize = 2 << 20;
