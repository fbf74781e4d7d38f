use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;

use crate::pool::Pool;
use crate::signal::{SignalData, SignalList};
use crate::timing::Timespec;


bitflags! {
    /// Which header fields of a [`Sample`] carry valid data.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SampleFlags: u32 {
        const HAS_SEQUENCE    = 1 << 0;
        const HAS_TS_ORIGIN   = 1 << 1;
        const HAS_TS_RECEIVED = 1 << 2;
        const HAS_DATA        = 1 << 3;
        const HAS_SIGNALS     = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    /// Wall-clock moment the value was measured at its ultimate source.
    pub origin: Timespec,
    /// Moment this process ingested the sample.
    pub received: Timespec,
}

/// One timestamped, sequenced vector of typed channel values.
///
/// Samples live in fixed-size pool blocks: this header is followed in the
/// same block by `capacity` inline [`SignalData`] slots. They move through
/// the gateway by pointer; ownership is tracked with an explicit reference
/// count and the block returns to its pool when the count reaches zero.
#[repr(C)]
pub struct Sample {
    /// Monotone per-source counter.
    pub sequence: u64,
    pub ts: Timestamps,
    pub flags: SampleFlags,
    /// Number of valid entries in the data section.
    pub length: u16,
    capacity: u16,
    refcnt: AtomicU32,
    pool: *const Pool,
    /// Types and names of the first `length` values. `None` means the
    /// values are untyped and must not be rendered textually.
    signals: Option<Weak<SignalList>>,
    data: [SignalData; 0],
}

impl Sample {
    /// Block size needed for a sample of `values` channels.
    pub const fn size_for(values: usize) -> usize {
        size_of::<Sample>() + values * size_of::<SignalData>()
    }

    /// Initialize a fresh pool block in place. Refcount starts at 1.
    ///
    /// # Safety
    ///
    /// `block` must point at least `Self::size_for(capacity)` writable bytes
    /// aligned for `Sample`, owned by `pool`.
    pub(crate) unsafe fn init(block: NonNull<u8>, capacity: u16, pool: *const Pool) -> SamplePtr {
        let ptr = block.cast::<Sample>();
        ptr.as_ptr().write(Sample {
            sequence: 0,
            ts: Timestamps::default(),
            flags: SampleFlags::empty(),
            length: 0,
            capacity,
            refcnt: AtomicU32::new(1),
            pool,
            signals: None,
            data: [],
        });
        SamplePtr(ptr)
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    /// The valid portion of the data section.
    pub fn data(&self) -> &[SignalData] {
        debug_assert!(self.length <= self.capacity);
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.length as usize) }
    }

    pub fn data_mut(&mut self) -> &mut [SignalData] {
        debug_assert!(self.length <= self.capacity);
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr(), self.length as usize) }
    }

    /// The whole allocated data section, valid or not.
    pub fn data_raw_mut(&mut self) -> &mut [SignalData] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr(), self.capacity as usize) }
    }

    pub fn signals(&self) -> Option<Arc<SignalList>> {
        self.signals.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_signals(&mut self, signals: Weak<SignalList>) {
        self.signals = Some(signals);
        self.flags |= SampleFlags::HAS_SIGNALS;
    }

    pub fn clear_signals(&mut self) {
        self.signals = None;
        self.flags -= SampleFlags::HAS_SIGNALS;
    }

    /// Take another reference. Must pair with exactly one [`decref`][Self::decref].
    pub fn incref(&self) -> u32 {
        self.refcnt.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference; at zero the block returns to its pool and must
    /// not be touched afterwards. Returns the remaining count.
    pub fn decref(mut smp: SamplePtr) -> u32 {
        let prev = smp.refcnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1);

        if prev == 1 {
            // Last reference: drop the signal list weak ref in place, then
            // recycle the block.
            let pool = smp.pool;
            smp.signals = None;
            unsafe { (*pool).put(smp) };
        }

        prev - 1
    }

    pub fn incref_many(smps: &[SamplePtr]) {
        for smp in smps {
            smp.incref();
        }
    }

    pub fn decref_many(smps: &[SamplePtr]) {
        for smp in smps {
            Self::decref(*smp);
        }
    }

    /// Copy payload and header from `src`, clamped to our capacity.
    ///
    /// The signal list reference is deliberately left untouched so the
    /// caller stays in control of the typing of the destination.
    pub fn copy_from(&mut self, src: &Sample) {
        self.length = src.length.min(self.capacity);
        self.sequence = src.sequence;
        self.ts = src.ts;
        self.flags = (src.flags - SampleFlags::HAS_SIGNALS)
            | (self.flags & SampleFlags::HAS_SIGNALS);

        let n = self.length as usize;
        unsafe {
            std::ptr::copy_nonoverlapping(src.data.as_ptr(), self.data.as_mut_ptr(), n);
        }
    }

    pub fn has(&self, flags: SampleFlags) -> bool {
        self.flags.contains(flags)
    }
}

/// Plain copyable pointer to a pooled [`Sample`].
///
/// Carries no drop glue and no hidden ownership: callers pair `incref` and
/// `decref` explicitly. Dereferencing is sound under the publication rule of
/// the data plane: a sample is only mutated before it is published or while
/// the holder owns the only reference.
#[derive(Clone, Copy)]
pub struct SamplePtr(NonNull<Sample>);

unsafe impl Send for SamplePtr {}

impl SamplePtr {
    pub(crate) fn as_non_null(&self) -> NonNull<Sample> {
        self.0
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl Deref for SamplePtr {
    type Target = Sample;

    fn deref(&self) -> &Sample {
        unsafe { self.0.as_ref() }
    }
}

impl DerefMut for SamplePtr {
    fn deref_mut(&mut self) -> &mut Sample {
        unsafe { self.0.as_mut() }
    }
}

impl std::fmt::Debug for SamplePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: &Sample = self;
        f.debug_struct("Sample")
            .field("sequence", &s.sequence)
            .field("length", &s.length)
            .field("refcnt", &s.refcnt())
            .finish()
    }
}
