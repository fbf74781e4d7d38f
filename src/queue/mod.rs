use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

pub use signalled::{Pushed, SignalledQueue, WakeMode};

pub mod signalled;


/// Producer/consumer configuration, selected at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Exactly one producer and one consumer thread. Cheapest ordering.
    Spsc,
    /// Any number of producers and consumers.
    Mpmc,
}

// Keeps the head and tail counters on their own cache lines so producers
// and consumers do not false-share.
#[repr(align(64))]
struct CachePadded<T>(T);

struct Slot<T> {
    // For MPMC this is the slot's ready stamp (Vyukov scheme): equals the
    // ticket of the push that may fill it, ticket+1 once the value is in.
    // Unused in SPSC mode.
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free ring.
///
/// The ring length is the requested capacity rounded up to a power of two;
/// indices are 64-bit monotone counters taken modulo the length. `push` and
/// `pop` return the number of items actually transferred, so 0 signals a
/// full or empty queue rather than an error.
pub struct Queue<T> {
    mode: Mode,
    mask: u64,
    slots: Box<[Slot<T>]>,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    pub fn new(capacity: usize, mode: Mode) -> Self {
        let len = capacity.max(2).next_power_of_two() as u64;

        let slots = (0..len)
            .map(|i| Slot {
                stamp: AtomicU64::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            mode,
            mask: len - 1,
            slots,
            head: CachePadded(AtomicU64::new(0)),
            tail: CachePadded(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    /// Number of items currently queued. Racy under concurrent access, exact
    /// when the caller is the only active thread.
    pub fn len(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, item: T) -> Result<(), T> {
        match self.mode {
            Mode::Spsc => self.push_spsc(item),
            Mode::Mpmc => self.push_mpmc(item),
        }
    }

    pub fn pop(&self) -> Option<T> {
        match self.mode {
            Mode::Spsc => self.pop_spsc(),
            Mode::Mpmc => self.pop_mpmc(),
        }
    }

    /// Push from a draining iterator; returns the count accepted. Items not
    /// accepted stay in the iterator.
    pub fn push_many(&self, items: &mut Vec<T>) -> usize {
        let mut pushed = 0;
        while pushed < items.len() {
            // Peek-then-commit keeps unpushed items owned by the caller.
            let item = items.remove(0);
            match self.push(item) {
                Ok(()) => pushed += 1,
                Err(item) => {
                    items.insert(0, item);
                    break;
                }
            }
        }
        pushed
    }

    pub fn pop_many(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut popped = 0;
        while popped < max {
            match self.pop() {
                Some(item) => {
                    out.push(item);
                    popped += 1;
                }
                None => break,
            }
        }
        popped
    }

    fn push_spsc(&self, item: T) -> Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);

        if tail - head > self.mask {
            return Err(item);
        }

        let slot = &self.slots[(tail & self.mask) as usize];
        unsafe { (*slot.value.get()).write(item) };

        // Publishes the payload write to the consumer.
        self.tail.0.store(tail + 1, Ordering::Release);
        Ok(())
    }

    fn pop_spsc(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let slot = &self.slots[(head & self.mask) as usize];
        let item = unsafe { (*slot.value.get()).assume_init_read() };

        self.head.0.store(head + 1, Ordering::Release);
        Some(item)
    }

    fn push_mpmc(&self, item: T) -> Result<(), T> {
        let mut tail = self.tail.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(tail & self.mask) as usize];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == tail {
                // Slot is free for this ticket; try to claim it.
                match self.tail.0.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(item) };
                        slot.stamp.store(tail + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if stamp < tail {
                // A full lap behind: the consumer has not freed this slot.
                return Err(item);
            } else {
                tail = self.tail.0.load(Ordering::Relaxed);
            }
        }
    }

    fn pop_mpmc(&self) -> Option<T> {
        let mut head = self.head.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(head & self.mask) as usize];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == head + 1 {
                match self.head.0.compare_exchange_weak(
                    head,
                    head + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        // Mark the slot reusable one lap later.
                        slot.stamp.store(head + self.mask + 1, Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => head = current,
                }
            } else if stamp <= head {
                return None;
            } else {
                head = self.head.0.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Run destructors of anything still queued.
        while self.pop().is_some() {}
    }
}
