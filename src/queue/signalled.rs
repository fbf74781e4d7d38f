use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use super::{Mode, Queue};
use crate::ffi::syscall::{eventfd, poll_in, read_u64, write_u64};

/// Wakeup primitive of a [`SignalledQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeMode {
    /// An eventfd; readable whenever items are queued, so the consumer can
    /// include the queue in a poll set. The default.
    #[default]
    EventFd,
    /// Mutex + condition variable; no descriptor, pure in-process wakeup.
    CondVar,
}

enum Wake {
    EventFd(File),
    CondVar { lock: Mutex<()>, ready: Condvar },
}

/// What happened to a pushed item when the queue was full.
#[must_use]
pub enum Pushed<T> {
    Ok,
    /// Queued items were evicted to make room (drop-old policy). Usually
    /// one; more when racing producers refill the freed slot. The caller
    /// owns the evicted items again and must release their references.
    Evicted(Vec<T>),
    /// The new item was rejected (drop-new policy or closed queue).
    Rejected(T),
}

/// Full-queue policy for [`SignalledQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Evict the oldest entry. Keeps the stream fresh; the default.
    #[default]
    DropOld,
    /// Reject the new entry.
    DropNew,
}

/// Bounded queue plus a wakeup primitive, so a single consumer thread can
/// block on it or select over several of them.
///
/// Producers may be many (the ring runs in MPMC mode); the consumer side is
/// single-threaded by contract, matching its use for path source and
/// destination queues.
///
/// The eventfd runs in semaphore mode with one count per queued item, so
/// its readiness tracks "items pending" and a poll set over several queues
/// stays truthful. Every removal consumes one count.
pub struct SignalledQueue<T> {
    queue: Queue<T>,
    wake: Wake,
    policy: OverrunPolicy,
    closed: AtomicBool,
}

impl<T> SignalledQueue<T> {
    pub fn new(capacity: usize, wake: WakeMode, policy: OverrunPolicy) -> std::io::Result<Self> {
        let wake = match wake {
            WakeMode::EventFd => Wake::EventFd(eventfd(
                0,
                libc::EFD_CLOEXEC | libc::EFD_SEMAPHORE | libc::EFD_NONBLOCK,
            )?),
            WakeMode::CondVar => Wake::CondVar {
                lock: Mutex::new(()),
                ready: Condvar::new(),
            },
        };

        Ok(Self {
            queue: Queue::new(capacity, Mode::Mpmc),
            wake,
            policy,
            closed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Push one item and signal the consumer.
    ///
    /// On a full queue the overrun policy decides; displaced items are
    /// returned so the caller can release their references and count the
    /// overrun.
    pub fn push(&self, item: T) -> Pushed<T> {
        if self.is_closed() {
            return Pushed::Rejected(item);
        }

        match self.queue.push(item) {
            Ok(()) => {
                self.signal();
                Pushed::Ok
            }
            Err(mut item) => match self.policy {
                OverrunPolicy::DropOld => {
                    let mut evicted = vec![];
                    // Evict until the push lands. A racing producer can
                    // steal the freed slot, so this may take a few laps;
                    // after a bounded number of attempts the new item is
                    // given up as evicted too.
                    for _ in 0..16 {
                        if let Some(old) = self.queue.pop() {
                            self.take_wake();
                            evicted.push(old);
                        }
                        match self.queue.push(item) {
                            Ok(()) => {
                                self.signal();
                                return if evicted.is_empty() {
                                    Pushed::Ok
                                } else {
                                    Pushed::Evicted(evicted)
                                };
                            }
                            Err(back) => item = back,
                        }
                    }
                    evicted.push(item);
                    Pushed::Evicted(evicted)
                }
                OverrunPolicy::DropNew => Pushed::Rejected(item),
            },
        }
    }

    /// Non-blocking pop.
    pub fn pop(&self) -> Option<T> {
        let item = self.queue.pop()?;
        self.take_wake();
        Some(item)
    }

    /// Pop up to `max` items without blocking; used to drain after a poll
    /// reported the wake descriptor ready.
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

    /// Block until an item is available or the queue is closed and drained.
    pub fn pop_blocking(&self) -> Option<T> {
        loop {
            // Drain before checking closed, so no queued item is lost on
            // shutdown.
            if let Some(item) = self.pop() {
                return Some(item);
            }

            if self.is_closed() {
                return None;
            }

            match &self.wake {
                Wake::EventFd(fd) => {
                    // The counter holds one count per item; readability
                    // normally means the next pop will find one.
                    if poll_in(fd.as_raw_fd(), 100).unwrap_or(false)
                        && self.queue.is_empty()
                    {
                        // Stale count whose item was already taken (the
                        // producer's count write raced the pop); drain it
                        // instead of spinning on a ready descriptor.
                        let _ = read_u64(fd);
                    }
                }
                Wake::CondVar { lock, ready } => {
                    let guard = lock.lock().unwrap();
                    if self.queue.is_empty() && !self.is_closed() {
                        let _unused = ready
                            .wait_timeout(guard, std::time::Duration::from_millis(100))
                            .unwrap();
                    }
                }
            }
        }
    }

    /// Close the queue: wake every blocked reader. Already queued items stay
    /// poppable; further pushes are rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        match &self.wake {
            // Large count so every blocked reader gets a wakeup.
            Wake::EventFd(fd) => {
                let _ = write_u64(fd, 0xffff);
            }
            Wake::CondVar { lock, ready } => {
                let _guard = lock.lock().unwrap();
                ready.notify_all();
            }
        }
    }

    /// Descriptor for poll/select, if the wake mode has one.
    pub fn fd(&self) -> Option<RawFd> {
        match &self.wake {
            Wake::EventFd(fd) => Some(fd.as_raw_fd()),
            Wake::CondVar { .. } => None,
        }
    }

    fn signal(&self) {
        match &self.wake {
            Wake::EventFd(fd) => {
                let _ = write_u64(fd, 1);
            }
            Wake::CondVar { lock, ready } => {
                let _guard = lock.lock().unwrap();
                ready.notify_one();
            }
        }
    }

    // Consume the count paired with one removed item. EAGAIN means the
    // producer's count write is still in flight; the credit then feeds a
    // future wakeup, which finds the queue state it expects.
    fn take_wake(&self) {
        if let Wake::EventFd(fd) = &self.wake {
            let _ = read_u64(fd);
        }
    }
}
