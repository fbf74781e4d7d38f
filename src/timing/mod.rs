use std::cmp::Ordering;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};

use libc::{itimerspec, timespec};

use crate::ffi::syscall::{clock_gettime, read_u64, timerfd_create, timerfd_settime};

pub mod tsc;

#[cfg(test)]
mod test;

/// Seconds / nanoseconds after 1.1.1970 UTC (or an arbitrary epoch for the
/// monotonic clock).
#[derive(Debug, Clone, Copy, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

const NSEC_PER_SEC: i64 = 1_000_000_000;

impl Timespec {
    pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        clock_gettime(libc::CLOCK_REALTIME).into()
    }

    /// Current monotonic time, immune to wall-clock steps.
    pub fn mono_now() -> Self {
        clock_gettime(libc::CLOCK_MONOTONIC).into()
    }

    pub fn add(&self, other: &Timespec) -> Timespec {
        let mut sum = Timespec {
            sec: self.sec + other.sec,
            nsec: self.nsec + other.nsec,
        };
        if sum.nsec >= NSEC_PER_SEC {
            sum.sec += 1;
            sum.nsec -= NSEC_PER_SEC;
        }
        sum
    }

    pub fn diff(&self, earlier: &Timespec) -> Timespec {
        let mut diff = Timespec {
            sec: self.sec - earlier.sec,
            nsec: self.nsec - earlier.nsec,
        };
        if diff.nsec < 0 {
            diff.sec -= 1;
            diff.nsec += NSEC_PER_SEC;
        }
        diff
    }

    /// `self - earlier` in seconds. Negative if `self` is before `earlier`.
    pub fn delta(&self, earlier: &Timespec) -> f64 {
        self.diff(earlier).to_secs_f64()
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        let sec = secs.floor() as i64;
        Self {
            sec,
            nsec: ((secs - sec as f64) * 1e9).round() as i64,
        }
    }

    pub fn to_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 * 1e-9
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }
}

impl PartialEq for Timespec {
    fn eq(&self, other: &Self) -> bool {
        self.sec == other.sec && self.nsec == other.nsec
    }
}

impl Eq for Timespec {}

impl PartialOrd for Timespec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timespec {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.sec, self.nsec).cmp(&(other.sec, other.nsec))
    }
}

impl From<timespec> for Timespec {
    fn from(ts: timespec) -> Self {
        Self {
            sec: ts.tv_sec as i64,
            nsec: ts.tv_nsec as i64,
        }
    }
}

impl From<Timespec> for timespec {
    fn from(ts: Timespec) -> Self {
        timespec {
            tv_sec: ts.sec as _,
            tv_nsec: ts.nsec as _,
        }
    }
}

/// Periodic or absolute timer backed by a timerfd.
///
/// `wait` blocks until the next tick and returns the number of ticks elapsed
/// since the last `wait`, so a caller that fell behind sees the missed-step
/// count instead of a burst of stale wakeups.
pub struct Task {
    clock: i32,
    timer: File,
}

impl Task {
    pub fn new(clock: i32) -> std::io::Result<Self> {
        let timer = timerfd_create(clock, libc::TFD_CLOEXEC)?;
        Ok(Self { clock, timer })
    }

    /// Monotonic periodic timer, the default for path scheduling.
    pub fn periodic() -> std::io::Result<Self> {
        Self::new(libc::CLOCK_MONOTONIC)
    }

    /// Rearm as a periodic timer with `rate` ticks per second.
    pub fn set_rate(&self, rate: f64) -> std::io::Result<()> {
        let period = Timespec::from_secs_f64(1.0 / rate);
        let spec = itimerspec {
            it_interval: period.into(),
            it_value: period.into(),
        };
        timerfd_settime(&self.timer, 0, &spec)
    }

    /// Rearm as a one-shot timer expiring at the absolute time `next`.
    pub fn set_next(&self, next: &Timespec) -> std::io::Result<()> {
        let spec = itimerspec {
            it_interval: Timespec::ZERO.into(),
            it_value: (*next).into(),
        };
        timerfd_settime(&self.timer, libc::TFD_TIMER_ABSTIME, &spec)
    }

    /// Rearm as a one-shot timer expiring `secs` from now.
    pub fn set_timeout(&self, secs: f64) -> std::io::Result<()> {
        let now: Timespec = clock_gettime(self.clock).into();
        self.set_next(&now.add(&Timespec::from_secs_f64(secs)))
    }

    /// Block until the next tick. Returns the number of expirations since
    /// the previous `wait`, at least 1.
    pub fn wait(&self) -> std::io::Result<u64> {
        read_u64(&self.timer)
    }

    /// Disarm the timer.
    pub fn stop(&self) -> std::io::Result<()> {
        let spec = itimerspec {
            it_interval: Timespec::ZERO.into(),
            it_value: Timespec::ZERO.into(),
        };
        timerfd_settime(&self.timer, 0, &spec)
    }

    /// Descriptor for readiness polling, e.g. by the path engine.
    pub fn fd(&self) -> RawFd {
        self.timer.as_raw_fd()
    }
}
