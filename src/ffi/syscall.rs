use std::fs::File;
use std::io::{Error, Result};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use libc::{epoll_event, itimerspec, timespec};

pub fn eventfd(init: u32, flags: i32) -> Result<File> {
    let fd = unsafe { libc::eventfd(init, flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn timerfd_create(clock: i32, flags: i32) -> Result<File> {
    let fd = unsafe { libc::timerfd_create(clock, flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn timerfd_settime(file: &File, flags: i32, new: &itimerspec) -> Result<()> {
    let result = unsafe { libc::timerfd_settime(file.as_raw_fd(), flags, new, std::ptr::null_mut()) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

/// Reads one 8-byte counter value from an eventfd or timerfd.
pub fn read_u64(file: &File) -> Result<u64> {
    let mut buf = 0u64;
    let ptr = &mut buf as *mut u64 as *mut libc::c_void;
    let bytes = unsafe { libc::read(file.as_raw_fd(), ptr, 8) };
    if bytes == 8 {
        Ok(buf)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn write_u64(file: &File, val: u64) -> Result<()> {
    let ptr = &val as *const u64 as *const libc::c_void;
    let bytes = unsafe { libc::write(file.as_raw_fd(), ptr, 8) };
    if bytes == 8 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

/// Wait up to `timeout_ms` for `fd` to become readable.
pub fn poll_in(fd: RawFd, timeout_ms: i32) -> Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if n != -1 {
        Ok(n > 0)
    } else {
        let err = Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

pub fn clock_gettime(clock: i32) -> timespec {
    let mut ts = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // Always succeeds for the clock ids used in this crate.
    unsafe { libc::clock_gettime(clock, &mut ts) };
    ts
}

pub unsafe fn mmap_anonymous(len: usize, flags: i32) -> Result<*mut u8> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | flags;
    let ptr = libc::mmap(std::ptr::null_mut(), len, prot, flags, -1, 0);
    if ptr != libc::MAP_FAILED {
        Ok(ptr as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn munmap(ptr: *mut u8, len: usize) -> Result<()> {
    let result = libc::munmap(ptr as _, len);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_create1(flags: i32) -> Result<File> {
    let fd = unsafe { libc::epoll_create1(flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_add(epoll: &File, fd: RawFd, token: u64) -> Result<()> {
    let mut event = epoll_event {
        events: libc::EPOLLIN as u32,
        u64: token,
    };
    let result =
        unsafe { libc::epoll_ctl(epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_wait<'a>(
    epoll: &File,
    events: &'a mut [epoll_event],
    timeout: i32,
) -> Result<&'a [epoll_event]> {
    let len = unsafe {
        libc::epoll_wait(
            epoll.as_raw_fd(),
            events.as_mut_ptr(),
            events.len() as _,
            timeout,
        )
    };
    if len != -1 {
        Ok(&events[..len as _])
    } else {
        let err = Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            Ok(&events[..0])
        } else {
            Err(err)
        }
    }
}
