// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

use std::fs::File;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use libc::{c_void, dup, eventfd, read, write, EFD_CLOEXEC, EFD_NONBLOCK};

use crate::{errno_result, Result};

/// A safe wrapper around a Linux eventfd (man 2 eventfd).
///
/// Eventfds carry the driver's kick and call notifications: the kernel backend
/// consumes the kick counter and signals completions through the call counter.
pub struct EventFd {
    eventfd: File,
}

impl EventFd {
    /// Creates a new blocking EventFd with an initial value of 0.
    pub fn new() -> Result<EventFd> {
        EventFd::with_flags(EFD_CLOEXEC)
    }

    /// Creates a new nonblocking EventFd; `read` returns `EAGAIN` instead of
    /// blocking when the count is zero. Used for call fds that are drained
    /// after an epoll wakeup.
    pub fn nonblocking() -> Result<EventFd> {
        EventFd::with_flags(EFD_CLOEXEC | EFD_NONBLOCK)
    }

    fn with_flags(flags: i32) -> Result<EventFd> {
        // This is safe because eventfd merely allocates an fd for our process
        // and we handle the error case.
        let ret = unsafe { eventfd(0, flags) };
        if ret < 0 {
            return errno_result();
        }
        // We checked ret for success and know the kernel gave us an fd we own.
        Ok(EventFd {
            eventfd: unsafe { File::from_raw_fd(ret) },
        })
    }

    /// Adds `v` to the eventfd's count.
    pub fn write(&self, v: u64) -> Result<()> {
        // This is safe because we made this fd and the pointer we pass cannot
        // overflow because we give the syscall's size parameter properly.
        let ret = unsafe {
            write(
                self.as_raw_fd(),
                &v as *const u64 as *const c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret <= 0 {
            return errno_result();
        }
        Ok(())
    }

    /// Reads the current count, resetting it to zero. Blocks on a zero count
    /// unless the fd was created with `nonblocking()`.
    pub fn read(&self) -> Result<u64> {
        let mut buf: u64 = 0;
        // This is safe because we made this fd and the pointer we pass cannot
        // overflow because we give the syscall's size parameter properly.
        let ret = unsafe {
            read(
                self.as_raw_fd(),
                &mut buf as *mut u64 as *mut c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret <= 0 {
            return errno_result();
        }
        Ok(buf)
    }

    /// Clones this EventFd. The new EventFd shares the same underlying count
    /// within the kernel.
    pub fn try_clone(&self) -> Result<EventFd> {
        // This is safe because we made this fd and properly check the result.
        let ret = unsafe { dup(self.as_raw_fd()) };
        if ret < 0 {
            return errno_result();
        }
        // We checked ret for success and know the kernel gave us an fd we own.
        Ok(EventFd {
            eventfd: unsafe { File::from_raw_fd(ret) },
        })
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.eventfd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        EventFd::new().unwrap();
    }

    #[test]
    fn test_read_write() {
        let evt = EventFd::new().unwrap();
        evt.write(55).unwrap();
        assert_eq!(evt.read(), Ok(55));
    }

    #[test]
    fn test_clone_shares_count() {
        let evt = EventFd::new().unwrap();
        let evt_clone = evt.try_clone().unwrap();
        evt.write(923).unwrap();
        assert_eq!(evt_clone.read(), Ok(923));
    }

    #[test]
    fn test_nonblocking_empty_read() {
        let evt = EventFd::nonblocking().unwrap();
        assert_eq!(evt.read().unwrap_err().errno(), libc::EAGAIN);
        evt.write(3).unwrap();
        evt.write(4).unwrap();
        // Reads accumulate writes and reset the counter.
        assert_eq!(evt.read(), Ok(7));
        assert_eq!(evt.read().unwrap_err().errno(), libc::EAGAIN);
    }
}
