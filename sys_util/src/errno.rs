// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

use std::fmt::{self, Display};
use std::io;

use libc::__errno_location;

/// An error number, retrieved from [`errno`](http://man7.org/linux/man-pages/man3/errno.3.html),
/// set by a libc function that returned an error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Error(i32);

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Constructs a new error with the given `errno`.
    pub fn new(errno: i32) -> Error {
        Error(errno)
    }

    /// Constructs an error from the current `errno`.
    ///
    /// Only meaningful just after a libc call returned a value indicating
    /// `errno` was set.
    pub fn last() -> Error {
        Error(unsafe { *__errno_location() })
    }

    /// Gets the `errno` for this error.
    pub fn errno(self) -> i32 {
        self.0
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::new(e.raw_os_error().unwrap_or_default())
    }
}

/// Returns the last `errno` as the `Err` of a `Result`.
pub fn errno_result<T>() -> Result<T> {
    Err(Error::last())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_errno() {
        // Closing an invalid fd sets errno to EBADF.
        let ret = unsafe { libc::close(-1) };
        assert_eq!(ret, -1);
        assert_eq!(Error::last().errno(), libc::EBADF);
        let res: Result<()> = errno_result();
        assert_eq!(res.unwrap_err(), Error::new(libc::EBADF));
    }

    #[test]
    fn test_from_io_error() {
        let e = io::Error::from_raw_os_error(libc::EINVAL);
        assert_eq!(Error::from(e).errno(), libc::EINVAL);
    }
}
