// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

use std::fs::File;
use std::io::Error as IoError;
use std::os::raw::{c_char, c_int, c_uint, c_ulong};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use sys_util::{ioctl_with_mut_ref, ioctl_with_ref, ioctl_with_val};

use crate::{Error, Result};

/// Handle for a network tap interface.
///
/// The driver never reads or writes frames through this fd itself; it only
/// configures the interface and hands the fd to the vhost backend, which
/// keeps its own reference. The fd may be dropped once the backend is
/// attached.
#[derive(Debug)]
pub struct Tap {
    tap_file: File,
    if_name: [u8; net_sys::IFNAMSIZ],
}

impl Tap {
    /// Opens the tap interface with the given name, single-queue, without
    /// packet info and with a vnet header.
    pub fn open_named(if_name: &str) -> Result<Tap> {
        // One byte is reserved for the trailing NUL.
        if if_name.len() >= net_sys::IFNAMSIZ {
            return Err(Error::IfNameTooLong);
        }

        // Open calls are safe because we give a constant nul-terminated
        // string and verify the result.
        let fd = unsafe {
            libc::open(
                b"/dev/net/tun\0".as_ptr() as *const c_char,
                libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(Error::OpenTun(IoError::last_os_error()));
        }
        // We just checked that the fd is valid.
        let tuntap = unsafe { File::from_raw_fd(fd) };

        let mut ifreq = net_sys::ifreq::default();
        ifreq.ifrn_name[..if_name.len()].copy_from_slice(if_name.as_bytes());
        ifreq.ifru_flags =
            net_sys::IFF_TAP | net_sys::IFF_NO_PI | net_sys::IFF_ONE_QUEUE | net_sys::IFF_VNET_HDR;

        // ioctl is safe since we call it with a valid tap fd and check the
        // return value.
        let ret = unsafe { ioctl_with_mut_ref(&tuntap, net_sys::TUNSETIFF(), &mut ifreq) };
        if ret < 0 {
            return Err(Error::CreateTap(IoError::last_os_error()));
        }

        Ok(Tap {
            tap_file: tuntap,
            if_name: ifreq.ifrn_name,
        })
    }

    /// Set the offload flags for the tap interface (`TUN_F_*`).
    pub fn set_offload(&self, flags: c_uint) -> Result<()> {
        // ioctl is safe. Called with a valid tap fd, and we check the return.
        let ret =
            unsafe { ioctl_with_val(&self.tap_file, net_sys::TUNSETOFFLOAD(), flags as c_ulong) };
        if ret < 0 {
            return Err(Error::IoctlError(IoError::last_os_error()));
        }
        Ok(())
    }

    /// Set the size of the vnet header prepended to every frame.
    pub fn set_vnet_hdr_size(&self, size: c_int) -> Result<()> {
        // ioctl is safe. Called with a valid tap fd, and we check the return.
        let ret = unsafe { ioctl_with_ref(&self.tap_file, net_sys::TUNSETVNETHDRSZ(), &size) };
        if ret < 0 {
            return Err(Error::IoctlError(IoError::last_os_error()));
        }
        Ok(())
    }

    /// The interface name, for diagnostics.
    pub fn if_name(&self) -> String {
        let end = self
            .if_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(net_sys::IFNAMSIZ);
        String::from_utf8_lossy(&self.if_name[..end]).into_owned()
    }
}

impl AsRawFd for Tap {
    fn as_raw_fd(&self) -> RawFd {
        self.tap_file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_too_long() {
        match Tap::open_named("a-name-way-past-ifnamsiz") {
            Err(Error::IfNameTooLong) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    /// Needs CAP_NET_ADMIN and an existing tap0; run with `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn test_open_and_configure() {
        let tap = Tap::open_named("tap0").unwrap();
        assert_eq!(tap.if_name(), "tap0");
        tap.set_offload(net_sys::TUN_F_CSUM | net_sys::TUN_F_TSO4)
            .unwrap();
        tap.set_vnet_hdr_size(12).unwrap();
    }
}
