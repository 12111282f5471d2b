// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

//! The subset of `linux/vhost.h` this driver issues against `/dev/vhost-net`:
//! hand-maintained against Linux 4.14.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

#[macro_use]
extern crate sys_util;

use std::os::raw::{c_int, c_uint, c_ulonglong};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct vhost_vring_state {
    pub index: c_uint,
    pub num: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct vhost_vring_file {
    pub index: c_uint,
    pub fd: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct vhost_vring_addr {
    pub index: c_uint,
    pub flags: c_uint,
    pub desc_user_addr: u64,
    pub used_user_addr: u64,
    pub avail_user_addr: u64,
    pub log_guest_addr: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct vhost_memory_region {
    pub guest_phys_addr: u64,
    pub memory_size: u64,
    pub userspace_addr: u64,
    pub flags_padding: u64,
}

/// Header of the variable-length memory table; the regions follow it
/// immediately in memory.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct vhost_memory {
    pub nregions: c_uint,
    pub padding: c_uint,
}

pub const VHOST: c_uint = 0xaf;

ioctl_ior_nr!(VHOST_GET_FEATURES, VHOST, 0x00, c_ulonglong);
ioctl_iow_nr!(VHOST_SET_FEATURES, VHOST, 0x00, c_ulonglong);
ioctl_io_nr!(VHOST_SET_OWNER, VHOST, 0x01);
ioctl_iow_nr!(VHOST_SET_MEM_TABLE, VHOST, 0x03, vhost_memory);
ioctl_iow_nr!(VHOST_SET_VRING_NUM, VHOST, 0x10, vhost_vring_state);
ioctl_iow_nr!(VHOST_SET_VRING_ADDR, VHOST, 0x11, vhost_vring_addr);
ioctl_iow_nr!(VHOST_SET_VRING_KICK, VHOST, 0x20, vhost_vring_file);
ioctl_iow_nr!(VHOST_SET_VRING_CALL, VHOST, 0x21, vhost_vring_file);
ioctl_iow_nr!(VHOST_NET_SET_BACKEND, VHOST, 0x30, vhost_vring_file);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_ioctl_numbers() {
        // Reference values from the kernel headers.
        assert_eq!(VHOST_GET_FEATURES(), 0x8008_af00);
        assert_eq!(VHOST_SET_FEATURES(), 0x4008_af00);
        assert_eq!(VHOST_SET_OWNER(), 0xaf01);
        assert_eq!(VHOST_SET_MEM_TABLE(), 0x4008_af03);
        assert_eq!(VHOST_SET_VRING_NUM(), 0x4008_af10);
        assert_eq!(VHOST_SET_VRING_ADDR(), 0x4028_af11);
        assert_eq!(VHOST_SET_VRING_KICK(), 0x4008_af20);
        assert_eq!(VHOST_SET_VRING_CALL(), 0x4008_af21);
        assert_eq!(VHOST_NET_SET_BACKEND(), 0x4008_af30);
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(size_of::<vhost_vring_state>(), 8);
        assert_eq!(size_of::<vhost_vring_file>(), 8);
        assert_eq!(size_of::<vhost_vring_addr>(), 40);
        assert_eq!(size_of::<vhost_memory_region>(), 32);
        assert_eq!(size_of::<vhost_memory>(), 8);
    }
}
