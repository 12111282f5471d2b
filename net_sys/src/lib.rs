// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

//! The subset of `linux/if.h` and `linux/if_tun.h` needed to drive a tap
//! device: hand-maintained against Linux 4.14.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

#[macro_use]
extern crate sys_util;

use std::os::raw::{c_int, c_short, c_uchar, c_uint};

pub const IFNAMSIZ: usize = 16;

// ifr_flags values for TUNSETIFF.
pub const IFF_TAP: c_short = 0x0002;
pub const IFF_NO_PI: c_short = 0x1000;
pub const IFF_ONE_QUEUE: c_short = 0x2000;
pub const IFF_VNET_HDR: c_short = 0x4000;

// TUNSETOFFLOAD bits.
pub const TUN_F_CSUM: c_uint = 0x01;
pub const TUN_F_TSO4: c_uint = 0x02;
pub const TUN_F_TSO6: c_uint = 0x04;
pub const TUN_F_UFO: c_uint = 0x10;

/// The two members of `struct ifreq` the tun ioctls consume. The kernel
/// definition is a pair of unions; only the name and flags arms are ever
/// touched here, the padding keeps the 40-byte kernel size.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ifreq {
    pub ifrn_name: [c_uchar; IFNAMSIZ],
    pub ifru_flags: c_short,
    pub ifru_pad: [u8; 22],
}

impl Default for ifreq {
    fn default() -> ifreq {
        ifreq {
            ifrn_name: [0; IFNAMSIZ],
            ifru_flags: 0,
            ifru_pad: [0; 22],
        }
    }
}

pub const TUNTAP: c_uint = 0x54;

ioctl_iow_nr!(TUNSETIFF, TUNTAP, 202, c_int);
ioctl_iow_nr!(TUNSETOFFLOAD, TUNTAP, 208, c_uint);
ioctl_iow_nr!(TUNSETVNETHDRSZ, TUNTAP, 216, c_int);
