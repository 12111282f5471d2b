// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

//! Network interface plumbing: the tap device the vhost backend is attached
//! to, and MAC address handling.

extern crate libc;
extern crate net_sys;
extern crate sys_util;

mod mac;
mod tap;

pub use crate::mac::{MacAddr, MAC_ADDR_LEN};
pub use crate::tap::Tap;

use std::io;

#[derive(Debug)]
pub enum Error {
    /// Failed to open `/dev/net/tun`.
    OpenTun(io::Error),
    /// The requested interface name does not fit `IFNAMSIZ`.
    IfNameTooLong,
    /// TUNSETIFF failed; the name may be taken or the caller unprivileged.
    CreateTap(io::Error),
    /// A configuration ioctl on the tap fd failed.
    IoctlError(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
