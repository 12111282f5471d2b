// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! User-space virtio-net driver.
//!
//! The crate is built around a split-virtqueue engine ([`vring::Vring`]) and
//! the transmit/receive queue pair posting network frames through it. The
//! rings live in process memory and are serviced either by the kernel
//! vhost-net backend over an eventfd pair ([`vhost::VhostNet`]) or by an
//! assigned virtio device through a pluggable notifier.
//!
//! Everything runs on one thread: a queue pair belongs to a single event
//! loop and is never shared. The only memory touched concurrently is the
//! ring storage itself, which the host reads and writes while the driver is
//! live; all such access goes through atomic or volatile views ([`mem`]).

extern crate byteorder;
extern crate epoll;
extern crate libc;
#[macro_use]
extern crate log;
extern crate net_sys;
extern crate net_util;
extern crate sys_util;
extern crate vhost_sys;
extern crate virtio_sys;

pub mod device;
pub mod mem;
pub mod notifier;
pub mod packet;
pub mod rx;
pub mod tx;
pub mod vhost;
pub mod vring;

pub use crate::device::{Error, HwFeatures, NetOptions, Result};
pub use crate::packet::{OffloadInfo, Packet, Protocol};
pub use crate::rx::L2Receive;
pub use crate::vhost::VhostNet;
