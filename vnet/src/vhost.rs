// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The vhost-net transport.
//!
//! Bring-up, in order: negotiate features against `/dev/vhost-net`, open and
//! configure the tap device, register the identity memory table, describe
//! both rings to the kernel, wire the kick/call eventfds, then attach the
//! tap as the backend of both queues. The tap fd is dropped afterwards: the
//! kernel keeps its own reference. The vhost fd must stay open for the whole
//! device lifetime, as closing it stops the backend.

use std::fs::OpenOptions;
use std::fs::File;
use std::io;
use std::os::raw::{c_int, c_uint};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use sys_util::{ioctl, ioctl_with_mut_ref, ioctl_with_ref, EventFd};
use vhost_sys::*;

use net_util::{MacAddr, Tap};

use crate::device::{
    header_len, supported_features, validate_ring_size, Error, HwFeatures, NetOptions, QueuePair,
    Result,
};
use crate::mem::RingView;
use crate::notifier::Notifier;
use crate::packet::Packet;
use crate::rx::L2Receive;

const RX_QUEUE_INDEX: c_uint = 0;
const TX_QUEUE_INDEX: c_uint = 1;

// Event loop tokens.
const RX_CALL_EVENT: u64 = 0;
const TX_CALL_EVENT: u64 = 1;

/// The memory table registered with vhost: a single region mapping the
/// whole user address space 1:1, so ring and buffer addresses are plain
/// process virtual addresses.
#[repr(C)]
struct VhostMemoryTable {
    header: vhost_memory,
    region: vhost_memory_region,
}

fn identity_phys(p: *const u8) -> u64 {
    p as u64
}

/// A virtio-net device serviced by the kernel vhost-net backend.
pub struct VhostNet {
    // Keeps vhost servicing the rings; closing it tears the device down.
    vhost: File,
    features: u64,
    hw_features: HwFeatures,
    header_len: usize,
    poll_mode: bool,
    qp: QueuePair,
}

impl VhostNet {
    pub fn new(opts: &NetOptions) -> Result<VhostNet> {
        let ring_size = validate_ring_size(opts.ring_size)?;
        let (wanted, hw_features) = supported_features(opts);

        let vhost = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open("/dev/vhost-net")
            .map_err(Error::VhostOpen)?;

        let mut host_features: u64 = 0;
        // ioctls on the vhost fd are safe: the fd is valid and every return
        // value is checked.
        let ret = unsafe { ioctl_with_mut_ref(&vhost, VHOST_GET_FEATURES(), &mut host_features) };
        if ret < 0 {
            return Err(Error::GetFeatures(sys_util::Error::last()));
        }
        let features = host_features & wanted;
        let ret = unsafe { ioctl_with_ref(&vhost, VHOST_SET_FEATURES(), &features) };
        if ret < 0 {
            return Err(Error::SetFeatures(sys_util::Error::last()));
        }
        let header_len = header_len(features);

        let tap = Tap::open_named(&opts.tap_name).map_err(Error::Tap)?;
        tap.set_offload(tap_offload_bits(&hw_features))
            .map_err(Error::TapOffload)?;
        tap.set_vnet_hdr_size(header_len as c_int)
            .map_err(Error::TapVnetHdrSize)?;

        let ret = unsafe { ioctl(&vhost, VHOST_SET_OWNER()) };
        if ret < 0 {
            return Err(Error::SetOwner(sys_util::Error::last()));
        }

        let table = VhostMemoryTable {
            header: vhost_memory {
                nregions: 1,
                padding: 0,
            },
            region: vhost_memory_region {
                guest_phys_addr: 0,
                memory_size: (1u64 << 47) - 4096,
                userspace_addr: 0,
                flags_padding: 0,
            },
        };
        let ret = unsafe { ioctl_with_ref(&vhost, VHOST_SET_MEM_TABLE(), &table) };
        if ret < 0 {
            return Err(Error::SetMemTable(sys_util::Error::last()));
        }

        let rx_kick = EventFd::new().map_err(Error::EventFd)?;
        let rx_call = EventFd::nonblocking().map_err(Error::EventFd)?;
        let tx_kick = EventFd::new().map_err(Error::EventFd)?;
        let tx_call = EventFd::nonblocking().map_err(Error::EventFd)?;
        let rx_kick_fd = rx_kick.as_raw_fd();
        let rx_call_fd = rx_call.as_raw_fd();
        let tx_kick_fd = tx_kick.as_raw_fd();
        let tx_call_fd = tx_call.as_raw_fd();

        let qp = QueuePair::new(
            ring_size,
            features,
            hw_features,
            opts.poll_mode,
            Notifier::vhost(rx_kick, rx_call),
            Notifier::vhost(tx_kick, tx_call),
            identity_phys,
        )?;

        for &(index, view) in &[
            (RX_QUEUE_INDEX, qp.rxq.ring_view()),
            (TX_QUEUE_INDEX, qp.txq.ring_view()),
        ] {
            set_vring(&vhost, index, ring_size, view)?;
        }
        set_vring_fd(
            &vhost,
            VHOST_SET_VRING_KICK(),
            RX_QUEUE_INDEX,
            rx_kick_fd,
            Error::SetVringKick,
        )?;
        set_vring_fd(
            &vhost,
            VHOST_SET_VRING_CALL(),
            RX_QUEUE_INDEX,
            rx_call_fd,
            Error::SetVringCall,
        )?;
        set_vring_fd(
            &vhost,
            VHOST_SET_VRING_KICK(),
            TX_QUEUE_INDEX,
            tx_kick_fd,
            Error::SetVringKick,
        )?;
        set_vring_fd(
            &vhost,
            VHOST_SET_VRING_CALL(),
            TX_QUEUE_INDEX,
            tx_call_fd,
            Error::SetVringCall,
        )?;

        for &index in &[RX_QUEUE_INDEX, TX_QUEUE_INDEX] {
            set_vring_fd(
                &vhost,
                VHOST_NET_SET_BACKEND(),
                index,
                tap.as_raw_fd(),
                Error::SetBackend,
            )?;
        }
        // The kernel holds its own tap reference from here on.
        drop(tap);

        let mut dev = VhostNet {
            vhost,
            features,
            hw_features,
            header_len,
            poll_mode: opts.poll_mode,
            qp,
        };
        dev.qp.rxq.fill().map_err(Error::BufferAlloc)?;
        info!(
            "vhost-net device up: features {:#x}, {} byte header, {} descriptors per ring",
            dev.features, dev.header_len, ring_size
        );
        Ok(dev)
    }

    /// The negotiated feature mask.
    pub fn features(&self) -> u64 {
        self.features
    }

    pub fn hw_features(&self) -> HwFeatures {
        self.hw_features
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The vhost transport exposes no config space; a fixed
    /// locally-administered address stands in.
    pub fn hw_address(&self) -> MacAddr {
        MacAddr::new([0x12, 0x23, 0x34, 0x56, 0x67, 0x78])
    }

    /// Queues a packet for transmission.
    pub fn send(&mut self, packet: Packet) {
        self.qp.txq.post(packet);
    }

    /// Services the queue pair until the process is torn down. Interrupt
    /// mode sleeps on the two call fds; poll mode spins, ticking both rings
    /// every iteration.
    pub fn run(&mut self, stack: &mut dyn L2Receive) -> io::Result<()> {
        let epoll_raw_fd = epoll::create(true)?;
        // We own the fd we just created.
        let epoll_fd = unsafe { File::from_raw_fd(epoll_raw_fd) };
        if !self.poll_mode {
            epoll::ctl(
                epoll_fd.as_raw_fd(),
                epoll::ControlOptions::EPOLL_CTL_ADD,
                self.qp.rxq.wait_fd(),
                epoll::Event::new(epoll::Events::EPOLLIN, RX_CALL_EVENT),
            )?;
            epoll::ctl(
                epoll_fd.as_raw_fd(),
                epoll::ControlOptions::EPOLL_CTL_ADD,
                self.qp.txq.wait_fd(),
                epoll::Event::new(epoll::Events::EPOLLIN, TX_CALL_EVENT),
            )?;
        }

        let mut events = vec![epoll::Event::new(epoll::Events::empty(), 0); 16];
        let timeout = if self.poll_mode { 0 } else { -1 };
        loop {
            let count = match epoll::wait(epoll_fd.as_raw_fd(), timeout, &mut events[..]) {
                Ok(count) => count,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => 0,
                Err(e) => return Err(e),
            };
            for event in &events[..count] {
                match event.data {
                    RX_CALL_EVENT => {
                        if let Err(e) = self.qp.rxq.on_call(stack) {
                            error!("receive refill failed: {}", e);
                        }
                    }
                    TX_CALL_EVENT => self.qp.txq.on_call(),
                    other => warn!("spurious event token {}", other),
                }
            }
            if self.poll_mode {
                if let Err(e) = self.qp.poll(stack) {
                    error!("poll tick failed: {:?}", e);
                }
            }
        }
    }
}

impl AsRawFd for VhostNet {
    fn as_raw_fd(&self) -> RawFd {
        self.vhost.as_raw_fd()
    }
}

/// The TUNSETOFFLOAD bits implied by the device capabilities.
fn tap_offload_bits(hw: &HwFeatures) -> c_uint {
    let mut offload = 0;
    if hw.tx_csum_l4_offload && hw.rx_csum_offload {
        offload = net_sys::TUN_F_CSUM;
        if hw.tx_tso {
            offload |= net_sys::TUN_F_TSO4;
        }
        if hw.tx_ufo {
            offload |= net_sys::TUN_F_UFO;
        }
    }
    offload
}

fn set_vring(vhost: &File, index: c_uint, size: u16, view: RingView) -> Result<()> {
    let state = vhost_vring_state {
        index,
        num: u32::from(size),
    };
    let ret = unsafe { ioctl_with_ref(vhost, VHOST_SET_VRING_NUM(), &state) };
    if ret < 0 {
        return Err(Error::SetVringNum(sys_util::Error::last()));
    }
    let addr = vhost_vring_addr {
        index,
        flags: 0,
        desc_user_addr: view.desc_table_addr(),
        used_user_addr: view.used_ring_addr(),
        avail_user_addr: view.avail_ring_addr(),
        log_guest_addr: 0,
    };
    let ret = unsafe { ioctl_with_ref(vhost, VHOST_SET_VRING_ADDR(), &addr) };
    if ret < 0 {
        return Err(Error::SetVringAddr(sys_util::Error::last()));
    }
    Ok(())
}

fn set_vring_fd(
    vhost: &File,
    request: std::os::raw::c_ulong,
    index: c_uint,
    fd: c_int,
    err: fn(sys_util::Error) -> Error,
) -> Result<()> {
    let file = vhost_vring_file { index, fd };
    let ret = unsafe { ioctl_with_ref(vhost, request, &file) };
    if ret < 0 {
        return Err(err(sys_util::Error::last()));
    }
    Ok(())
}
