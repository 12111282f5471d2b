// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device-level configuration: option handling, the offered feature mask and
//! the wiring of the tx/rx queue pair.

use std::io;
use std::mem;

use virtio_sys::virtio_net::{
    virtio_net_hdr, virtio_net_hdr_mrg_rxbuf, VIRTIO_NET_F_CSUM, VIRTIO_NET_F_GUEST_CSUM,
    VIRTIO_NET_F_GUEST_TSO4, VIRTIO_NET_F_GUEST_UFO, VIRTIO_NET_F_HOST_TSO4,
    VIRTIO_NET_F_HOST_UFO, VIRTIO_NET_F_MAC, VIRTIO_NET_F_MRG_RXBUF,
};
use virtio_sys::virtio_ring::{VIRTIO_RING_F_EVENT_IDX, VIRTIO_RING_F_INDIRECT_DESC};

use crate::mem::RingStorage;
use crate::notifier::Notifier;
use crate::rx::{L2Receive, RxQueue};
use crate::tx::TxQueue;
use crate::vring::Vring;

pub const DEFAULT_RING_SIZE: u16 = 256;
/// Largest ring the split layout supports.
pub const MAX_RING_SIZE: u16 = 32768;
pub const DEFAULT_MTU: u16 = 1500;

#[derive(Debug)]
pub enum Error {
    /// The ring size is zero, too large, or not a power of two.
    InvalidRingSize(u32),
    /// Failed to open `/dev/vhost-net`.
    VhostOpen(io::Error),
    GetFeatures(sys_util::Error),
    SetFeatures(sys_util::Error),
    SetOwner(sys_util::Error),
    SetMemTable(sys_util::Error),
    SetVringNum(sys_util::Error),
    SetVringAddr(sys_util::Error),
    SetVringKick(sys_util::Error),
    SetVringCall(sys_util::Error),
    SetBackend(sys_util::Error),
    Tap(net_util::Error),
    TapOffload(net_util::Error),
    TapVnetHdrSize(net_util::Error),
    /// Creating a kick or call eventfd failed.
    EventFd(sys_util::Error),
    /// Allocating ring storage failed.
    RingAlloc(sys_util::Error),
    /// Allocating receive buffers failed.
    BufferAlloc(sys_util::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Options consumed at device construction, one per command-line flag.
#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Name handed to TUNSETIFF.
    pub tap_name: String,
    /// Offer VIRTIO_RING_F_EVENT_IDX.
    pub event_index: bool,
    /// Offer checksum offload both ways.
    pub csum_offload: bool,
    /// Offer TCP segmentation offload.
    pub tso: bool,
    /// Offer UDP fragmentation offload.
    pub ufo: bool,
    /// Descriptor count of both rings; must be a power of two.
    pub ring_size: u32,
    /// Poll the used rings each tick instead of arming interrupts.
    pub poll_mode: bool,
}

impl Default for NetOptions {
    fn default() -> NetOptions {
        NetOptions {
            tap_name: String::new(),
            event_index: true,
            csum_offload: true,
            tso: true,
            ufo: true,
            ring_size: u32::from(DEFAULT_RING_SIZE),
            poll_mode: false,
        }
    }
}

/// Capabilities negotiated for the device, consumed by the tx path and the
/// stack above.
#[derive(Clone, Copy, Debug)]
pub struct HwFeatures {
    pub tx_csum_l4_offload: bool,
    pub rx_csum_offload: bool,
    pub tx_tso: bool,
    pub tx_ufo: bool,
    pub mtu: u16,
}

impl Default for HwFeatures {
    fn default() -> HwFeatures {
        HwFeatures {
            tx_csum_l4_offload: false,
            rx_csum_offload: false,
            tx_tso: false,
            tx_ufo: false,
            mtu: DEFAULT_MTU,
        }
    }
}

/// The feature bits this driver offers given `opts`, and the matching
/// hardware capabilities. Indirect descriptors are offered for
/// compatibility but never posted.
pub fn supported_features(opts: &NetOptions) -> (u64, HwFeatures) {
    let mut hw = HwFeatures::default();
    let mut features = 1u64 << VIRTIO_RING_F_INDIRECT_DESC | 1 << VIRTIO_NET_F_MRG_RXBUF;
    if opts.event_index {
        features |= 1 << VIRTIO_RING_F_EVENT_IDX;
    }
    if opts.csum_offload {
        features |= 1 << VIRTIO_NET_F_CSUM | 1 << VIRTIO_NET_F_GUEST_CSUM;
        hw.tx_csum_l4_offload = true;
        hw.rx_csum_offload = true;
    }
    if opts.tso {
        features |= 1 << VIRTIO_NET_F_HOST_TSO4 | 1 << VIRTIO_NET_F_GUEST_TSO4;
        hw.tx_tso = true;
    }
    if opts.ufo {
        features |= 1 << VIRTIO_NET_F_HOST_UFO | 1 << VIRTIO_NET_F_GUEST_UFO;
        hw.tx_ufo = true;
    }
    features |= 1 << VIRTIO_NET_F_MAC;
    (features, hw)
}

/// Header length implied by the negotiated feature set.
pub fn header_len(negotiated: u64) -> usize {
    if negotiated & (1 << VIRTIO_NET_F_MRG_RXBUF) != 0 {
        mem::size_of::<virtio_net_hdr_mrg_rxbuf>()
    } else {
        mem::size_of::<virtio_net_hdr>()
    }
}

pub fn validate_ring_size(size: u32) -> Result<u16> {
    if size == 0 || size > u32::from(MAX_RING_SIZE) || !size.is_power_of_two() {
        return Err(Error::InvalidRingSize(size));
    }
    Ok(size as u16)
}

/// The transmit/receive ring pair of one device.
pub struct QueuePair {
    pub txq: TxQueue,
    pub rxq: RxQueue,
}

impl QueuePair {
    pub fn new(
        ring_size: u16,
        negotiated: u64,
        hw: HwFeatures,
        poll_mode: bool,
        rx_notifier: Notifier,
        tx_notifier: Notifier,
        virt_to_phys: fn(*const u8) -> u64,
    ) -> Result<QueuePair> {
        let event_index = negotiated & (1 << VIRTIO_RING_F_EVENT_IDX) != 0;
        let hdr_len = header_len(negotiated);
        let rx_storage = RingStorage::new(ring_size).map_err(Error::RingAlloc)?;
        let tx_storage = RingStorage::new(ring_size).map_err(Error::RingAlloc)?;
        let rxq = RxQueue::new(
            Vring::new(rx_storage, event_index, poll_mode, rx_notifier),
            hdr_len,
            virt_to_phys,
        );
        let txq = TxQueue::new(
            Vring::new(tx_storage, event_index, poll_mode, tx_notifier),
            hdr_len,
            hw,
            virt_to_phys,
        );
        Ok(QueuePair { txq, rxq })
    }

    /// Poll-mode tick over both rings.
    pub fn poll(&mut self, stack: &mut dyn L2Receive) -> Result<()> {
        self.txq.poll();
        self.rxq.poll(stack).map_err(Error::BufferAlloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_feature_mask() {
        let (features, hw) = supported_features(&NetOptions::default());
        let expected = 1u64 << VIRTIO_RING_F_INDIRECT_DESC
            | 1 << VIRTIO_RING_F_EVENT_IDX
            | 1 << VIRTIO_NET_F_CSUM
            | 1 << VIRTIO_NET_F_GUEST_CSUM
            | 1 << VIRTIO_NET_F_HOST_TSO4
            | 1 << VIRTIO_NET_F_GUEST_TSO4
            | 1 << VIRTIO_NET_F_HOST_UFO
            | 1 << VIRTIO_NET_F_GUEST_UFO
            | 1 << VIRTIO_NET_F_MRG_RXBUF
            | 1 << VIRTIO_NET_F_MAC;
        assert_eq!(features, expected);
        assert!(hw.tx_csum_l4_offload && hw.rx_csum_offload && hw.tx_tso && hw.tx_ufo);
        assert_eq!(hw.mtu, DEFAULT_MTU);
    }

    #[test]
    fn test_disabled_options_clear_features() {
        let opts = NetOptions {
            event_index: false,
            csum_offload: false,
            tso: false,
            ufo: false,
            ..NetOptions::default()
        };
        let (features, hw) = supported_features(&opts);
        // MAC, MRG_RXBUF and INDIRECT_DESC are always offered.
        assert_eq!(
            features,
            1u64 << VIRTIO_RING_F_INDIRECT_DESC
                | 1 << VIRTIO_NET_F_MRG_RXBUF
                | 1 << VIRTIO_NET_F_MAC
        );
        assert!(!hw.tx_csum_l4_offload && !hw.tx_tso && !hw.tx_ufo);
    }

    #[test]
    fn test_header_len_selection() {
        assert_eq!(header_len(1 << VIRTIO_NET_F_MRG_RXBUF), 12);
        assert_eq!(header_len(0), 10);
    }

    #[test]
    fn test_ring_size_validation() {
        assert!(validate_ring_size(0).is_err());
        assert!(validate_ring_size(100).is_err());
        assert!(validate_ring_size(65536).is_err());
        assert_eq!(validate_ring_size(256).unwrap(), 256);
        assert_eq!(validate_ring_size(32768).unwrap(), 32768);
    }
}
