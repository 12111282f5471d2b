// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The transmit queue.
//!
//! Every outgoing packet gets a virtio-net header describing its checksum
//! and segmentation offload needs, then goes out as one descriptor chain:
//! the header first, one read-only descriptor per fragment after it. The
//! header bytes and the packet itself are owned by the chain's completion
//! token, so they stay alive until the host reports the chain used.
//!
//! Packets that do not fit the ring wait in a FIFO and are posted as
//! completions free descriptors, preserving submission order.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;

use virtio_sys::virtio_net::{
    virtio_net_hdr, virtio_net_hdr_mrg_rxbuf, VIRTIO_NET_HDR_F_NEEDS_CSUM,
    VIRTIO_NET_HDR_GSO_TCPV4, VIRTIO_NET_HDR_GSO_UDP,
};

use crate::device::HwFeatures;
use crate::packet::{Packet, Protocol};
use crate::vring::{ChainBuffer, Vring};

const ETH_HDR_LEN: u16 = 14;
// Checksum field offsets within the TCP and UDP headers.
const TCP_CSUM_OFFSET: u16 = 16;
const UDP_CSUM_OFFSET: u16 = 6;

/// Owns everything the host may still be reading: the boxed header the
/// first descriptor points at, and the packet fragments after it.
pub(crate) struct TxToken {
    _hdr: Box<virtio_net_hdr_mrg_rxbuf>,
    _packet: Packet,
}

pub struct TxQueue {
    ring: Vring<TxToken>,
    header_len: usize,
    hw_features: HwFeatures,
    virt_to_phys: fn(*const u8) -> u64,
    pending: VecDeque<Packet>,
}

impl TxQueue {
    pub fn new(
        ring: Vring<TxToken>,
        header_len: usize,
        hw_features: HwFeatures,
        virt_to_phys: fn(*const u8) -> u64,
    ) -> TxQueue {
        TxQueue {
            ring,
            header_len,
            hw_features,
            virt_to_phys,
            pending: VecDeque::new(),
        }
    }

    /// Queues `packet` for transmission. Packets reach the host in `post`
    /// order; the call returns once the packet is staged, not once the host
    /// has consumed it.
    pub fn post(&mut self, packet: Packet) {
        self.pending.push_back(packet);
        self.pump();
        if !self.ring.poll_mode() {
            // Opportunistically reap finished chains while we are here.
            self.reap();
        }
    }

    /// Posts queued packets for as long as descriptors are available.
    fn pump(&mut self) {
        let mut posted = false;
        while let Some(front) = self.pending.front() {
            let needed = front.nr_frags() + 1;
            if (self.ring.num_free() as usize) < needed {
                break;
            }
            let packet = self.pending.pop_front().unwrap();
            self.post_now(packet);
            posted = true;
        }
        if posted {
            self.ring.submit();
        }
    }

    fn post_now(&mut self, packet: Packet) {
        let mut hdr = Box::new(virtio_net_hdr_mrg_rxbuf::default());
        hdr.hdr = build_header(&packet, &self.hw_features);
        // num_buffers stays zero; the host ignores it on transmit.

        let mut chain = Vec::with_capacity(packet.nr_frags() + 1);
        chain.push(ChainBuffer {
            addr: (self.virt_to_phys)(&*hdr as *const virtio_net_hdr_mrg_rxbuf as *const u8),
            len: self.header_len as u32,
            writeable: false,
        });
        for frag in packet.fragments() {
            chain.push(ChainBuffer {
                addr: (self.virt_to_phys)(frag.base),
                len: frag.len as u32,
                writeable: false,
            });
        }
        self.ring.add_chain(
            &chain,
            TxToken {
                _hdr: hdr,
                _packet: packet,
            },
        );
    }

    /// Reaps completions (dropping each token frees its packet and header)
    /// and retries deferred packets. The host-reported byte count carries no
    /// information on transmit.
    fn reap(&mut self) {
        self.ring.drain_used(|_token, _len| {});
        self.pump();
    }

    /// Interrupt-mode completion entry point, invoked when the call fd fired.
    pub fn on_call(&mut self) {
        self.ring.notifier().drain();
        self.reap();
    }

    /// Poll-mode tick.
    pub fn poll(&mut self) {
        self.ring.poll(|_token, _len| {});
        self.pump();
    }

    pub fn wait_fd(&self) -> RawFd {
        self.ring.notifier().wait_fd()
    }

    pub fn ring_view(&self) -> crate::mem::RingView {
        self.ring.view()
    }

    pub fn ring_size(&self) -> u16 {
        self.ring.size()
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.pending.len()
    }
}

/// Fills in the virtio-net header from the packet's offload metadata and the
/// negotiated device features.
fn build_header(packet: &Packet, hw: &HwFeatures) -> virtio_net_hdr {
    let mut hdr = virtio_net_hdr::default();
    if !hw.tx_csum_l4_offload {
        return hdr;
    }
    let oi = packet.offload();
    let ip_hdr_len = oi.ip_hdr_len;
    let mtu = hw.mtu;
    match oi.protocol {
        Protocol::Tcp => {
            if oi.needs_csum {
                hdr.flags |= VIRTIO_NET_HDR_F_NEEDS_CSUM;
                hdr.csum_start = ETH_HDR_LEN + ip_hdr_len;
                hdr.csum_offset = TCP_CSUM_OFFSET;
            }
            if hw.tx_tso && packet.len() > (mtu + ETH_HDR_LEN) as usize {
                hdr.gso_type = VIRTIO_NET_HDR_GSO_TCPV4;
                hdr.hdr_len = ETH_HDR_LEN + ip_hdr_len + oi.tcp_hdr_len;
                hdr.gso_size = mtu - ip_hdr_len - oi.tcp_hdr_len;
            }
        }
        Protocol::Udp => {
            if oi.needs_csum {
                hdr.flags |= VIRTIO_NET_HDR_F_NEEDS_CSUM;
                hdr.csum_start = ETH_HDR_LEN + ip_hdr_len;
                hdr.csum_offset = UDP_CSUM_OFFSET;
            }
            if hw.tx_ufo && packet.len() > (mtu + ETH_HDR_LEN) as usize {
                hdr.gso_type = VIRTIO_NET_HDR_GSO_UDP;
                hdr.hdr_len = ETH_HDR_LEN + ip_hdr_len + oi.udp_hdr_len;
                hdr.gso_size = mtu - ip_hdr_len - oi.udp_hdr_len;
            }
        }
        Protocol::Unknown => {}
    }
    hdr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DEFAULT_MTU;
    use crate::mem::RingStorage;
    use crate::packet::OffloadInfo;
    use crate::vring::tests::{probed_notifier, take_kicks, HostSide};
    use std::ptr;

    fn offload_hw() -> HwFeatures {
        HwFeatures {
            tx_csum_l4_offload: true,
            rx_csum_offload: true,
            tx_tso: true,
            tx_ufo: true,
            mtu: DEFAULT_MTU,
        }
    }

    fn identity(p: *const u8) -> u64 {
        p as u64
    }

    fn test_txq(size: u16, header_len: usize, hw: HwFeatures) -> (TxQueue, HostSide, sys_util::EventFd) {
        let storage = RingStorage::new(size).unwrap();
        let (notifier, probe) = probed_notifier();
        let ring = Vring::new(storage, false, false, notifier);
        let host = HostSide::new(ring.view());
        (TxQueue::new(ring, header_len, hw, identity), host, probe)
    }

    fn read_header(addr: u64) -> virtio_net_hdr {
        unsafe { ptr::read_volatile(addr as *const virtio_net_hdr) }
    }

    fn tcp_packet(len: usize, needs_csum: bool) -> Packet {
        let mut p = Packet::from_slice(&vec![0u8; len]).unwrap();
        p.set_offload(OffloadInfo {
            protocol: Protocol::Tcp,
            needs_csum,
            ..OffloadInfo::default()
        });
        p
    }

    #[test]
    fn test_plain_segment_posts_header_and_payload() {
        // A 1500-byte TCP segment with no offload work: two read-only
        // descriptors, one kick, an all-zero header.
        let mut hw = offload_hw();
        hw.tx_csum_l4_offload = false;
        let (mut txq, host, probe) = test_txq(16, 10, hw);

        txq.post(tcp_packet(1500, false));

        assert_eq!(host.avail_idx(), 1);
        assert_eq!(take_kicks(&probe), 1);
        let chain = host.chain(host.avail_entry(0));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].len, 10);
        assert_eq!(chain[1].len, 1500);
        assert!(chain.iter().all(|d| d.flags & virtio_sys::virtio_ring::VRING_DESC_F_WRITE == 0));

        let hdr = read_header(chain[0].addr);
        assert_eq!(hdr.flags, 0);
        assert_eq!(hdr.gso_type, 0);
    }

    #[test]
    fn test_tso_header_fields() {
        // A 9000-byte TCP segment with checksum and TSO offload on.
        let (mut txq, host, _probe) = test_txq(16, 10, offload_hw());
        txq.post(tcp_packet(9000, true));

        let chain = host.chain(host.avail_entry(0));
        let hdr = read_header(chain[0].addr);
        assert_eq!(hdr.flags, VIRTIO_NET_HDR_F_NEEDS_CSUM);
        assert_eq!(hdr.csum_start, 14 + 20);
        assert_eq!(hdr.csum_offset, 16);
        assert_eq!(hdr.gso_type, VIRTIO_NET_HDR_GSO_TCPV4);
        assert_eq!(hdr.hdr_len, 14 + 20 + 20);
        assert_eq!(hdr.gso_size, 1500 - 20 - 20);
    }

    #[test]
    fn test_udp_ufo_header_fields() {
        let (mut txq, host, _probe) = test_txq(16, 10, offload_hw());
        let mut p = Packet::from_slice(&vec![0u8; 4000]).unwrap();
        p.set_offload(OffloadInfo {
            protocol: Protocol::Udp,
            needs_csum: true,
            ..OffloadInfo::default()
        });
        txq.post(p);

        let chain = host.chain(host.avail_entry(0));
        let hdr = read_header(chain[0].addr);
        assert_eq!(hdr.csum_offset, 6);
        assert_eq!(hdr.gso_type, VIRTIO_NET_HDR_GSO_UDP);
        assert_eq!(hdr.hdr_len, 14 + 20 + 8);
        assert_eq!(hdr.gso_size, 1500 - 20 - 8);
    }

    #[test]
    fn test_small_packet_has_no_gso() {
        let (mut txq, host, _probe) = test_txq(16, 10, offload_hw());
        txq.post(tcp_packet(1000, true));
        let chain = host.chain(host.avail_entry(0));
        let hdr = read_header(chain[0].addr);
        assert_eq!(hdr.flags, VIRTIO_NET_HDR_F_NEEDS_CSUM);
        assert_eq!(hdr.gso_type, 0);
        assert_eq!(hdr.gso_size, 0);
    }

    #[test]
    fn test_mergeable_header_length_is_respected() {
        let (mut txq, host, _probe) = test_txq(16, 12, offload_hw());
        txq.post(tcp_packet(100, false));
        let chain = host.chain(host.avail_entry(0));
        assert_eq!(chain[0].len, 12);
    }

    #[test]
    fn test_full_ring_defers_in_order() {
        // Ring of 4: each packet takes 2 descriptors, so the third waits
        // until the host consumes the first.
        let (mut txq, host, _probe) = test_txq(4, 10, offload_hw());
        txq.post(tcp_packet(100, false));
        txq.post(tcp_packet(200, false));
        txq.post(tcp_packet(300, false));

        assert_eq!(host.avail_idx(), 2);
        assert_eq!(txq.queued(), 1);

        host.complete(host.avail_entry(0), 0);
        txq.on_call();

        assert_eq!(host.avail_idx(), 3);
        assert_eq!(txq.queued(), 0);
        // The deferred packet is the 300-byte one, still in order.
        let chain = host.chain(host.avail_entry(2));
        assert_eq!(chain[1].len, 300);
    }

    #[test]
    fn test_completion_frees_descriptors() {
        let (mut txq, host, _probe) = test_txq(8, 10, offload_hw());
        txq.post(tcp_packet(64, false));
        txq.post(tcp_packet(64, false));
        assert_eq!(txq.ring.num_free(), 4);

        host.complete(host.avail_entry(0), 0);
        host.complete(host.avail_entry(1), 0);
        txq.on_call();
        assert_eq!(txq.ring.num_free(), 8);
    }
}
