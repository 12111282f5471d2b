// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The receive queue.
//!
//! The ring is kept topped up with page-sized writable buffers. The host
//! may merge one incoming frame across several of them, announcing the
//! buffer count in the first buffer's virtio-net header; completions feed a
//! small reassembly state machine that strips the header, collects the
//! fragments and hands the finished packet to the stack in arrival order.

use std::mem;
use std::os::unix::io::RawFd;

use byteorder::{ByteOrder, LittleEndian};

use sys_util::{DmaBuffer, Result};
use virtio_sys::virtio_net::VIRTIO_NET_HDR_NUM_BUFFERS_OFFSET;

use crate::packet::{Fragment, Packet};
use crate::vring::{ChainBuffer, Vring};

/// Size of every buffer posted to the host.
pub const RX_BUFFER_SIZE: usize = 4096;

/// Where finished packets are delivered.
pub trait L2Receive {
    fn l2receive(&mut self, packet: Packet);
}

pub struct RxQueue {
    ring: Vring<DmaBuffer>,
    header_len: usize,
    virt_to_phys: fn(*const u8) -> u64,

    /// Buffers still expected for the frame currently being reassembled;
    /// zero between frames.
    remaining_buffers: u16,
    fragments: Vec<Fragment>,
    buffers: Vec<DmaBuffer>,
}

impl RxQueue {
    pub fn new(
        ring: Vring<DmaBuffer>,
        header_len: usize,
        virt_to_phys: fn(*const u8) -> u64,
    ) -> RxQueue {
        RxQueue {
            ring,
            header_len,
            virt_to_phys,
            remaining_buffers: 0,
            fragments: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// Posts a fresh writable buffer for every free descriptor. Allocation
    /// failure aborts the refill and surfaces to the event loop.
    pub fn fill(&mut self) -> Result<()> {
        let mut posted = false;
        while self.ring.num_free() > 0 {
            let buf = DmaBuffer::new(RX_BUFFER_SIZE)?;
            let chain = [ChainBuffer {
                addr: (self.virt_to_phys)(buf.as_ptr()),
                len: RX_BUFFER_SIZE as u32,
                writeable: true,
            }];
            self.ring.add_chain(&chain, buf);
            posted = true;
        }
        if posted {
            self.ring.submit();
        }
        Ok(())
    }

    fn reap(&mut self, stack: &mut dyn L2Receive) {
        let RxQueue {
            ring,
            header_len,
            remaining_buffers,
            fragments,
            buffers,
            ..
        } = self;
        let header_len = *header_len;
        ring.drain_used(|buf, len| {
            complete_buffer(
                header_len,
                remaining_buffers,
                fragments,
                buffers,
                stack,
                buf,
                len,
            )
        });
    }

    /// Interrupt-mode completion entry point, invoked when the call fd fired.
    pub fn on_call(&mut self, stack: &mut dyn L2Receive) -> Result<()> {
        self.ring.notifier().drain();
        self.reap(stack);
        self.fill()
    }

    /// Poll-mode tick.
    pub fn poll(&mut self, stack: &mut dyn L2Receive) -> Result<()> {
        {
            let RxQueue {
                ring,
                header_len,
                remaining_buffers,
                fragments,
                buffers,
                ..
            } = self;
            let header_len = *header_len;
            ring.poll(|buf, len| {
                complete_buffer(
                    header_len,
                    remaining_buffers,
                    fragments,
                    buffers,
                    stack,
                    buf,
                    len,
                )
            });
        }
        self.fill()
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
}

/// Advances the reassembly state machine by one used buffer of `len` valid
/// bytes. The first buffer of a frame carries the virtio-net header; with a
/// 10-byte (non-mergeable) header the frame is always a single buffer.
fn complete_buffer(
    header_len: usize,
    remaining: &mut u16,
    fragments: &mut Vec<Fragment>,
    buffers: &mut Vec<DmaBuffer>,
    stack: &mut dyn L2Receive,
    buf: DmaBuffer,
    len: u32,
) {
    let len = len as usize;
    if *remaining == 0 {
        let num_buffers = if header_len == mem::size_of::<virtio_sys::virtio_net::virtio_net_hdr_mrg_rxbuf>() {
            LittleEndian::read_u16(
                &buf.as_slice()
                    [VIRTIO_NET_HDR_NUM_BUFFERS_OFFSET..VIRTIO_NET_HDR_NUM_BUFFERS_OFFSET + 2],
            )
        } else {
            1
        };
        assert!(num_buffers >= 1, "first receive buffer with num_buffers == 0");
        assert!(len >= header_len, "receive shorter than the virtio-net header");
        *remaining = num_buffers;
        fragments.clear();
        buffers.clear();
        fragments.push(Fragment {
            base: buf.ptr_at(header_len),
            len: len - header_len,
        });
    } else {
        fragments.push(Fragment {
            base: buf.as_ptr(),
            len,
        });
    }
    buffers.push(buf);
    *remaining -= 1;

    if *remaining == 0 {
        let packet = Packet::from_buffers(
            mem::replace(fragments, Vec::new()),
            mem::replace(buffers, Vec::new()),
        );
        stack.l2receive(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::RingStorage;
    use crate::vring::tests::{probed_notifier, HostSide};
    use std::ptr;

    struct CollectingStack {
        packets: Vec<Packet>,
    }

    impl L2Receive for CollectingStack {
        fn l2receive(&mut self, packet: Packet) {
            self.packets.push(packet);
        }
    }

    fn identity(p: *const u8) -> u64 {
        p as u64
    }

    fn test_rxq(size: u16, header_len: usize) -> (RxQueue, HostSide) {
        let storage = RingStorage::new(size).unwrap();
        let (notifier, _probe) = probed_notifier();
        let ring = Vring::new(storage, false, false, notifier);
        let host = HostSide::new(ring.view());
        (RxQueue::new(ring, header_len, identity), host)
    }

    /// Host-side: writes `num_buffers` into the mergeable header at the
    /// start of the posted buffer.
    fn write_num_buffers(host: &HostSide, head: u16, num_buffers: u16) {
        let addr = host.desc(head).addr;
        let p = (addr as usize + VIRTIO_NET_HDR_NUM_BUFFERS_OFFSET) as *mut u8;
        let bytes = num_buffers.to_le_bytes();
        unsafe {
            ptr::write_volatile(p, bytes[0]);
            ptr::write_volatile(p.add(1), bytes[1]);
        }
    }

    #[test]
    fn test_fill_posts_writable_page_buffers() {
        let (mut rxq, host) = test_rxq(16, 12);
        rxq.fill().unwrap();

        assert_eq!(rxq.ring.num_free(), 0);
        assert_eq!(host.avail_idx(), 16);
        for slot in 0..16 {
            let chain = host.chain(host.avail_entry(slot));
            assert_eq!(chain.len(), 1);
            assert_eq!(chain[0].len, RX_BUFFER_SIZE as u32);
            assert_ne!(
                chain[0].flags & virtio_sys::virtio_ring::VRING_DESC_F_WRITE,
                0
            );
            assert_eq!(chain[0].addr % 4096, 0);
        }
    }

    #[test]
    fn test_mergeable_two_buffer_frame() {
        // 4 KiB + 2 KiB spread over two posted buffers: one packet with
        // fragments (buf0 + 12, 4084) and (buf1, 2048).
        let (mut rxq, host) = test_rxq(16, 12);
        rxq.fill().unwrap();

        let head0 = host.avail_entry(0);
        let head1 = host.avail_entry(1);
        let buf0_addr = host.desc(head0).addr;
        let buf1_addr = host.desc(head1).addr;
        write_num_buffers(&host, head0, 2);
        host.complete(head0, 4096);
        host.complete(head1, 2048);

        let mut stack = CollectingStack { packets: Vec::new() };
        rxq.on_call(&mut stack).unwrap();

        assert_eq!(stack.packets.len(), 1);
        let p = &stack.packets[0];
        assert_eq!(p.nr_frags(), 2);
        assert_eq!(p.len(), 4096 + 2048 - 12);
        let frags = p.fragments();
        assert_eq!(frags[0].base as u64, buf0_addr + 12);
        assert_eq!(frags[0].len, 4084);
        assert_eq!(frags[1].base as u64, buf1_addr);
        assert_eq!(frags[1].len, 2048);
        assert_eq!(p.backing_buffers(), 2);

        // The two consumed slots were refilled right after the drain.
        assert_eq!(host.avail_idx(), 18);
        assert_eq!(rxq.ring.num_free(), 0);
    }

    #[test]
    fn test_single_buffer_frame() {
        let (mut rxq, host) = test_rxq(8, 12);
        rxq.fill().unwrap();

        let head = host.avail_entry(0);
        write_num_buffers(&host, head, 1);
        host.complete(head, 1514 + 12);

        let mut stack = CollectingStack { packets: Vec::new() };
        rxq.on_call(&mut stack).unwrap();

        assert_eq!(stack.packets.len(), 1);
        assert_eq!(stack.packets[0].nr_frags(), 1);
        assert_eq!(stack.packets[0].len(), 1514);
    }

    #[test]
    fn test_legacy_header_is_single_buffer() {
        // Without MRG_RXBUF the header is 10 bytes and has no num_buffers.
        let (mut rxq, host) = test_rxq(8, 10);
        rxq.fill().unwrap();

        host.complete(host.avail_entry(0), 60 + 10);

        let mut stack = CollectingStack { packets: Vec::new() };
        rxq.on_call(&mut stack).unwrap();
        assert_eq!(stack.packets.len(), 1);
        assert_eq!(stack.packets[0].len(), 60);
    }

    #[test]
    fn test_frames_are_delivered_in_arrival_order() {
        let (mut rxq, host) = test_rxq(8, 12);
        rxq.fill().unwrap();

        let head0 = host.avail_entry(0);
        let head1 = host.avail_entry(1);
        let head2 = host.avail_entry(2);
        // First frame spans two buffers, second is one.
        write_num_buffers(&host, head0, 2);
        host.complete(head0, 100);
        host.complete(head1, 200);
        write_num_buffers(&host, head2, 1);
        host.complete(head2, 312);

        let mut stack = CollectingStack { packets: Vec::new() };
        rxq.on_call(&mut stack).unwrap();

        assert_eq!(stack.packets.len(), 2);
        assert_eq!(stack.packets[0].len(), 100 - 12 + 200);
        assert_eq!(stack.packets[1].len(), 312 - 12);
    }

    #[test]
    #[should_panic]
    fn test_zero_num_buffers_panics() {
        let (mut rxq, host) = test_rxq(8, 12);
        rxq.fill().unwrap();
        let head = host.avail_entry(0);
        write_num_buffers(&host, head, 0);
        host.complete(head, 64);
        let mut stack = CollectingStack { packets: Vec::new() };
        let _ = rxq.on_call(&mut stack);
    }
}
