// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The split-virtqueue engine.
//!
//! A `Vring<T>` owns one queue's shared storage plus the driver-private
//! bookkeeping: the free-descriptor list threaded through the descriptor
//! `next` fields, the avail-ring head cursor, the used-ring tail cursor and
//! one completion token of type `T` per in-flight descriptor chain.
//!
//! The engine runs in one of two modes fixed at construction. In interrupt
//! mode every `submit` publishes `avail.idx` and applies the kick policy,
//! and `drain_used` re-arms host notifications before returning. In poll
//! mode chain heads are batched in memory, flushed when the batch reaches
//! [`POLL_FLUSH_THRESHOLD`] or on the next `poll` tick, and notifications
//! are never armed.

use std::num::Wrapping;
use std::sync::atomic::{fence, Ordering};

use virtio_sys::virtio_ring::{
    VRING_AVAIL_F_NO_INTERRUPT, VRING_DESC_F_WRITE, VRING_USED_F_NO_NOTIFY,
};

use crate::mem::{Descriptor, RingStorage, RingView};
use crate::notifier::Notifier;

/// Chain heads buffered in poll mode before a flush is forced.
const POLL_FLUSH_THRESHOLD: usize = 16;

/// One buffer of a descriptor chain to be posted.
#[derive(Clone, Copy, Debug)]
pub struct ChainBuffer {
    pub addr: u64,
    pub len: u32,
    pub writeable: bool,
}

pub struct Vring<T> {
    // Keeps the shared block alive; `view` points into it.
    _storage: RingStorage,
    view: RingView,
    event_index: bool,
    poll_mode: bool,
    notifier: Notifier,

    /// One slot per descriptor; `Some` while a chain headed by that
    /// descriptor is owned by the host.
    completions: Vec<Option<T>>,

    /// Next avail ring position, free-running mod 2^16.
    avail_head: Wrapping<u16>,
    /// Chains published since the last kick; bounds notification latency.
    avail_added_since_kick: u16,
    /// Next used ring position to consume, free-running mod 2^16.
    used_tail: Wrapping<u16>,

    // Free list: head/tail descriptor indices, meaningless when num_free is 0.
    free_head: u16,
    free_tail: u16,
    num_free: u16,

    /// Chain heads awaiting publication (poll mode only).
    batch: Vec<u16>,
}

impl<T> Vring<T> {
    pub fn new(
        storage: RingStorage,
        event_index: bool,
        poll_mode: bool,
        notifier: Notifier,
    ) -> Vring<T> {
        let view = storage.view();
        let size = view.size();
        // Thread the free list through the descriptor table: 0 -> 1 -> ...
        // The final link points one past the end and is never followed.
        for i in 0..size {
            view.write_desc(
                i,
                Descriptor {
                    addr: 0,
                    len: 0,
                    flags: 0,
                    next: i.wrapping_add(1),
                },
            );
        }
        Vring {
            _storage: storage,
            view,
            event_index,
            poll_mode,
            notifier,
            completions: (0..size).map(|_| None).collect(),
            avail_head: Wrapping(0),
            avail_added_since_kick: 0,
            used_tail: Wrapping(0),
            free_head: 0,
            free_tail: size - 1,
            num_free: size,
            batch: Vec::new(),
        }
    }

    pub fn size(&self) -> u16 {
        self.view.size()
    }

    /// Descriptors currently available for `add_chain`.
    pub fn num_free(&self) -> u16 {
        self.num_free
    }

    pub fn poll_mode(&self) -> bool {
        self.poll_mode
    }

    pub fn view(&self) -> RingView {
        self.view
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn masked(&self, index: u16) -> u16 {
        index & (self.size() - 1)
    }

    /// Pops the head of the free list. Callers must have checked `num_free`.
    fn allocate_desc(&mut self) -> u16 {
        assert!(self.num_free > 0, "virtqueue free list is empty");
        let desc = self.free_head;
        self.num_free -= 1;
        if self.num_free > 0 {
            self.free_head = self.view.desc_next(desc);
        }
        desc
    }

    /// Builds one descriptor chain for `bufs`, records `completion` under
    /// the chain head and stages the head for publication. Capacity for the
    /// whole chain must have been checked against `num_free` beforehand.
    pub fn add_chain(&mut self, bufs: &[ChainBuffer], completion: T) {
        assert!(!bufs.is_empty());
        assert!(
            bufs.len() <= self.num_free as usize,
            "descriptor chain of {} exceeds {} free descriptors",
            bufs.len(),
            self.num_free
        );
        let mut head = 0;
        let mut prev: Option<u16> = None;
        for buf in bufs {
            let desc_idx = self.allocate_desc();
            let mut flags = 0;
            if buf.writeable {
                flags |= VRING_DESC_F_WRITE;
            }
            self.view.write_desc(
                desc_idx,
                Descriptor {
                    addr: buf.addr,
                    len: buf.len,
                    flags,
                    next: 0,
                },
            );
            match prev {
                Some(prev_idx) => self.view.link_desc(prev_idx, desc_idx),
                None => head = desc_idx,
            }
            prev = Some(desc_idx);
        }

        debug_assert!(self.completions[head as usize].is_none());
        self.completions[head as usize] = Some(completion);

        if self.poll_mode {
            self.batch.push(head);
        } else {
            let slot = self.masked(self.avail_head.0);
            self.view.write_avail_entry(slot, head);
            self.avail_head += Wrapping(1);
        }
        self.avail_added_since_kick = self.avail_added_since_kick.wrapping_add(1);
    }

    /// Publishes every staged chain to the host. In poll mode this only
    /// flushes once enough heads have accumulated.
    pub fn submit(&mut self) {
        if self.poll_mode {
            if self.batch.len() >= POLL_FLUSH_THRESHOLD {
                self.flush_batch();
            }
            return;
        }
        self.view
            .avail_idx()
            .store(self.avail_head.0, Ordering::Release);
        self.kick();
    }

    /// Copies the batched heads into the avail ring and publishes them.
    pub fn flush_batch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        for i in 0..self.batch.len() {
            let head = self.batch[i];
            let slot = self.masked(self.avail_head.0);
            self.view.write_avail_entry(slot, head);
            self.avail_head += Wrapping(1);
        }
        self.batch.clear();
        self.view
            .avail_idx()
            .store(self.avail_head.0, Ordering::Release);
        self.kick();
    }

    /// Notifies the host of the just-published `avail.idx`, unless the host
    /// asked not to be notified at this point.
    fn kick(&mut self) {
        // Order the avail.idx publish against the suppression-state read.
        fence(Ordering::SeqCst);
        let mut need_kick = true;
        if self.event_index {
            let avail_idx = self.view.avail_idx().load(Ordering::Relaxed);
            let avail_event = self.view.avail_event().load(Ordering::Relaxed);
            // The host wants a kick once avail.idx moves past avail_event.
            need_kick = avail_idx.wrapping_sub(avail_event).wrapping_sub(1)
                < self.avail_added_since_kick;
        } else if self.view.used_flags().load(Ordering::Relaxed) & VRING_USED_F_NO_NOTIFY != 0 {
            return;
        }
        // Kick unconditionally before the unkicked count can alias around
        // the 16-bit index space.
        if need_kick || self.avail_added_since_kick >= u16::MAX / 2 {
            self.notifier.notify();
            self.avail_added_since_kick = 0;
        }
    }

    fn disable_interrupts(&self) {
        // With event_index the host only looks at used_event, which is armed
        // on the way out of the drain.
        if !self.poll_mode && !self.event_index {
            self.view
                .avail_flags()
                .store(VRING_AVAIL_F_NO_INTERRUPT, Ordering::Relaxed);
        }
    }

    /// Re-arms host notifications. Returns true if used entries were
    /// published while arming, in which case the drain must run again.
    fn enable_interrupts(&self) -> bool {
        if self.poll_mode {
            return false;
        }
        let tail = self.used_tail.0;
        if self.event_index {
            self.view.used_event().store(tail, Ordering::Relaxed);
        } else {
            self.view.avail_flags().store(0, Ordering::Relaxed);
        }
        // Arm first, then re-check the used index: an entry the host
        // publishes between the two is picked up by the caller instead of
        // being lost until the next (suppressed) interrupt.
        fence(Ordering::SeqCst);
        self.view.used_idx().load(Ordering::Relaxed) != tail
    }

    /// Consumes every published used entry, firing `complete(token, len)`
    /// per chain and splicing the chain's descriptors back onto the free
    /// list. In interrupt mode, leaves notifications armed.
    pub fn drain_used<F: FnMut(T, u32)>(&mut self, mut complete: F) {
        loop {
            self.disable_interrupts();
            let used_idx = self.view.used_idx().load(Ordering::Acquire);
            while self.used_tail.0 != used_idx {
                let elem = self.view.read_used_elem(self.masked(self.used_tail.0));
                self.used_tail += Wrapping(1);
                assert!(
                    (elem.id as usize) < self.completions.len(),
                    "used element id {} out of range",
                    elem.id
                );
                let head = elem.id as u16;
                let token = self.completions[head as usize]
                    .take()
                    .expect("used element for a chain that was never posted");
                complete(token, elem.len);
                self.free_chain(head);
            }
            if !self.enable_interrupts() {
                break;
            }
        }
    }

    /// Poll-mode tick: flush staged submissions, then reap completions.
    pub fn poll<F: FnMut(T, u32)>(&mut self, complete: F) {
        self.flush_batch();
        self.drain_used(complete);
    }

    /// Splices the whole chain starting at `head` onto the free-list tail in
    /// O(chain length). Descriptor bytes are not reset; the next `add_chain`
    /// overwrites them.
    fn free_chain(&mut self, head: u16) {
        if self.num_free == 0 {
            self.free_head = head;
        } else {
            self.view.write_desc_next(self.free_tail, head);
        }
        let mut id = head;
        let mut count = 1;
        loop {
            let desc = self.view.read_desc(id);
            if desc.flags & virtio_sys::virtio_ring::VRING_DESC_F_NEXT == 0 {
                break;
            }
            id = desc.next;
            count += 1;
        }
        self.free_tail = id;
        self.num_free += count;
    }

    #[cfg(test)]
    fn outstanding_chains(&self) -> usize {
        self.completions.iter().filter(|c| c.is_some()).count()
    }
}
