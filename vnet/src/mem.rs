// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared-memory layout of a split virtqueue.
//!
//! Each queue owns one page-aligned block holding the three ring regions:
//!
//! ```text
//! descs  at offset 0                          (N * 16 bytes)
//! avail  at offset N*16                       (6 + N*2 + 2 bytes, incl. used_event)
//! used   at align_up(avail_end, 4096)         (6 + N*8 + 2 bytes, incl. avail_event)
//! ```
//!
//! The host reads and writes this block while the driver is live, so there
//! are no Rust references into it: index and flag words are accessed through
//! `AtomicU16` views, descriptor and used-element slots through volatile
//! reads and writes. `RingView` is a plain copy of the region pointers and
//! carries no ownership; the owning `RingStorage` must outlive every view.

use std::ptr;
use std::sync::atomic::AtomicU16;

use sys_util::{DmaBuffer, Result, PAGE_SIZE};

const DESC_TABLE_ENTRY_SIZE: usize = 16;
const USED_ELEM_SIZE: usize = 8;

/// One entry of the descriptor table.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Descriptor {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

/// One entry of the used ring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UsedElem {
    pub id: u32,
    pub len: u32,
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Bytes to allocate for a ring of `size` descriptors. Overestimates to
/// guarantee room for the alignment gap between avail and used.
pub fn storage_bytes(size: u16) -> usize {
    3 * PAGE_SIZE + size as usize * (DESC_TABLE_ENTRY_SIZE + 2 + USED_ELEM_SIZE)
}

/// Owns the shared block of one virtqueue.
pub struct RingStorage {
    // Keeps the block alive; all access goes through the view.
    _buf: DmaBuffer,
    view: RingView,
}

impl RingStorage {
    /// Allocates zeroed, page-aligned backing for a ring of `size`
    /// descriptors. `size` must be a power of two.
    pub fn new(size: u16) -> Result<RingStorage> {
        assert!(size.is_power_of_two());
        let buf = DmaBuffer::new(storage_bytes(size))?;
        let descs = buf.as_ptr();
        let avail_offset = size as usize * DESC_TABLE_ENTRY_SIZE;
        let avail_bytes = 6 + 2 * size as usize + 2;
        let used_offset = align_up(avail_offset + avail_bytes, PAGE_SIZE);
        let view = RingView {
            descs,
            avail: buf.ptr_at(avail_offset),
            used: buf.ptr_at(used_offset),
            size,
        };
        Ok(RingStorage { _buf: buf, view })
    }

    pub fn view(&self) -> RingView {
        self.view
    }
}

/// Unowned, copyable pointers into one queue's shared regions.
#[derive(Clone, Copy)]
pub struct RingView {
    descs: *mut u8,
    avail: *mut u8,
    used: *mut u8,
    size: u16,
}

impl RingView {
    pub fn size(&self) -> u16 {
        self.size
    }

    /// Address of the descriptor table, as registered with the backend.
    pub fn desc_table_addr(&self) -> u64 {
        self.descs as u64
    }

    pub fn avail_ring_addr(&self) -> u64 {
        self.avail as u64
    }

    pub fn used_ring_addr(&self) -> u64 {
        self.used as u64
    }

    fn atomic_u16(&self, p: *mut u8) -> &AtomicU16 {
        // The word is within the shared block, properly aligned, and only
        // ever accessed atomically from both sides.
        unsafe { &*(p as *const AtomicU16) }
    }

    pub fn avail_flags(&self) -> &AtomicU16 {
        self.atomic_u16(self.avail)
    }

    pub fn avail_idx(&self) -> &AtomicU16 {
        self.atomic_u16(unsafe { self.avail.add(2) })
    }

    /// The `used_event` word, right after the avail ring entries. Written by
    /// the driver to request an interrupt at an exact used index.
    pub fn used_event(&self) -> &AtomicU16 {
        self.atomic_u16(unsafe { self.avail.add(4 + 2 * self.size as usize) })
    }

    pub fn used_flags(&self) -> &AtomicU16 {
        self.atomic_u16(self.used)
    }

    pub fn used_idx(&self) -> &AtomicU16 {
        self.atomic_u16(unsafe { self.used.add(2) })
    }

    /// The `avail_event` word, right after the used ring entries. Written by
    /// the host to request a kick at an exact avail index.
    pub fn avail_event(&self) -> &AtomicU16 {
        self.atomic_u16(unsafe { self.used.add(4 + USED_ELEM_SIZE * self.size as usize) })
    }

    fn desc_ptr(&self, index: u16) -> *mut u8 {
        debug_assert!(index < self.size);
        unsafe { self.descs.add(index as usize * DESC_TABLE_ENTRY_SIZE) }
    }

    pub fn write_desc(&self, index: u16, desc: Descriptor) {
        let p = self.desc_ptr(index);
        // Plain (volatile) stores; the release store of avail.idx publishes
        // them to the host.
        unsafe {
            ptr::write_volatile(p as *mut u64, desc.addr);
            ptr::write_volatile(p.add(8) as *mut u32, desc.len);
            ptr::write_volatile(p.add(12) as *mut u16, desc.flags);
            ptr::write_volatile(p.add(14) as *mut u16, desc.next);
        }
    }

    pub fn read_desc(&self, index: u16) -> Descriptor {
        let p = self.desc_ptr(index);
        unsafe {
            Descriptor {
                addr: ptr::read_volatile(p as *const u64),
                len: ptr::read_volatile(p.add(8) as *const u32),
                flags: ptr::read_volatile(p.add(12) as *const u16),
                next: ptr::read_volatile(p.add(14) as *const u16),
            }
        }
    }

    /// Marks descriptor `index` as continuing into `next`.
    pub fn link_desc(&self, index: u16, next: u16) {
        let p = self.desc_ptr(index);
        unsafe {
            let flags = ptr::read_volatile(p.add(12) as *const u16);
            ptr::write_volatile(
                p.add(12) as *mut u16,
                flags | virtio_sys::virtio_ring::VRING_DESC_F_NEXT,
            );
            ptr::write_volatile(p.add(14) as *mut u16, next);
        }
    }

    /// Rewrites only the `next` field, leaving the flags alone. The free
    /// list is threaded through `next` without touching stale flags.
    pub fn write_desc_next(&self, index: u16, next: u16) {
        let p = self.desc_ptr(index);
        unsafe { ptr::write_volatile(p.add(14) as *mut u16, next) };
    }

    pub fn desc_next(&self, index: u16) -> u16 {
        let p = self.desc_ptr(index);
        unsafe { ptr::read_volatile(p.add(14) as *const u16) }
    }

    pub fn write_avail_entry(&self, slot: u16, head: u16) {
        debug_assert!(slot < self.size);
        let p = unsafe { self.avail.add(4 + 2 * slot as usize) };
        unsafe { ptr::write_volatile(p as *mut u16, head) };
    }

    pub fn read_used_elem(&self, slot: u16) -> UsedElem {
        debug_assert!(slot < self.size);
        let p = unsafe { self.used.add(4 + USED_ELEM_SIZE * slot as usize) };
        unsafe {
            UsedElem {
                id: ptr::read_volatile(p as *const u32),
                len: ptr::read_volatile(p.add(4) as *const u32),
            }
        }
    }

    // Host-side accessors, used by the tests to play the backend.

    #[cfg(test)]
    pub fn read_avail_entry(&self, slot: u16) -> u16 {
        debug_assert!(slot < self.size);
        let p = unsafe { self.avail.add(4 + 2 * slot as usize) };
        unsafe { ptr::read_volatile(p as *const u16) }
    }

    #[cfg(test)]
    pub fn write_used_elem(&self, slot: u16, elem: UsedElem) {
        debug_assert!(slot < self.size);
        let p = unsafe { self.used.add(4 + USED_ELEM_SIZE * slot as usize) };
        unsafe {
            ptr::write_volatile(p as *mut u32, elem.id);
            ptr::write_volatile(p.add(4) as *mut u32, elem.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_layout_offsets() {
        let storage = RingStorage::new(256).unwrap();
        let v = storage.view();
        let base = v.desc_table_addr();
        assert_eq!(v.avail_ring_addr() - base, 256 * 16);
        // The used ring starts on the next page boundary past the avail ring.
        assert_eq!(v.used_ring_addr() % PAGE_SIZE as u64, 0);
        assert!(v.used_ring_addr() >= v.avail_ring_addr() + 6 + 2 * 256 + 2);
        assert_eq!(base % PAGE_SIZE as u64, 0);
    }

    #[test]
    fn test_storage_is_zeroed() {
        let storage = RingStorage::new(64).unwrap();
        let v = storage.view();
        assert_eq!(v.avail_idx().load(Ordering::Relaxed), 0);
        assert_eq!(v.used_idx().load(Ordering::Relaxed), 0);
        assert_eq!(v.read_desc(0), Descriptor::default());
    }

    #[test]
    fn test_desc_roundtrip() {
        let storage = RingStorage::new(16).unwrap();
        let v = storage.view();
        let d = Descriptor {
            addr: 0xdead_beef_cafe,
            len: 1500,
            flags: 0,
            next: 0,
        };
        v.write_desc(3, d);
        assert_eq!(v.read_desc(3), d);

        v.link_desc(3, 7);
        let linked = v.read_desc(3);
        assert_eq!(
            linked.flags,
            virtio_sys::virtio_ring::VRING_DESC_F_NEXT
        );
        assert_eq!(linked.next, 7);

        // Free-list threading leaves flags untouched.
        v.write_desc_next(3, 9);
        assert_eq!(v.read_desc(3).flags, linked.flags);
        assert_eq!(v.desc_next(3), 9);
    }

    #[test]
    fn test_event_words_are_past_the_rings() {
        let storage = RingStorage::new(8).unwrap();
        let v = storage.view();
        let used_event = v.used_event() as *const _ as u64;
        let avail_event = v.avail_event() as *const _ as u64;
        assert_eq!(used_event, v.avail_ring_addr() + 4 + 2 * 8);
        assert_eq!(avail_event, v.used_ring_addr() + 4 + 8 * 8);
    }

    #[test]
    fn test_used_elem_roundtrip() {
        let storage = RingStorage::new(8).unwrap();
        let v = storage.view();
        v.write_used_elem(2, UsedElem { id: 5, len: 4096 });
        assert_eq!(v.read_used_elem(2), UsedElem { id: 5, len: 4096 });
    }
}
