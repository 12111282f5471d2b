// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The packet representation exchanged with the network stack.
//!
//! A packet is a list of fragment views over backing memory it owns, either
//! directly (DMA buffers assembled by the receive path) or through a release
//! callback supplied by the stack. The backing memory is released exactly
//! once, when the packet is dropped; descriptors referencing the fragments
//! must therefore be completed before that.

use sys_util::DmaBuffer;

/// A contiguous byte range of a packet.
#[derive(Clone, Copy, Debug)]
pub struct Fragment {
    pub base: *mut u8,
    pub len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Protocol {
    Tcp,
    Udp,
    Unknown,
}

/// Offload metadata travelling with a transmitted packet.
#[derive(Clone, Copy, Debug)]
pub struct OffloadInfo {
    pub protocol: Protocol,
    /// The L4 checksum still needs to be filled in.
    pub needs_csum: bool,
    pub ip_hdr_len: u16,
    pub tcp_hdr_len: u16,
    pub udp_hdr_len: u16,
}

impl Default for OffloadInfo {
    fn default() -> OffloadInfo {
        OffloadInfo {
            protocol: Protocol::Unknown,
            needs_csum: false,
            ip_hdr_len: 20,
            tcp_hdr_len: 20,
            udp_hdr_len: 8,
        }
    }
}

pub struct Packet {
    frags: Vec<Fragment>,
    buffers: Vec<DmaBuffer>,
    release: Option<Box<dyn FnOnce()>>,
    offload: OffloadInfo,
}

impl Packet {
    /// A packet whose fragments point into the given DMA buffers; the
    /// buffers are freed when the packet is dropped.
    pub fn from_buffers(frags: Vec<Fragment>, buffers: Vec<DmaBuffer>) -> Packet {
        Packet {
            frags,
            buffers,
            release: None,
            offload: OffloadInfo::default(),
        }
    }

    /// A packet over externally owned memory; `release` runs exactly once
    /// when the packet is dropped.
    pub fn with_release(frags: Vec<Fragment>, release: Box<dyn FnOnce()>) -> Packet {
        Packet {
            frags,
            buffers: Vec::new(),
            release: Some(release),
            offload: OffloadInfo::default(),
        }
    }

    /// A single-fragment packet holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> sys_util::Result<Packet> {
        let mut buf = DmaBuffer::new(bytes.len().max(1))?;
        buf.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        let frag = Fragment {
            base: buf.as_ptr(),
            len: bytes.len(),
        };
        Ok(Packet::from_buffers(vec![frag], vec![buf]))
    }

    pub fn len(&self) -> usize {
        self.frags.iter().map(|f| f.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nr_frags(&self) -> usize {
        self.frags.len()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.frags
    }

    pub fn offload(&self) -> OffloadInfo {
        self.offload
    }

    pub fn set_offload(&mut self, offload: OffloadInfo) {
        self.offload = offload;
    }

    #[cfg(test)]
    pub fn backing_buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
