// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Virtio ABI constants and wire structures, per the legacy (pre-1.0) split
//! ring layout from `linux/virtio_ring.h` and `linux/virtio_net.h`.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

pub mod virtio_net;
pub mod virtio_ring;
