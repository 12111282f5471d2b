// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! How the ring engine signals the host and learns about completions.
//!
//! Two transports exist, fixed at construction time. The vhost backend uses
//! an eventfd pair: writing the kick fd notifies the kernel, and the kernel
//! writes the call fd when it has consumed buffers. An assigned virtio
//! device kicks through a device-specific doorbell and is woken locally
//! from its interrupt handler via `wake_wait`.

use std::os::unix::io::{AsRawFd, RawFd};

use sys_util::EventFd;

/// Doorbell of an assigned virtio device.
pub trait QueueKick {
    fn kick(&self, queue_index: u16);
}

pub enum Notifier {
    /// Eventfd pair wired to the vhost backend.
    Vhost { kick: EventFd, call: EventFd },
    /// Device doorbell plus a locally signalled wakeup fd.
    Assigned {
        device: Box<dyn QueueKick>,
        queue_index: u16,
        wakeup: EventFd,
    },
}

impl Notifier {
    pub fn vhost(kick: EventFd, call: EventFd) -> Notifier {
        Notifier::Vhost { kick, call }
    }

    pub fn assigned(device: Box<dyn QueueKick>, queue_index: u16) -> sys_util::Result<Notifier> {
        Ok(Notifier::Assigned {
            device,
            queue_index,
            wakeup: EventFd::nonblocking()?,
        })
    }

    /// Tell the host there is new work in the avail ring.
    pub fn notify(&self) {
        match self {
            Notifier::Vhost { kick, .. } => {
                if let Err(e) = kick.write(1) {
                    error!("failed to kick the host: {}", e);
                }
            }
            Notifier::Assigned {
                device,
                queue_index,
                ..
            } => device.kick(*queue_index),
        }
    }

    /// The fd that becomes readable once the host has published completions.
    /// Registered with the event loop in interrupt mode.
    pub fn wait_fd(&self) -> RawFd {
        match self {
            Notifier::Vhost { call, .. } => call.as_raw_fd(),
            Notifier::Assigned { wakeup, .. } => wakeup.as_raw_fd(),
        }
    }

    /// Resets the wakeup counter after the fd fired. A zero count (spurious
    /// wakeup) is fine.
    pub fn drain(&self) {
        let fd = match self {
            Notifier::Vhost { call, .. } => call,
            Notifier::Assigned { wakeup, .. } => wakeup,
        };
        let _ = fd.read();
    }

    /// Wakes a pending wait locally. Called from the interrupt handler of an
    /// assigned device; the vhost transport is only ever woken by the host.
    pub fn wake_wait(&self) {
        match self {
            Notifier::Vhost { .. } => {
                unreachable!("vhost notifier is woken through the call eventfd")
            }
            Notifier::Assigned { wakeup, .. } => {
                if let Err(e) = wakeup.write(1) {
                    error!("failed to wake the queue: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct RecordingKick {
        kicks: Rc<Cell<u32>>,
        last_queue: Rc<Cell<u16>>,
    }

    impl QueueKick for RecordingKick {
        fn kick(&self, queue_index: u16) {
            self.kicks.set(self.kicks.get() + 1);
            self.last_queue.set(queue_index);
        }
    }

    #[test]
    fn test_vhost_notify_writes_kick_fd() {
        let kick = EventFd::nonblocking().unwrap();
        let probe = kick.try_clone().unwrap();
        let n = Notifier::vhost(kick, EventFd::nonblocking().unwrap());
        n.notify();
        n.notify();
        assert_eq!(probe.read(), Ok(2));
    }

    #[test]
    fn test_vhost_drain_resets_call_fd() {
        let call = EventFd::nonblocking().unwrap();
        let host = call.try_clone().unwrap();
        let n = Notifier::vhost(EventFd::nonblocking().unwrap(), call);
        host.write(1).unwrap();
        n.drain();
        assert_eq!(host.read().unwrap_err().errno(), libc::EAGAIN);
        // A spurious drain must not fail.
        n.drain();
    }

    #[test]
    fn test_assigned_kick_and_wake() {
        let kicks = Rc::new(Cell::new(0));
        let last_queue = Rc::new(Cell::new(0));
        let n = Notifier::assigned(
            Box::new(RecordingKick {
                kicks: kicks.clone(),
                last_queue: last_queue.clone(),
            }),
            1,
        )
        .unwrap();

        n.notify();
        assert_eq!(kicks.get(), 1);
        assert_eq!(last_queue.get(), 1);

        // wake_wait makes the wait fd readable.
        n.wake_wait();
        let mut pollfd = libc::pollfd {
            fd: n.wait_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pollfd, 1, 0) };
        assert_eq!(ret, 1);
        n.drain();
    }
}
