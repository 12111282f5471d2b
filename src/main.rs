// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! `vnetd`: brings a vhost-net backed virtio-net device up on a tap
//! interface and services its rings, counting what arrives.

extern crate clap;
#[macro_use]
extern crate log;
extern crate logger;
extern crate vnet;

use std::process;

use clap::{App, Arg};
use logger::Logger;
use vnet::{L2Receive, NetOptions, Packet, VhostNet};

/// Placeholder for the network stack above: counts and logs delivered frames.
#[derive(Default)]
struct PacketCounter {
    frames: u64,
    bytes: u64,
}

impl L2Receive for PacketCounter {
    fn l2receive(&mut self, packet: Packet) {
        self.frames += 1;
        self.bytes += packet.len() as u64;
        debug!("frame {}: {} bytes", self.frames, packet.len());
        if self.frames % 10_000 == 0 {
            info!("{} frames, {} bytes received", self.frames, self.bytes);
        }
    }
}

fn on_off_arg<'a>(name: &'a str, help: &'a str) -> Arg<'a, 'a> {
    Arg::with_name(name)
        .long(name)
        .takes_value(true)
        .possible_values(&["on", "off"])
        .default_value("on")
        .help(help)
}

fn main() {
    let matches = App::new("vnetd")
        .version("0.1.0")
        .about("User-space virtio-net driver over vhost-net.")
        .arg(
            Arg::with_name("tap-device")
                .long("tap-device")
                .help("Name of the tap interface to attach")
                .required(true)
                .takes_value(true),
        )
        .arg(on_off_arg("event-index", "Enable the event-index feature"))
        .arg(on_off_arg("csum-offload", "Enable checksum offload"))
        .arg(on_off_arg("tso", "Enable TCP segmentation offload"))
        .arg(on_off_arg("ufo", "Enable UDP fragmentation offload"))
        .arg(
            Arg::with_name("virtio-ring-size")
                .long("virtio-ring-size")
                .takes_value(true)
                .default_value("256")
                .help("Descriptor count of both rings (power of two)"),
        )
        .arg(
            Arg::with_name("virtio-poll-mode")
                .long("virtio-poll-mode")
                .help("Poll the rings instead of using interrupts"),
        )
        .get_matches();

    if let Err(e) = Logger::new().init() {
        eprintln!("could not initialize the log subsystem: {:?}", e);
        process::exit(1);
    }

    let ring_size = match matches.value_of("virtio-ring-size").unwrap().parse::<u32>() {
        Ok(size) => size,
        Err(_) => {
            error!("virtio-ring-size is not a number");
            process::exit(1);
        }
    };

    let opts = NetOptions {
        tap_name: matches.value_of("tap-device").unwrap().to_string(),
        event_index: matches.value_of("event-index") == Some("on"),
        csum_offload: matches.value_of("csum-offload") == Some("on"),
        tso: matches.value_of("tso") == Some("on"),
        ufo: matches.value_of("ufo") == Some("on"),
        ring_size,
        poll_mode: matches.is_present("virtio-poll-mode"),
    };

    let mut dev = match VhostNet::new(&opts) {
        Ok(dev) => dev,
        Err(e) => {
            error!("cannot create the virtio-net device: {:?}", e);
            process::exit(1);
        }
    };
    info!(
        "{} attached: mac {}, negotiated features {:#x}",
        opts.tap_name,
        dev.hw_address(),
        dev.features()
    );

    let mut stack = PacketCounter::default();
    if let Err(e) = dev.run(&mut stack) {
        error!("event loop failed: {}", e);
        process::exit(1);
    }
}
