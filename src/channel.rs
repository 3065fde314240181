//! Link models.
//!
//! A [`Link`] connects two or more devices and decides when a packet sent at
//! a given time arrives at its destination. The model is deliberately small:
//! one shared transmitter per link, serialization at the link data rate, a
//! fixed propagation delay and a drop-tail queue.
//!
//! Physical-layer behaviour (propagation loss, MAC scheduling) is out of
//! scope; the technology parameters are carried as attributes so they show up
//! in the scenario description.
//!
//! # Example
//!
//! ```
//! use stackweave::channel::{Link, LinkModel};
//! use std::net::Ipv4Addr;
//!
//! // 1 Gbps, 1 µs edge link
//! let mut link = Link::new(0, LinkModel::csma(1_000_000_000, 1_000));
//! link.attach(0, 10, Some(Ipv4Addr::new(10, 0, 0, 1)));
//! link.attach(1, 11, Some(Ipv4Addr::new(10, 0, 0, 2)));
//!
//! // 1250 bytes take 10 µs on the wire, plus 1 µs propagation
//! let delivery = link.transmit(0, Ipv4Addr::new(10, 0, 0, 2), 1250).unwrap();
//! assert_eq!(delivery.arrival, 11_000);
//! assert_eq!(delivery.dst_node, 11);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, NodeId, SimTime, NANOS_PER_SEC};

/// Speed of light in vacuum, meters per second.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Default drop-tail queue limit, in packets.
pub const DEFAULT_QUEUE_LIMIT: usize = 100;

/// Why a link refused a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// The transmit queue was full.
    QueueFull,
    /// No device on the link owns the destination address.
    NoRoute,
}

impl DropReason {
    /// Stable name used in serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::QueueFull => "QueueFull",
            DropReason::NoRoute => "NoRoute",
        }
    }
}

/// Static description of a link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkModel {
    /// Technology label (e.g. "thz", "csma")
    pub technology: String,
    /// Data rate in bits per second
    pub data_rate_bps: u64,
    /// One-way propagation delay
    pub delay: SimTime,
    /// Drop-tail queue limit in packets
    pub queue_limit: usize,
    /// Whether application traffic may use this link
    pub carries_traffic: bool,
    /// Technology-specific attributes (frequency, bandwidth, ...)
    pub attrs: BTreeMap<String, String>,
}

impl LinkModel {
    /// Creates a traffic-bearing link model.
    pub fn new(technology: impl Into<String>, data_rate_bps: u64, delay: SimTime) -> Self {
        Self {
            technology: technology.into(),
            data_rate_bps,
            delay,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            carries_traffic: true,
            attrs: BTreeMap::new(),
        }
    }

    /// A shared-medium wired link.
    pub fn csma(data_rate_bps: u64, delay: SimTime) -> Self {
        Self::new("csma", data_rate_bps, delay)
    }

    /// A line-of-sight terahertz link.
    ///
    /// Capacity is taken as one bit per second per hertz of bandwidth, and the
    /// delay is the free-space propagation time over `distance_m`.
    pub fn thz(frequency_hz: f64, bandwidth_hz: f64, distance_m: f64) -> Self {
        Self::new("thz", bandwidth_hz.max(0.0) as u64, propagation_delay(distance_m))
            .with_attr("Frequency", format!("{frequency_hz}"))
            .with_attr("Bandwidth", format!("{bandwidth_hz}"))
    }

    /// Adds an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Sets the queue limit.
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit;
        self
    }

    /// Marks the link as signalling-only: it is part of the topology but
    /// application traffic does not ride it.
    pub fn control_only(mut self) -> Self {
        self.carries_traffic = false;
        self
    }

    /// Time needed to put `bytes` on the wire.
    pub fn serialization_time(&self, bytes: u32) -> SimTime {
        if self.data_rate_bps == 0 {
            return 0;
        }
        let bits = bytes as u128 * 8;
        let nanos = (bits * NANOS_PER_SEC as u128).div_ceil(self.data_rate_bps as u128);
        nanos as SimTime
    }
}

/// Free-space propagation delay over a distance in meters.
pub fn propagation_delay(distance_m: f64) -> SimTime {
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return 0;
    }
    (distance_m / SPEED_OF_LIGHT * NANOS_PER_SEC as f64).round() as SimTime
}

/// A device attached to a link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub device: DeviceId,
    pub node: NodeId,
    pub address: Option<Ipv4Addr>,
}

/// Where and when an accepted packet arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Arrival time at the destination device
    pub arrival: SimTime,
    /// Destination node
    pub dst_node: NodeId,
    /// Destination device
    pub dst_device: DeviceId,
}

/// Counters kept by a link.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_dropped: u64,
}

/// A live link instance.
#[derive(Clone, Debug)]
pub struct Link {
    id: u32,
    model: LinkModel,
    attachments: Vec<Attachment>,
    /// End-of-transmission times of packets in service or waiting
    in_service: VecDeque<SimTime>,
    stats: LinkStats,
}

impl Link {
    /// Creates a link with no devices attached.
    pub fn new(id: u32, model: LinkModel) -> Self {
        Self {
            id,
            model,
            attachments: Vec::new(),
            in_service: VecDeque::new(),
            stats: LinkStats::default(),
        }
    }

    /// Returns the link id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the link model.
    pub fn model(&self) -> &LinkModel {
        &self.model
    }

    /// Returns the attached devices.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Returns the link counters.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Attaches a device.
    pub fn attach(&mut self, device: DeviceId, node: NodeId, address: Option<Ipv4Addr>) {
        self.attachments.push(Attachment {
            device,
            node,
            address,
        });
    }

    /// Records the address assigned to an attached device.
    pub fn set_address(&mut self, device: DeviceId, address: Ipv4Addr) {
        if let Some(att) = self.attachments.iter_mut().find(|a| a.device == device) {
            att.address = Some(address);
        }
    }

    /// Finds the attachment owning `address`.
    pub fn resolve(&self, address: Ipv4Addr) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|a| a.address == Some(address))
    }

    /// Offers a packet of `bytes` to the link at time `now`.
    ///
    /// Returns the delivery on success, or why the packet was dropped.
    pub fn transmit(&mut self, now: SimTime, dst: Ipv4Addr, bytes: u32) -> Result<Delivery, DropReason> {
        let Some(target) = self.resolve(dst).cloned() else {
            self.stats.packets_dropped += 1;
            return Err(DropReason::NoRoute);
        };

        while self.in_service.front().is_some_and(|&end| end <= now) {
            self.in_service.pop_front();
        }
        // One packet in service plus `queue_limit` waiting
        if self.in_service.len() > self.model.queue_limit {
            self.stats.packets_dropped += 1;
            return Err(DropReason::QueueFull);
        }

        let start = self.in_service.back().copied().unwrap_or(now).max(now);
        let end = start + self.model.serialization_time(bytes);
        self.in_service.push_back(end);

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(Delivery {
            arrival: end + self.model.delay,
            dst_node: target.node,
            dst_device: target.device,
        })
    }
}
