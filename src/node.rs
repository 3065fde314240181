//! Simulated nodes and their network devices.
//!
//! A node is an addressable endpoint owned by exactly one stack. Devices
//! attach a node to a link and carry the interface address assigned from the
//! stack's subnet.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, NodeId, Position};

/// The technology a device implements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Terahertz line-of-sight transceiver
    Thz,
    /// mmWave base station (gNB)
    MmwaveGnb,
    /// mmWave user equipment
    MmwaveUe,
    /// Satellite user terminal
    SatUt,
    /// Satellite gateway
    SatGw,
    /// Transparent payload on board a satellite
    SatPayload,
    /// Shared-medium wired edge device
    Csma,
    /// Custom device type with a string identifier
    Custom(String),
}

/// A network device installed on a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetDevice {
    /// Unique identifier
    pub id: DeviceId,
    /// Node the device is installed on
    pub node: NodeId,
    /// Technology of the device
    pub kind: DeviceKind,
    /// Interface address, once assigned
    pub address: Option<Ipv4Addr>,
    /// Technology-specific attributes (numerology, channel model, ...)
    pub attrs: BTreeMap<String, String>,
}

impl NetDevice {
    /// Creates an unaddressed device.
    pub fn new(id: DeviceId, node: NodeId, kind: DeviceKind) -> Self {
        Self {
            id,
            node,
            kind,
            address: None,
            attrs: BTreeMap::new(),
        }
    }

    /// Adds an attribute to this device.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// A simulated endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier across the whole run
    pub id: NodeId,
    /// Human-readable role (e.g. "gnb", "ue")
    pub name: String,
    /// Position, for stacks where geometry matters
    pub position: Option<Position>,
    /// Devices installed on the node
    pub devices: Vec<DeviceId>,
}

impl Node {
    /// Creates a node without position or devices.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            position: None,
            devices: Vec::new(),
        }
    }

    /// Sets the node's position.
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

/// Hands out node and device ids that are unique for one orchestration run.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_node: NodeId,
    next_device: DeviceId,
}

impl IdAllocator {
    /// Creates an allocator starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh node id.
    pub fn node(&mut self) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        id
    }

    /// Returns a fresh device id.
    pub fn device(&mut self) -> DeviceId {
        let id = self.next_device;
        self.next_device += 1;
        id
    }

    /// Number of nodes handed out so far.
    pub fn node_count(&self) -> usize {
        self.next_node as usize
    }
}
