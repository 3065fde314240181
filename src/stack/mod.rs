//! Technology stack builders.
//!
//! Every technology implements [`StackBuilder`]. A build creates an isolated
//! topology, assigns addresses from the stack's reserved subnet, installs one
//! traffic generator and one sink, attaches a flow monitor to the stack's own
//! nodes and schedules the monitor snapshot. All of it is registered on the
//! shared clock passed in through [`BuildContext`]; nothing runs until the
//! orchestrator starts that clock.
//!
//! Variants differ only in their topology and link parameters. The shared
//! steps live in [`Topology`] and [`finish`].

#[cfg(feature = "mmwave")]
pub mod mmwave;
#[cfg(feature = "sat")]
pub mod sat;
#[cfg(feature = "thz")]
pub mod thz;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{AddressAllocator, AddressAssigner, AddressError, InterfaceAddress, Subnet};
use crate::channel::{Link, LinkModel};
use crate::clock::{Clock, ClockError};
use crate::event::{EventKind, EventTag};
use crate::flow::{FlowSummary, SerializeOptions};
use crate::node::{DeviceKind, IdAllocator, NetDevice, Node};
use crate::output::{artifact_path, ensure_output_dir, DirStatus};
use crate::traffic::{self, Network, SharedNetwork, SinkSpec, TrafficFlow};
use crate::types::{as_seconds, millis, DeviceId, NodeId, Position, SimTime};

/// Traffic stops this long before the global stop time.
pub const TRAFFIC_STOP_MARGIN: SimTime = millis(100);

/// The metrics snapshot fires this long before the global stop time.
pub const SNAPSHOT_MARGIN: SimTime = millis(200);

/// Errors raised while building a stack.
#[derive(Error, Debug)]
pub enum StackError {
    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(
        "duration {stop_s}s is too short for `{stack}`: traffic starts at {start_s}s \
         but the snapshot would fire at {snapshot_s}s"
    )]
    DurationTooShort {
        stack: &'static str,
        stop_s: f64,
        start_s: f64,
        snapshot_s: f64,
    },

    #[error("node {node} of `{stack}` has no traffic-bearing interface")]
    NoInterface { stack: &'static str, node: NodeId },
}

impl StackError {
    /// Returns true for programmer errors that must abort the run.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, StackError::DurationTooShort { .. })
    }
}

/// Shared resources a builder registers against.
pub struct BuildContext<'a> {
    /// The one clock of the run
    pub clock: &'a mut dyn Clock,
    /// Subnet reservations
    pub allocator: &'a mut AddressAllocator,
    /// Run-wide node and device ids
    pub ids: &'a mut IdAllocator,
    /// Flow XML options
    pub serialize: SerializeOptions,
}

/// The contract every technology stack implements.
///
/// # Example
///
/// ```
/// use stackweave::address::{AddressAllocator, Subnet};
/// use stackweave::clock::{Clock, Simulator};
/// use stackweave::config::ThzParams;
/// use stackweave::node::IdAllocator;
/// use stackweave::stack::{BuildContext, StackBuilder};
/// use stackweave::stack::thz::ThzStack;
/// use stackweave::types::seconds;
///
/// let dir = tempfile::tempdir().unwrap();
/// let stack = ThzStack::new(ThzParams::default());
///
/// let mut sim = Simulator::new();
/// let mut allocator = AddressAllocator::new();
/// allocator.reserve(stack.name(), stack.subnet()).unwrap();
/// let mut ids = IdAllocator::new();
///
/// let mut ctx = BuildContext {
///     clock: &mut sim,
///     allocator: &mut allocator,
///     ids: &mut ids,
///     serialize: Default::default(),
/// };
/// let output = stack.build(&mut ctx, seconds(2.0), dir.path()).unwrap();
/// assert_eq!(output.nodes.len(), 2);
/// assert!(sim.pending() > 0);
/// ```
pub trait StackBuilder {
    /// Stable identity, also the name of the output directory and file.
    fn name(&self) -> &'static str;

    /// The subnet this stack reserves.
    fn subnet(&self) -> Subnet;

    /// Builds the scenario and registers its events on `ctx.clock`.
    fn build(
        &self,
        ctx: &mut BuildContext<'_>,
        stop: SimTime,
        out_dir: &Path,
    ) -> Result<ScenarioOutput, StackError>;
}

/// Virtual-time milestones of one stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSchedule {
    /// Sink or server starts accepting
    pub sink_start: SimTime,
    /// Generator starts
    pub traffic_start: SimTime,
    /// Generator and sink stop
    pub traffic_stop: SimTime,
    /// Flow monitor snapshot
    pub snapshot: SimTime,
}

impl StackSchedule {
    /// Derives the milestones from a global stop time.
    ///
    /// Fails when the snapshot would not come after traffic start.
    pub fn new(
        stack: &'static str,
        sink_start: SimTime,
        traffic_start: SimTime,
        stop: SimTime,
    ) -> Result<Self, StackError> {
        let snapshot = stop.saturating_sub(SNAPSHOT_MARGIN);
        if stop < SNAPSHOT_MARGIN || snapshot <= traffic_start {
            return Err(StackError::DurationTooShort {
                stack,
                stop_s: as_seconds(stop),
                start_s: as_seconds(traffic_start),
                snapshot_s: as_seconds(snapshot),
            });
        }
        Ok(Self {
            sink_start: sink_start.min(traffic_start),
            traffic_start,
            traffic_stop: stop - TRAFFIC_STOP_MARGIN,
            snapshot,
        })
    }
}

/// What one build produced.
#[derive(Debug)]
pub struct ScenarioOutput {
    /// Owning stack
    pub stack: &'static str,
    /// Subnet the addresses were drawn from
    pub subnet: Subnet,
    /// Nodes, in creation order
    pub nodes: Vec<Node>,
    /// Devices, in creation order
    pub devices: Vec<NetDevice>,
    /// Assigned interface addresses
    pub addresses: Vec<InterfaceAddress>,
    /// The installed generator
    pub flow: TrafficFlow,
    /// The installed sink
    pub sink: SinkSpec,
    /// Milestones registered on the clock
    pub schedule: StackSchedule,
    /// Where the flow artifact is written
    pub artifact: PathBuf,
    /// Live packet runtime
    pub network: SharedNetwork,
}

impl ScenarioOutput {
    /// Ids of the stack's nodes.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    /// Flow totals, once the snapshot has fired.
    pub fn flow_summary(&self) -> Option<FlowSummary> {
        self.network
            .borrow()
            .monitor()
            .snapshot()
            .map(|(_, summary)| summary.clone())
    }
}

/// Topology under construction for one stack.
#[derive(Debug)]
pub struct Topology {
    stack: &'static str,
    nodes: Vec<Node>,
    devices: Vec<NetDevice>,
    network: Network,
    addresses: Vec<InterfaceAddress>,
}

impl Topology {
    /// Starts an empty topology.
    pub fn new(stack: &'static str) -> Self {
        Self {
            stack,
            nodes: Vec::new(),
            devices: Vec::new(),
            network: Network::new(stack),
            addresses: Vec::new(),
        }
    }

    /// Creates a node.
    pub fn add_node(
        &mut self,
        ids: &mut IdAllocator,
        name: impl Into<String>,
        position: Option<Position>,
    ) -> NodeId {
        let id = ids.node();
        let mut node = Node::new(id, name);
        node.position = position;
        self.nodes.push(node);
        id
    }

    /// Installs a device on `node`.
    pub fn add_device(&mut self, ids: &mut IdAllocator, node: NodeId, kind: DeviceKind) -> DeviceId {
        let id = ids.device();
        self.devices.push(NetDevice::new(id, node, kind));
        if let Some(n) = self.nodes.iter_mut().find(|n| n.id == node) {
            n.devices.push(id);
        }
        id
    }

    /// Mutable access to a device, for setting attributes.
    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut NetDevice> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    /// Joins `devices` with a link and returns its index.
    pub fn connect(&mut self, model: LinkModel, devices: &[DeviceId]) -> usize {
        let mut link = Link::new(self.network.links().len() as u32, model);
        for id in devices {
            if let Some(device) = self.devices.iter().find(|d| d.id == *id) {
                link.attach(device.id, device.node, None);
            }
        }
        self.network.add_link(link)
    }

    /// Assigns one address per attached device from `subnet`.
    ///
    /// Traffic-bearing links are numbered first, so their devices get the
    /// lowest host addresses. Each node sends its traffic over the first
    /// traffic-bearing link it is attached to.
    pub fn assign_addresses(&mut self, subnet: Subnet) -> Result<(), AddressError> {
        let mut assigner = AddressAssigner::new(subnet);
        let mut order: Vec<usize> = (0..self.network.links().len()).collect();
        order.sort_by_key(|&i| !self.network.links()[i].model().carries_traffic);

        for index in order {
            let link = &self.network.links()[index];
            let carries_traffic = link.model().carries_traffic;
            let attachments = link.attachments().to_vec();

            for att in attachments {
                let address = assigner.next_address()?;
                if let Some(link) = self.network.link_mut(index) {
                    link.set_address(att.device, address);
                }
                if let Some(device) = self.device_mut(att.device) {
                    device.address = Some(address);
                }
                if carries_traffic && self.network.address_of(att.node).is_none() {
                    self.network.bind_interface(att.node, index, address);
                }
                self.addresses.push(InterfaceAddress {
                    node: att.node,
                    device: att.device,
                    address,
                    subnet,
                });
            }
        }
        tracing::debug!(stack = self.stack, %subnet, assigned = self.addresses.len(), "addresses assigned");
        Ok(())
    }

    /// Traffic address of `node`.
    pub fn traffic_address(&self, node: NodeId) -> Result<Ipv4Addr, StackError> {
        self.network.address_of(node).ok_or(StackError::NoInterface {
            stack: self.stack,
            node,
        })
    }

    /// Nodes created so far.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Devices created so far.
    pub fn devices(&self) -> &[NetDevice] {
        &self.devices
    }
}

/// Shared tail of every build: traffic, output directory, flow monitor and
/// its snapshot event.
pub fn finish(
    topology: Topology,
    ctx: &mut BuildContext<'_>,
    subnet: Subnet,
    schedule: StackSchedule,
    flow: TrafficFlow,
    sink: SinkSpec,
    out_dir: &Path,
) -> Result<ScenarioOutput, StackError> {
    let Topology {
        stack,
        nodes,
        devices,
        network,
        addresses,
    } = topology;
    let network = network.shared();

    traffic::install(&network, ctx.clock, flow, sink)?;

    if let DirStatus::Failed(err) = ensure_output_dir(out_dir) {
        tracing::warn!(stack, dir = %out_dir.display(), error = %err, "could not create output directory");
    }

    let node_ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
    {
        let mut net = network.borrow_mut();
        let monitor = net.monitor_mut();
        monitor.set_options(ctx.serialize);
        monitor.attach(&node_ids);
    }

    let artifact = artifact_path(out_dir, stack);
    let path = artifact.clone();
    let net = Rc::clone(&network);
    ctx.clock.schedule(
        schedule.snapshot,
        EventTag::new(stack, EventKind::MetricsSnapshot),
        Box::new(move |clock| {
            let now = clock.now();
            if let Err(err) = net.borrow_mut().monitor_mut().snapshot_and_serialize(now, &path) {
                tracing::warn!(stack, error = %err, "flow statistics not written");
            }
            Ok(())
        }),
    )?;

    tracing::info!(
        stack,
        nodes = nodes.len(),
        traffic_start_s = as_seconds(schedule.traffic_start),
        traffic_stop_s = as_seconds(schedule.traffic_stop),
        snapshot_s = as_seconds(schedule.snapshot),
        artifact = %artifact.display(),
        "stack ready"
    );

    Ok(ScenarioOutput {
        stack,
        subnet,
        nodes,
        devices,
        addresses,
        flow,
        sink,
        schedule,
        artifact,
        network,
    })
}
