//! Traffic generators, sinks and the per-stack packet runtime.
//!
//! Each stack owns one [`Network`]: its links, the egress link and address of
//! every node, the bound sockets and its flow monitor. Scheduled actions
//! share it through an `Rc<RefCell<_>>`; everything runs on one thread.
//!
//! Two traffic patterns are supported:
//! - constant bit rate UDP (an on/off source that is always on) towards a
//!   packet sink
//! - UDP echo, where a client sends fixed-size packets at a fixed interval and
//!   the server returns each one

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::channel::{DropReason, Link};
use crate::clock::{Clock, ClockError};
use crate::event::{EventKind, EventTag};
use crate::flow::{FiveTuple, FlowMonitor};
use crate::types::{NodeId, Port, SimTime, NANOS_PER_SEC};

/// UDP (8) plus IPv4 (20) header bytes added to every payload.
pub const HEADER_OVERHEAD: u32 = 28;

/// First ephemeral port handed to client sockets.
pub const EPHEMERAL_PORT_START: Port = 49153;

/// Shared handle to a stack's packet runtime.
pub type SharedNetwork = Rc<RefCell<Network>>;

/// How a generator emits packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficPattern {
    /// Constant bit rate: one packet every `packet_size * 8 / data_rate_bps`.
    Cbr { data_rate_bps: u64 },
    /// Echo requests every `interval`, at most `max_packets` of them.
    Echo { interval: SimTime, max_packets: u64 },
}

/// What sits at the receiving end of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkKind {
    /// Consumes packets.
    PacketSink,
    /// Returns every packet to its sender.
    EchoServer,
}

/// Immutable description of one directional traffic flow.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlow {
    /// Node running the generator
    pub source: NodeId,
    /// Destination address
    pub destination: Ipv4Addr,
    /// Destination port
    pub port: Port,
    /// Emission pattern
    pub pattern: TrafficPattern,
    /// Payload size in bytes
    pub packet_size: u32,
    /// Generator start time
    pub start: SimTime,
    /// Generator stop time
    pub stop: SimTime,
}

impl TrafficFlow {
    /// Gap between consecutive packets.
    pub fn interval(&self) -> SimTime {
        match self.pattern {
            TrafficPattern::Cbr { data_rate_bps } if data_rate_bps > 0 => {
                let bits = self.packet_size as u128 * 8;
                (bits * NANOS_PER_SEC as u128).div_ceil(data_rate_bps as u128) as SimTime
            }
            TrafficPattern::Cbr { .. } => SimTime::MAX,
            TrafficPattern::Echo { interval, .. } => interval,
        }
    }
}

/// Receiving endpoint of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    /// Node the sink is bound on
    pub node: NodeId,
    /// Sink behaviour
    pub kind: SinkKind,
    /// Time the sink starts accepting
    pub start: SimTime,
    /// Time the sink stops accepting
    pub stop: SimTime,
}

/// Counters of one bound socket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    /// Packets that arrived while the socket was closed
    pub ignored: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SocketRole {
    Sink,
    EchoServer,
    Client,
}

#[derive(Clone, Debug)]
struct Socket {
    role: SocketRole,
    open: bool,
    stats: SocketStats,
}

#[derive(Clone, Copy, Debug, Default)]
struct Generator {
    active: bool,
    sent: u64,
}

/// The packet runtime of one stack.
#[derive(Debug)]
pub struct Network {
    stack: &'static str,
    links: Vec<Link>,
    egress: BTreeMap<NodeId, usize>,
    addresses: BTreeMap<NodeId, Ipv4Addr>,
    sockets: BTreeMap<(NodeId, Port), Socket>,
    next_ephemeral: BTreeMap<NodeId, Port>,
    generators: Vec<Generator>,
    monitor: FlowMonitor,
}

impl Network {
    /// Creates an empty runtime for `stack`.
    pub fn new(stack: &'static str) -> Self {
        Self {
            stack,
            links: Vec::new(),
            egress: BTreeMap::new(),
            addresses: BTreeMap::new(),
            sockets: BTreeMap::new(),
            next_ephemeral: BTreeMap::new(),
            generators: Vec::new(),
            monitor: FlowMonitor::new(stack),
        }
    }

    /// Wraps the runtime for sharing with scheduled actions.
    pub fn shared(self) -> SharedNetwork {
        Rc::new(RefCell::new(self))
    }

    /// Owning stack.
    pub fn stack(&self) -> &'static str {
        self.stack
    }

    /// Adds a link and returns its index.
    pub fn add_link(&mut self, link: Link) -> usize {
        self.links.push(link);
        self.links.len() - 1
    }

    /// Links of this stack.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Mutable access to a link.
    pub fn link_mut(&mut self, index: usize) -> Option<&mut Link> {
        self.links.get_mut(index)
    }

    /// Routes application traffic of `node` over link `index` from `address`.
    pub fn bind_interface(&mut self, node: NodeId, link: usize, address: Ipv4Addr) {
        self.egress.insert(node, link);
        self.addresses.insert(node, address);
    }

    /// Traffic address of `node`.
    pub fn address_of(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.addresses.get(&node).copied()
    }

    /// The stack's flow monitor.
    pub fn monitor(&self) -> &FlowMonitor {
        &self.monitor
    }

    /// Mutable access to the flow monitor.
    pub fn monitor_mut(&mut self) -> &mut FlowMonitor {
        &mut self.monitor
    }

    /// Counters of the socket bound at `(node, port)`.
    pub fn socket_stats(&self, node: NodeId, port: Port) -> Option<&SocketStats> {
        self.sockets.get(&(node, port)).map(|s| &s.stats)
    }

    /// Packets sent by generator `index`.
    pub fn generator_sent(&self, index: usize) -> Option<u64> {
        self.generators.get(index).map(|g| g.sent)
    }

    fn ephemeral_port(&mut self, node: NodeId) -> Port {
        let next = self.next_ephemeral.entry(node).or_insert(EPHEMERAL_PORT_START);
        let port = *next;
        *next = next.wrapping_add(1).max(EPHEMERAL_PORT_START);
        port
    }

    fn bind(&mut self, node: NodeId, port: Port, role: SocketRole, open: bool) {
        self.sockets.insert(
            (node, port),
            Socket {
                role,
                open,
                stats: SocketStats::default(),
            },
        );
    }

    fn set_open(&mut self, node: NodeId, port: Port, open: bool) {
        if let Some(socket) = self.sockets.get_mut(&(node, port)) {
            socket.open = open;
        }
    }

    fn tag(&self, kind: EventKind) -> EventTag {
        EventTag::new(self.stack, kind)
    }
}

/// Handles to the installed generator and sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstalledApps {
    /// Index of the generator in its network
    pub generator: usize,
    /// Ephemeral port used by the generator
    pub source_port: Port,
}

/// Sends one UDP packet from `(src_node, src_port)` at the current time.
///
/// The flow monitor sees the packet leave; the link decides when it arrives
/// or why it is dropped.
pub fn send(
    network: &SharedNetwork,
    clock: &mut dyn Clock,
    src_node: NodeId,
    src_port: Port,
    dst: Ipv4Addr,
    dst_port: Port,
    payload: u32,
) -> Result<(), ClockError> {
    let now = clock.now();
    let bytes = payload + HEADER_OVERHEAD;

    let (delivery, uid, tuple, tag) = {
        let mut net = network.borrow_mut();
        let Some(src) = net.address_of(src_node) else {
            tracing::warn!(stack = net.stack, node = src_node, "send from node without an interface");
            return Ok(());
        };
        let tuple = FiveTuple::udp(src, src_port, dst, dst_port);
        let uid = net.monitor.record_tx(now, tuple, src_node, bytes);
        if let Some(socket) = net.sockets.get_mut(&(src_node, src_port)) {
            socket.stats.tx_packets += 1;
        }

        let outcome = match net.egress.get(&src_node).copied() {
            Some(index) => net.links[index].transmit(now, dst, bytes),
            None => Err(DropReason::NoRoute),
        };
        match outcome {
            Ok(delivery) => (delivery, uid, tuple, net.tag(EventKind::PacketRx)),
            Err(reason) => {
                tracing::trace!(stack = net.stack, ?reason, %dst, "packet dropped");
                if let Some(uid) = uid {
                    net.monitor.record_drop(uid, reason);
                }
                return Ok(());
            }
        }
    };

    let network = Rc::clone(network);
    clock.schedule(
        delivery.arrival,
        tag,
        Box::new(move |clock| deliver(&network, clock, delivery.dst_node, uid, tuple, bytes)),
    )?;
    Ok(())
}

fn deliver(
    network: &SharedNetwork,
    clock: &mut dyn Clock,
    node: NodeId,
    uid: Option<u64>,
    tuple: FiveTuple,
    bytes: u32,
) -> Result<(), ClockError> {
    let now = clock.now();
    let echo = {
        let mut net = network.borrow_mut();
        if let Some(uid) = uid {
            net.monitor.record_rx(now, uid, node);
        }
        let Some(socket) = net.sockets.get_mut(&(node, tuple.dst_port)) else {
            return Ok(());
        };
        if !socket.open {
            socket.stats.ignored += 1;
            return Ok(());
        }
        socket.stats.rx_packets += 1;
        socket.stats.rx_bytes += bytes as u64;
        socket.role == SocketRole::EchoServer
    };

    if echo {
        send(
            network,
            clock,
            node,
            tuple.dst_port,
            tuple.src,
            tuple.src_port,
            bytes - HEADER_OVERHEAD,
        )?;
    }
    Ok(())
}

fn generator_tick(
    network: SharedNetwork,
    clock: &mut dyn Clock,
    index: usize,
    src_port: Port,
    flow: TrafficFlow,
) -> Result<(), ClockError> {
    let now = clock.now();
    let (active, sent) = {
        let net = network.borrow();
        let generator = net.generators[index];
        (generator.active, generator.sent)
    };
    if !active || now >= flow.stop {
        return Ok(());
    }
    if let TrafficPattern::Echo { max_packets, .. } = flow.pattern {
        if sent >= max_packets {
            return Ok(());
        }
    }

    send(&network, clock, flow.source, src_port, flow.destination, flow.port, flow.packet_size)?;
    network.borrow_mut().generators[index].sent += 1;

    let next = now.saturating_add(flow.interval());
    if next < flow.stop {
        let tag = network.borrow().tag(EventKind::PacketTx);
        clock.schedule(
            next,
            tag,
            Box::new(move |clock| generator_tick(network, clock, index, src_port, flow)),
        )?;
    }
    Ok(())
}

/// Installs one generator and one sink and registers their start/stop events.
///
/// CBR generators send their first packet one interval after start; echo
/// clients send immediately at start.
pub fn install(
    network: &SharedNetwork,
    clock: &mut dyn Clock,
    flow: TrafficFlow,
    sink: SinkSpec,
) -> Result<InstalledApps, ClockError> {
    let (index, src_port) = {
        let mut net = network.borrow_mut();
        let role = match sink.kind {
            SinkKind::PacketSink => SocketRole::Sink,
            SinkKind::EchoServer => SocketRole::EchoServer,
        };
        net.bind(sink.node, flow.port, role, false);

        let src_port = net.ephemeral_port(flow.source);
        net.bind(flow.source, src_port, SocketRole::Client, true);
        net.generators.push(Generator::default());
        (net.generators.len() - 1, src_port)
    };
    let tag = |kind| EventTag::new(network.borrow().stack, kind);

    let net = Rc::clone(network);
    let (node, port) = (sink.node, flow.port);
    clock.schedule(
        sink.start,
        tag(EventKind::SinkStart),
        Box::new(move |_| {
            net.borrow_mut().set_open(node, port, true);
            Ok(())
        }),
    )?;

    let net = Rc::clone(network);
    clock.schedule(
        sink.stop,
        tag(EventKind::SinkStop),
        Box::new(move |_| {
            net.borrow_mut().set_open(node, port, false);
            Ok(())
        }),
    )?;

    let net = Rc::clone(network);
    clock.schedule(
        flow.start,
        tag(EventKind::TrafficStart),
        Box::new(move |clock| {
            net.borrow_mut().generators[index].active = true;
            let first = match flow.pattern {
                TrafficPattern::Cbr { .. } => clock.now().saturating_add(flow.interval()),
                TrafficPattern::Echo { .. } => clock.now(),
            };
            if first < flow.stop {
                let tag = net.borrow().tag(EventKind::PacketTx);
                clock.schedule(
                    first,
                    tag,
                    Box::new(move |clock| generator_tick(net, clock, index, src_port, flow)),
                )?;
            }
            Ok(())
        }),
    )?;

    let net = Rc::clone(network);
    clock.schedule(
        flow.stop,
        tag(EventKind::TrafficStop),
        Box::new(move |_| {
            let mut net = net.borrow_mut();
            net.generators[index].active = false;
            tracing::debug!(stack = net.stack, sent = net.generators[index].sent, "generator stopped");
            Ok(())
        }),
    )?;

    Ok(InstalledApps {
        generator: index,
        source_port: src_port,
    })
}
