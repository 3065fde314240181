//! Per-stack flow statistics.
//!
//! A [`FlowMonitor`] is attached to the nodes of one stack. It classifies
//! packets into flows by their UDP five-tuple, keeps passive counters for
//! every flow, and takes exactly one snapshot at a scheduled time. The
//! snapshot first marks every packet still in flight as lost, then writes a
//! stable XML artifact.

pub mod histogram;
pub mod xml;

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::DropReason;
use crate::types::{as_seconds, FlowId, NodeId, Port, SimTime};

pub use histogram::Histogram;

/// IP protocol number for UDP.
pub const PROTOCOL_UDP: u8 = 17;

/// Delay histogram bin width, seconds.
pub const DELAY_BIN_WIDTH: f64 = 0.001;
/// Jitter histogram bin width, seconds.
pub const JITTER_BIN_WIDTH: f64 = 0.001;
/// Packet-size histogram bin width, bytes.
pub const PACKET_SIZE_BIN_WIDTH: f64 = 20.0;

/// Errors raised by the flow monitor.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("flow monitor for `{0}` was already serialized")]
    AlreadySerialized(String),

    #[error("failed to write flow statistics to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render flow statistics: {0}")]
    Render(#[from] std::fmt::Error),
}

/// Classification key of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub src_port: Port,
    pub dst_port: Port,
}

impl FiveTuple {
    /// A UDP five-tuple.
    pub fn udp(src: Ipv4Addr, src_port: Port, dst: Ipv4Addr, dst_port: Port) -> Self {
        Self {
            src,
            dst,
            protocol: PROTOCOL_UDP,
            src_port,
            dst_port,
        }
    }
}

/// Counters for one flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    pub time_first_tx: Option<SimTime>,
    pub time_first_rx: Option<SimTime>,
    pub time_last_tx: Option<SimTime>,
    pub time_last_rx: Option<SimTime>,
    pub delay_sum: SimTime,
    pub jitter_sum: SimTime,
    pub last_delay: SimTime,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub times_forwarded: u64,
    pub packets_dropped: BTreeMap<DropReason, u64>,
    pub bytes_dropped: BTreeMap<DropReason, u64>,
    pub delay_histogram: Histogram,
    pub jitter_histogram: Histogram,
    pub packet_size_histogram: Histogram,
}

impl Default for FlowStats {
    fn default() -> Self {
        Self {
            time_first_tx: None,
            time_first_rx: None,
            time_last_tx: None,
            time_last_rx: None,
            delay_sum: 0,
            jitter_sum: 0,
            last_delay: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_packets: 0,
            rx_packets: 0,
            lost_packets: 0,
            times_forwarded: 0,
            packets_dropped: BTreeMap::new(),
            bytes_dropped: BTreeMap::new(),
            delay_histogram: Histogram::new(DELAY_BIN_WIDTH),
            jitter_histogram: Histogram::new(JITTER_BIN_WIDTH),
            packet_size_histogram: Histogram::new(PACKET_SIZE_BIN_WIDTH),
        }
    }
}

impl FlowStats {
    /// Mean one-way delay in seconds, if anything was received.
    pub fn mean_delay(&self) -> Option<f64> {
        (self.rx_packets > 0).then(|| as_seconds(self.delay_sum) / self.rx_packets as f64)
    }

    /// Received throughput in bits per second over the rx window.
    pub fn rx_throughput_bps(&self) -> Option<f64> {
        let (first, last) = (self.time_first_rx?, self.time_last_rx?);
        let window = as_seconds(last.saturating_sub(first));
        (window > 0.0).then(|| self.rx_bytes as f64 * 8.0 / window)
    }
}

/// A packet the monitor has seen leave but not yet arrive.
#[derive(Clone, Copy, Debug)]
struct InFlight {
    flow: FlowId,
    sent_at: SimTime,
    bytes: u32,
}

/// Totals taken at snapshot time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub flows: usize,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Output options for serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializeOptions {
    /// Emit delay/jitter/packet-size histograms
    pub histograms: bool,
    /// Emit the list of attached nodes
    pub probes: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            histograms: true,
            probes: true,
        }
    }
}

/// Passive per-flow counters for one stack.
///
/// # Example
///
/// ```
/// use stackweave::flow::{FiveTuple, FlowMonitor};
/// use std::net::Ipv4Addr;
///
/// let mut monitor = FlowMonitor::new("demo");
/// monitor.attach(&[0, 1]);
///
/// let tuple = FiveTuple::udp(Ipv4Addr::new(10, 0, 0, 1), 49153, Ipv4Addr::new(10, 0, 0, 2), 5000);
/// let uid = monitor.record_tx(1_000, tuple, 0, 1200).unwrap();
/// monitor.record_rx(1_500, uid, 1);
///
/// let stats = monitor.stats(1).unwrap();
/// assert_eq!(stats.rx_packets, 1);
/// assert_eq!(stats.delay_sum, 500);
/// ```
#[derive(Debug)]
pub struct FlowMonitor {
    stack: String,
    nodes: BTreeSet<NodeId>,
    classifier: BTreeMap<FiveTuple, FlowId>,
    flows: BTreeMap<FlowId, FlowStats>,
    in_flight: BTreeMap<u64, InFlight>,
    next_uid: u64,
    options: SerializeOptions,
    snapshot: Option<(SimTime, FlowSummary)>,
}

impl FlowMonitor {
    /// Creates a monitor with no attached nodes.
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            nodes: BTreeSet::new(),
            classifier: BTreeMap::new(),
            flows: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            next_uid: 0,
            options: SerializeOptions::default(),
            snapshot: None,
        }
    }

    /// Sets serialization options.
    pub fn with_options(mut self, options: SerializeOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces serialization options.
    pub fn set_options(&mut self, options: SerializeOptions) {
        self.options = options;
    }

    /// Name of the owning stack.
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Wires counters to every flow touching `nodes`.
    pub fn attach(&mut self, nodes: &[NodeId]) {
        self.nodes.extend(nodes.iter().copied());
    }

    /// Returns true if `node` is monitored.
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Monitored nodes.
    pub fn attached_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Returns true once the snapshot has been taken.
    pub fn is_finalized(&self) -> bool {
        self.snapshot.is_some()
    }

    fn classify(&mut self, tuple: FiveTuple) -> FlowId {
        let next = self.classifier.len() as FlowId + 1;
        *self.classifier.entry(tuple).or_insert(next)
    }

    /// Records a packet leaving `src_node`.
    ///
    /// Returns the packet uid to use for the matching rx/drop call, or `None`
    /// if the source node is not monitored or the snapshot was already taken.
    pub fn record_tx(&mut self, now: SimTime, tuple: FiveTuple, src_node: NodeId, bytes: u32) -> Option<u64> {
        if self.is_finalized() || !self.is_attached(src_node) {
            return None;
        }
        let flow = self.classify(tuple);
        let stats = self.flows.entry(flow).or_default();
        stats.time_first_tx.get_or_insert(now);
        stats.time_last_tx = Some(now);
        stats.tx_packets += 1;
        stats.tx_bytes += bytes as u64;

        let uid = self.next_uid;
        self.next_uid += 1;
        self.in_flight.insert(
            uid,
            InFlight {
                flow,
                sent_at: now,
                bytes,
            },
        );
        Some(uid)
    }

    /// Records arrival of packet `uid` at `dst_node`.
    pub fn record_rx(&mut self, now: SimTime, uid: u64, dst_node: NodeId) {
        if self.is_finalized() || !self.is_attached(dst_node) {
            return;
        }
        let Some(packet) = self.in_flight.remove(&uid) else {
            return;
        };
        let stats = self.flows.entry(packet.flow).or_default();
        let delay = now.saturating_sub(packet.sent_at);

        if stats.rx_packets > 0 {
            let jitter = delay.abs_diff(stats.last_delay);
            stats.jitter_sum += jitter;
            stats.jitter_histogram.add(as_seconds(jitter));
        }
        stats.delay_sum += delay;
        stats.delay_histogram.add(as_seconds(delay));
        stats.packet_size_histogram.add(packet.bytes as f64);
        stats.last_delay = delay;

        stats.time_first_rx.get_or_insert(now);
        stats.time_last_rx = Some(now);
        stats.rx_packets += 1;
        stats.rx_bytes += packet.bytes as u64;
    }

    /// Records that packet `uid` was dropped.
    pub fn record_drop(&mut self, uid: u64, reason: DropReason) {
        if self.is_finalized() {
            return;
        }
        let Some(packet) = self.in_flight.remove(&uid) else {
            return;
        };
        let stats = self.flows.entry(packet.flow).or_default();
        stats.lost_packets += 1;
        *stats.packets_dropped.entry(reason).or_default() += 1;
        *stats.bytes_dropped.entry(reason).or_default() += packet.bytes as u64;
    }

    /// Marks every packet still in flight as lost.
    pub fn check_for_lost_packets(&mut self) -> u64 {
        let in_flight = std::mem::take(&mut self.in_flight);
        let lost = in_flight.len() as u64;
        for packet in in_flight.into_values() {
            if let Some(stats) = self.flows.get_mut(&packet.flow) {
                stats.lost_packets += 1;
            }
        }
        lost
    }

    /// Number of packets currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stats for one flow.
    pub fn stats(&self, flow: FlowId) -> Option<&FlowStats> {
        self.flows.get(&flow)
    }

    /// All flows, ordered by id.
    pub fn flows(&self) -> &BTreeMap<FlowId, FlowStats> {
        &self.flows
    }

    /// Classifier entries ordered by flow id.
    pub fn classifier(&self) -> Vec<(FlowId, FiveTuple)> {
        let mut entries: Vec<_> = self.classifier.iter().map(|(t, id)| (*id, *t)).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Aggregates counters over all flows.
    pub fn summary(&self) -> FlowSummary {
        self.flows.values().fold(
            FlowSummary {
                flows: self.flows.len(),
                ..FlowSummary::default()
            },
            |mut acc, s| {
                acc.tx_packets += s.tx_packets;
                acc.rx_packets += s.rx_packets;
                acc.lost_packets += s.lost_packets;
                acc.tx_bytes += s.tx_bytes;
                acc.rx_bytes += s.rx_bytes;
                acc
            },
        )
    }

    /// The snapshot time and totals, once taken.
    pub fn snapshot(&self) -> Option<&(SimTime, FlowSummary)> {
        self.snapshot.as_ref()
    }

    /// Renders the current counters as XML.
    pub fn to_xml(&self) -> Result<String, FlowError> {
        Ok(xml::render(self, self.options)?)
    }

    /// Force-finalizes in-flight packets and writes the artifact to `path`.
    ///
    /// Runs once per monitor. The monitor is frozen even if writing fails.
    pub fn snapshot_and_serialize(&mut self, now: SimTime, path: &Path) -> Result<FlowSummary, FlowError> {
        if self.is_finalized() {
            return Err(FlowError::AlreadySerialized(self.stack.clone()));
        }
        let lost = self.check_for_lost_packets();
        let summary = self.summary();
        self.snapshot = Some((now, summary.clone()));

        tracing::info!(
            stack = %self.stack,
            time_s = as_seconds(now),
            flows = summary.flows,
            rx_packets = summary.rx_packets,
            lost_packets = summary.lost_packets,
            finalized_in_flight = lost,
            path = %path.display(),
            "flow snapshot"
        );

        let xml = self.to_xml()?;
        std::fs::write(path, xml).map_err(|source| FlowError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(src_port: Port) -> FiveTuple {
        FiveTuple::udp(
            Ipv4Addr::new(10, 60, 0, 1),
            src_port,
            Ipv4Addr::new(10, 60, 0, 2),
            5000,
        )
    }

    fn monitor() -> FlowMonitor {
        let mut m = FlowMonitor::new("thz");
        m.attach(&[0, 1]);
        m
    }

    #[test]
    fn test_classifier_assigns_ids_in_first_seen_order() {
        let mut m = monitor();
        m.record_tx(0, tuple(49154), 0, 100).unwrap();
        m.record_tx(0, tuple(49153), 0, 100).unwrap();
        m.record_tx(0, tuple(49154), 0, 100).unwrap();

        let entries = m.classifier();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (1, tuple(49154)));
        assert_eq!(entries[1], (2, tuple(49153)));
        assert_eq!(m.stats(1).unwrap().tx_packets, 2);
    }

    #[test]
    fn test_scope_limited_to_attached_nodes() {
        let mut m = monitor();
        assert!(m.record_tx(0, tuple(1), 42, 100).is_none());
        assert!(m.flows().is_empty());

        let uid = m.record_tx(0, tuple(1), 0, 100).unwrap();
        m.record_rx(10, uid, 42);
        // Arrival at an unmonitored node leaves the packet in flight
        assert_eq!(m.in_flight(), 1);
    }

    #[test]
    fn test_delay_and_jitter() {
        let mut m = monitor();
        let a = m.record_tx(0, tuple(1), 0, 1000).unwrap();
        let b = m.record_tx(100, tuple(1), 0, 1000).unwrap();
        m.record_rx(50, a, 1);
        m.record_rx(180, b, 1);

        let s = m.stats(1).unwrap();
        assert_eq!(s.rx_packets, 2);
        assert_eq!(s.delay_sum, 50 + 80);
        assert_eq!(s.jitter_sum, 30);
        assert_eq!(s.last_delay, 80);
        assert_eq!(s.time_first_rx, Some(50));
        assert_eq!(s.time_last_rx, Some(180));
        assert_eq!(s.rx_bytes, 2000);
    }

    #[test]
    fn test_drop_counts_as_lost() {
        let mut m = monitor();
        let uid = m.record_tx(0, tuple(1), 0, 500).unwrap();
        m.record_drop(uid, DropReason::QueueFull);

        let s = m.stats(1).unwrap();
        assert_eq!(s.lost_packets, 1);
        assert_eq!(s.packets_dropped.get(&DropReason::QueueFull), Some(&1));
        assert_eq!(s.bytes_dropped.get(&DropReason::QueueFull), Some(&500));
        assert_eq!(m.in_flight(), 0);
    }

    #[test]
    fn test_check_for_lost_packets() {
        let mut m = monitor();
        m.record_tx(0, tuple(1), 0, 100).unwrap();
        m.record_tx(0, tuple(1), 0, 100).unwrap();
        let delivered = m.record_tx(0, tuple(1), 0, 100).unwrap();
        m.record_rx(5, delivered, 1);

        assert_eq!(m.check_for_lost_packets(), 2);
        assert_eq!(m.stats(1).unwrap().lost_packets, 2);
        assert_eq!(m.in_flight(), 0);
    }

    #[test]
    fn test_snapshot_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thz.xml");

        let mut m = monitor();
        m.record_tx(0, tuple(1), 0, 100).unwrap();

        let summary = m.snapshot_and_serialize(9, &path).unwrap();
        assert_eq!(summary.flows, 1);
        assert_eq!(summary.lost_packets, 1);
        assert!(path.exists());
        assert!(m.is_finalized());

        // Frozen after the snapshot
        assert!(m.record_tx(10, tuple(1), 0, 100).is_none());
        assert!(matches!(
            m.snapshot_and_serialize(10, &path),
            Err(FlowError::AlreadySerialized(_))
        ));
    }

    #[test]
    fn test_snapshot_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("thz.xml");

        let mut m = monitor();
        let err = m.snapshot_and_serialize(0, &path).unwrap_err();
        assert!(matches!(err, FlowError::Io { .. }));
        assert!(m.is_finalized());
    }

    #[test]
    fn test_throughput() {
        let mut m = monitor();
        let a = m.record_tx(0, tuple(1), 0, 1000).unwrap();
        let b = m.record_tx(0, tuple(1), 0, 1000).unwrap();
        m.record_rx(0, a, 1);
        m.record_rx(1_000_000_000, b, 1);

        let s = m.stats(1).unwrap();
        assert_eq!(s.rx_throughput_bps(), Some(16_000.0));
        assert_eq!(s.mean_delay(), Some(0.5));
    }
}
