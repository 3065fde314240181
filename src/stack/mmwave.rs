//! mmWave base-station / terminal stack.
//!
//! One gNB and one UE carry mmWave radio devices configured with a numerology
//! and a channel model. The radio link is part of the topology but does not
//! carry application traffic: a wired edge link between UE and gNB does. The
//! UE sends constant bit rate UDP to a packet sink on the gNB.

use std::path::Path;

use crate::address::Subnet;
use crate::channel::{propagation_delay, LinkModel};
use crate::config::MmwaveParams;
use crate::node::DeviceKind;
use crate::stack::{finish, BuildContext, ScenarioOutput, StackBuilder, StackError, StackSchedule, Topology};
use crate::traffic::{SinkKind, SinkSpec, TrafficFlow, TrafficPattern};
use crate::types::{micros, seconds, Position, SimTime};

/// Stack identity.
pub const NAME: &str = "mmwave";

/// Edge link data rate.
const EDGE_RATE_BPS: u64 = 1_000_000_000;

/// Builder for the mmWave scenario.
#[derive(Clone, Debug, Default)]
pub struct MmwaveStack {
    params: MmwaveParams,
}

impl MmwaveStack {
    /// Creates the builder.
    pub fn new(params: MmwaveParams) -> Self {
        Self { params }
    }

    /// Builder parameters.
    pub fn params(&self) -> &MmwaveParams {
        &self.params
    }
}

impl StackBuilder for MmwaveStack {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subnet(&self) -> Subnet {
        self.params.subnet
    }

    fn build(
        &self,
        ctx: &mut BuildContext<'_>,
        stop: SimTime,
        out_dir: &Path,
    ) -> Result<ScenarioOutput, StackError> {
        let schedule = StackSchedule::new(NAME, seconds(0.5), seconds(1.0), stop)?;
        let subnet = ctx.allocator.allocate(NAME)?;
        tracing::info!(stack = NAME, %subnet, "init");

        let p = &self.params;
        let mut topo = Topology::new(NAME);
        let gnb = topo.add_node(ctx.ids, "gnb", Some(Position::new(0.0, 0.0, 0.0)));
        let ue = topo.add_node(ctx.ids, "ue", Some(Position::new(p.ue_distance_m, 0.0, 0.0)));

        let numerology = p.numerology.to_string();
        let gnb_radio = topo.add_device(ctx.ids, gnb, DeviceKind::MmwaveGnb);
        let ue_radio = topo.add_device(ctx.ids, ue, DeviceKind::MmwaveUe);
        for id in [gnb_radio, ue_radio] {
            if let Some(device) = topo.device_mut(id) {
                device.attrs.insert("Numerology".to_string(), numerology.clone());
                device.attrs.insert("ChannelModel".to_string(), p.channel_model.clone());
            }
        }
        topo.connect(
            LinkModel::new("mmwave", 0, propagation_delay(p.ue_distance_m))
                .with_attr("Numerology", numerology)
                .with_attr("ChannelModel", p.channel_model.clone())
                .control_only(),
            &[gnb_radio, ue_radio],
        );

        // UE first so it takes the lower edge address
        let edge = [
            topo.add_device(ctx.ids, ue, DeviceKind::Csma),
            topo.add_device(ctx.ids, gnb, DeviceKind::Csma),
        ];
        topo.connect(LinkModel::csma(EDGE_RATE_BPS, micros(1)), &edge);
        topo.assign_addresses(subnet)?;

        let flow = TrafficFlow {
            source: ue,
            destination: topo.traffic_address(gnb)?,
            port: p.port,
            pattern: TrafficPattern::Cbr {
                data_rate_bps: p.data_rate_bps,
            },
            packet_size: p.packet_size,
            start: schedule.traffic_start,
            stop: schedule.traffic_stop,
        };
        let sink = SinkSpec {
            node: gnb,
            kind: SinkKind::PacketSink,
            start: schedule.sink_start,
            stop: schedule.traffic_stop,
        };

        finish(topo, ctx, subnet, schedule, flow, sink, out_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressAllocator;
    use crate::clock::Simulator;
    use crate::node::IdAllocator;
    use std::net::Ipv4Addr;

    #[test]
    fn test_build_topology() {
        let dir = tempfile::tempdir().unwrap();
        let stack = MmwaveStack::default();

        let mut sim = Simulator::new();
        let mut allocator = AddressAllocator::new();
        allocator.reserve(NAME, stack.subnet()).unwrap();
        let mut ids = IdAllocator::new();
        let mut ctx = BuildContext {
            clock: &mut sim,
            allocator: &mut allocator,
            ids: &mut ids,
            serialize: Default::default(),
        };

        let out = stack.build(&mut ctx, seconds(5.0), dir.path()).unwrap();
        let names: Vec<_> = out.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["gnb", "ue"]);
        assert_eq!(out.devices.len(), 4);

        let radio = &out.devices[0];
        assert_eq!(radio.kind, DeviceKind::MmwaveGnb);
        assert_eq!(radio.attrs.get("Numerology").map(String::as_str), Some("3"));
        assert_eq!(
            radio.attrs.get("ChannelModel").map(String::as_str),
            Some("ns3::MmWave3gppChannel")
        );

        // Edge link addressed first: UE .1, gNB .2
        assert_eq!(out.flow.destination, Ipv4Addr::new(10, 70, 0, 2));
        assert_eq!(out.flow.source, out.nodes[1].id);
        assert_eq!(out.sink.node, out.nodes[0].id);
        assert_eq!(out.addresses.len(), 4);
        assert!(out.addresses.iter().all(|a| out.subnet.contains(a.address)));

        let net = out.network.borrow();
        assert!(!net.links()[0].model().carries_traffic);
        assert!(net.links()[1].model().carries_traffic);
    }
}
