//! Satellite ground-terminal / gateway stack.
//!
//! A [`SatScenario`] generates the topology for one of the base scenarios:
//! user terminals spread over a number of beams, a set of gateways and one
//! geostationary satellite relaying between them. The user and feeder links
//! through the satellite are bent-pipe signalling links; the echo traffic
//! rides a wired edge link between the first terminal and the first gateway.

use std::path::Path;

use crate::address::Subnet;
use crate::channel::{propagation_delay, LinkModel};
use crate::config::{BaseScenario, SatParams};
use crate::node::DeviceKind;
use crate::stack::{finish, BuildContext, ScenarioOutput, StackBuilder, StackError, StackSchedule, Topology};
use crate::traffic::{SinkKind, SinkSpec, TrafficFlow, TrafficPattern};
use crate::types::{micros, millis, seconds, NodeId, Position, SimTime};

/// Stack identity.
pub const NAME: &str = "sat";

/// Edge link data rate.
const EDGE_RATE_BPS: u64 = 1_000_000_000;

/// User link data rate recorded on the bent-pipe link.
const USER_LINK_RATE_BPS: u64 = 100_000_000;

/// Feeder link data rate recorded on the bent-pipe link.
const FEEDER_LINK_RATE_BPS: u64 = 1_000_000_000;

/// Ground spacing between beam centers, meters.
const BEAM_SPACING_M: f64 = 250_000.0;

/// Nodes produced by [`SatScenario::create`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SatNodes {
    /// User terminals, beam by beam
    pub uts: Vec<NodeId>,
    /// Gateways
    pub gws: Vec<NodeId>,
    /// The satellite
    pub satellite: NodeId,
}

/// Satellite sub-scenario generator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SatScenario {
    base: BaseScenario,
    altitude_m: f64,
}

impl SatScenario {
    /// Creates a generator for `base` with the satellite at `altitude_m`.
    pub fn new(base: BaseScenario, altitude_m: f64) -> Self {
        Self { base, altitude_m }
    }

    /// Number of beams.
    pub fn beams(&self) -> usize {
        match self.base {
            BaseScenario::Simple => 1,
            BaseScenario::Larger => 5,
            BaseScenario::Full => 72,
        }
    }

    /// User terminals in every beam.
    pub fn uts_per_beam(&self) -> usize {
        match self.base {
            BaseScenario::Simple => 1,
            BaseScenario::Larger => 3,
            BaseScenario::Full => 1,
        }
    }

    /// Number of gateways.
    pub fn gateways(&self) -> usize {
        match self.base {
            BaseScenario::Simple => 1,
            BaseScenario::Larger => 2,
            BaseScenario::Full => 5,
        }
    }

    /// Creates terminals, gateways, the satellite and the bent-pipe links.
    pub fn create(&self, topo: &mut Topology, ctx: &mut BuildContext<'_>) -> SatNodes {
        let satellite = topo.add_node(
            ctx.ids,
            "geo-sat",
            Some(Position::new(0.0, 0.0, self.altitude_m)),
        );
        let user_payload = topo.add_device(ctx.ids, satellite, DeviceKind::SatPayload);
        let feeder_payload = topo.add_device(ctx.ids, satellite, DeviceKind::SatPayload);

        let mut uts = Vec::new();
        let mut user_link = vec![user_payload];
        for beam in 0..self.beams() {
            let x = beam as f64 * BEAM_SPACING_M;
            for i in 0..self.uts_per_beam() {
                let ut = topo.add_node(
                    ctx.ids,
                    format!("ut-{}-{}", beam + 1, i + 1),
                    Some(Position::new(x, i as f64 * 1_000.0, 0.0)),
                );
                let dev = topo.add_device(ctx.ids, ut, DeviceKind::SatUt);
                if let Some(device) = topo.device_mut(dev) {
                    device.attrs.insert("Beam".to_string(), (beam + 1).to_string());
                }
                user_link.push(dev);
                uts.push(ut);
            }
        }

        let mut gws = Vec::new();
        let mut feeder_link = vec![feeder_payload];
        for i in 0..self.gateways() {
            let gw = topo.add_node(
                ctx.ids,
                format!("gw-{}", i + 1),
                Some(Position::new(-(i as f64 + 1.0) * BEAM_SPACING_M, 0.0, 0.0)),
            );
            feeder_link.push(topo.add_device(ctx.ids, gw, DeviceKind::SatGw));
            gws.push(gw);
        }

        let delay = propagation_delay(self.altitude_m);
        topo.connect(
            LinkModel::new("sat-user", USER_LINK_RATE_BPS, delay).control_only(),
            &user_link,
        );
        topo.connect(
            LinkModel::new("sat-feeder", FEEDER_LINK_RATE_BPS, delay).control_only(),
            &feeder_link,
        );

        tracing::debug!(
            stack = NAME,
            scenario = ?self.base,
            uts = uts.len(),
            gws = gws.len(),
            "satellite scenario created"
        );
        SatNodes { uts, gws, satellite }
    }
}

/// Builder for the satellite scenario.
#[derive(Clone, Debug, Default)]
pub struct SatStack {
    params: SatParams,
}

impl SatStack {
    /// Creates the builder.
    pub fn new(params: SatParams) -> Self {
        Self { params }
    }

    /// Builder parameters.
    pub fn params(&self) -> &SatParams {
        &self.params
    }
}

impl StackBuilder for SatStack {
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
        let schedule = StackSchedule::new(NAME, seconds(1.0), seconds(2.0), stop)?;
        let subnet = ctx.allocator.allocate(NAME)?;
        tracing::info!(stack = NAME, %subnet, "init");

        let p = &self.params;
        let mut topo = Topology::new(NAME);
        let sat = SatScenario::new(p.base_scenario, p.altitude_m).create(&mut topo, ctx);
        let (ut, gw) = match (sat.uts.first(), sat.gws.first()) {
            (Some(&ut), Some(&gw)) => (ut, gw),
            _ => {
                return Err(StackError::NoInterface {
                    stack: NAME,
                    node: sat.satellite,
                })
            }
        };

        let edge = [
            topo.add_device(ctx.ids, ut, DeviceKind::Csma),
            topo.add_device(ctx.ids, gw, DeviceKind::Csma),
        ];
        topo.connect(LinkModel::csma(EDGE_RATE_BPS, micros(1)), &edge);
        topo.assign_addresses(subnet)?;

        let flow = TrafficFlow {
            source: ut,
            destination: topo.traffic_address(gw)?,
            port: p.port,
            pattern: TrafficPattern::Echo {
                interval: millis(p.echo_interval_ms),
                max_packets: p.max_packets,
            },
            packet_size: p.packet_size,
            start: schedule.traffic_start,
            stop: schedule.traffic_stop,
        };
        let sink = SinkSpec {
            node: gw,
            kind: SinkKind::EchoServer,
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

    fn build(params: SatParams, stop: SimTime) -> Result<ScenarioOutput, StackError> {
        let dir = tempfile::tempdir().unwrap();
        let stack = SatStack::new(params);

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
        stack.build(&mut ctx, stop, dir.path())
    }

    #[test]
    fn test_scenario_sizes() {
        let simple = SatScenario::new(BaseScenario::Simple, 1.0);
        assert_eq!((simple.beams(), simple.uts_per_beam(), simple.gateways()), (1, 1, 1));

        let larger = SatScenario::new(BaseScenario::Larger, 1.0);
        assert_eq!(larger.beams() * larger.uts_per_beam(), 15);
    }

    #[test]
    fn test_simple_build() {
        let out = build(SatParams::default(), seconds(10.0)).unwrap();

        // satellite, one UT, one GW
        assert_eq!(out.nodes.len(), 3);
        assert_eq!(out.nodes[1].name, "ut-1-1");
        assert_eq!(out.nodes[2].name, "gw-1");

        // Edge link first: UT .1, GW .2
        assert_eq!(out.flow.destination, Ipv4Addr::new(10, 50, 0, 2));
        assert_eq!(out.sink.kind, SinkKind::EchoServer);
        assert_eq!(out.schedule.traffic_start, seconds(2.0));
        assert_eq!(out.schedule.sink_start, seconds(1.0));
        assert!(matches!(out.flow.pattern, TrafficPattern::Echo { max_packets: 1_000_000, .. }));

        let net = out.network.borrow();
        let feeder = &net.links()[1];
        assert_eq!(feeder.model().technology, "sat-feeder");
        assert!(!feeder.model().carries_traffic);
        // GEO altitude, roughly 119 ms one way
        assert_eq!(feeder.model().delay / 1_000_000, 119);
    }

    #[test]
    fn test_larger_build() {
        let params = SatParams {
            base_scenario: BaseScenario::Larger,
            ..SatParams::default()
        };
        let out = build(params, seconds(10.0)).unwrap();
        assert_eq!(out.nodes.len(), 1 + 15 + 2);
        // every device addressed: 2 payloads, 15 UTs, 2 GWs, 2 edge
        assert_eq!(out.addresses.len(), 21);
    }

    #[test]
    fn test_duration_too_short() {
        let err = build(SatParams::default(), seconds(2.0)).unwrap_err();
        assert!(matches!(err, StackError::DurationTooShort { .. }));
    }
}
