//! Terahertz line-of-sight stack.
//!
//! Two nodes 50 m apart share one THz channel. Node 0 runs a constant bit
//! rate UDP source towards a packet sink on node 1.

use std::path::Path;

use crate::address::Subnet;
use crate::channel::LinkModel;
use crate::config::ThzParams;
use crate::node::DeviceKind;
use crate::stack::{finish, BuildContext, ScenarioOutput, StackBuilder, StackError, StackSchedule, Topology};
use crate::traffic::{SinkKind, SinkSpec, TrafficFlow, TrafficPattern};
use crate::types::{seconds, Position, SimTime};

/// Stack identity.
pub const NAME: &str = "thz";

/// Builder for the terahertz scenario.
#[derive(Clone, Debug, Default)]
pub struct ThzStack {
    params: ThzParams,
}

impl ThzStack {
    /// Creates the builder.
    pub fn new(params: ThzParams) -> Self {
        Self { params }
    }

    /// Builder parameters.
    pub fn params(&self) -> &ThzParams {
        &self.params
    }
}

impl StackBuilder for ThzStack {
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
        let tx = topo.add_node(ctx.ids, "thz-tx", Some(Position::new(0.0, 0.0, 0.0)));
        let rx = topo.add_node(ctx.ids, "thz-rx", Some(Position::new(p.distance_m, 0.0, 0.0)));

        let devices = [
            topo.add_device(ctx.ids, tx, DeviceKind::Thz),
            topo.add_device(ctx.ids, rx, DeviceKind::Thz),
        ];
        topo.connect(
            LinkModel::thz(p.frequency_hz, p.bandwidth_hz, p.distance_m),
            &devices,
        );
        topo.assign_addresses(subnet)?;

        let flow = TrafficFlow {
            source: tx,
            destination: topo.traffic_address(rx)?,
            port: p.port,
            pattern: TrafficPattern::Cbr {
                data_rate_bps: p.data_rate_bps,
            },
            packet_size: p.packet_size,
            start: schedule.traffic_start,
            stop: schedule.traffic_stop,
        };
        let sink = SinkSpec {
            node: rx,
            kind: SinkKind::PacketSink,
            start: schedule.sink_start,
            stop: schedule.traffic_stop,
        };

        finish(topo, ctx, subnet, schedule, flow, sink, out_dir)
    }
}
