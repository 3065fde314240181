//! XML rendering of flow statistics.
//!
//! The layout follows the common flow-monitor schema: a `FlowStats` section
//! with one `Flow` element per flow, an `Ipv4FlowClassifier` section mapping
//! flow ids to five-tuples, and optionally a `FlowProbes` section listing the
//! monitored nodes. Output is fully determined by the counters, so two runs
//! with the same inputs produce byte-identical files.

use std::fmt::{self, Write};

use super::{FlowMonitor, FlowStats, Histogram, SerializeOptions};
use crate::types::SimTime;

fn time_attr(t: SimTime) -> String {
    format!("+{t}.0ns")
}

fn opt_time_attr(t: Option<SimTime>) -> String {
    time_attr(t.unwrap_or(0))
}

fn write_histogram(out: &mut String, name: &str, hist: &Histogram) -> fmt::Result {
    writeln!(out, "      <{name} nBins=\"{}\" >", hist.n_bins())?;
    for (index, start, count) in hist.occupied_bins() {
        writeln!(
            out,
            "        <bin index=\"{index}\" start=\"{start}\" width=\"{}\" count=\"{count}\" />",
            hist.bin_width()
        )?;
    }
    writeln!(out, "      </{name}>")
}

fn write_flow(out: &mut String, id: u32, stats: &FlowStats, options: SerializeOptions) -> fmt::Result {
    writeln!(
        out,
        "    <Flow flowId=\"{id}\" timeFirstTxPacket=\"{}\" timeFirstRxPacket=\"{}\" \
         timeLastTxPacket=\"{}\" timeLastRxPacket=\"{}\" delaySum=\"{}\" jitterSum=\"{}\" \
         lastDelay=\"{}\" txBytes=\"{}\" rxBytes=\"{}\" txPackets=\"{}\" rxPackets=\"{}\" \
         lostPackets=\"{}\" timesForwarded=\"{}\">",
        opt_time_attr(stats.time_first_tx),
        opt_time_attr(stats.time_first_rx),
        opt_time_attr(stats.time_last_tx),
        opt_time_attr(stats.time_last_rx),
        time_attr(stats.delay_sum),
        time_attr(stats.jitter_sum),
        time_attr(stats.last_delay),
        stats.tx_bytes,
        stats.rx_bytes,
        stats.tx_packets,
        stats.rx_packets,
        stats.lost_packets,
        stats.times_forwarded,
    )?;
    for (reason, number) in &stats.packets_dropped {
        writeln!(
            out,
            "      <packetsDropped reasonCode=\"{}\" number=\"{number}\" />",
            reason.as_str()
        )?;
    }
    for (reason, bytes) in &stats.bytes_dropped {
        writeln!(
            out,
            "      <bytesDropped reasonCode=\"{}\" bytes=\"{bytes}\" />",
            reason.as_str()
        )?;
    }
    if options.histograms {
        write_histogram(out, "delayHistogram", &stats.delay_histogram)?;
        write_histogram(out, "jitterHistogram", &stats.jitter_histogram)?;
        write_histogram(out, "packetSizeHistogram", &stats.packet_size_histogram)?;
    }
    writeln!(out, "    </Flow>")
}

/// Renders `monitor` as an XML document.
pub fn render(monitor: &FlowMonitor, options: SerializeOptions) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "<?xml version=\"1.0\" ?>")?;
    writeln!(out, "<FlowMonitor>")?;

    writeln!(out, "  <FlowStats>")?;
    for (id, stats) in monitor.flows() {
        write_flow(&mut out, *id, stats, options)?;
    }
    writeln!(out, "  </FlowStats>")?;

    writeln!(out, "  <Ipv4FlowClassifier>")?;
    for (id, t) in monitor.classifier() {
        writeln!(
            out,
            "    <Flow flowId=\"{id}\" sourceAddress=\"{}\" destinationAddress=\"{}\" \
             protocol=\"{}\" sourcePort=\"{}\" destinationPort=\"{}\" />",
            t.src, t.dst, t.protocol, t.src_port, t.dst_port
        )?;
    }
    writeln!(out, "  </Ipv4FlowClassifier>")?;

    if options.probes {
        writeln!(out, "  <FlowProbes>")?;
        for (index, node) in monitor.attached_nodes().enumerate() {
            writeln!(out, "    <FlowProbe index=\"{index}\" node=\"{node}\" />")?;
        }
        writeln!(out, "  </FlowProbes>")?;
    }

    writeln!(out, "</FlowMonitor>")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FiveTuple;
    use std::net::Ipv4Addr;

    fn populated() -> FlowMonitor {
        let mut m = FlowMonitor::new("mmwave");
        m.attach(&[4, 5]);
        let t = FiveTuple::udp(Ipv4Addr::new(10, 70, 0, 1), 49153, Ipv4Addr::new(10, 70, 0, 2), 6000);
        let uid = m.record_tx(1_000_000_000, t, 4, 1228).unwrap();
        m.record_rx(1_000_010_825, uid, 5);
        m
    }

    #[test]
    fn test_render_structure() {
        let xml = render(&populated(), SerializeOptions::default()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" ?>\n<FlowMonitor>"));
        assert!(xml.contains("<Flow flowId=\"1\" timeFirstTxPacket=\"+1000000000.0ns\""));
        assert!(xml.contains("rxPackets=\"1\""));
        assert!(xml.contains("delaySum=\"+10825.0ns\""));
        assert!(xml.contains(
            "sourceAddress=\"10.70.0.1\" destinationAddress=\"10.70.0.2\" protocol=\"17\" \
             sourcePort=\"49153\" destinationPort=\"6000\""
        ));
        assert!(xml.contains("<delayHistogram nBins=\"1\" >"));
        assert!(xml.contains("<FlowProbe index=\"1\" node=\"5\" />"));
        assert!(xml.trim_end().ends_with("</FlowMonitor>"));
    }

    #[test]
    fn test_render_without_histograms_or_probes() {
        let options = SerializeOptions {
            histograms: false,
            probes: false,
        };
        let xml = render(&populated(), options).unwrap();
        assert!(!xml.contains("Histogram"));
        assert!(!xml.contains("FlowProbes"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render(&populated(), SerializeOptions::default()).unwrap();
        let b = render(&populated(), SerializeOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_monitor() {
        let m = FlowMonitor::new("empty");
        let xml = render(&m, SerializeOptions::default()).unwrap();
        assert!(xml.contains("<FlowStats>\n  </FlowStats>"));
    }
}
