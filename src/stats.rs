//! Run statistics and report export.
//!
//! A [`RunReport`] is what the orchestrator hands back: how many stacks ran,
//! what each of them built, the diagnostics raised along the way and the
//! clock summary. It exports to JSON and CSV and renders a human-readable
//! summary.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::address::Subnet;
use crate::clock::RunSummary;
use crate::flow::FlowSummary;
use crate::stack::ScenarioOutput;
use crate::types::{as_seconds, NodeId};

/// Severity of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A recoverable condition the orchestrator reported and moved past.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stack the diagnostic concerns, if any
    pub stack: Option<String>,
    /// Severity
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
}

impl Diagnostic {
    /// A warning about `stack`.
    pub fn warning(stack: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stack: Some(stack.into()),
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    /// A run-wide note.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            stack: None,
            severity: Severity::Info,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.stack {
            Some(stack) => write!(f, "[{stack}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// One node as reported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub name: String,
    /// Addresses of all devices on the node
    pub addresses: Vec<Ipv4Addr>,
}

/// What one stack built and measured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackReport {
    /// Stack name
    pub name: String,
    /// Reserved subnet
    pub subnet: Subnet,
    /// Nodes with their addresses
    pub nodes: Vec<NodeReport>,
    /// Flow artifact path
    pub artifact: PathBuf,
    /// Traffic start, seconds
    pub traffic_start_s: f64,
    /// Traffic stop, seconds
    pub traffic_stop_s: f64,
    /// Snapshot time, seconds
    pub snapshot_s: f64,
    /// Flow totals, if the snapshot fired
    pub flows: Option<FlowSummary>,
}

impl StackReport {
    /// Summarizes a built scenario.
    pub fn from_output(output: &ScenarioOutput) -> Self {
        let nodes = output
            .nodes
            .iter()
            .map(|node| NodeReport {
                id: node.id,
                name: node.name.clone(),
                addresses: output
                    .addresses
                    .iter()
                    .filter(|a| a.node == node.id)
                    .map(|a| a.address)
                    .collect(),
            })
            .collect();

        Self {
            name: output.stack.to_string(),
            subnet: output.subnet,
            nodes,
            artifact: output.artifact.clone(),
            traffic_start_s: as_seconds(output.schedule.traffic_start),
            traffic_stop_s: as_seconds(output.schedule.traffic_stop),
            snapshot_s: as_seconds(output.schedule.snapshot),
            flows: output.flow_summary(),
        }
    }
}

/// Result of one orchestration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Number of stacks built and run
    pub stacks_run: usize,
    /// Per-stack details, in build order
    pub stacks: Vec<StackReport>,
    /// Recoverable conditions
    pub diagnostics: Vec<Diagnostic>,
    /// Clock summary; absent when the clock was not run
    pub clock: Option<RunSummary>,
    /// Output root
    pub log_root: PathBuf,
    /// Wall-clock time of the orchestration in milliseconds
    pub wall_time_ms: f64,
}

impl RunReport {
    /// Returns true if the clock ran.
    pub fn clock_ran(&self) -> bool {
        self.clock.is_some()
    }

    /// Finds a stack by name.
    pub fn stack(&self, name: &str) -> Option<&StackReport> {
        self.stacks.iter().find(|s| s.name == name)
    }

    /// Exports the report to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports the report to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports per-stack flow totals to CSV.
    pub fn stacks_to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("stack,subnet,nodes,flows,tx_packets,rx_packets,lost_packets,tx_bytes,rx_bytes\n");

        for stack in &self.stacks {
            let f = stack.flows.clone().unwrap_or_default();
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                stack.name,
                stack.subnet,
                stack.nodes.len(),
                f.flows,
                f.tx_packets,
                f.rx_packets,
                f.lost_packets,
                f.tx_bytes,
                f.rx_bytes,
            ));
        }

        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Orchestration ===")?;
        writeln!(w, "Stacks run: {}", self.stacks_run)?;
        match &self.clock {
            Some(clock) => {
                writeln!(w, "Final time: {:.3} s", as_seconds(clock.final_time))?;
                writeln!(w, "Events fired: {}", clock.events_fired)?;
            }
            None => writeln!(w, "Clock not run")?,
        }
        writeln!(w, "Wall time: {:.2} ms", self.wall_time_ms)?;

        for stack in &self.stacks {
            writeln!(w)?;
            writeln!(w, "--- {} ({}) ---", stack.name, stack.subnet)?;
            for node in &stack.nodes {
                let addrs: Vec<String> = node.addresses.iter().map(|a| a.to_string()).collect();
                writeln!(w, "  node {} {}: {}", node.id, node.name, addrs.join(", "))?;
            }
            if let Some(f) = &stack.flows {
                writeln!(
                    w,
                    "  flows {}: tx {} rx {} lost {}",
                    f.flows, f.tx_packets, f.rx_packets, f.lost_packets
                )?;
            }
            writeln!(w, "  artifact: {}", stack.artifact.display())?;
        }

        if !self.diagnostics.is_empty() {
            writeln!(w)?;
            writeln!(w, "--- Diagnostics ---")?;
            for d in &self.diagnostics {
                writeln!(w, "{d}")?;
            }
        }

        Ok(())
    }

    /// Returns the summary as a string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunReport {
        RunReport {
            stacks_run: 1,
            stacks: vec![StackReport {
                name: "thz".to_string(),
                subnet: "10.60.0.0/24".parse().unwrap(),
                nodes: vec![NodeReport {
                    id: 0,
                    name: "thz-tx".to_string(),
                    addresses: vec![Ipv4Addr::new(10, 60, 0, 1)],
                }],
                artifact: PathBuf::from("logs/thz/thz.xml"),
                traffic_start_s: 1.0,
                traffic_stop_s: 9.9,
                snapshot_s: 9.8,
                flows: Some(FlowSummary {
                    flows: 1,
                    tx_packets: 10,
                    rx_packets: 9,
                    lost_packets: 1,
                    tx_bytes: 12280,
                    rx_bytes: 11052,
                }),
            }],
            diagnostics: vec![Diagnostic::warning("sat", "module absent")],
            clock: Some(RunSummary {
                events_fired: 25,
                final_time: 10_000_000_000,
                pending_at_stop: 0,
            }),
            log_root: PathBuf::from("logs"),
            wall_time_ms: 1.5,
        }
    }

    #[test]
    fn test_diagnostic_display() {
        assert_eq!(
            Diagnostic::warning("sat", "module absent").to_string(),
            "[sat] module absent"
        );
        assert_eq!(Diagnostic::info("nothing to do").to_string(), "nothing to do");
    }

    #[test]
    fn test_json_export() {
        let report = sample();
        let json = report.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["stacks_run"], 1);
        assert_eq!(parsed["stacks"][0]["subnet"], "10.60.0.0/24");
        assert_eq!(parsed["diagnostics"][0]["severity"], "warning");

        let restored: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, report);
    }

    #[test]
    fn test_csv_export() {
        let csv = sample().stacks_to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "thz,10.60.0.0/24,1,1,10,9,1,12280,11052");
    }

    #[test]
    fn test_summary() {
        let summary = sample().summary();
        assert!(summary.contains("Stacks run: 1"));
        assert!(summary.contains("--- thz (10.60.0.0/24) ---"));
        assert!(summary.contains("[sat] module absent"));

        let empty = RunReport::default().summary();
        assert!(empty.contains("Clock not run"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        assert!(timer.elapsed_ms() >= 0.0);
    }
}
