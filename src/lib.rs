//! # Stackweave
//!
//! A multi-technology network-scenario orchestrator on a shared
//! discrete-event clock.
//!
//! ## Design Principles
//!
//! - **Capabilities, not branches**: technology stacks are registered in a
//!   [`CapabilityRegistry`] as available or unavailable; the orchestrator runs
//!   one uniform loop over it.
//! - **One builder contract**: every stack implements [`StackBuilder`] and
//!   produces an isolated topology, its traffic and a flow monitor.
//! - **Disjoint address space**: each stack reserves its own subnet; overlaps
//!   are rejected at reservation time.
//! - **One clock**: all stacks register their events on a single
//!   [`Simulator`], which is run exactly once. Events fire in
//!   `(time, registration order)` order, so every run is deterministic.
//!
//! ## Features
//!
//! - `thz` - terahertz line-of-sight stack
//! - `mmwave` - mmWave gNB/UE stack
//! - `sat` - satellite terminal/gateway stack
//!
//! All three are on by default. A stack built without its feature is still
//! known to the registry, as unavailable.
//!
//! ## Quick Start
//!
//! ```rust
//! use stackweave::{OrchestratorConfigBuilder, Orchestrator};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = OrchestratorConfigBuilder::new()
//!     .sat(true)
//!     .duration(2.5)
//!     .log_root(dir.path())
//!     .build()
//!     .unwrap();
//!
//! let report = Orchestrator::new(config).run().unwrap();
//! assert_eq!(report.stacks_run, 1);
//! assert!(dir.path().join("sat").join("sat.xml").exists());
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use stackweave::config::OrchestratorConfig;
//!
//! let config = OrchestratorConfig::from_yaml_file("scenario.yaml")?;
//! let report = stackweave::Orchestrator::new(config).run()?;
//! ```

pub mod types;
pub mod event;
pub mod clock;
pub mod node;
pub mod channel;
pub mod address;
pub mod flow;
pub mod traffic;
pub mod stack;
pub mod registry;
pub mod output;
pub mod config;
pub mod stats;
pub mod orchestrator;

// Re-export commonly used types
pub use types::{SimTime, NodeId, DeviceId, FlowId, Position};
pub use event::{Action, EventId, EventKind, EventQueue, EventTag};
pub use clock::{Clock, ClockError, ClockState, RunSummary, Simulator};
pub use address::{AddressAllocator, AddressError, Subnet};
pub use flow::{FlowError, FlowMonitor, FlowStats, FlowSummary};
pub use stack::{BuildContext, ScenarioOutput, StackBuilder, StackError};
pub use registry::{Capability, CapabilityRegistry};
pub use config::{BaseScenario, ConfigError, OrchestratorConfig, OrchestratorConfigBuilder};
pub use stats::{Diagnostic, RunReport, StackReport};
pub use orchestrator::{Orchestrator, OrchestratorError};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`, when
/// set, takes precedence over `level`.
///
/// # Example
///
/// ```rust,ignore
/// stackweave::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
