//! The orchestrator.
//!
//! Turns an [`OrchestratorConfig`] into zero or more stack builds, one clock
//! run and a [`RunReport`]. Stacks are visited in registry order. A stack
//! that is disabled is skipped silently; one that is enabled but unavailable
//! yields a diagnostic. If nothing was built the clock is left untouched.
//!
//! Recoverable conditions become diagnostics. Contract violations (an
//! unregistered or overlapping subnet, an event in the past, an invalid
//! clock state) are returned as [`OrchestratorError`].
//!
//! # Example
//!
//! ```
//! use stackweave::config::OrchestratorConfig;
//! use stackweave::orchestrator::Orchestrator;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = OrchestratorConfig {
//!     log_root: dir.path().to_path_buf(),
//!     ..OrchestratorConfig::default()
//! };
//!
//! // Nothing enabled: success, no clock run
//! let report = Orchestrator::new(config).run().unwrap();
//! assert_eq!(report.stacks_run, 0);
//! assert!(!report.clock_ran());
//! ```

use thiserror::Error;

use crate::address::{AddressAllocator, AddressError};
use crate::clock::{Clock, ClockError, Simulator};
use crate::config::OrchestratorConfig;
use crate::flow::SerializeOptions;
use crate::node::IdAllocator;
use crate::registry::{Capability, CapabilityRegistry};
use crate::stack::{BuildContext, ScenarioOutput, StackError};
use crate::stats::{Diagnostic, RunReport, StackReport, Timer};
use crate::types::{as_seconds, seconds, SimTime};

/// Guidance emitted when no stack was built.
pub const NO_STACKS_MESSAGE: &str =
    "No stacks enabled. Use --enableThz=1/--enableMmwave=1/--enableSat=1.";

/// Fatal errors: programmer errors that abort the run.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("stack `{stack}`: {source}")]
    Stack {
        stack: String,
        #[source]
        source: StackError,
    },

    #[error("registry entry `{key}` built stack `{builder}`")]
    NameMismatch { key: String, builder: String },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// Drives builders and the shared clock.
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: CapabilityRegistry,
}

impl Orchestrator {
    /// Creates an orchestrator over the stacks compiled into this build.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(config, CapabilityRegistry::from_build())
    }

    /// Creates an orchestrator over a custom registry.
    pub fn with_registry(config: OrchestratorConfig, registry: CapabilityRegistry) -> Self {
        Self { config, registry }
    }

    /// The configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The capability registry in use.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Runs on a fresh [`Simulator`].
    pub fn run(&self) -> Result<RunReport, OrchestratorError> {
        let mut sim = Simulator::new();
        self.run_with(&mut sim)
    }

    /// Runs on the supplied clock.
    ///
    /// The clock must be idle. It is run at most once and destroyed after the
    /// run.
    pub fn run_with(&self, clock: &mut dyn Clock) -> Result<RunReport, OrchestratorError> {
        let timer = Timer::start();
        let stop = seconds(self.config.duration);
        let mut diagnostics = Vec::new();
        let outputs = self.build_stacks(clock, stop, &mut diagnostics)?;

        let mut report = RunReport {
            stacks_run: outputs.len(),
            log_root: self.config.log_root.clone(),
            ..RunReport::default()
        };

        if outputs.is_empty() {
            tracing::warn!("{NO_STACKS_MESSAGE}");
            diagnostics.push(Diagnostic::info(NO_STACKS_MESSAGE));
        } else {
            tracing::info!(
                stacks = outputs.len(),
                stop_s = as_seconds(stop),
                "running shared clock"
            );
            clock.stop_at(stop);
            let summary = clock.run()?;
            clock.destroy();
            report.clock = Some(summary);
        }

        report.stacks = outputs.iter().map(StackReport::from_output).collect();
        report.diagnostics = diagnostics;
        report.wall_time_ms = timer.elapsed_ms();
        Ok(report)
    }

    fn build_stacks(
        &self,
        clock: &mut dyn Clock,
        stop: SimTime,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Vec<ScenarioOutput>, OrchestratorError> {
        let mut allocator = AddressAllocator::new();
        let mut ids = IdAllocator::new();
        let serialize = SerializeOptions {
            histograms: self.config.histograms,
            probes: true,
        };
        let mut outputs = Vec::new();

        for (name, capability) in self.registry.iter() {
            if !self.config.is_enabled(name) {
                continue;
            }
            let factory = match capability {
                Capability::Available(factory) => factory,
                Capability::Unavailable(reason) => {
                    let diagnostic = Diagnostic::warning(name, format!("module absent: {reason}"));
                    tracing::warn!("{diagnostic}");
                    diagnostics.push(diagnostic);
                    continue;
                }
            };

            let builder = factory(&self.config);
            if builder.name() != name {
                return Err(OrchestratorError::NameMismatch {
                    key: name.to_string(),
                    builder: builder.name().to_string(),
                });
            }
            allocator.reserve(name, builder.subnet())?;

            let mut ctx = BuildContext {
                clock: &mut *clock,
                allocator: &mut allocator,
                ids: &mut ids,
                serialize,
            };
            let out_dir = self.config.stack_dir(name);
            match builder.build(&mut ctx, stop, &out_dir) {
                Ok(output) => outputs.push(output),
                Err(err) if !err.is_contract_violation() => {
                    allocator.release(name);
                    let diagnostic = Diagnostic::warning(name, format!("skipped: {err}"));
                    tracing::warn!("{diagnostic}");
                    diagnostics.push(diagnostic);
                }
                Err(source) => {
                    return Err(OrchestratorError::Stack {
                        stack: name.to_string(),
                        source,
                    })
                }
            }
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfigBuilder;

    #[test]
    fn test_nothing_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfigBuilder::new()
            .log_root(dir.path())
            .build()
            .unwrap();

        let mut sim = Simulator::new();
        let report = Orchestrator::new(config).run_with(&mut sim).unwrap();
        assert_eq!(report.stacks_run, 0);
        assert!(report.clock.is_none());
        assert_eq!(report.diagnostics, vec![Diagnostic::info(NO_STACKS_MESSAGE)]);
        assert_eq!(sim.state(), crate::clock::ClockState::Idle);
        // No directories created
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unavailable_stack() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfigBuilder::new()
            .sat(true)
            .log_root(dir.path())
            .build()
            .unwrap();
        let mut registry = CapabilityRegistry::new();
        registry.register_unavailable("sat", "no satellite module");

        let report = Orchestrator::with_registry(config, registry).run().unwrap();
        assert_eq!(report.stacks_run, 0);
        assert_eq!(
            report.diagnostics[0].to_string(),
            "[sat] module absent: no satellite module"
        );
        assert_eq!(report.diagnostics.len(), 2);
        assert!(!dir.path().join("sat").exists());
    }

    #[cfg(feature = "sat")]
    #[test]
    fn test_too_short_duration_is_a_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfigBuilder::new()
            .sat(true)
            .duration(1.5)
            .log_root(dir.path())
            .build()
            .unwrap();

        let report = Orchestrator::new(config).run().unwrap();
        assert_eq!(report.stacks_run, 0);
        assert!(report.diagnostics[0].message.starts_with("skipped: duration"));
        assert!(!report.clock_ran());
    }

    #[cfg(all(feature = "thz", feature = "mmwave"))]
    #[test]
    fn test_overlapping_subnets_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OrchestratorConfigBuilder::new()
            .thz(true)
            .mmwave(true)
            .log_root(dir.path())
            .build()
            .unwrap();
        config.mmwave.subnet = config.thz.subnet;

        let err = Orchestrator::new(config).run().unwrap_err();
        assert!(matches!(err, OrchestratorError::Address(AddressError::Overlap { .. })));
    }

    #[cfg(all(feature = "thz", feature = "sat"))]
    #[test]
    fn test_skipped_stack_frees_its_subnet() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OrchestratorConfigBuilder::new()
            .thz(true)
            .sat(true)
            .duration(1.5)
            .log_root(dir.path())
            .build()
            .unwrap();
        config.thz.subnet = config.sat.subnet;

        // sat first: it is skipped for the short duration, then thz takes the range
        let mut registry = CapabilityRegistry::new();
        registry.register(crate::stack::sat::NAME, |config| {
            Box::new(crate::stack::sat::SatStack::new(config.sat.clone()))
        });
        registry.register(crate::stack::thz::NAME, |config| {
            Box::new(crate::stack::thz::ThzStack::new(config.thz.clone()))
        });

        let report = Orchestrator::with_registry(config, registry).run().unwrap();
        assert_eq!(report.stacks_run, 1);
        assert_eq!(report.stacks[0].name, "thz");
        assert!(report.diagnostics[0].to_string().starts_with("[sat] skipped: duration"));
        assert!(report.clock_ran());
    }

    #[cfg(feature = "thz")]
    #[test]
    fn test_registry_key_must_match_builder() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OrchestratorConfigBuilder::new()
            .log_root(dir.path())
            .build()
            .unwrap();
        config.enable.push("alias".to_string());
        let mut registry = CapabilityRegistry::new();
        registry.register("alias", |config| {
            Box::new(crate::stack::thz::ThzStack::new(config.thz.clone()))
        });

        let err = Orchestrator::with_registry(config, registry).run().unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NameMismatch { ref key, ref builder } if key == "alias" && builder == "thz"
        ));
        assert!(!dir.path().join("alias").exists());
    }
}
