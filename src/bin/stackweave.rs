//! Stackweave CLI
//!
//! Builds the enabled technology stacks on one discrete-event clock, runs it
//! to the stop time and writes one flow statistics file per stack.
//!
//! # Example
//!
//! ```bash
//! # THz and mmWave side by side for five virtual seconds
//! stackweave --enableThz=1 --enableMmwave=1 --duration 5 --logRoot out
//!
//! # Everything from a file, with the satellite stack forced off
//! stackweave --config scenario.yaml --enableSat=0 --report run.json
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use stackweave::config::{ConfigResult, OrchestratorConfig};
use stackweave::orchestrator::{Orchestrator, NO_STACKS_MESSAGE};

/// Multi-technology network scenario orchestrator
#[derive(Parser, Debug)]
#[command(name = "stackweave")]
#[command(version, about, long_about = None)]
struct Args {
    /// Build the terahertz stack (1/0/true/false)
    #[arg(long = "enableThz", value_parser = parse_switch, num_args = 0..=1, default_missing_value = "1")]
    enable_thz: Option<bool>,

    /// Build the mmWave stack (1/0/true/false)
    #[arg(long = "enableMmwave", value_parser = parse_switch, num_args = 0..=1, default_missing_value = "1")]
    enable_mmwave: Option<bool>,

    /// Build the satellite stack (1/0/true/false)
    #[arg(long = "enableSat", value_parser = parse_switch, num_args = 0..=1, default_missing_value = "1")]
    enable_sat: Option<bool>,

    /// Global stop time in seconds [default: 10]
    #[arg(short = 'd', long)]
    duration: Option<f64>,

    /// Output root; each stack writes under <logRoot>/<stack>/ [default: scratch-logs]
    #[arg(long = "logRoot")]
    log_root: Option<PathBuf>,

    /// YAML or JSON configuration file; flags override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long = "logLevel")]
    log_level: Option<String>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected 1/0/true/false, got `{other}`")),
    }
}

impl Args {
    /// Loads the config file, if any, and applies flag overrides.
    fn into_config(self) -> ConfigResult<(OrchestratorConfig, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => OrchestratorConfig::from_file(path)?,
            None => OrchestratorConfig::default(),
        };

        if let Some(v) = self.enable_thz {
            config.enable_thz = v;
        }
        if let Some(v) = self.enable_mmwave {
            config.enable_mmwave = v;
        }
        if let Some(v) = self.enable_sat {
            config.enable_sat = v;
        }
        if let Some(d) = self.duration {
            config.duration = d;
        }
        if let Some(root) = self.log_root {
            config.log_root = root;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        config.validate()?;
        Ok((config, self.report))
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (config, report_path) = match args.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            stackweave::init_logging("info");
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    stackweave::init_logging(&config.log_level);

    info!(
        thz = config.enable_thz,
        mmwave = config.enable_mmwave,
        sat = config.enable_sat,
        duration_s = config.duration,
        log_root = %config.log_root.display(),
        "Starting orchestration"
    );

    let orchestrator = Orchestrator::new(config);
    let report = match orchestrator.run() {
        Ok(report) => report,
        Err(e) => {
            error!("Orchestration aborted: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = report_path {
        if let Err(e) = report.to_json_file(&path) {
            error!(path = %path.display(), "Could not write report: {e}");
        }
    }

    if report.clock_ran() {
        println!("{}", report.summary());
        println!("OK. XMLs in {}", report.log_root.display());
    } else {
        println!("{NO_STACKS_MESSAGE}");
    }

    ExitCode::SUCCESS
}
