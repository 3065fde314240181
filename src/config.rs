//! Orchestrator configuration.
//!
//! Configuration can be loaded from YAML or JSON files; command-line flags
//! override whatever the file sets.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! enable_thz: true
//! enable_mmwave: false
//! enable_sat: true
//! duration: 10.0
//! log_root: scratch-logs
//! log_level: info
//!
//! thz:
//!   frequency_hz: 300.0e9
//!   bandwidth_hz: 2.0e9
//!   distance_m: 50.0
//!
//! sat:
//!   base_scenario: larger
//!   echo_interval_ms: 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::address::Subnet;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

fn default_duration() -> f64 {
    10.0
}

fn default_log_root() -> PathBuf {
    PathBuf::from("scratch-logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Parameters of the terahertz stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThzParams {
    /// Carrier frequency in Hz
    pub frequency_hz: f64,
    /// Channel bandwidth in Hz; also the link capacity in bit/s
    pub bandwidth_hz: f64,
    /// Distance between the two nodes in meters
    pub distance_m: f64,
    /// Offered CBR rate in bit/s
    pub data_rate_bps: u64,
    /// UDP payload size in bytes
    pub packet_size: u32,
    /// Sink port
    pub port: u16,
    /// Reserved subnet
    pub subnet: Subnet,
}

impl Default for ThzParams {
    fn default() -> Self {
        Self {
            frequency_hz: 300e9,
            bandwidth_hz: 2e9,
            distance_m: 50.0,
            data_rate_bps: 500_000_000,
            packet_size: 1200,
            port: 5000,
            subnet: Subnet::from_octets([10, 60, 0, 0], 24),
        }
    }
}

/// Parameters of the mmWave stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmwaveParams {
    /// Numerology index of the radio devices
    pub numerology: u8,
    /// Channel model name recorded on the radio devices
    pub channel_model: String,
    /// UE distance from the gNB in meters
    pub ue_distance_m: f64,
    /// Offered CBR rate in bit/s
    pub data_rate_bps: u64,
    /// UDP payload size in bytes
    pub packet_size: u32,
    /// Sink port
    pub port: u16,
    /// Reserved subnet
    pub subnet: Subnet,
}

impl Default for MmwaveParams {
    fn default() -> Self {
        Self {
            numerology: 3,
            channel_model: "ns3::MmWave3gppChannel".to_string(),
            ue_distance_m: 80.0,
            data_rate_bps: 200_000_000,
            packet_size: 1200,
            port: 6000,
            subnet: Subnet::from_octets([10, 70, 0, 0], 24),
        }
    }
}

/// Topology shapes the satellite scenario generator can produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseScenario {
    /// One user terminal, one gateway
    #[default]
    Simple,
    /// A few beams with several terminals
    Larger,
    /// Many beams and gateways
    Full,
}

/// Parameters of the satellite stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SatParams {
    /// Topology generated by the scenario helper
    pub base_scenario: BaseScenario,
    /// Satellite altitude in meters
    pub altitude_m: f64,
    /// Echo request interval in milliseconds
    pub echo_interval_ms: u64,
    /// Maximum number of echo requests
    pub max_packets: u64,
    /// UDP payload size in bytes
    pub packet_size: u32,
    /// Echo server port
    pub port: u16,
    /// Reserved subnet
    pub subnet: Subnet,
}

impl Default for SatParams {
    fn default() -> Self {
        Self {
            base_scenario: BaseScenario::Simple,
            altitude_m: 35_786_000.0,
            echo_interval_ms: 10,
            max_packets: 1_000_000,
            packet_size: 400,
            port: 9000,
            subnet: Subnet::from_octets([10, 50, 0, 0], 24),
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Build the terahertz stack
    #[serde(default)]
    pub enable_thz: bool,

    /// Build the mmWave stack
    #[serde(default)]
    pub enable_mmwave: bool,

    /// Build the satellite stack
    #[serde(default)]
    pub enable_sat: bool,

    /// Further stacks to build, by registry name
    #[serde(default)]
    pub enable: Vec<String>,

    /// Global stop time in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,

    /// Base directory; each stack writes under `<log_root>/<stack>/`
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Include histograms in the flow XML
    #[serde(default = "default_true")]
    pub histograms: bool,

    #[serde(default)]
    pub thz: ThzParams,

    #[serde(default)]
    pub mmwave: MmwaveParams,

    #[serde(default)]
    pub sat: SatParams,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_thz: false,
            enable_mmwave: false,
            enable_sat: false,
            enable: Vec::new(),
            duration: default_duration(),
            log_root: default_log_root(),
            log_level: default_log_level(),
            histograms: true,
            thz: ThzParams::default(),
            mmwave: MmwaveParams::default(),
            sat: SatParams::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with every stack disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: OrchestratorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: OrchestratorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "duration must be a positive number of seconds, got {}",
                self.duration
            )));
        }
        if self.log_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation("log_root must not be empty".to_string()));
        }

        if self.thz.bandwidth_hz <= 0.0 || !self.thz.bandwidth_hz.is_finite() {
            return Err(ConfigError::Validation(format!(
                "thz bandwidth must be positive, got {}",
                self.thz.bandwidth_hz
            )));
        }
        if self.thz.distance_m < 0.0 || !self.thz.distance_m.is_finite() {
            return Err(ConfigError::Validation(format!(
                "thz distance must be non-negative, got {}",
                self.thz.distance_m
            )));
        }
        if self.thz.data_rate_bps == 0 || self.mmwave.data_rate_bps == 0 {
            return Err(ConfigError::Validation("CBR data rate must be positive".to_string()));
        }
        if self.sat.echo_interval_ms == 0 {
            return Err(ConfigError::Validation("sat echo interval must be positive".to_string()));
        }

        for (stack, size) in [
            ("thz", self.thz.packet_size),
            ("mmwave", self.mmwave.packet_size),
            ("sat", self.sat.packet_size),
        ] {
            if size == 0 || size > 65_507 {
                return Err(ConfigError::Validation(format!(
                    "{stack} packet size {size} is outside 1..=65507"
                )));
            }
        }

        let subnets = [
            ("thz", self.thz.subnet),
            ("mmwave", self.mmwave.subnet),
            ("sat", self.sat.subnet),
        ];
        for (i, (a, sa)) in subnets.iter().enumerate() {
            for (b, sb) in &subnets[i + 1..] {
                if sa.overlaps(sb) {
                    tracing::warn!(
                        "{a} subnet {sa} overlaps {b} subnet {sb}; enabling both will abort the run"
                    );
                }
            }
        }

        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns whether the stack named `stack` is enabled.
    pub fn is_enabled(&self, stack: &str) -> bool {
        let flag = match stack {
            "thz" => self.enable_thz,
            "mmwave" => self.enable_mmwave,
            "sat" => self.enable_sat,
            _ => false,
        };
        flag || self.enable.iter().any(|s| s == stack)
    }

    /// Output directory of `stack`.
    pub fn stack_dir(&self, stack: &str) -> PathBuf {
        self.log_root.join(stack)
    }
}

/// Builder for creating an [`OrchestratorConfig`] programmatically.
#[derive(Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the terahertz stack.
    pub fn thz(mut self, enable: bool) -> Self {
        self.config.enable_thz = enable;
        self
    }

    /// Enables or disables the mmWave stack.
    pub fn mmwave(mut self, enable: bool) -> Self {
        self.config.enable_mmwave = enable;
        self
    }

    /// Enables or disables the satellite stack.
    pub fn sat(mut self, enable: bool) -> Self {
        self.config.enable_sat = enable;
        self
    }

    /// Sets the global stop time in seconds.
    pub fn duration(mut self, seconds: f64) -> Self {
        self.config.duration = seconds;
        self
    }

    /// Sets the output root.
    pub fn log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.log_root = root.into();
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Sets the satellite base scenario.
    pub fn sat_scenario(mut self, scenario: BaseScenario) -> Self {
        self.config.sat.base_scenario = scenario;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::new();
        assert!(!config.enable_thz);
        assert!(!config.enable_mmwave);
        assert!(!config.enable_sat);
        assert_eq!(config.duration, 10.0);
        assert_eq!(config.log_root, PathBuf::from("scratch-logs"));
        assert_eq!(config.thz.subnet.to_string(), "10.60.0.0/24");
        assert_eq!(config.mmwave.subnet.to_string(), "10.70.0.0/24");
        assert_eq!(config.sat.subnet.to_string(), "10.50.0.0/24");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
enable_thz: true
enable_sat: true
duration: 5.5
log_root: out

thz:
  distance_m: 10.0

sat:
  base_scenario: larger
  subnet: 10.51.0.0/24
"#;

        let config = OrchestratorConfig::from_yaml(yaml).unwrap();
        assert!(config.enable_thz);
        assert!(!config.enable_mmwave);
        assert!(config.enable_sat);
        assert_eq!(config.duration, 5.5);
        assert_eq!(config.log_root, PathBuf::from("out"));
        assert_eq!(config.thz.distance_m, 10.0);
        // Unset fields keep their defaults
        assert_eq!(config.thz.bandwidth_hz, 2e9);
        assert_eq!(config.sat.base_scenario, BaseScenario::Larger);
        assert_eq!(config.sat.subnet.to_string(), "10.51.0.0/24");
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "enable_mmwave": true,
            "duration": 3.0,
            "mmwave": { "numerology": 2 }
        }"#;

        let config = OrchestratorConfig::from_json(json).unwrap();
        assert!(config.enable_mmwave);
        assert_eq!(config.mmwave.numerology, 2);
        assert_eq!(config.mmwave.port, 6000);
    }

    #[test]
    fn test_builder() {
        let config = OrchestratorConfigBuilder::new()
            .thz(true)
            .mmwave(true)
            .duration(5.0)
            .log_root("logs")
            .build()
            .unwrap();

        assert!(config.is_enabled("thz"));
        assert!(config.is_enabled("mmwave"));
        assert!(!config.is_enabled("sat"));
        assert!(!config.is_enabled("unknown"));

        let mut extended = config.clone();
        extended.enable.push("unknown".to_string());
        assert!(extended.is_enabled("unknown"));
        assert_eq!(config.stack_dir("thz"), PathBuf::from("logs").join("thz"));
    }

    #[test]
    fn test_validation_duration() {
        assert!(OrchestratorConfigBuilder::new().duration(0.0).build().is_err());
        assert!(OrchestratorConfigBuilder::new().duration(-1.0).build().is_err());
        assert!(OrchestratorConfigBuilder::new().duration(f64::NAN).build().is_err());
    }

    #[test]
    fn test_validation_packet_size() {
        let yaml = r#"
sat:
  packet_size: 0
"#;
        assert!(OrchestratorConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_invalid_subnet() {
        let yaml = r#"
thz:
  subnet: 10.60.0.1/24
"#;
        assert!(OrchestratorConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_whole_address_space() {
        let yaml = r#"
thz:
  subnet: 0.0.0.0/0
"#;
        assert!(matches!(
            OrchestratorConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
        let json = r#"{ "sat": { "subnet": "0.0.0.0/0" } }"#;
        assert!(matches!(
            OrchestratorConfig::from_json(json),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_unknown_extension() {
        let result = OrchestratorConfig::from_file("config.toml");
        assert!(matches!(result, Err(ConfigError::UnknownFormat(ext)) if ext == "toml"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = OrchestratorConfigBuilder::new()
            .sat(true)
            .sat_scenario(BaseScenario::Full)
            .duration(7.0)
            .build()
            .unwrap();

        let yaml = config.to_yaml().unwrap();
        let restored = OrchestratorConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, restored);

        let json = config.to_json().unwrap();
        let restored = OrchestratorConfig::from_json(&json).unwrap();
        assert_eq!(config, restored);
    }
}
