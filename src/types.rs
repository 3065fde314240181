//! Core type definitions for the orchestrator.
//!
//! This module defines the fundamental types shared by the scheduler,
//! the stack builders and the flow monitor.

use serde::{Deserialize, Serialize};

/// Virtual time in nanoseconds.
///
/// Every scheduled event, traffic start/stop and metrics snapshot uses the
/// same `SimTime` representation, so all stacks share one timeline. Integer
/// nanoseconds keep equal-time comparisons exact.
pub type SimTime = u64;

/// Unique identifier for a simulated node.
///
/// Ids are handed out by a single allocator per orchestration run, so nodes
/// built by different stacks never share an id.
pub type NodeId = u32;

/// Unique identifier for a network device.
pub type DeviceId = u32;

/// Identifier of a classified flow inside one flow monitor (1-based).
pub type FlowId = u32;

/// UDP port number.
pub type Port = u16;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: SimTime = 1_000_000_000;

/// Converts seconds to virtual time, rounding to the nearest nanosecond.
///
/// Negative and non-finite inputs saturate to zero.
///
/// ```
/// use stackweave::types::seconds;
///
/// assert_eq!(seconds(1.5), 1_500_000_000);
/// assert_eq!(seconds(10.0) - seconds(0.2), seconds(9.8));
/// ```
pub fn seconds(secs: f64) -> SimTime {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * NANOS_PER_SEC as f64).round() as SimTime
}

/// Converts milliseconds to virtual time.
pub const fn millis(ms: u64) -> SimTime {
    ms * 1_000_000
}

/// Converts microseconds to virtual time.
pub const fn micros(us: u64) -> SimTime {
    us * 1_000
}

/// Converts virtual time back to floating-point seconds.
pub fn as_seconds(time: SimTime) -> f64 {
    time as f64 / NANOS_PER_SEC as f64
}

/// A position in 3D space, in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Creates a new position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(seconds(0.0), 0);
        assert_eq!(seconds(1.0), NANOS_PER_SEC);
        assert_eq!(seconds(0.1), 100_000_000);
        assert_eq!(seconds(-3.0), 0);
        assert_eq!(seconds(f64::NAN), 0);
    }

    #[test]
    fn test_margins_are_exact() {
        let stop = seconds(10.0);
        assert_eq!(stop - seconds(0.2), seconds(9.8));
        assert_eq!(stop - seconds(0.1), seconds(9.9));
        assert_eq!(as_seconds(seconds(9.8)), 9.8);
    }

    #[test]
    fn test_small_units() {
        assert_eq!(millis(10), 10_000_000);
        assert_eq!(micros(1), 1_000);
    }

    #[test]
    fn test_position_distance() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(50.0, 0.0, 0.0);
        assert_eq!(a.distance_to(&b), 50.0);
        assert_eq!(b.distance_to(&a), 50.0);
    }
}
