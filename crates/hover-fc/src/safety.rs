use serde::Serialize;
use std::fmt;

use crate::FlightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bound {
    Upper(i32),
    Lower(i32),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Upper(v) => write!(f, "above {}", v),
            Bound::Lower(v) => write!(f, "below {}", v),
        }
    }
}

/// Hover thrust left the envelope. Not an error: it forces the landing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetyBoundExceeded {
    pub thrust: i32,
    pub bound: Bound,
}

impl fmt::Display for SafetyBoundExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thrust {} {}", self.thrust, self.bound)
    }
}

/// Hard thrust bounds for hover, plus the damping band inside them.
#[derive(Debug, Clone, Copy)]
pub struct ThrustEnvelope {
    min: i32,
    max: i32,
    damp_below: i32,
    damp_above: i32,
}

impl ThrustEnvelope {
    pub fn new(min: i32, max: i32, damp_below: i32, damp_above: i32) -> Self {
        Self { min, max, damp_below, damp_above }
    }

    pub fn from_config(cfg: &FlightConfig) -> Self {
        Self::new(cfg.thrust_min, cfg.thrust_max, cfg.damping_lower, cfg.damping_upper)
    }

    /// Halves corrections that would push further toward an edge of the band.
    /// Halving rounds toward negative infinity.
    pub fn damp(&self, thrust: i32, delta: i32) -> i32 {
        if thrust > self.damp_above && delta > 0 {
            delta.div_euclid(2)
        } else if thrust < self.damp_below && delta < 0 {
            delta.div_euclid(2)
        } else {
            delta
        }
    }

    pub fn check(&self, thrust: i32) -> Result<(), SafetyBoundExceeded> {
        if thrust > self.max {
            return Err(SafetyBoundExceeded { thrust, bound: Bound::Upper(self.max) });
        }
        if thrust < self.min {
            return Err(SafetyBoundExceeded { thrust, bound: Bound::Lower(self.min) });
        }
        Ok(())
    }
}
