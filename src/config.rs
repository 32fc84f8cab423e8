//! Monitor and reflex configuration

use crate::error::{LatticeError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a criticality monitor.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MonitorConfig {
    /// Samples retained per ring buffer.
    pub capacity: usize,

    /// Permutation entropy embedding dimension `m`.
    pub embedding_dim: usize,

    /// Lower edge of the critical λ band.
    pub target_min: f64,

    /// Upper edge of the critical λ band.
    pub target_max: f64,

    /// Phase that PLV is measured against (radians).
    pub reference_phase: f64,

    /// Perturbation recommended in the ordered zone (inject disorder).
    pub ordered_perturbation: f64,

    /// Perturbation recommended in the chaotic zone (let it settle).
    pub chaotic_perturbation: f64,

    /// Perturbation recommended at criticality.
    pub critical_perturbation: f64,
}

impl MonitorConfig {
    /// Standard configuration with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            embedding_dim: 3,
            target_min: 0.25,
            target_max: 0.35,
            reference_phase: 0.0,
            ordered_perturbation: 0.3,
            chaotic_perturbation: 0.05,
            critical_perturbation: 0.01,
        }
    }

    pub fn with_band(mut self, target_min: f64, target_max: f64) -> Self {
        self.target_min = target_min;
        self.target_max = target_max;
        self
    }

    /// Midpoint of the critical band.
    pub fn band_mid(&self) -> f64 {
        (self.target_min + self.target_max) / 2.0
    }

    /// Half-width of the critical band.
    pub fn band_half_width(&self) -> f64 {
        (self.target_max - self.target_min) / 2.0
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(LatticeError::InvalidConfig("capacity must be > 0"));
        }
        if self.embedding_dim < 2 {
            return Err(LatticeError::InvalidConfig("embedding_dim must be >= 2"));
        }
        if !(0.0..=1.0).contains(&self.target_min)
            || !(0.0..=1.0).contains(&self.target_max)
            || self.target_min >= self.target_max
        {
            return Err(LatticeError::InvalidConfig(
                "target band must satisfy 0 <= target_min < target_max <= 1",
            ));
        }
        if !self.reference_phase.is_finite() {
            return Err(LatticeError::InvalidConfig("reference_phase must be finite"));
        }
        for p in [
            self.ordered_perturbation,
            self.chaotic_perturbation,
            self.critical_perturbation,
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(LatticeError::InvalidConfig("perturbations must be in [0, 1]"));
            }
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Configuration for the per-cell reflex step.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReflexConfig {
    /// Flow below this fires the stability reflex.
    pub stability_threshold: f32,

    /// Trust change applied by the stability reflex.
    pub stability_penalty: f32,

    /// Local λ above this fires the chaos reflex.
    pub chaos_threshold: f32,

    /// Ticks without a metrics write before the decay reflex fires.
    pub idle_ticks: u64,

    /// Presence decay rate used by the decay reflex.
    pub presence_decay_rate: f32,

    /// Local PLV above this (with healthy flow) fires the trust reflex.
    pub plv_threshold: f32,

    /// Trust change applied by the trust reflex.
    pub trust_boost: f32,

    /// Flow lost per step by a cell with no neighbors.
    pub isolation_flow_decay: f32,

    /// Kuramoto-style pull toward the neighbors' mean phase (ternary rule).
    pub phase_coupling: f32,

    /// Probability a grid-rule delta is applied to the cell.
    pub update_probability: f32,

    /// Emit propagations for eligible events.
    pub propagate: bool,

    /// Presence strength written on propagation targets.
    pub propagation_strength: f32,
}

impl ReflexConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        for (v, msg) in [
            (self.stability_threshold, "stability_threshold must be in [0, 1]"),
            (self.chaos_threshold, "chaos_threshold must be in [0, 1]"),
            (self.presence_decay_rate, "presence_decay_rate must be in [0, 1]"),
            (self.plv_threshold, "plv_threshold must be in [0, 1]"),
            (self.isolation_flow_decay, "isolation_flow_decay must be in [0, 1]"),
            (self.phase_coupling, "phase_coupling must be in [0, 1]"),
            (self.update_probability, "update_probability must be in [0, 1]"),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(LatticeError::InvalidConfig(msg));
            }
        }
        if !self.stability_penalty.is_finite() || !self.trust_boost.is_finite() {
            return Err(LatticeError::InvalidConfig("trust deltas must be finite"));
        }
        if !self.propagation_strength.is_finite() {
            return Err(LatticeError::InvalidConfig("propagation_strength must be finite"));
        }
        Ok(())
    }
}

impl Default for ReflexConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 0.3,
            stability_penalty: -0.05,
            chaos_threshold: 0.7,
            idle_ticks: 10,
            presence_decay_rate: 0.1,
            plv_threshold: 0.8,
            trust_boost: 0.02,
            isolation_flow_decay: 0.1,
            phase_coupling: 0.5,
            update_probability: 0.5,
            propagate: true,
            propagation_strength: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_defaults_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding_dim, 3);
        assert!((config.band_mid() - 0.30).abs() < 1e-12);
        assert!((config.band_half_width() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_monitor_rejects_bad_band() {
        let config = MonitorConfig::new(8).with_band(0.4, 0.3);
        assert!(matches!(config.validate(), Err(LatticeError::InvalidConfig(_))));
        assert!(MonitorConfig::new(0).validate().is_err());
    }

    #[test]
    fn test_reflex_defaults_valid() {
        let config = ReflexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stability_penalty, -0.05);
        assert_eq!(config.trust_boost, 0.02);
    }

    #[test]
    fn test_reflex_rejects_out_of_range() {
        let config = ReflexConfig {
            update_probability: 1.5,
            ..ReflexConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
