//! Criticality monitor
//!
//! Three bounded histories (phase, raw state, ternary trajectory) and the
//! metrics computed from them on demand:
//!
//! - **PLV**: phase synchrony against a reference phase
//! - **Permutation entropy**: ordinal complexity of the mean-state series
//! - **Langton's λ̂**: fraction of non-quiescent buffered state entries
//! - **Lyapunov estimate**: mean log Hamming divergence of consecutive trajectories
//!
//! λ̂ drives the zone, the criticality score and the recommended perturbation.
//! `compute()` is a pure read; only `record_*` and `reset` mutate.

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::ring::RingBuffer;
use crate::ternary::Ternary;
use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Score given to a zero-distance trajectory pair instead of `ln(0)`.
pub const LYAPUNOV_FLOOR: f64 = -10.0;

/// Added to Hamming distances before taking the log.
const LYAPUNOV_EPSILON: f64 = 1e-10;

/// Dynamical regime inferred from λ̂.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Zone {
    /// Below the critical band: frozen, periodic.
    Ordered,
    /// Inside the band: edge of chaos.
    Critical,
    /// Above the band.
    Chaotic,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Zone::Ordered => "ordered",
            Zone::Critical => "critical",
            Zone::Chaotic => "chaotic",
        })
    }
}

/// Snapshot produced by [`CriticalityMonitor::compute`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CriticalityMetrics {
    pub plv: f64,
    pub permutation_entropy: f64,
    pub lambda_hat: f64,
    pub lyapunov: f64,
    pub zone: Zone,
    pub criticality_score: f64,
    pub perturbation: f64,
}

// =============================================================================
// METRIC FORMULAS
// =============================================================================

/// Mean resultant length of `e^{i(φ - reference)}`, in `[0, 1]`.
///
/// Empty input yields `0.0`.
pub fn phase_locking_value(phases: &[f64], reference: f64) -> f64 {
    if phases.is_empty() {
        return 0.0;
    }
    let (mut re, mut im) = (0.0, 0.0);
    for &p in phases {
        let d = p - reference;
        re += d.cos();
        im += d.sin();
    }
    let n = phases.len() as f64;
    ((re / n).hypot(im / n)).clamp(0.0, 1.0)
}

/// Circular mean of a set of phases, wrapped to `[0, 2π)`.
///
/// Returns `None` when the phases cancel exactly (or there are none).
pub fn circular_mean(phases: &[f64]) -> Option<f64> {
    let (re, im) = phases
        .iter()
        .fold((0.0, 0.0), |(re, im), p| (re + p.cos(), im + p.sin()));
    if re == 0.0 && im == 0.0 {
        return None;
    }
    Some(im.atan2(re).rem_euclid(std::f64::consts::TAU))
}

/// Indices that sort `window` ascending; ties keep index order.
fn ordinal_pattern(window: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..window.len()).collect();
    idx.sort_by(|&a, &b| window[a].total_cmp(&window[b]));
    idx
}

/// Normalized permutation entropy with embedding dimension `m`, in `[0, 1]`.
///
/// Series shorter than `m` (or `m < 2`) yield `0.0`.
pub fn permutation_entropy(series: &[f64], m: usize) -> f64 {
    if m < 2 || series.len() < m {
        return 0.0;
    }
    let mut counts: HashMap<Vec<usize>, usize> = HashMap::new();
    for window in series.windows(m) {
        *counts.entry(ordinal_pattern(window)).or_insert(0) += 1;
    }
    let total = (series.len() - m + 1) as f64;
    let h: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum();
    let max = (2..=m).map(|k| k as f64).product::<f64>().ln();
    (h / max).clamp(0.0, 1.0)
}

/// Fraction of non-zero entries across all samples.
pub fn langton_lambda(samples: &[Vec<f64>]) -> f64 {
    let total: usize = samples.iter().map(Vec::len).sum();
    if total == 0 {
        return 0.0;
    }
    let active = samples.iter().flatten().filter(|v| **v != 0.0).count();
    active as f64 / total as f64
}

/// λ of a rule table: fraction of entries mapping to a non-quiescent state.
pub fn langton_lambda_from_rule_table(table: &[bool]) -> f64 {
    if table.is_empty() {
        return 0.0;
    }
    table.iter().filter(|b| **b).count() as f64 / table.len() as f64
}

/// Number of differing positions; a length difference counts per extra entry.
pub fn hamming_distance(a: &[Ternary], b: &[Ternary]) -> usize {
    let common = a.iter().zip(b).filter(|(x, y)| x != y).count();
    common + a.len().abs_diff(b.len())
}

/// Mean `ln(hamming + ε)` over consecutive trajectory pairs.
///
/// Identical pairs score [`LYAPUNOV_FLOOR`]. Fewer than two trajectories
/// yield `0.0`.
pub fn lyapunov_estimate(trajectories: &[Vec<Ternary>]) -> f64 {
    if trajectories.len() < 2 {
        return 0.0;
    }
    let scores: Vec<f64> = trajectories
        .windows(2)
        .map(|pair| match hamming_distance(&pair[0], &pair[1]) {
            0 => LYAPUNOV_FLOOR,
            d => (d as f64 + LYAPUNOV_EPSILON).ln(),
        })
        .collect();
    scores.iter().sum::<f64>() / scores.len() as f64
}

pub fn classify_zone(lambda_hat: f64, target_min: f64, target_max: f64) -> Zone {
    if lambda_hat < target_min {
        Zone::Ordered
    } else if lambda_hat > target_max {
        Zone::Chaotic
    } else {
        Zone::Critical
    }
}

/// Gaussian falloff from the band midpoint: `1.0` at the midpoint.
pub fn criticality_score(lambda_hat: f64, target_min: f64, target_max: f64) -> f64 {
    let mid = (target_min + target_max) / 2.0;
    let half = (target_max - target_min) / 2.0;
    if half <= 0.0 {
        return if lambda_hat == mid { 1.0 } else { 0.0 };
    }
    let z = (lambda_hat - mid) / half;
    (-(z * z)).exp()
}

pub fn recommended_perturbation(zone: Zone, config: &MonitorConfig) -> f64 {
    match zone {
        Zone::Ordered => config.ordered_perturbation,
        Zone::Chaotic => config.chaotic_perturbation,
        Zone::Critical => config.critical_perturbation,
    }
}

// =============================================================================
// MONITOR
// =============================================================================

/// Owner of the sample histories for one monitored region.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CriticalityMonitor {
    config: MonitorConfig,
    phases: RingBuffer<f64>,
    states: RingBuffer<Vec<f64>>,
    trajectories: RingBuffer<Vec<Ternary>>,
}

impl CriticalityMonitor {
    /// Create a monitor; fails if the configuration is invalid.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            phases: RingBuffer::new(config.capacity),
            states: RingBuffer::new(config.capacity),
            trajectories: RingBuffer::new(config.capacity),
            config,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn record_phase(&mut self, phase: f64) {
        self.phases.push(phase);
    }

    pub fn record_state(&mut self, state: Vec<f64>) {
        self.states.push(state);
    }

    pub fn record_trajectory(&mut self, trajectory: Vec<Ternary>) {
        self.trajectories.push(trajectory);
    }

    pub fn phases(&self) -> &RingBuffer<f64> {
        &self.phases
    }

    pub fn states(&self) -> &RingBuffer<Vec<f64>> {
        &self.states
    }

    pub fn trajectories(&self) -> &RingBuffer<Vec<Ternary>> {
        &self.trajectories
    }

    /// Mean of each buffered state sample, oldest first.
    fn state_series(&self) -> Vec<f64> {
        self.states
            .iter()
            .map(|s| {
                if s.is_empty() {
                    0.0
                } else {
                    s.iter().sum::<f64>() / s.len() as f64
                }
            })
            .collect()
    }

    /// Metrics from the current buffers.
    pub fn compute(&self) -> CriticalityMetrics {
        let c = &self.config;
        let plv = phase_locking_value(&self.phases.to_vec(), c.reference_phase);
        let permutation_entropy = permutation_entropy(&self.state_series(), c.embedding_dim);
        let lambda_hat = langton_lambda(&self.states.to_vec());
        let lyapunov = lyapunov_estimate(&self.trajectories.to_vec());
        let zone = classify_zone(lambda_hat, c.target_min, c.target_max);
        let metrics = CriticalityMetrics {
            plv,
            permutation_entropy,
            lambda_hat,
            lyapunov,
            zone,
            criticality_score: criticality_score(lambda_hat, c.target_min, c.target_max),
            perturbation: recommended_perturbation(zone, c),
        };
        tracing::trace!(%zone, lambda_hat, plv, "criticality computed");
        metrics
    }

    /// Drop all buffered samples.
    pub fn reset(&mut self) {
        self.phases.clear();
        self.states.clear();
        self.trajectories.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;
    use Ternary::*;

    #[test]
    fn test_plv_bounds() {
        assert!((phase_locking_value(&[0.4; 8], 0.0) - 1.0).abs() < 1e-12);
        assert!(phase_locking_value(&[0.0, PI], 0.0) < 1e-12);
        assert_eq!(phase_locking_value(&[], 0.0), 0.0);
    }

    #[test]
    fn test_circular_mean_wraps() {
        let m = circular_mean(&[0.1, 2.0 * PI - 0.1]).unwrap();
        assert!(m < 1e-9 || (2.0 * PI - m) < 1e-9);
        assert!(circular_mean(&[0.0, PI]).map_or(true, |m| m.is_finite()));
        assert_eq!(circular_mean(&[]), None);
    }

    #[test]
    fn test_permutation_entropy_monotonic_is_zero() {
        let series: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(permutation_entropy(&series, 3), 0.0);
    }

    #[test]
    fn test_permutation_entropy_short_series() {
        assert_eq!(permutation_entropy(&[1.0, 2.0], 3), 0.0);
        assert_eq!(permutation_entropy(&[1.0, 2.0, 3.0], 1), 0.0);
    }

    #[test]
    fn test_permutation_entropy_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let series: Vec<f64> = (0..500).map(|_| rng.gen::<f64>()).collect();
        let h = permutation_entropy(&series, 3);
        assert!(h > 0.5 && h <= 1.0);

        // Alternating series: two patterns, equally frequent.
        let alt: Vec<f64> = (0..41).map(|i| (i % 2) as f64).collect();
        let h = permutation_entropy(&alt, 3);
        let expected = 2.0f64.ln() / 6.0f64.ln();
        assert!((h - expected).abs() < 0.01);
    }

    #[test]
    fn test_langton_lambda() {
        let samples = vec![vec![0.0, 1.0, 0.0, 0.5], vec![0.0, 0.0, 0.0, -1.0]];
        assert!((langton_lambda(&samples) - 0.375).abs() < 1e-12);
        assert_eq!(langton_lambda(&[]), 0.0);
        assert_eq!(langton_lambda_from_rule_table(&[true, false, false, false]), 0.25);
    }

    #[test]
    fn test_lyapunov_floor_and_divergence() {
        let same = vec![vec![Pos, Zero], vec![Pos, Zero]];
        assert_eq!(lyapunov_estimate(&same), LYAPUNOV_FLOOR);

        let diverging = vec![vec![Pos, Zero, Neg], vec![Neg, Zero, Neg]];
        assert!(lyapunov_estimate(&diverging).abs() < 1e-6);

        assert_eq!(lyapunov_estimate(&[vec![Pos]]), 0.0);
        assert_eq!(hamming_distance(&[Pos], &[Neg, Zero]), 2);
    }

    #[test]
    fn test_zone_classification() {
        assert_eq!(classify_zone(0.1, 0.25, 0.35), Zone::Ordered);
        assert_eq!(classify_zone(0.25, 0.25, 0.35), Zone::Critical);
        assert_eq!(classify_zone(0.30, 0.25, 0.35), Zone::Critical);
        assert_eq!(classify_zone(0.5, 0.25, 0.35), Zone::Chaotic);
    }

    #[test]
    fn test_criticality_score_peak_and_falloff() {
        let (min, max) = (0.25, 0.35);
        assert_eq!(criticality_score((min + max) / 2.0, min, max), 1.0);

        let mut last = 1.0;
        for step in 1..20 {
            let s = criticality_score(0.30 + step as f64 * 0.02, min, max);
            assert!(s < last);
            last = s;
        }
        // Symmetric around the midpoint.
        let a = criticality_score(0.20, min, max);
        let b = criticality_score(0.40, min, max);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_perturbation_by_zone() {
        let config = MonitorConfig::default();
        let ordered = recommended_perturbation(Zone::Ordered, &config);
        let critical = recommended_perturbation(Zone::Critical, &config);
        let chaotic = recommended_perturbation(Zone::Chaotic, &config);
        assert!(ordered > chaotic && chaotic > critical);
    }

    #[test]
    fn test_monitor_compute() {
        let mut monitor = CriticalityMonitor::new(MonitorConfig::new(4)).unwrap();
        for i in 0..6 {
            monitor.record_phase(0.2);
            monitor.record_state(vec![i as f64, 0.0, 0.0]);
            monitor.record_trajectory(vec![Pos, Zero, Zero]);
        }
        assert_eq!(monitor.states().len(), 4);

        let m = monitor.compute();
        // Constant offset from the reference is still perfectly locked.
        assert!((m.plv - 1.0).abs() < 1e-9);
        assert!((m.lambda_hat - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.zone, Zone::Critical);
        assert_eq!(m.lyapunov, LYAPUNOV_FLOOR);
        assert_eq!(m.permutation_entropy, 0.0);
        assert_eq!(m.perturbation, MonitorConfig::default().critical_perturbation);

        monitor.reset();
        assert!(monitor.phases().is_empty());
        assert_eq!(monitor.compute().lambda_hat, 0.0);
    }

    #[test]
    fn test_monitor_rejects_invalid_config() {
        assert!(CriticalityMonitor::new(MonitorConfig::new(0)).is_err());
    }
}
