//! Reflex engine - per-cell metrics, rule application and behavioral reflexes
//!
//! One call to [`ReflexEngine::step_cell`] does, in order:
//!
//! 1. compute [`LocalMetrics`] from the cell and its live neighbors
//! 2. apply the [`UpdateRule`] (isolated cells only lose flow)
//! 3. write the metrics into the presence map under [`METRICS_KEY`]
//! 4. evaluate the reflexes: stability, chaos, decay, trust
//! 5. emit propagations for chaos and stability events
//!
//! The engine never reads another cell mutably. Batch stepping (see
//! [`crate::Lattice::step`]) hands it neighbor references from a snapshot.

use crate::cell::{CaState, Presence, PresenceRecord, Thunderbit, Transition};
use crate::config::ReflexConfig;
use crate::coord::Coord;
use crate::error::{LatticeError, Result};
use crate::grid::{Grid, ALIVE_THRESHOLD, ALPHA_CHANNEL};
use crate::reversible::{shannon_entropy, AuditEntry, Gate};
use crate::rules::RuleKind;
use crate::ternary::{majority, Ternary};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Presence key holding the last local-metrics record.
pub const METRICS_KEY: &str = "local_metrics";

/// Presence key set by the chaos reflex.
pub const QUARANTINE_KEY: &str = "quarantine";

/// The four reflexes, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReflexKind {
    Stability,
    Chaos,
    Decay,
    Trust,
}

impl ReflexKind {
    pub const ALL: [ReflexKind; 4] = [
        ReflexKind::Stability,
        ReflexKind::Chaos,
        ReflexKind::Decay,
        ReflexKind::Trust,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReflexKind::Stability => "stability",
            ReflexKind::Chaos => "chaos",
            ReflexKind::Decay => "decay",
            ReflexKind::Trust => "trust",
        }
    }

    /// Only chaos and low-stability events spread to neighbors.
    pub fn propagates(self) -> bool {
        matches!(self, ReflexKind::Stability | ReflexKind::Chaos)
    }
}

impl fmt::Display for ReflexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reflex that fired on one cell.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReflexEvent {
    pub kind: ReflexKind,
    pub cell_id: Uuid,
    pub coord: Coord,
    pub tick: u64,
    /// Human-readable trigger condition.
    pub trigger: String,
    pub data: BTreeMap<String, f64>,
}

/// Request to mark neighbors of a cell where a propagating reflex fired.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Propagation {
    pub source: Coord,
    pub kind: ReflexKind,
    pub targets: Vec<Coord>,
}

/// Cell-scoped analogue of the monitor metrics, from live neighbor states.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalMetrics {
    /// Phase locking of neighbors against the cell's own phase.
    pub plv: f32,
    /// Normalized ternary state entropy of cell + neighbors, in `[0, 1]`.
    pub entropy: f32,
    /// Fraction of non-quiescent states among cell + neighbors.
    pub lambda: f32,
}

impl LocalMetrics {
    pub fn compute(cell: &Thunderbit, neighbors: &[&Thunderbit]) -> Self {
        let plv = if neighbors.is_empty() {
            0.0
        } else {
            let (re, im) = neighbors.iter().fold((0.0f32, 0.0f32), |(re, im), n| {
                let d = n.phase() - cell.phase();
                (re + d.cos(), im + d.sin())
            });
            let k = neighbors.len() as f32;
            (re / k).hypot(im / k).clamp(0.0, 1.0)
        };

        let states: Vec<Ternary> = std::iter::once(cell)
            .chain(neighbors.iter().copied())
            .map(|c| c.state().as_ternary())
            .collect();
        let entropy = (shannon_entropy(&states) / 3f64.log2()) as f32;
        let active = states.iter().filter(|s| **s != Ternary::Zero).count();

        Self {
            plv,
            entropy: entropy.clamp(0.0, 1.0),
            lambda: active as f32 / states.len() as f32,
        }
    }

    fn to_record(self, tick: u64) -> PresenceRecord {
        PresenceRecord::new(METRICS_KEY)
            .at_tick(tick)
            .with_field("plv", self.plv)
            .with_field("entropy", self.entropy)
            .with_field("lambda", self.lambda)
    }
}

/// User-supplied transition function.
pub type CustomRule = Arc<dyn Fn(&Thunderbit, &[&Thunderbit]) -> Transition + Send + Sync>;

/// Rule that replaces the computed dynamics entirely.
#[derive(Clone)]
pub enum PolicyOverride {
    /// Keep everything as is.
    Freeze,
    /// Quiescent state, no flow, no sensitivity.
    Collapse,
    /// Fully active state and flow.
    Activate,
    Custom(CustomRule),
}

impl fmt::Debug for PolicyOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyOverride::Freeze => f.write_str("Freeze"),
            PolicyOverride::Collapse => f.write_str("Collapse"),
            PolicyOverride::Activate => f.write_str("Activate"),
            PolicyOverride::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PolicyOverride {
    fn transition(&self, cell: &Thunderbit, neighbors: &[&Thunderbit]) -> Transition {
        let current = cell.transition();
        match self {
            PolicyOverride::Freeze => current,
            PolicyOverride::Collapse => Transition {
                state: quiescent(current.state),
                flow: 0.0,
                sensitivity: 0.0,
                ..current
            },
            PolicyOverride::Activate => Transition {
                state: match current.state {
                    CaState::Discrete(_) => CaState::Discrete(Ternary::Pos),
                    CaState::Continuous(_) => CaState::Continuous(1.0),
                },
                flow: 1.0,
                ..current
            },
            PolicyOverride::Custom(f) => f(cell, neighbors),
        }
    }
}

fn quiescent(state: CaState) -> CaState {
    match state {
        CaState::Discrete(_) => CaState::Discrete(Ternary::Zero),
        CaState::Continuous(_) => CaState::Continuous(0.0),
    }
}

/// How a cell's next state is computed.
#[derive(Clone, Debug)]
pub enum UpdateRule {
    /// Feynman gate with the neighbor majority as control, plus phase coupling.
    Ternary,
    /// One of the grid rules evaluated on the cell's 3×3 patch.
    Grid(RuleKind),
    Override(PolicyOverride),
}

impl UpdateRule {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateRule::Ternary => Gate::Feynman.name(),
            UpdateRule::Grid(rule) => rule.name(),
            UpdateRule::Override(_) => "override",
        }
    }
}

/// Result of one per-cell step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutcome {
    pub events: Vec<ReflexEvent>,
    pub propagations: Vec<Propagation>,
    pub metrics: LocalMetrics,
    /// Present when the ternary rule was applied.
    pub audit: Option<AuditEntry>,
}

/// Per-cell rule application and reflex evaluation.
#[derive(Clone, Debug)]
pub struct ReflexEngine {
    config: ReflexConfig,
    rule: UpdateRule,
}

impl ReflexEngine {
    /// Create an engine; fails on invalid configuration or a grid rule too
    /// narrow for the cell channel encoding.
    pub fn new(config: ReflexConfig, rule: UpdateRule) -> Result<Self> {
        config.validate()?;
        if let UpdateRule::Grid(r) = &rule {
            if r.channels() < crate::cell::ENCODED_CHANNELS {
                return Err(LatticeError::shape(
                    "reflex grid rule",
                    format!(">= {} channels", crate::cell::ENCODED_CHANNELS),
                    r.channels(),
                ));
            }
        }
        Ok(Self { config, rule })
    }

    pub fn config(&self) -> &ReflexConfig {
        &self.config
    }

    pub fn rule(&self) -> &UpdateRule {
        &self.rule
    }

    /// Run one step on `cell` against a consistent view of its neighbors.
    pub fn step_cell<R: Rng + ?Sized>(
        &self,
        cell: &mut Thunderbit,
        neighbors: &[&Thunderbit],
        tick: u64,
        rng: &mut R,
    ) -> Result<StepOutcome> {
        let metrics = LocalMetrics::compute(cell, neighbors);

        let mut audit = None;
        let transition = if neighbors.is_empty() {
            Transition {
                flow: cell.flow() * (1.0 - self.config.isolation_flow_decay),
                ..cell.transition()
            }
        } else {
            match &self.rule {
                UpdateRule::Ternary => {
                    let (t, entry) = self.ternary_transition(cell, neighbors, &metrics, tick)?;
                    audit = Some(entry);
                    t
                }
                UpdateRule::Grid(rule) => self.grid_transition(rule, cell, neighbors, rng)?,
                UpdateRule::Override(o) => o.transition(cell, neighbors),
            }
        };
        cell.update_state(transition, tick);

        let last_write = cell
            .presence_of(METRICS_KEY)
            .and_then(Presence::record)
            .and_then(|r| r.tick);
        cell.set_presence_record(METRICS_KEY, metrics.to_record(tick));

        let events = self.evaluate_reflexes(cell, &metrics, last_write, tick);

        let propagations = if self.config.propagate && !cell.neighborhood().is_empty() {
            events
                .iter()
                .filter(|e| e.kind.propagates())
                .map(|e| Propagation {
                    source: cell.coord(),
                    kind: e.kind,
                    targets: cell.neighborhood().to_vec(),
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(StepOutcome {
            events,
            propagations,
            metrics,
            audit,
        })
    }

    // =========================================================================
    // RULES
    // =========================================================================

    fn ternary_transition(
        &self,
        cell: &Thunderbit,
        neighbors: &[&Thunderbit],
        metrics: &LocalMetrics,
        tick: u64,
    ) -> Result<(Transition, AuditEntry)> {
        let states: Vec<Ternary> = neighbors.iter().map(|n| n.state().as_ternary()).collect();
        let control = majority(&states);
        let target = cell.state().as_ternary();
        let entry = AuditEntry::record(cell.id(), tick, Gate::Feynman, &[control, target])?;
        let next = entry.output_values.get(1).copied().unwrap_or(target);

        let pull = neighbors
            .iter()
            .map(|n| (n.phase() - cell.phase()).sin())
            .sum::<f32>()
            / neighbors.len() as f32;

        let state = match cell.state() {
            CaState::Discrete(_) => CaState::Discrete(next),
            CaState::Continuous(_) => CaState::Continuous(next.to_float()),
        };
        let t = Transition {
            state,
            flow: cell.flow(),
            phase: cell.phase() + self.config.phase_coupling * pull,
            sensitivity: metrics.entropy,
        };
        Ok((t, entry))
    }

    fn grid_transition<R: Rng + ?Sized>(
        &self,
        rule: &RuleKind,
        cell: &Thunderbit,
        neighbors: &[&Thunderbit],
        rng: &mut R,
    ) -> Result<Transition> {
        let c = rule.channels();
        let dz = usize::from(rule.is_volumetric());
        let mut patch = if rule.is_volumetric() {
            Grid::new_3d(3, 3, 3, c)
        } else {
            Grid::new(3, 3, c)
        };
        let center = patch.position(1, 1, dz);
        patch.cell_mut(center).copy_from_slice(&cell.encode_channels(c)?);

        let origin = cell.coord();
        for n in neighbors {
            let (ox, oy, oz) = (
                n.coord().x - origin.x,
                n.coord().y - origin.y,
                n.coord().z - origin.z,
            );
            if ox.abs() > 1 || oy.abs() > 1 || oz.abs() > dz as i32 {
                continue;
            }
            let p = patch.position((oy + 1) as usize, (ox + 1) as usize, (oz + dz as i32) as usize);
            patch.cell_mut(p).copy_from_slice(&n.encode_channels(c)?);
        }

        let mut t = if rng.gen::<f32>() < self.config.update_probability {
            cell.apply_channel_delta(&rule.delta_at(&patch, center)?)?
        } else {
            cell.transition()
        };

        // Alive mask over the 3×3 (3×3×3) patch; flow is the alpha channel.
        let neighbor_alpha = (0..patch.positions())
            .filter(|&p| p != center)
            .map(|p| patch.cell(p)[ALPHA_CHANNEL])
            .fold(0.0f32, f32::max);
        if t.flow.max(neighbor_alpha) <= ALIVE_THRESHOLD {
            t = Transition {
                state: quiescent(t.state),
                flow: 0.0,
                sensitivity: 0.0,
                ..t
            };
        }
        Ok(t)
    }

    // =========================================================================
    // REFLEXES
    // =========================================================================

    fn evaluate_reflexes(
        &self,
        cell: &mut Thunderbit,
        metrics: &LocalMetrics,
        last_write: Option<u64>,
        tick: u64,
    ) -> Vec<ReflexEvent> {
        let cfg = &self.config;
        let mut events = Vec::new();
        let mut fire = |cell: &Thunderbit, kind: ReflexKind, trigger: String, data: Vec<(&str, f64)>| {
            tracing::trace!(%kind, coord = %cell.coord(), tick, "reflex fired");
            events.push(ReflexEvent {
                kind,
                cell_id: cell.id(),
                coord: cell.coord(),
                tick,
                trigger,
                data: data.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            });
        };

        let flow = cell.flow();
        if flow < cfg.stability_threshold {
            let applied = cell.update_trust(cfg.stability_penalty);
            fire(
                cell,
                ReflexKind::Stability,
                format!("flow {flow:.3} < {}", cfg.stability_threshold),
                vec![("flow", flow as f64), ("trust_delta", applied as f64)],
            );
        }

        if metrics.lambda > cfg.chaos_threshold {
            cell.set_presence_record(
                QUARANTINE_KEY,
                PresenceRecord::new("chaos")
                    .at_tick(tick)
                    .with_field("lambda", metrics.lambda),
            );
            fire(
                cell,
                ReflexKind::Chaos,
                format!("lambda {:.3} > {}", metrics.lambda, cfg.chaos_threshold),
                vec![("lambda", metrics.lambda as f64)],
            );
        }

        if let Some(last) = last_write {
            let idle = tick.saturating_sub(last);
            if idle > cfg.idle_ticks {
                let pruned = cell.decay_presence(cfg.presence_decay_rate);
                fire(
                    cell,
                    ReflexKind::Decay,
                    format!("idle {idle} > {} ticks", cfg.idle_ticks),
                    vec![("idle_ticks", idle as f64), ("pruned", pruned as f64)],
                );
            }
        }

        if flow > cfg.stability_threshold && metrics.plv > cfg.plv_threshold {
            let applied = cell.update_trust(cfg.trust_boost);
            fire(
                cell,
                ReflexKind::Trust,
                format!("flow {flow:.3} and plv {:.3} > {}", metrics.plv, cfg.plv_threshold),
                vec![("plv", metrics.plv as f64), ("trust_delta", applied as f64)],
            );
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Bounds, NeighborhoodPolicy};
    use crate::rules::NcaRule;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Center cell plus its eight planar Moore neighbors.
    fn neighborhood() -> (Thunderbit, Vec<Thunderbit>) {
        let bounds = Bounds::new(3, 3, 1);
        let center = Thunderbit::new(Coord::new(1, 1, 0), &bounds, NeighborhoodPolicy::Moore).unwrap();
        let neighbors = center
            .neighborhood()
            .iter()
            .map(|&c| Thunderbit::new(c, &bounds, NeighborhoodPolicy::Moore).unwrap())
            .collect();
        (center, neighbors)
    }

    fn engine(rule: UpdateRule) -> ReflexEngine {
        ReflexEngine::new(ReflexConfig::default(), rule).unwrap()
    }

    #[test]
    fn test_low_flow_fires_stability_and_propagates() {
        let (mut cell, neighbors) = neighborhood();
        cell.set_flow(0.05);
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let mut rng = StdRng::seed_from_u64(1);

        let out = engine(UpdateRule::Ternary)
            .step_cell(&mut cell, &refs, 1, &mut rng)
            .unwrap();

        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!(event.kind, ReflexKind::Stability);
        assert_eq!(event.coord, Coord::new(1, 1, 0));
        assert!((event.data["trust_delta"] + 0.05).abs() < 1e-6);
        assert!((cell.trust() - 0.45).abs() < 1e-6);

        assert_eq!(out.propagations.len(), 1);
        assert_eq!(out.propagations[0].kind, ReflexKind::Stability);
        assert_eq!(out.propagations[0].targets, cell.neighborhood().to_vec());
        assert_eq!(out.propagations[0].targets.len(), 8);
    }

    #[test]
    fn test_metrics_written_to_presence() {
        let (mut cell, neighbors) = neighborhood();
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let mut rng = StdRng::seed_from_u64(2);
        let out = engine(UpdateRule::Ternary)
            .step_cell(&mut cell, &refs, 7, &mut rng)
            .unwrap();

        let record = cell.presence_of(METRICS_KEY).and_then(Presence::record).unwrap();
        assert_eq!(record.tick, Some(7));
        assert_eq!(record.field("plv"), Some(out.metrics.plv));
        assert_eq!(out.metrics.lambda, 0.0);
        assert!((out.metrics.plv - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_synchronized_healthy_cell_gains_trust() {
        let (mut cell, neighbors) = neighborhood();
        cell.set_flow(0.8);
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let mut rng = StdRng::seed_from_u64(3);
        let out = engine(UpdateRule::Ternary)
            .step_cell(&mut cell, &refs, 1, &mut rng)
            .unwrap();

        let kinds: Vec<_> = out.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ReflexKind::Trust]);
        assert!((cell.trust() - 0.52).abs() < 1e-6);
        // Trust events stay local.
        assert!(out.propagations.is_empty());
    }

    #[test]
    fn test_active_neighborhood_quarantines() {
        let (mut cell, mut neighbors) = neighborhood();
        cell.set_state(CaState::Discrete(Ternary::Pos));
        for n in &mut neighbors {
            n.set_state(CaState::Discrete(Ternary::Pos));
        }
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let mut rng = StdRng::seed_from_u64(4);
        let out = engine(UpdateRule::Override(PolicyOverride::Freeze))
            .step_cell(&mut cell, &refs, 1, &mut rng)
            .unwrap();

        assert_eq!(out.metrics.lambda, 1.0);
        assert_eq!(out.metrics.entropy, 0.0);
        assert!(out.events.iter().any(|e| e.kind == ReflexKind::Chaos));
        assert!(cell.presence_of(QUARANTINE_KEY).is_some());
        assert!(out.propagations.iter().any(|p| p.kind == ReflexKind::Chaos));
    }

    #[test]
    fn test_idle_cell_decays_presence() {
        let (mut cell, neighbors) = neighborhood();
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let engine = engine(UpdateRule::Override(PolicyOverride::Freeze));
        let mut rng = StdRng::seed_from_u64(5);

        cell.add_presence("alice", 1.0);
        let first = engine.step_cell(&mut cell, &refs, 1, &mut rng).unwrap();
        assert!(first.events.iter().all(|e| e.kind != ReflexKind::Decay));

        let second = engine.step_cell(&mut cell, &refs, 20, &mut rng).unwrap();
        let decay = second
            .events
            .iter()
            .find(|e| e.kind == ReflexKind::Decay)
            .unwrap();
        assert_eq!(decay.data["idle_ticks"], 19.0);
        let alice = cell.presence_of("alice").and_then(Presence::strength).unwrap();
        assert!((alice - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_isolated_cell_only_loses_flow() {
        let bounds = Bounds::new(1, 1, 1);
        let mut cell = Thunderbit::new(Coord::new(0, 0, 0), &bounds, NeighborhoodPolicy::Moore).unwrap();
        cell.set_phase(1.0);
        let before = cell.transition();
        let mut rng = StdRng::seed_from_u64(6);

        let out = engine(UpdateRule::Ternary)
            .step_cell(&mut cell, &[], 1, &mut rng)
            .unwrap();

        assert!((cell.flow() - 0.45).abs() < 1e-6);
        assert_eq!(cell.phase(), before.phase);
        assert_eq!(cell.state(), before.state);
        assert_eq!(cell.sensitivity(), before.sensitivity);
        assert!(out.audit.is_none());
        assert!(out.propagations.is_empty());
    }

    #[test]
    fn test_ternary_rule_audit_rolls_back() {
        let (mut cell, mut neighbors) = neighborhood();
        for n in neighbors.iter_mut().take(5) {
            n.set_state(CaState::Discrete(Ternary::Pos));
        }
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let mut rng = StdRng::seed_from_u64(7);
        let out = engine(UpdateRule::Ternary)
            .step_cell(&mut cell, &refs, 3, &mut rng)
            .unwrap();

        let audit = out.audit.unwrap();
        assert_eq!(audit.cell_id, cell.id());
        assert_eq!(audit.tick, 3);
        assert_eq!(audit.input_values, vec![Ternary::Pos, Ternary::Zero]);
        assert_eq!(cell.state(), CaState::Discrete(audit.output_values[1]));
        assert_eq!(audit.rollback().unwrap(), audit.input_values);
    }

    #[test]
    fn test_policy_overrides() {
        let (cell, neighbors) = neighborhood();
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let mut rng = StdRng::seed_from_u64(8);

        let mut activated = cell.clone();
        engine(UpdateRule::Override(PolicyOverride::Activate))
            .step_cell(&mut activated, &refs, 1, &mut rng)
            .unwrap();
        assert_eq!(activated.state(), CaState::Discrete(Ternary::Pos));
        assert_eq!(activated.flow(), 1.0);

        let mut collapsed = activated.clone();
        engine(UpdateRule::Override(PolicyOverride::Collapse))
            .step_cell(&mut collapsed, &refs, 2, &mut rng)
            .unwrap();
        assert_eq!(collapsed.state(), CaState::Discrete(Ternary::Zero));
        assert_eq!(collapsed.flow(), 0.0);

        let custom: CustomRule = Arc::new(|c: &Thunderbit, n: &[&Thunderbit]| Transition {
            sensitivity: n.len() as f32 / 10.0,
            ..c.transition()
        });
        let mut tuned = cell.clone();
        engine(UpdateRule::Override(PolicyOverride::Custom(custom)))
            .step_cell(&mut tuned, &refs, 1, &mut rng)
            .unwrap();
        assert!((tuned.sensitivity() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_fresh_grid_rule_keeps_cell() {
        let (mut cell, neighbors) = neighborhood();
        cell.set_phase(0.7);
        cell.set_flow(0.6);
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let mut rng = StdRng::seed_from_u64(9);
        let rule = UpdateRule::Grid(RuleKind::Nca(NcaRule::new(8, 16, &mut rng)));
        let config = ReflexConfig {
            update_probability: 1.0,
            ..ReflexConfig::default()
        };
        let out = ReflexEngine::new(config, rule)
            .unwrap()
            .step_cell(&mut cell, &refs, 1, &mut rng)
            .unwrap();

        assert!((cell.phase() - 0.7).abs() < 1e-5);
        assert!((cell.flow() - 0.6).abs() < 1e-6);
        assert_eq!(cell.state(), CaState::Discrete(Ternary::Zero));
        assert!(out.audit.is_none());
    }

    #[test]
    fn test_volumetric_alive_mask_sees_cell_above() {
        let bounds = Bounds::new(3, 3, 3);
        let mut cell =
            Thunderbit::new(Coord::new(1, 1, 1), &bounds, NeighborhoodPolicy::Moore).unwrap();
        cell.set_flow(0.05);
        let neighbors: Vec<Thunderbit> = cell
            .neighborhood()
            .iter()
            .map(|&c| {
                let mut n = Thunderbit::new(c, &bounds, NeighborhoodPolicy::Moore).unwrap();
                n.set_flow(if c == Coord::new(1, 1, 2) { 0.9 } else { 0.0 });
                n
            })
            .collect();
        assert_eq!(neighbors.len(), 26);
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();

        let mut rng = StdRng::seed_from_u64(12);
        let rule = UpdateRule::Grid(RuleKind::Nca(NcaRule::new_3d(8, 16, &mut rng)));
        let config = ReflexConfig {
            update_probability: 1.0,
            ..ReflexConfig::default()
        };
        ReflexEngine::new(config, rule)
            .unwrap()
            .step_cell(&mut cell, &refs, 1, &mut rng)
            .unwrap();
        assert!((cell.flow() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_narrow_grid_rule_rejected() {
        let mut rng = StdRng::seed_from_u64(10);
        let rule = UpdateRule::Grid(RuleKind::Nca(NcaRule::new(4, 8, &mut rng)));
        assert!(ReflexEngine::new(ReflexConfig::default(), rule).is_err());
    }

    #[test]
    fn test_propagation_can_be_disabled() {
        let (mut cell, neighbors) = neighborhood();
        cell.set_flow(0.05);
        let refs: Vec<&Thunderbit> = neighbors.iter().collect();
        let config = ReflexConfig {
            propagate: false,
            ..ReflexConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let out = ReflexEngine::new(config, UpdateRule::Ternary)
            .unwrap()
            .step_cell(&mut cell, &refs, 1, &mut rng)
            .unwrap();
        assert_eq!(out.events.len(), 1);
        assert!(out.propagations.is_empty());
    }
}
