//! Lattice - the cell arena and synchronous batch stepping
//!
//! Cells live in a dense arena indexed by coordinate (x fastest). A slot may be
//! empty for sparse lattices; cells are created lazily on first touch.
//!
//! # Stepping
//!
//! Every tick is a generation:
//!
//! 1. the arena as it stands is the snapshot, read by all workers
//! 2. each cell is cloned and stepped against neighbor references into that
//!    snapshot, in parallel, with no shared mutable state
//! 3. results are committed in coordinate order, then observers are notified
//!
//! No cell can observe another cell's update from the same tick. A failing
//! cell keeps its previous state and is reported; the rest of the batch
//! commits normally.

use crate::cell::Thunderbit;
use crate::coord::{Bounds, Coord, NeighborhoodPolicy};
use crate::error::{LatticeError, Result};
use crate::grid::Grid;
use crate::monitor::{circular_mean, CriticalityMonitor};
use crate::observer::ReflexObserver;
use crate::reflex::{Propagation, ReflexEngine, ReflexEvent, StepOutcome};
use crate::reversible::AuditEntry;
use crate::ternary::Ternary;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

/// Presence key prefix written by [`Lattice::apply_propagations`].
pub const PROPAGATED_PREFIX: &str = "propagated:";

/// Per-cell seed mixing constant (golden ratio, 64-bit).
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// What one batch step did.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub tick: u64,
    /// Cells whose step committed.
    pub updated: usize,
    /// Cells whose step failed; their state is unchanged.
    pub failures: Vec<(Coord, LatticeError)>,
    /// Fired reflexes in coordinate order.
    pub events: Vec<ReflexEvent>,
    pub propagations: Vec<Propagation>,
    pub audits: Vec<AuditEntry>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Arena of cells with declared bounds.
pub struct Lattice {
    bounds: Bounds,
    policy: NeighborhoodPolicy,
    cells: Vec<Option<Thunderbit>>,
    tick: u64,
    observers: Vec<Arc<dyn ReflexObserver>>,
}

impl fmt::Debug for Lattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lattice")
            .field("bounds", &self.bounds)
            .field("policy", &self.policy)
            .field("cells", &self.len())
            .field("tick", &self.tick)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Lattice {
    /// Dense lattice: one cell per coordinate.
    pub fn new(bounds: Bounds, policy: NeighborhoodPolicy) -> Result<Self> {
        let cells = bounds
            .iter()
            .map(|c| Thunderbit::new(c, &bounds, policy).map(Some))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            bounds,
            policy,
            cells,
            tick: 0,
            observers: Vec::new(),
        })
    }

    /// Empty lattice; cells appear through [`Lattice::get_or_create`].
    pub fn new_sparse(bounds: Bounds, policy: NeighborhoodPolicy) -> Self {
        Self {
            bounds,
            policy,
            cells: vec![None; bounds.volume()],
            tick: 0,
            observers: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn policy(&self) -> NeighborhoodPolicy {
        self.policy
    }

    /// Ticks committed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of existing cells.
    pub fn len(&self) -> usize {
        self.cells.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }

    // =========================================================================
    // CELL ACCESS
    // =========================================================================

    pub fn get(&self, coord: Coord) -> Option<&Thunderbit> {
        let i = self.bounds.index(coord).ok()?;
        self.cells[i].as_ref()
    }

    pub fn get_mut(&mut self, coord: Coord) -> Option<&mut Thunderbit> {
        let i = self.bounds.index(coord).ok()?;
        self.cells[i].as_mut()
    }

    /// Existing cell at `coord`, or a fresh one. Errors outside the bounds.
    pub fn get_or_create(&mut self, coord: Coord) -> Result<&mut Thunderbit> {
        let i = self.bounds.index(coord)?;
        let slot = &mut self.cells[i];
        if slot.is_none() {
            *slot = Some(Thunderbit::new(coord, &self.bounds, self.policy)?);
        }
        slot.as_mut().ok_or(LatticeError::MissingCell(coord))
    }

    /// Existing cells in coordinate order.
    pub fn cells(&self) -> impl Iterator<Item = &Thunderbit> + '_ {
        self.cells.iter().flatten()
    }

    /// Register an observer for committed reflex events.
    pub fn subscribe(&mut self, observer: Arc<dyn ReflexObserver>) {
        self.observers.push(observer);
    }

    // =========================================================================
    // STEPPING
    // =========================================================================

    /// Step every existing cell once.
    ///
    /// `seed` makes the step reproducible: each cell draws from its own RNG
    /// derived from the seed, the tick and its index.
    pub fn step(&mut self, engine: &ReflexEngine, seed: u64) -> BatchReport {
        let indices: Vec<usize> = (0..self.cells.len())
            .filter(|&i| self.cells[i].is_some())
            .collect();
        self.run_batch(&indices, engine, seed)
    }

    /// Step only the given cells (a region). Out-of-bounds coordinates are
    /// rejected up front; in-bounds coordinates with no cell are reported as
    /// per-cell failures.
    pub fn step_cells(&mut self, coords: &[Coord], engine: &ReflexEngine, seed: u64) -> Result<BatchReport> {
        let mut indices = coords
            .iter()
            .map(|c| self.bounds.index(*c))
            .collect::<Result<Vec<_>>>()?;
        indices.sort_unstable();
        indices.dedup();
        Ok(self.run_batch(&indices, engine, seed))
    }

    fn run_batch(&mut self, indices: &[usize], engine: &ReflexEngine, seed: u64) -> BatchReport {
        let tick = self.tick + 1;
        let bounds = self.bounds;
        let snapshot = &self.cells;

        let results: Vec<(usize, Result<(Thunderbit, StepOutcome)>)> = indices
            .par_iter()
            .map(|&i| {
                let result = match &snapshot[i] {
                    None => Err(LatticeError::MissingCell(bounds.coord(i))),
                    Some(cell) => {
                        let neighbors: Vec<&Thunderbit> = cell
                            .neighborhood()
                            .iter()
                            .filter_map(|c| bounds.index(*c).ok())
                            .filter_map(|j| snapshot[j].as_ref())
                            .collect();
                        let mut rng = StdRng::seed_from_u64(
                            seed ^ tick.rotate_left(32) ^ (i as u64).wrapping_mul(SEED_MIX),
                        );
                        let mut next = cell.clone();
                        engine
                            .step_cell(&mut next, &neighbors, tick, &mut rng)
                            .map(|outcome| (next, outcome))
                    }
                };
                (i, result)
            })
            .collect();

        self.tick = tick;
        let mut report = BatchReport {
            tick,
            ..BatchReport::default()
        };
        for (i, result) in results {
            match result {
                Ok((next, outcome)) => {
                    self.cells[i] = Some(next);
                    report.updated += 1;
                    report.events.extend(outcome.events);
                    report.propagations.extend(outcome.propagations);
                    report.audits.extend(outcome.audit);
                }
                Err(e) => {
                    let coord = bounds.coord(i);
                    tracing::warn!(%coord, tick, error = %e, "cell step failed");
                    report.failures.push((coord, e));
                }
            }
        }

        tracing::debug!(
            tick,
            updated = report.updated,
            failed = report.failures.len(),
            events = report.events.len(),
            "batch step"
        );

        for event in &report.events {
            for observer in &self.observers {
                observer.on_event(event);
            }
        }
        report
    }

    /// Mark every existing target of `propagations` with presence
    /// `propagated:<kind>` at `strength`. Returns the number of cells marked.
    pub fn apply_propagations(&mut self, propagations: &[Propagation], strength: f32) -> usize {
        let mut marked = 0;
        for p in propagations {
            let key = format!("{PROPAGATED_PREFIX}{}", p.kind);
            for target in &p.targets {
                if let Some(cell) = self.get_mut(*target) {
                    cell.add_presence(key.clone(), strength);
                    marked += 1;
                }
            }
        }
        marked
    }

    // =========================================================================
    // EXPORT
    // =========================================================================

    /// Record one sample of the lattice into a monitor: circular mean phase,
    /// the raw state vector and the ternary trajectory.
    pub fn sample_into(&self, monitor: &mut CriticalityMonitor) {
        let phases: Vec<f64> = self.cells().map(|c| c.phase() as f64).collect();
        if phases.is_empty() {
            return;
        }
        monitor.record_phase(circular_mean(&phases).unwrap_or(0.0));
        monitor.record_state(self.cells().map(|c| c.state().as_f32() as f64).collect());
        monitor.record_trajectory(self.cells().map(|c| c.state().as_ternary()).collect::<Vec<Ternary>>());
    }

    /// Encode the lattice as a `[Y, X, C]` grid (`[Y, X, Z, C]` when deeper
    /// than one layer). Empty slots are zero.
    pub fn to_grid(&self, channels: usize) -> Result<Grid> {
        let (w, h, d) = (
            self.bounds.x as usize,
            self.bounds.y as usize,
            self.bounds.z as usize,
        );
        let mut grid = if d > 1 {
            Grid::new_3d(h, w, d, channels)
        } else {
            Grid::new(h, w, channels)
        };
        for cell in self.cells() {
            let c = cell.coord();
            let p = grid.position(c.y as usize, c.x as usize, c.z as usize);
            grid.cell_mut(p).copy_from_slice(&cell.encode_channels(channels)?);
        }
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CaState, Presence, Transition};
    use crate::config::{MonitorConfig, ReflexConfig};
    use crate::grid::ALPHA_CHANNEL;
    use crate::observer::ChannelObserver;
    use crate::reflex::{CustomRule, PolicyOverride, ReflexKind, UpdateRule};
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    fn engine(rule: UpdateRule) -> ReflexEngine {
        ReflexEngine::new(ReflexConfig::default(), rule).unwrap()
    }

    /// Become `Pos` when any neighbor is `Pos`.
    fn spread() -> UpdateRule {
        let rule: CustomRule = Arc::new(|cell: &Thunderbit, neighbors: &[&Thunderbit]| {
            let lit = neighbors
                .iter()
                .any(|n| n.state() == CaState::Discrete(Ternary::Pos));
            Transition {
                state: if lit {
                    CaState::Discrete(Ternary::Pos)
                } else {
                    cell.state()
                },
                ..cell.transition()
            }
        });
        UpdateRule::Override(PolicyOverride::Custom(rule))
    }

    fn states(lattice: &Lattice) -> Vec<Ternary> {
        lattice.cells().map(|c| c.state().as_ternary()).collect()
    }

    #[test]
    fn test_dense_and_sparse_construction() {
        let bounds = Bounds::new(3, 2, 2);
        let dense = Lattice::new(bounds, NeighborhoodPolicy::Moore).unwrap();
        assert_eq!(dense.len(), 12);

        let mut sparse = Lattice::new_sparse(bounds, NeighborhoodPolicy::Moore);
        assert!(sparse.is_empty());
        let id = sparse.get_or_create(Coord::new(2, 1, 1)).unwrap().id();
        assert_eq!(sparse.get_or_create(Coord::new(2, 1, 1)).unwrap().id(), id);
        assert_eq!(sparse.len(), 1);
        assert!(matches!(
            sparse.get_or_create(Coord::new(3, 0, 0)),
            Err(LatticeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_step_reads_snapshot_before_writing() {
        let mut lattice = Lattice::new(Bounds::new(4, 1, 1), NeighborhoodPolicy::VonNeumann).unwrap();
        lattice
            .get_mut(Coord::new(0, 0, 0))
            .unwrap()
            .set_state(CaState::Discrete(Ternary::Pos));
        let engine = engine(spread());

        let report = lattice.step(&engine, 42);
        assert!(report.is_clean());
        assert_eq!(report.updated, 4);
        // One hop per tick; an in-place scan would light the whole row.
        use Ternary::*;
        assert_eq!(states(&lattice), vec![Pos, Pos, Zero, Zero]);

        lattice.step(&engine, 42);
        assert_eq!(states(&lattice), vec![Pos, Pos, Pos, Zero]);
        assert_eq!(lattice.tick(), 2);
    }

    #[test]
    fn test_failures_are_isolated() {
        let mut lattice = Lattice::new_sparse(Bounds::new(3, 3, 1), NeighborhoodPolicy::Moore);
        let a = Coord::new(0, 0, 0);
        let b = Coord::new(1, 0, 0);
        let missing = Coord::new(2, 2, 0);
        lattice.get_or_create(a).unwrap();
        lattice.get_or_create(b).unwrap();

        let report = lattice
            .step_cells(&[a, missing, b], &engine(UpdateRule::Ternary), 7)
            .unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0], (missing, LatticeError::MissingCell(missing)));
        assert_eq!(lattice.get(a).unwrap().last_tick(), 1);

        assert!(lattice
            .step_cells(&[Coord::new(5, 0, 0)], &engine(UpdateRule::Ternary), 7)
            .is_err());
    }

    #[test]
    fn test_observers_notified_in_coordinate_order() {
        let mut lattice = Lattice::new(Bounds::new(3, 2, 1), NeighborhoodPolicy::Moore).unwrap();
        for c in Bounds::new(3, 2, 1).iter() {
            lattice.get_mut(c).unwrap().set_flow(0.1);
        }
        let (tx, rx) = mpsc::channel();
        lattice.subscribe(Arc::new(ChannelObserver::new(tx)));

        let report = lattice.step(&engine(UpdateRule::Override(PolicyOverride::Freeze)), 1);
        let received: Vec<ReflexEvent> = rx.try_iter().collect();
        assert_eq!(received, report.events);
        assert!(received.iter().all(|e| e.kind == ReflexKind::Stability));
        let coords: Vec<Coord> = received.iter().map(|e| e.coord).collect();
        assert_eq!(coords, Bounds::new(3, 2, 1).iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_apply_propagations() {
        let mut lattice = Lattice::new(Bounds::new(3, 3, 1), NeighborhoodPolicy::Moore).unwrap();
        lattice
            .get_mut(Coord::new(1, 1, 0))
            .unwrap()
            .set_flow(0.0);
        let report = lattice.step(&engine(UpdateRule::Override(PolicyOverride::Freeze)), 3);
        assert_eq!(report.propagations.len(), 1);

        let marked = lattice.apply_propagations(&report.propagations, 0.5);
        assert_eq!(marked, 8);
        let corner = lattice.get(Coord::new(0, 0, 0)).unwrap();
        assert_eq!(
            corner
                .presence_of("propagated:stability")
                .and_then(Presence::strength),
            Some(0.5)
        );
    }

    #[test]
    fn test_ternary_step_collects_audits() {
        let mut lattice = Lattice::new(Bounds::new(2, 2, 1), NeighborhoodPolicy::Moore).unwrap();
        let report = lattice.step(&engine(UpdateRule::Ternary), 9);
        assert_eq!(report.audits.len(), 4);
        for audit in &report.audits {
            assert_eq!(audit.rollback().unwrap(), audit.input_values);
        }
    }

    #[test]
    fn test_sample_into_monitor() {
        let mut lattice = Lattice::new(Bounds::new(2, 2, 1), NeighborhoodPolicy::Moore).unwrap();
        lattice
            .get_mut(Coord::new(0, 0, 0))
            .unwrap()
            .set_state(CaState::Discrete(Ternary::Neg));
        let mut monitor = CriticalityMonitor::new(MonitorConfig::new(8)).unwrap();
        lattice.sample_into(&mut monitor);

        assert_eq!(monitor.phases().len(), 1);
        assert_eq!(monitor.trajectories().latest().map(Vec::len), Some(4));
        assert!((monitor.compute().lambda_hat - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_to_grid_places_cells() {
        let mut lattice = Lattice::new(Bounds::new(3, 2, 1), NeighborhoodPolicy::Moore).unwrap();
        lattice.get_mut(Coord::new(2, 1, 0)).unwrap().set_flow(0.9);
        let grid = lattice.to_grid(8).unwrap();
        assert_eq!((grid.height(), grid.width(), grid.channels()), (2, 3, 8));
        assert!((grid.get(1, 2, 0, ALPHA_CHANNEL) - 0.9).abs() < 1e-6);
        assert!((grid.get(0, 0, 0, ALPHA_CHANNEL) - 0.5).abs() < 1e-6);
        assert!(lattice.to_grid(3).is_err());
    }
}
