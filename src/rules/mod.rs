//! Perception and update rules
//!
//! Three variants share one step contract:
//!
//! 1. compute a delta grid from the whole current grid (read-only),
//! 2. add it where a per-position uniform draw is below `update_probability`,
//! 3. zero every position that fails the alive mask.
//!
//! The same mask applies to an initial seed: start from [`RuleKind::seed`].
//!
//! The delta phase reads a single snapshot, so no position ever observes
//! another position's update from the same step.

mod attention;
mod attention_v2;
mod layers;
mod nca;
mod perception;

pub use attention::{AttentionRule, CENTER_SLOT, SLOTS};
pub use attention_v2::{MultiHeadAttentionRule, MultiHeadParts};
pub use layers::{relu_in_place, softmax_in_place, Dense, LayerNorm, LAYER_NORM_EPS};
pub use nca::NcaRule;
pub use perception::{perceive, perception_factor, SOBEL_X, SOBEL_Y};

pub(crate) use attention::gather_patch;

use crate::error::{LatticeError, Result};
use crate::grid::{Grid, ALIVE_THRESHOLD};
use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters of one grid step.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepParams {
    /// Per-position probability that the delta is applied.
    pub update_probability: f32,
    /// Alpha-channel threshold for the alive mask.
    pub alive_threshold: f32,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            update_probability: 0.5,
            alive_threshold: ALIVE_THRESHOLD,
        }
    }
}

impl StepParams {
    pub fn with_update_probability(mut self, p: f32) -> Self {
        self.update_probability = p;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.update_probability) {
            return Err(LatticeError::InvalidConfig("update_probability must be in [0, 1]"));
        }
        if !self.alive_threshold.is_finite() {
            return Err(LatticeError::InvalidConfig("alive_threshold must be finite"));
        }
        Ok(())
    }
}

/// Closed set of grid update rules.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RuleKind {
    /// Gradient perception + two-layer perceptron.
    Nca(NcaRule),
    /// Single-head local attention.
    Attention(AttentionRule),
    /// Multi-head attention with positional bias and pre-norm block.
    MultiHead(MultiHeadAttentionRule),
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Nca(_) => "nca",
            RuleKind::Attention(_) => "attention",
            RuleKind::MultiHead(_) => "attention_v2",
        }
    }

    /// State channels the rule expects.
    pub fn channels(&self) -> usize {
        match self {
            RuleKind::Nca(r) => r.channels(),
            RuleKind::Attention(r) => r.channels(),
            RuleKind::MultiHead(r) => r.channels(),
        }
    }

    /// Whether the rule expects `[H, W, D, C]` grids.
    pub fn is_volumetric(&self) -> bool {
        match self {
            RuleKind::Nca(r) => r.is_volumetric(),
            RuleKind::Attention(_) | RuleKind::MultiHead(_) => false,
        }
    }

    /// Raw delta for every position.
    pub fn delta(&self, grid: &Grid) -> Result<Grid> {
        match self {
            RuleKind::Nca(r) => r.delta(grid),
            RuleKind::Attention(r) => r.delta(grid),
            RuleKind::MultiHead(r) => r.delta(grid),
        }
    }

    /// Delta at one position computed from its local neighborhood only.
    ///
    /// Equivalent to `delta(grid)` read at `position`, without evaluating
    /// the rest of the grid.
    pub fn delta_at(&self, grid: &Grid, position: usize) -> Result<Vec<f32>> {
        if position >= grid.positions() {
            return Err(LatticeError::shape("rule position", grid.positions(), position));
        }
        grid.ensure_channels(self.channels(), "rule state")?;
        match self {
            RuleKind::Nca(r) => {
                let (y, x, z) = grid.coords(position);
                let window = local_window(grid, y, x, z);
                let perception = perceive(&window.grid);
                r.forward(perception.cell(window.center))
            }
            RuleKind::Attention(r) => r.forward(&gather_patch(grid, position)),
            RuleKind::MultiHead(r) => {
                let (y, x, z) = grid.coords(position);
                let window = local_window(grid, y, x, z);
                let normed = Grid::from_vec(
                    window.grid.shape(),
                    (0..window.grid.positions())
                        .map(|p| r.normalize(window.grid.cell(p)))
                        .collect::<Result<Vec<Vec<f32>>>>()?
                        .concat(),
                )?;
                r.forward(grid.cell(position), &gather_patch(&normed, window.center))
            }
        }
    }

    /// Prepare an initial grid: check its channels and zero every position
    /// that fails the alive mask.
    pub fn seed(&self, grid: &Grid, params: &StepParams) -> Result<Grid> {
        params.validate()?;
        grid.ensure_channels(self.channels(), "rule seed")?;
        let mut seeded = grid.clone();
        seeded.mask_dead(params.alive_threshold)?;
        Ok(seeded)
    }

    /// One full step: delta, stochastic update, alive mask.
    pub fn step<R: Rng + ?Sized>(&self, grid: &Grid, params: &StepParams, rng: &mut R) -> Result<Grid> {
        params.validate()?;
        let delta = self.delta(grid)?;
        let mut next = grid.stochastic_update(&delta, params.update_probability, rng)?;
        next.mask_dead(params.alive_threshold)?;
        tracing::trace!(
            rule = self.name(),
            live = next.live_positions().len(),
            "grid step"
        );
        Ok(next)
    }

    /// Run `steps` consecutive steps.
    pub fn run<R: Rng + ?Sized>(
        &self,
        grid: &Grid,
        params: &StepParams,
        steps: usize,
        rng: &mut R,
    ) -> Result<Grid> {
        let mut current = grid.clone();
        for _ in 0..steps {
            current = self.step(&current, params, rng)?;
        }
        Ok(current)
    }
}

/// Copy of the 3×3 (×3) window around a position with the same zero padding.
struct LocalWindow {
    grid: Grid,
    center: usize,
}

fn local_window(grid: &Grid, y: usize, x: usize, z: usize) -> LocalWindow {
    let c = grid.channels();
    let volumetric = grid.is_volumetric();
    let mut window = if volumetric {
        Grid::new_3d(3, 3, 3, c)
    } else {
        Grid::new(3, 3, c)
    };
    let dz: isize = if volumetric { 1 } else { 0 };
    for oz in -dz..=dz {
        for oy in -1..=1isize {
            for ox in -1..=1isize {
                let src = if volumetric && oz != 0 {
                    // Depth gradient is edge padded, not zero padded.
                    let zz = (z as isize + oz).clamp(0, grid.depth() as isize - 1);
                    grid.cell_padded(y as isize + oy, x as isize + ox, zz)
                } else {
                    grid.cell_padded(y as isize + oy, x as isize + ox, z as isize + oz)
                };
                if let Some(src) = src {
                    let p = window.position((oy + 1) as usize, (ox + 1) as usize, (oz + dz) as usize);
                    window.cell_mut(p).copy_from_slice(src);
                }
            }
        }
    }
    let center = window.position(1, 1, dz as usize);
    LocalWindow {
        grid: window,
        center,
    }
}
