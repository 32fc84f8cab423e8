//! Gradient-based neural cellular automaton
//!
//! `perceive -> dense -> ReLU -> dense`. The output layer starts at exactly
//! zero, so a fresh rule produces a zero delta everywhere.

use super::layers::{relu_in_place, Dense};
use super::perception::perceive;
use crate::error::{LatticeError, Result};
use crate::grid::Grid;
use rand::Rng;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Classic NCA parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NcaRule {
    channels: usize,
    volumetric: bool,
    hidden: Dense,
    output: Dense,
}

impl NcaRule {
    /// Fresh planar rule: Xavier hidden layer, zero output layer.
    pub fn new<R: Rng + ?Sized>(channels: usize, hidden: usize, rng: &mut R) -> Self {
        Self::init(channels, hidden, false, rng)
    }

    /// Fresh volumetric rule (perception includes the depth gradient).
    pub fn new_3d<R: Rng + ?Sized>(channels: usize, hidden: usize, rng: &mut R) -> Self {
        Self::init(channels, hidden, true, rng)
    }

    fn init<R: Rng + ?Sized>(channels: usize, hidden: usize, volumetric: bool, rng: &mut R) -> Self {
        let inputs = channels * if volumetric { 4 } else { 3 };
        Self {
            channels,
            volumetric,
            hidden: Dense::xavier(inputs, hidden, rng),
            output: Dense::zeros(hidden, channels),
        }
    }

    /// Build from trained layers.
    pub fn from_layers(channels: usize, volumetric: bool, hidden: Dense, output: Dense) -> Result<Self> {
        let rule = Self {
            channels,
            volumetric,
            hidden,
            output,
        };
        if rule.hidden.inputs() != rule.perception_channels() {
            return Err(LatticeError::shape(
                "nca hidden layer",
                rule.perception_channels(),
                rule.hidden.inputs(),
            ));
        }
        if rule.output.inputs() != rule.hidden.outputs() || rule.output.outputs() != channels {
            return Err(LatticeError::shape(
                "nca output layer",
                format!("{}->{}", rule.hidden.outputs(), channels),
                format!("{}->{}", rule.output.inputs(), rule.output.outputs()),
            ));
        }
        Ok(rule)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_volumetric(&self) -> bool {
        self.volumetric
    }

    pub fn perception_channels(&self) -> usize {
        self.channels * if self.volumetric { 4 } else { 3 }
    }

    pub fn output_layer(&self) -> &Dense {
        &self.output
    }

    /// Two-layer perceptron over one perception vector.
    pub fn forward(&self, perception: &[f32]) -> Result<Vec<f32>> {
        let mut h = self.hidden.forward(perception)?;
        relu_in_place(&mut h);
        self.output.forward(&h)
    }

    /// Per-position delta for a whole grid.
    pub fn delta(&self, grid: &Grid) -> Result<Grid> {
        grid.ensure_channels(self.channels, "nca state")?;
        if grid.is_volumetric() != self.volumetric {
            return Err(LatticeError::shape(
                "nca lattice",
                if self.volumetric { "volumetric grid" } else { "planar grid" },
                grid.shape(),
            ));
        }
        let perception = perceive(grid);
        let mut delta = grid.zeros_like();
        if self.channels == 0 {
            return Ok(delta);
        }
        delta
            .as_mut_slice()
            .par_chunks_mut(self.channels)
            .enumerate()
            .try_for_each(|(p, dst)| -> Result<()> {
                let out = self.forward(perception.cell(p))?;
                dst.copy_from_slice(&out);
                Ok(())
            })?;
        Ok(delta)
    }
}
