//! Single-head local attention CA
//!
//! Each cell attends over its 3×3 in-plane neighborhood (self included, zero
//! padded). The center projects the query; all nine slots project keys and
//! values. No positional term is added, so the result is invariant to any
//! permutation of the neighbors. Volumetric grids are processed plane by plane.

use super::layers::{dot, relu_in_place, softmax_in_place, Dense};
use crate::error::{LatticeError, Result};
use crate::grid::Grid;
use rand::Rng;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Neighborhood slots per cell (3×3 including self).
pub const SLOTS: usize = 9;

/// Index of the cell itself within a patch.
pub const CENTER_SLOT: usize = 4;

/// The 3×3 in-plane patch around a position, row-major, zero padded.
pub(crate) fn gather_patch(grid: &Grid, position: usize) -> Vec<f32> {
    let c = grid.channels();
    let (y, x, z) = grid.coords(position);
    let mut patch = vec![0.0; SLOTS * c];
    for (slot, dst) in patch.chunks_exact_mut(c.max(1)).enumerate().take(SLOTS) {
        let dy = (slot / 3) as isize - 1;
        let dx = (slot % 3) as isize - 1;
        if let Some(src) = grid.cell_padded(y as isize + dy, x as isize + dx, z as isize) {
            dst.copy_from_slice(src);
        }
    }
    patch
}

/// ViTCA-style single-head local attention rule.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AttentionRule {
    channels: usize,
    head_dim: usize,
    query: Dense,
    key: Dense,
    value: Dense,
    mlp_hidden: Dense,
    mlp_out: Dense,
}

impl AttentionRule {
    /// Fresh rule: Xavier projections, zero final MLP layer.
    pub fn new<R: Rng + ?Sized>(channels: usize, head_dim: usize, hidden: usize, rng: &mut R) -> Self {
        Self {
            channels,
            head_dim,
            query: Dense::xavier(channels, head_dim, rng),
            key: Dense::xavier(channels, head_dim, rng),
            value: Dense::xavier(channels, head_dim, rng),
            mlp_hidden: Dense::xavier(head_dim, hidden, rng),
            mlp_out: Dense::zeros(hidden, channels),
        }
    }

    /// Build from trained layers.
    pub fn from_parts(
        channels: usize,
        query: Dense,
        key: Dense,
        value: Dense,
        mlp_hidden: Dense,
        mlp_out: Dense,
    ) -> Result<Self> {
        let head_dim = query.outputs();
        for (name, layer, inputs, outputs) in [
            ("attention query", &query, channels, head_dim),
            ("attention key", &key, channels, head_dim),
            ("attention value", &value, channels, head_dim),
            ("attention mlp", &mlp_hidden, head_dim, mlp_hidden.outputs()),
            ("attention output", &mlp_out, mlp_hidden.outputs(), channels),
        ] {
            if layer.inputs() != inputs || layer.outputs() != outputs {
                return Err(LatticeError::shape(
                    name,
                    format!("{inputs}->{outputs}"),
                    format!("{}->{}", layer.inputs(), layer.outputs()),
                ));
            }
        }
        Ok(Self {
            channels,
            head_dim,
            query,
            key,
            value,
            mlp_hidden,
            mlp_out,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Scaled dot-product attention of the center over a gathered patch.
    pub fn attend(&self, patch: &[f32]) -> Result<Vec<f32>> {
        let c = self.channels;
        if patch.len() != SLOTS * c {
            return Err(LatticeError::shape("attention patch", SLOTS * c, patch.len()));
        }
        let q = self.query.forward(&patch[CENTER_SLOT * c..(CENTER_SLOT + 1) * c])?;
        let scale = 1.0 / (self.head_dim.max(1) as f32).sqrt();
        let mut scores = [0.0f32; SLOTS];
        let mut values = Vec::with_capacity(SLOTS);
        for (slot, x) in patch.chunks_exact(c.max(1)).enumerate().take(SLOTS) {
            let k = self.key.forward(x)?;
            scores[slot] = dot(&q, &k) * scale;
            values.push(self.value.forward(x)?);
        }
        softmax_in_place(&mut scores);
        let mut out = vec![0.0; self.head_dim];
        for (a, v) in scores.iter().zip(&values) {
            for (o, vi) in out.iter_mut().zip(v) {
                *o += a * vi;
            }
        }
        Ok(out)
    }

    /// Delta for one gathered patch.
    pub fn forward(&self, patch: &[f32]) -> Result<Vec<f32>> {
        let attended = self.attend(patch)?;
        let mut h = self.mlp_hidden.forward(&attended)?;
        relu_in_place(&mut h);
        self.mlp_out.forward(&h)
    }

    /// Per-position delta for a whole grid.
    pub fn delta(&self, grid: &Grid) -> Result<Grid> {
        grid.ensure_channels(self.channels, "attention state")?;
        let mut delta = grid.zeros_like();
        if self.channels == 0 {
            return Ok(delta);
        }
        delta
            .as_mut_slice()
            .par_chunks_mut(self.channels)
            .enumerate()
            .try_for_each(|(p, dst)| -> Result<()> {
                let out = self.forward(&gather_patch(grid, p))?;
                dst.copy_from_slice(&out);
                Ok(())
            })?;
        Ok(delta)
    }
}
