//! Grid - dense float tensor for perception and update rules
//!
//! Layout is `[Height, Width, Channels]` for planar lattices and
//! `[Height, Width, Depth, Channels]` for volumetric ones, row-major with
//! channels innermost. A planar grid is stored with depth 1.
//!
//! Channel layout for the classic rule: `0..3` visible signal, `3` alpha
//! (aliveness), `4..C` hidden state.

use crate::error::{LatticeError, Result};
use rand::Rng;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index of the aliveness channel.
pub const ALPHA_CHANNEL: usize = 3;

/// Default aliveness threshold for the alive mask.
pub const ALIVE_THRESHOLD: f32 = 0.1;

/// Tensor shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridShape {
    pub height: usize,
    pub width: usize,
    /// `None` for planar grids.
    pub depth: Option<usize>,
    pub channels: usize,
}

impl GridShape {
    /// Number of spatial positions.
    pub fn positions(&self) -> usize {
        self.height * self.width * self.depth.unwrap_or(1)
    }

    pub fn with_channels(self, channels: usize) -> Self {
        Self { channels, ..self }
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.depth {
            Some(d) => write!(f, "[{}, {}, {}, {}]", self.height, self.width, d, self.channels),
            None => write!(f, "[{}, {}, {}]", self.height, self.width, self.channels),
        }
    }
}

/// Dense float grid.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Grid {
    shape: GridShape,
    data: Vec<f32>,
}

impl Grid {
    /// Zero planar grid `[h, w, c]`.
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self::zeros(GridShape {
            height,
            width,
            depth: None,
            channels,
        })
    }

    /// Zero volumetric grid `[h, w, d, c]`.
    pub fn new_3d(height: usize, width: usize, depth: usize, channels: usize) -> Self {
        Self::zeros(GridShape {
            height,
            width,
            depth: Some(depth),
            channels,
        })
    }

    pub fn zeros(shape: GridShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.positions() * shape.channels],
        }
    }

    /// Wrap existing data; length must match the shape.
    pub fn from_vec(shape: GridShape, data: Vec<f32>) -> Result<Self> {
        let expected = shape.positions() * shape.channels;
        if data.len() != expected {
            return Err(LatticeError::shape("grid data", expected, data.len()));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape)
    }

    // =========================================================================
    // SHAPE
    // =========================================================================

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn height(&self) -> usize {
        self.shape.height
    }

    pub fn width(&self) -> usize {
        self.shape.width
    }

    /// Depth (1 for planar grids).
    pub fn depth(&self) -> usize {
        self.shape.depth.unwrap_or(1)
    }

    pub fn channels(&self) -> usize {
        self.shape.channels
    }

    pub fn is_volumetric(&self) -> bool {
        self.shape.depth.is_some()
    }

    pub fn positions(&self) -> usize {
        self.shape.positions()
    }

    /// Error unless `other` has the same shape.
    pub fn ensure_same_shape(&self, other: &Grid, context: &'static str) -> Result<()> {
        if self.shape != other.shape {
            return Err(LatticeError::shape(context, self.shape, other.shape));
        }
        Ok(())
    }

    /// Error unless the grid has exactly `channels` channels.
    pub fn ensure_channels(&self, channels: usize, context: &'static str) -> Result<()> {
        if self.shape.channels != channels {
            return Err(LatticeError::shape(
                context,
                self.shape.with_channels(channels),
                self.shape,
            ));
        }
        Ok(())
    }

    // =========================================================================
    // ACCESS
    // =========================================================================

    /// True when `(y, x, z)` lies inside the grid.
    #[inline]
    pub fn contains(&self, y: usize, x: usize, z: usize) -> bool {
        y < self.shape.height && x < self.shape.width && z < self.depth()
    }

    /// Linear position of `(y, x, z)`.
    ///
    /// Coordinates must be in range; see [`Grid::checked_position`].
    #[inline]
    pub fn position(&self, y: usize, x: usize, z: usize) -> usize {
        debug_assert!(self.contains(y, x, z), "({y}, {x}, {z}) outside {}", self.shape);
        (y * self.shape.width + x) * self.depth() + z
    }

    /// Linear position of `(y, x, z)`, or an error when out of range.
    pub fn checked_position(&self, y: usize, x: usize, z: usize) -> Result<usize> {
        if !self.contains(y, x, z) {
            return Err(LatticeError::shape(
                "grid coordinate",
                self.shape,
                format!("({y}, {x}, {z})"),
            ));
        }
        Ok((y * self.shape.width + x) * self.depth() + z)
    }

    fn checked_index(&self, y: usize, x: usize, z: usize, ch: usize) -> Result<usize> {
        let p = self.checked_position(y, x, z)?;
        if ch >= self.shape.channels {
            return Err(LatticeError::shape("grid channel", self.shape.channels, ch));
        }
        Ok(p * self.shape.channels + ch)
    }

    /// `(y, x, z)` of a linear position.
    #[inline]
    pub fn coords(&self, position: usize) -> (usize, usize, usize) {
        let d = self.depth();
        let z = position % d;
        let x = (position / d) % self.shape.width;
        let y = position / (d * self.shape.width);
        (y, x, z)
    }

    #[inline]
    pub fn get(&self, y: usize, x: usize, z: usize, ch: usize) -> f32 {
        debug_assert!(ch < self.shape.channels);
        self.data[self.position(y, x, z) * self.shape.channels + ch]
    }

    #[inline]
    pub fn set(&mut self, y: usize, x: usize, z: usize, ch: usize, value: f32) {
        debug_assert!(ch < self.shape.channels);
        let i = self.position(y, x, z) * self.shape.channels + ch;
        self.data[i] = value;
    }

    /// Bounds-checked [`Grid::get`].
    pub fn try_get(&self, y: usize, x: usize, z: usize, ch: usize) -> Result<f32> {
        Ok(self.data[self.checked_index(y, x, z, ch)?])
    }

    /// Bounds-checked [`Grid::set`].
    pub fn try_set(&mut self, y: usize, x: usize, z: usize, ch: usize, value: f32) -> Result<()> {
        let i = self.checked_index(y, x, z, ch)?;
        self.data[i] = value;
        Ok(())
    }

    /// Channel vector at a linear position.
    #[inline]
    pub fn cell(&self, position: usize) -> &[f32] {
        let c = self.shape.channels;
        &self.data[position * c..(position + 1) * c]
    }

    #[inline]
    pub fn cell_mut(&mut self, position: usize) -> &mut [f32] {
        let c = self.shape.channels;
        &mut self.data[position * c..(position + 1) * c]
    }

    /// Channel vector at `(y, x, z)`, `None` outside the grid (zero padding).
    #[inline]
    pub fn cell_padded(&self, y: isize, x: isize, z: isize) -> Option<&[f32]> {
        if y < 0
            || x < 0
            || z < 0
            || y as usize >= self.shape.height
            || x as usize >= self.shape.width
            || z as usize >= self.depth()
        {
            return None;
        }
        Some(self.cell(self.position(y as usize, x as usize, z as usize)))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    pub fn max_abs(&self) -> f32 {
        self.data.iter().map(|v| v.abs()).fold(0.0f32, f32::max)
    }

    pub fn non_zero_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0.0).count()
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Positions with any non-zero channel.
    pub fn live_positions(&self) -> Vec<usize> {
        (0..self.positions())
            .filter(|&p| self.cell(p).iter().any(|&v| v != 0.0))
            .collect()
    }

    // =========================================================================
    // MASKING
    // =========================================================================

    /// Alive mask: a position survives iff the max of `alpha_channel` over
    /// its 3×3 (3×3×3 for volumetric grids) window exceeds `threshold`.
    pub fn alive_mask(&self, alpha_channel: usize, threshold: f32) -> Result<Vec<bool>> {
        if alpha_channel >= self.shape.channels {
            return Err(LatticeError::shape(
                "alive mask",
                format!("> {alpha_channel} channels"),
                self.shape.channels,
            ));
        }
        let dz: isize = if self.is_volumetric() { 1 } else { 0 };
        Ok((0..self.positions())
            .map(|p| {
                let (y, x, z) = self.coords(p);
                let mut peak = f32::NEG_INFINITY;
                for oz in -dz..=dz {
                    for oy in -1..=1isize {
                        for ox in -1..=1isize {
                            if let Some(v) =
                                self.cell_padded(y as isize + oy, x as isize + ox, z as isize + oz)
                            {
                                peak = peak.max(v[alpha_channel]);
                            }
                        }
                    }
                }
                peak > threshold
            })
            .collect())
    }

    /// Zero every channel of positions whose mask entry is false.
    pub fn apply_mask(&mut self, mask: &[bool]) -> Result<()> {
        if mask.len() != self.positions() {
            return Err(LatticeError::shape("mask", self.positions(), mask.len()));
        }
        for (p, &alive) in mask.iter().enumerate() {
            if !alive {
                self.cell_mut(p).fill(0.0);
            }
        }
        Ok(())
    }

    /// Apply the alive mask in place with the default alpha channel.
    pub fn mask_dead(&mut self, threshold: f32) -> Result<()> {
        let mask = self.alive_mask(ALPHA_CHANNEL, threshold)?;
        self.apply_mask(&mask)
    }

    /// Add `delta` where a per-position uniform draw is below `update_probability`.
    ///
    /// One draw per position, broadcast across channels.
    pub fn stochastic_update<R: Rng + ?Sized>(
        &self,
        delta: &Grid,
        update_probability: f32,
        rng: &mut R,
    ) -> Result<Grid> {
        self.ensure_same_shape(delta, "stochastic update")?;
        let mut out = self.clone();
        for p in 0..self.positions() {
            let r: f32 = rng.gen();
            if r < update_probability {
                for (v, d) in out.cell_mut(p).iter_mut().zip(delta.cell(p)) {
                    *v += d;
                }
            }
        }
        Ok(out)
    }
}
