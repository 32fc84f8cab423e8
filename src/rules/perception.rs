//! Gradient perception
//!
//! Per channel: a horizontal and vertical Sobel response under zero padding,
//! plus a central-difference depth gradient (edge padded) for volumetric
//! grids. Output channels are `[state, grad_x, grad_y]` (and `grad_z`).

use crate::grid::Grid;
use rayon::prelude::*;

/// Horizontal Sobel kernel, indexed `[dy + 1][dx + 1]`.
pub const SOBEL_X: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];

/// Vertical Sobel kernel (transpose of [`SOBEL_X`]).
pub const SOBEL_Y: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Channel multiplier of [`perceive`] for a grid.
pub fn perception_factor(grid: &Grid) -> usize {
    if grid.is_volumetric() {
        4
    } else {
        3
    }
}

/// Concatenate the state with its spatial gradients along the channel axis.
pub fn perceive(grid: &Grid) -> Grid {
    let c = grid.channels();
    let factor = perception_factor(grid);
    let mut out = Grid::zeros(grid.shape().with_channels(c * factor));
    let depth = grid.depth();
    if c == 0 {
        return out;
    }

    out.as_mut_slice()
        .par_chunks_mut(c * factor)
        .enumerate()
        .for_each(|(p, dst)| {
            let (y, x, z) = grid.coords(p);
            dst[..c].copy_from_slice(grid.cell(p));

            for dy in 0..3 {
                for dx in 0..3 {
                    let kx = SOBEL_X[dy][dx];
                    let ky = SOBEL_Y[dy][dx];
                    if kx == 0.0 && ky == 0.0 {
                        continue;
                    }
                    let Some(src) = grid.cell_padded(
                        y as isize + dy as isize - 1,
                        x as isize + dx as isize - 1,
                        z as isize,
                    ) else {
                        continue;
                    };
                    for ch in 0..c {
                        dst[c + ch] += kx * src[ch];
                        dst[2 * c + ch] += ky * src[ch];
                    }
                }
            }

            if factor == 4 {
                let prev = grid.cell(grid.position(y, x, z.saturating_sub(1)));
                let next = grid.cell(grid.position(y, x, (z + 1).min(depth - 1)));
                for ch in 0..c {
                    dst[3 * c + ch] = (next[ch] - prev[ch]) / 2.0;
                }
            }
        });
    out
}
