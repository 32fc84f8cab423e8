//! Lattice coordinates, bounds and neighborhood policies

use crate::error::{LatticeError, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lattice position. Stable key into any cell collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Coordinate shifted by an offset.
    #[inline]
    pub fn offset(self, (dx, dy, dz): (i32, i32, i32)) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl From<(i32, i32, i32)> for Coord {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Declared lattice extent `(X, Y, Z)`; valid coordinates are `0..X` etc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Bounds {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of positions.
    pub fn volume(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    #[inline]
    pub fn contains(&self, c: Coord) -> bool {
        c.x >= 0
            && c.y >= 0
            && c.z >= 0
            && (c.x as u32) < self.x
            && (c.y as u32) < self.y
            && (c.z as u32) < self.z
    }

    /// Error unless `c` is inside the bounds.
    pub fn check(&self, c: Coord) -> Result<()> {
        if self.contains(c) {
            Ok(())
        } else {
            Err(LatticeError::OutOfBounds {
                coord: c,
                bounds: *self,
            })
        }
    }

    /// Dense linear index (x fastest, then y, then z).
    pub fn index(&self, c: Coord) -> Result<usize> {
        self.check(c)?;
        Ok((c.z as usize * self.y as usize + c.y as usize) * self.x as usize + c.x as usize)
    }

    /// Inverse of [`Bounds::index`].
    pub fn coord(&self, index: usize) -> Coord {
        let (x, y) = (self.x as usize, self.y as usize);
        Coord::new(
            (index % x) as i32,
            ((index / x) % y) as i32,
            (index / (x * y)) as i32,
        )
    }

    /// All coordinates in index order.
    pub fn iter(&self) -> impl Iterator<Item = Coord> + '_ {
        (0..self.volume()).map(move |i| self.coord(i))
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// How a cell's neighborhood is derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NeighborhoodPolicy {
    /// Six face-adjacent cells.
    VonNeumann,
    /// Twenty-six cells of the surrounding cube.
    #[default]
    Moore,
    /// Every cell of the `(2r+1)^3` cube except the center.
    ExtendedMoore { radius: u32 },
}

impl NeighborhoodPolicy {
    /// Relative offsets, center excluded, in a fixed order.
    pub fn offsets(&self) -> Vec<(i32, i32, i32)> {
        match *self {
            NeighborhoodPolicy::VonNeumann => vec![
                (-1, 0, 0),
                (1, 0, 0),
                (0, -1, 0),
                (0, 1, 0),
                (0, 0, -1),
                (0, 0, 1),
            ],
            NeighborhoodPolicy::Moore => cube_offsets(1),
            NeighborhoodPolicy::ExtendedMoore { radius } => cube_offsets(radius as i32),
        }
    }

    /// Neighbor coordinates of `center` that fall inside `bounds`.
    pub fn neighbors(&self, center: Coord, bounds: &Bounds) -> Vec<Coord> {
        self.offsets()
            .into_iter()
            .map(|o| center.offset(o))
            .filter(|c| bounds.contains(*c))
            .collect()
    }
}

fn cube_offsets(r: i32) -> Vec<(i32, i32, i32)> {
    let mut out = Vec::with_capacity(((2 * r + 1).pow(3) - 1).max(0) as usize);
    for dz in -r..=r {
        for dy in -r..=r {
            for dx in -r..=r {
                if (dx, dy, dz) != (0, 0, 0) {
                    out.push((dx, dy, dz));
                }
            }
        }
    }
    out
}
