//! Error types for lattice operations.
//!
//! Shape and domain errors are always surfaced to the caller. Range violations
//! on bounded cell metrics are clamped at the point of write and never appear here.

use crate::coord::{Bounds, Coord};

/// Errors raised by the lattice core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LatticeError {
    /// Tensor or parameter dimensions disagree.
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    /// Integer outside the balanced ternary digit set.
    #[error("Invalid ternary value: {0}")]
    InvalidTernary(i64),

    /// Gate name that does not resolve to a known reversible gate.
    #[error("Unknown gate: {0}")]
    UnknownGate(String),

    /// Wrong number of inputs (or wires) for a gate.
    #[error("Gate {gate} expects {expected} inputs, got {actual}")]
    Arity {
        gate: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Wire index outside the state vector of a composite rule.
    #[error("Wire {wire} out of range for state of width {width}")]
    WireOutOfRange { wire: usize, width: usize },

    /// Coordinate outside the declared lattice bounds.
    #[error("Coordinate {coord} outside bounds {bounds}")]
    OutOfBounds { coord: Coord, bounds: Bounds },

    /// No cell has been created at the coordinate.
    #[error("No cell at {0}")]
    MissingCell(Coord),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl LatticeError {
    /// Build a shape mismatch from anything printable.
    pub fn shape(
        context: &'static str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type for lattice operations.
pub type Result<T> = std::result::Result<T, LatticeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_message() {
        let err = LatticeError::shape("perceive", "[5, 5, 16]", "[5, 5, 8]");
        assert_eq!(
            err.to_string(),
            "Shape mismatch in perceive: expected [5, 5, 16], got [5, 5, 8]"
        );
    }

    #[test]
    fn test_out_of_bounds_message() {
        let err = LatticeError::OutOfBounds {
            coord: Coord::new(4, 0, 0),
            bounds: Bounds::new(4, 4, 1),
        };
        assert_eq!(
            err.to_string(),
            "Coordinate (4, 0, 0) outside bounds 4x4x1"
        );
    }
}
