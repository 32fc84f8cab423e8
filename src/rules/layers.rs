//! Dense layers and normalization shared by the rule variants

use crate::error::{LatticeError, Result};
use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default layer-norm epsilon.
pub const LAYER_NORM_EPS: f32 = 1e-5;

/// Fully connected layer `y = W x + b`, weights row-major `[outputs, inputs]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dense {
    inputs: usize,
    outputs: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    /// All-zero weights and bias.
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            weights: vec![0.0; inputs * outputs],
            bias: vec![0.0; outputs],
        }
    }

    /// Xavier/Glorot uniform weights, zero bias.
    pub fn xavier<R: Rng + ?Sized>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (inputs + outputs).max(1) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range(-limit..=limit))
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            bias: vec![0.0; outputs],
        }
    }

    /// Build from explicit parameters.
    pub fn from_parts(inputs: usize, outputs: usize, weights: Vec<f32>, bias: Vec<f32>) -> Result<Self> {
        if weights.len() != inputs * outputs {
            return Err(LatticeError::shape("dense weights", inputs * outputs, weights.len()));
        }
        if bias.len() != outputs {
            return Err(LatticeError::shape("dense bias", outputs, bias.len()));
        }
        Ok(Self {
            inputs,
            outputs,
            weights,
            bias,
        })
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// True when every weight and bias is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.weights.iter().chain(&self.bias).all(|&v| v == 0.0)
    }

    /// Forward pass into a fresh vector.
    pub fn forward(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.inputs {
            return Err(LatticeError::shape("dense input", self.inputs, x.len()));
        }
        if self.inputs == 0 {
            return Ok(self.bias.clone());
        }
        Ok(self
            .weights
            .chunks_exact(self.inputs)
            .take(self.outputs)
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect())
    }
}

/// Per-channel affine layer normalization.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerNorm {
    gamma: Vec<f32>,
    beta: Vec<f32>,
    eps: f32,
}

impl LayerNorm {
    /// Identity affine (`γ = 1`, `β = 0`).
    pub fn new(dim: usize) -> Self {
        Self {
            gamma: vec![1.0; dim],
            beta: vec![0.0; dim],
            eps: LAYER_NORM_EPS,
        }
    }

    /// Build from trained affine parameters.
    pub fn from_parts(gamma: Vec<f32>, beta: Vec<f32>, eps: f32) -> Result<Self> {
        if beta.len() != gamma.len() {
            return Err(LatticeError::shape("layer norm beta", gamma.len(), beta.len()));
        }
        if !(eps > 0.0 && eps.is_finite()) {
            return Err(LatticeError::InvalidConfig("layer norm eps must be positive"));
        }
        Ok(Self { gamma, beta, eps })
    }

    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    pub fn gamma(&self) -> &[f32] {
        &self.gamma
    }

    pub fn beta(&self) -> &[f32] {
        &self.beta
    }

    /// `(x - mean) / sqrt(var + ε) · γ + β`, statistics over the whole vector.
    pub fn forward(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.dim() {
            return Err(LatticeError::shape("layer norm", self.dim(), x.len()));
        }
        if x.is_empty() {
            return Ok(Vec::new());
        }
        let n = x.len() as f32;
        let mean = x.iter().sum::<f32>() / n;
        let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        let inv = 1.0 / (var + self.eps).sqrt();
        Ok(x.iter()
            .zip(self.gamma.iter().zip(&self.beta))
            .map(|(v, (g, b))| (v - mean) * inv * g + b)
            .collect())
    }
}

pub fn relu_in_place(x: &mut [f32]) {
    for v in x {
        *v = v.max(0.0);
    }
}

/// Numerically stable softmax.
pub fn softmax_in_place(x: &mut [f32]) {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return;
    }
    let mut sum = 0.0;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in x.iter_mut() {
        *v /= sum;
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_dense_forward() {
        let d = Dense::from_parts(2, 2, vec![1.0, 2.0, 3.0, 4.0], vec![0.5, -0.5]).unwrap();
        assert_eq!(d.forward(&[1.0, 1.0]).unwrap(), vec![3.5, 6.5]);
        assert!(d.forward(&[1.0]).is_err());
        assert!(Dense::from_parts(2, 2, vec![0.0; 3], vec![0.0; 2]).is_err());
    }

    #[test]
    fn test_xavier_limits() {
        let mut rng = StdRng::seed_from_u64(3);
        let d = Dense::xavier(10, 14, &mut rng);
        let limit = (6.0f32 / 24.0).sqrt();
        assert!(d.weights().iter().all(|w| w.abs() <= limit));
        assert!(!d.is_zero());
        assert!(d.bias().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_layer_norm_statistics() {
        let ln = LayerNorm::new(4);
        let y = ln.forward(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mean: f32 = y.iter().sum::<f32>() / 4.0;
        let var: f32 = y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_layer_norm_affine() {
        let ln = LayerNorm::from_parts(vec![2.0, 2.0], vec![1.0, -1.0], LAYER_NORM_EPS).unwrap();
        let y = ln.forward(&[0.0, 2.0]).unwrap();
        assert!((y[0] - (1.0 - 2.0)).abs() < 1e-3);
        assert!((y[1] - (-1.0 + 2.0)).abs() < 1e-3);
        assert!(LayerNorm::from_parts(vec![1.0; 3], vec![0.0; 2], LAYER_NORM_EPS).is_err());
        assert!(LayerNorm::from_parts(vec![1.0; 2], vec![0.0; 2], 0.0).is_err());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut x = [1.0, 2.0, 3.0, 1000.0];
        softmax_in_place(&mut x);
        assert!((x.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(x[3] > 0.99);
    }
}
