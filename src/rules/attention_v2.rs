//! Multi-head local attention CA with relative position bias
//!
//! Pre-norm Transformer block over the 3×3 neighborhood:
//!
//! ```text
//! x'  = x  + Attn(LayerNorm(x))
//! x'' = x' + MLP(LayerNorm(x'))
//! ```
//!
//! The returned delta is `Attn_out + MLP_out`, not `x''`, so the stochastic and
//! alive masking apply to it exactly as for the other variants. A learnable
//! per-slot, per-head bias is added to each key, restoring the directionality
//! that plain attention discards.

use super::attention::{gather_patch, CENTER_SLOT, SLOTS};
use super::layers::{dot, relu_in_place, softmax_in_place, Dense, LayerNorm};
use crate::error::{LatticeError, Result};
use crate::grid::Grid;
use rand::Rng;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Initial positional bias magnitude.
const POS_BIAS_INIT: f32 = 0.02;

/// Trained parameters of a [`MultiHeadAttentionRule`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiHeadParts {
    pub channels: usize,
    pub num_heads: usize,
    pub head_dim: usize,
    pub norm_attn: LayerNorm,
    pub norm_mlp: LayerNorm,
    /// `channels -> num_heads * head_dim`, heads contiguous.
    pub query: Dense,
    pub key: Dense,
    pub value: Dense,
    /// `[SLOTS][num_heads][head_dim]`, flattened.
    pub pos_bias: Vec<f32>,
    pub out_proj: Dense,
    pub mlp_hidden: Dense,
    pub mlp_out: Dense,
}

/// ViTCA-style multi-head attention rule.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiHeadAttentionRule {
    channels: usize,
    num_heads: usize,
    head_dim: usize,
    norm_attn: LayerNorm,
    norm_mlp: LayerNorm,
    query: Dense,
    key: Dense,
    value: Dense,
    /// `[SLOTS][num_heads][head_dim]`, flattened.
    pos_bias: Vec<f32>,
    out_proj: Dense,
    mlp_hidden: Dense,
    mlp_out: Dense,
}

impl MultiHeadAttentionRule {
    /// Fresh rule. Both residual branches end in zero layers, so the initial
    /// delta is zero.
    pub fn new<R: Rng + ?Sized>(
        channels: usize,
        num_heads: usize,
        head_dim: usize,
        hidden: usize,
        rng: &mut R,
    ) -> Self {
        let embed = num_heads * head_dim;
        let pos_bias = (0..SLOTS * embed)
            .map(|_| rng.gen_range(-POS_BIAS_INIT..=POS_BIAS_INIT))
            .collect();
        Self {
            channels,
            num_heads,
            head_dim,
            norm_attn: LayerNorm::new(channels),
            norm_mlp: LayerNorm::new(channels),
            query: Dense::xavier(channels, embed, rng),
            key: Dense::xavier(channels, embed, rng),
            value: Dense::xavier(channels, embed, rng),
            pos_bias,
            out_proj: Dense::zeros(embed, channels),
            mlp_hidden: Dense::xavier(channels, hidden, rng),
            mlp_out: Dense::zeros(hidden, channels),
        }
    }

    /// Build from trained parameters, shape-checking every part.
    pub fn from_parts(parts: MultiHeadParts) -> Result<Self> {
        let MultiHeadParts {
            channels,
            num_heads,
            head_dim,
            norm_attn,
            norm_mlp,
            query,
            key,
            value,
            pos_bias,
            out_proj,
            mlp_hidden,
            mlp_out,
        } = parts;
        let embed = num_heads * head_dim;
        for (name, norm) in [("attention norm", &norm_attn), ("mlp norm", &norm_mlp)] {
            if norm.dim() != channels {
                return Err(LatticeError::shape(name, channels, norm.dim()));
            }
        }
        check_layer("query projection", &query, channels, embed)?;
        check_layer("key projection", &key, channels, embed)?;
        check_layer("value projection", &value, channels, embed)?;
        check_layer("output projection", &out_proj, embed, channels)?;
        check_layer("mlp hidden", &mlp_hidden, channels, mlp_hidden.outputs())?;
        check_layer("mlp output", &mlp_out, mlp_hidden.outputs(), channels)?;
        if pos_bias.len() != SLOTS * embed {
            return Err(LatticeError::shape("positional bias", SLOTS * embed, pos_bias.len()));
        }
        Ok(Self {
            channels,
            num_heads,
            head_dim,
            norm_attn,
            norm_mlp,
            query,
            key,
            value,
            pos_bias,
            out_proj,
            mlp_hidden,
            mlp_out,
        })
    }

    /// Parameter bundle of this rule.
    pub fn to_parts(&self) -> MultiHeadParts {
        MultiHeadParts {
            channels: self.channels,
            num_heads: self.num_heads,
            head_dim: self.head_dim,
            norm_attn: self.norm_attn.clone(),
            norm_mlp: self.norm_mlp.clone(),
            query: self.query.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
            pos_bias: self.pos_bias.clone(),
            out_proj: self.out_proj.clone(),
            mlp_hidden: self.mlp_hidden.clone(),
            mlp_out: self.mlp_out.clone(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    fn embed(&self) -> usize {
        self.num_heads * self.head_dim
    }

    pub fn positional_bias(&self) -> &[f32] {
        &self.pos_bias
    }

    /// Replace the positional bias (`SLOTS * num_heads * head_dim` values).
    pub fn set_positional_bias(&mut self, bias: Vec<f32>) -> Result<()> {
        if bias.len() != SLOTS * self.embed() {
            return Err(LatticeError::shape("positional bias", SLOTS * self.embed(), bias.len()));
        }
        self.pos_bias = bias;
        Ok(())
    }

    /// Replace the attention output projection (`embed -> channels`).
    pub fn set_output_projection(&mut self, layer: Dense) -> Result<()> {
        check_layer("output projection", &layer, self.embed(), self.channels)?;
        self.out_proj = layer;
        Ok(())
    }

    /// Replace the MLP (`channels -> hidden -> channels`).
    pub fn set_mlp(&mut self, hidden: Dense, out: Dense) -> Result<()> {
        check_layer("mlp hidden", &hidden, self.channels, hidden.outputs())?;
        check_layer("mlp output", &out, hidden.outputs(), self.channels)?;
        self.mlp_hidden = hidden;
        self.mlp_out = out;
        Ok(())
    }

    /// First (pre-attention) layer norm of one cell.
    pub fn normalize(&self, cell: &[f32]) -> Result<Vec<f32>> {
        self.norm_attn.forward(cell)
    }

    /// Attention branch output (`channels` values) for a layer-normed patch.
    fn attention(&self, normed_patch: &[f32]) -> Result<Vec<f32>> {
        let c = self.channels;
        let (heads, d, embed) = (self.num_heads, self.head_dim, self.embed());
        let q = self.query.forward(&normed_patch[CENTER_SLOT * c..(CENTER_SLOT + 1) * c])?;

        let mut keys = Vec::with_capacity(SLOTS);
        let mut values = Vec::with_capacity(SLOTS);
        for (slot, x) in normed_patch.chunks_exact(c.max(1)).enumerate().take(SLOTS) {
            let mut k = self.key.forward(x)?;
            for (ki, b) in k.iter_mut().zip(&self.pos_bias[slot * embed..(slot + 1) * embed]) {
                *ki += b;
            }
            keys.push(k);
            values.push(self.value.forward(x)?);
        }

        let scale = 1.0 / (d.max(1) as f32).sqrt();
        let mut concat = vec![0.0; embed];
        for h in 0..heads {
            let span = h * d..(h + 1) * d;
            let mut scores = [0.0f32; SLOTS];
            for (s, k) in scores.iter_mut().zip(&keys) {
                *s = dot(&q[span.clone()], &k[span.clone()]) * scale;
            }
            softmax_in_place(&mut scores);
            for (a, v) in scores.iter().zip(&values) {
                for (o, vi) in concat[span.clone()].iter_mut().zip(&v[span.clone()]) {
                    *o += a * vi;
                }
            }
        }
        self.out_proj.forward(&concat)
    }

    /// Delta for the center of a patch; `normed_patch` is the same patch after
    /// the first layer norm.
    pub fn forward(&self, center: &[f32], normed_patch: &[f32]) -> Result<Vec<f32>> {
        let c = self.channels;
        if center.len() != c || normed_patch.len() != SLOTS * c {
            return Err(LatticeError::shape(
                "multi-head patch",
                format!("{c} + {}", SLOTS * c),
                format!("{} + {}", center.len(), normed_patch.len()),
            ));
        }
        let attn_out = self.attention(normed_patch)?;
        let residual: Vec<f32> = center.iter().zip(&attn_out).map(|(x, a)| x + a).collect();
        let mut h = self.mlp_hidden.forward(&self.norm_mlp.forward(&residual)?)?;
        relu_in_place(&mut h);
        let mlp_out = self.mlp_out.forward(&h)?;
        Ok(attn_out.iter().zip(&mlp_out).map(|(a, m)| a + m).collect())
    }

    /// Per-position delta for a whole grid.
    pub fn delta(&self, grid: &Grid) -> Result<Grid> {
        grid.ensure_channels(self.channels, "multi-head state")?;
        let c = self.channels;
        let mut normed = grid.zeros_like();
        let mut delta = grid.zeros_like();
        if c == 0 {
            return Ok(delta);
        }
        normed
            .as_mut_slice()
            .par_chunks_mut(c)
            .enumerate()
            .try_for_each(|(p, dst)| -> Result<()> {
                dst.copy_from_slice(&self.normalize(grid.cell(p))?);
                Ok(())
            })?;
        let normed = &normed;
        delta
            .as_mut_slice()
            .par_chunks_mut(c)
            .enumerate()
            .try_for_each(|(p, dst)| -> Result<()> {
                let out = self.forward(grid.cell(p), &gather_patch(normed, p))?;
                dst.copy_from_slice(&out);
                Ok(())
            })?;
        Ok(delta)
    }
}

fn check_layer(name: &'static str, layer: &Dense, inputs: usize, outputs: usize) -> Result<()> {
    if layer.inputs() != inputs || layer.outputs() != outputs {
        return Err(LatticeError::shape(
            name,
            format!("{inputs}->{outputs}"),
            format!("{}->{}", layer.inputs(), layer.outputs()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn textured(c: usize) -> Grid {
        let mut g = Grid::new(3, 3, c);
        for (i, v) in g.as_mut_slice().iter_mut().enumerate() {
            *v = ((i * 31 + 7) % 17) as f32 / 8.0 - 1.0;
        }
        g
    }

    fn mirror(g: &Grid) -> Grid {
        let mut m = g.zeros_like();
        for y in 0..g.height() {
            for x in 0..g.width() {
                for ch in 0..g.channels() {
                    m.set(y, g.width() - 1 - x, 0, ch, g.get(y, x, 0, ch));
                }
            }
        }
        m
    }

    #[test]
    fn test_fresh_rule_zero_delta() {
        let mut rng = StdRng::seed_from_u64(31);
        let rule = MultiHeadAttentionRule::new(8, 2, 4, 16, &mut rng);
        assert!(rule.delta(&textured(8)).unwrap().is_zero());
    }

    #[test]
    fn test_delta_is_sum_of_branches() {
        let mut rng = StdRng::seed_from_u64(32);
        let mut rule = MultiHeadAttentionRule::new(4, 2, 2, 8, &mut rng);
        let out = Dense::from_parts(4, 4, vec![0.0; 16], vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        rule.set_output_projection(out).unwrap();
        let mlp_hidden = Dense::xavier(4, 8, &mut rng);
        let mlp_out = Dense::from_parts(8, 4, vec![0.0; 32], vec![1.0; 4]).unwrap();
        rule.set_mlp(mlp_hidden, mlp_out).unwrap();

        let delta = rule.delta(&textured(4)).unwrap();
        for p in 0..delta.positions() {
            let c = delta.cell(p);
            for (v, expected) in c.iter().zip([1.1, 1.2, 1.3, 1.4]) {
                assert!((v - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_positional_bias_breaks_mirror_symmetry() {
        let mut rng = StdRng::seed_from_u64(33);
        let mut rule = MultiHeadAttentionRule::new(4, 2, 2, 8, &mut rng);
        rule.set_output_projection(Dense::xavier(4, 4, &mut rng)).unwrap();
        let bias: Vec<f32> = (0..SLOTS * 4).map(|i| (i % SLOTS) as f32 - 4.0).collect();
        rule.set_positional_bias(bias).unwrap();

        let g = textured(4);
        let a = rule.delta(&g).unwrap();
        let b = rule.delta(&mirror(&g)).unwrap();
        let center = g.position(1, 1, 0);
        let diff: f32 = a
            .cell(center)
            .iter()
            .zip(b.cell(center))
            .map(|(x, y)| (x - y).abs())
            .sum();
        assert!(diff > 1e-6);
    }

    #[test]
    fn test_from_parts_round_trip() {
        let mut rng = StdRng::seed_from_u64(35);
        let rule = MultiHeadAttentionRule::new(4, 2, 2, 8, &mut rng);
        assert_eq!(MultiHeadAttentionRule::from_parts(rule.to_parts()).unwrap(), rule);

        let mut bad = rule.to_parts();
        bad.query = Dense::zeros(4, 3);
        assert!(MultiHeadAttentionRule::from_parts(bad).is_err());
        let mut bad = rule.to_parts();
        bad.norm_mlp = LayerNorm::new(3);
        assert!(MultiHeadAttentionRule::from_parts(bad).is_err());
        let mut bad = rule.to_parts();
        bad.pos_bias.pop();
        assert!(MultiHeadAttentionRule::from_parts(bad).is_err());
    }

    #[test]
    fn test_layer_norm_affine_changes_delta() {
        let mut rng = StdRng::seed_from_u64(36);
        let mut parts = MultiHeadAttentionRule::new(4, 2, 2, 8, &mut rng).to_parts();
        parts.out_proj = Dense::xavier(4, 4, &mut rng);
        parts.mlp_out = Dense::xavier(8, 4, &mut rng);
        let identity = MultiHeadAttentionRule::from_parts(parts.clone()).unwrap();

        parts.norm_attn =
            LayerNorm::from_parts(vec![2.0, 0.5, 1.5, 1.0], vec![0.3, -0.2, 0.0, 0.1], 1e-5)
                .unwrap();
        parts.norm_mlp = LayerNorm::from_parts(vec![1.0; 4], vec![0.5; 4], 1e-5).unwrap();
        let affine = MultiHeadAttentionRule::from_parts(parts).unwrap();

        let g = textured(4);
        let a = identity.delta(&g).unwrap();
        let b = affine.delta(&g).unwrap();
        let diff: f32 = a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .map(|(x, y)| (x - y).abs())
            .sum();
        assert!(diff > 1e-4);
    }

    #[test]
    fn test_shape_errors() {
        let mut rng = StdRng::seed_from_u64(34);
        let mut rule = MultiHeadAttentionRule::new(4, 2, 2, 8, &mut rng);
        assert!(rule.delta(&Grid::new(3, 3, 3)).is_err());
        assert!(rule.set_positional_bias(vec![0.0; 5]).is_err());
        assert!(rule.set_output_projection(Dense::zeros(3, 4)).is_err());
        assert!(rule.forward(&[0.0; 4], &[0.0; 10]).is_err());
    }
}
