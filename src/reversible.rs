//! Reversible rule engine
//!
//! Gate dispatch with inverse descriptors, second-order (history) stepping,
//! Margolus block partitioning, wired rule composition and entropy accounting.
//!
//! Every gate here is an involution, so the inverse of an application is the
//! same gate applied to its output.

use crate::error::{LatticeError, Result};
use crate::ternary::{feynman, fredkin, toffoli, Ternary};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Self-inverse reversible gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Gate {
    /// Controlled modular negation (CNOT analogue), arity 2.
    Feynman,
    /// Doubly-controlled negation (CCNOT analogue), arity 3.
    Toffoli,
    /// Controlled swap (CSWAP analogue), arity 3.
    Fredkin,
}

impl Gate {
    pub const ALL: [Gate; 3] = [Gate::Feynman, Gate::Toffoli, Gate::Fredkin];

    /// Number of inputs (and outputs).
    pub fn arity(self) -> usize {
        match self {
            Gate::Feynman => 2,
            Gate::Toffoli | Gate::Fredkin => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Gate::Feynman => "feynman",
            Gate::Toffoli => "toffoli",
            Gate::Fredkin => "fredkin",
        }
    }

    /// Apply the gate to exactly `arity()` inputs.
    pub fn apply(self, inputs: &[Ternary]) -> Result<Vec<Ternary>> {
        if inputs.len() != self.arity() {
            return Err(LatticeError::Arity {
                gate: self.name(),
                expected: self.arity(),
                actual: inputs.len(),
            });
        }
        Ok(match self {
            Gate::Feynman => {
                let (c, t) = feynman(inputs[0], inputs[1]);
                vec![c, t]
            }
            Gate::Toffoli => {
                let (a, b, c) = toffoli(inputs[0], inputs[1], inputs[2]);
                vec![a, b, c]
            }
            Gate::Fredkin => {
                let (a, b, c) = fredkin(inputs[0], inputs[1], inputs[2]);
                vec![a, b, c]
            }
        })
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Gate {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "feynman" | "cnot" => Ok(Gate::Feynman),
            "toffoli" | "ccnot" => Ok(Gate::Toffoli),
            "fredkin" | "cswap" => Ok(Gate::Fredkin),
            _ => Err(LatticeError::UnknownGate(s.to_string())),
        }
    }
}

/// What is needed to undo one gate application.
///
/// `wires[i]` is the state index that fed gate input `i`; `result` is the full
/// state after the application.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InverseDescriptor {
    pub gate: Gate,
    pub wires: Vec<usize>,
    pub result: Vec<Ternary>,
}

/// Apply `gate` to `inputs` (all wires, in order).
pub fn apply_rule(gate: Gate, inputs: &[Ternary]) -> Result<(Vec<Ternary>, InverseDescriptor)> {
    let result = gate.apply(inputs)?;
    let descriptor = InverseDescriptor {
        gate,
        wires: (0..inputs.len()).collect(),
        result: result.clone(),
    };
    Ok((result, descriptor))
}

/// Recover the state that preceded the described application.
pub fn apply_inverse(descriptor: &InverseDescriptor) -> Result<Vec<Ternary>> {
    apply_wired(descriptor.gate, &descriptor.wires, &descriptor.result)
}

fn apply_wired(gate: Gate, wires: &[usize], state: &[Ternary]) -> Result<Vec<Ternary>> {
    let mut inputs = Vec::with_capacity(wires.len());
    for &w in wires {
        let v = state.get(w).ok_or(LatticeError::WireOutOfRange {
            wire: w,
            width: state.len(),
        })?;
        inputs.push(*v);
    }
    let outputs = gate.apply(&inputs)?;
    let mut next = state.to_vec();
    for (&w, v) in wires.iter().zip(outputs) {
        next[w] = v;
    }
    Ok(next)
}

/// Exhaustive bijectivity check over all `3^arity` input tuples.
///
/// Design/test oracle; not meant for a hot path.
pub fn is_reversible<F>(arity: usize, rule: F) -> bool
where
    F: Fn(&[Ternary]) -> Vec<Ternary>,
{
    let inputs = enumerate_inputs(arity);
    let mut seen = HashSet::with_capacity(inputs.len());
    for input in &inputs {
        let out = rule(input);
        if out.len() != arity || !seen.insert(out) {
            return false;
        }
    }
    true
}

/// Every ternary tuple of the given length, in lexicographic order.
pub fn enumerate_inputs(arity: usize) -> Vec<Vec<Ternary>> {
    let mut all = vec![Vec::with_capacity(arity)];
    for _ in 0..arity {
        all = all
            .into_iter()
            .flat_map(|prefix| {
                Ternary::ALL.into_iter().map(move |t| {
                    let mut next = prefix.clone();
                    next.push(t);
                    next
                })
            })
            .collect();
    }
    all
}

// =============================================================================
// SECOND-ORDER STEPPING
// =============================================================================

/// One second-order step: `(f(neighbors) ⊖ previous, current)`.
///
/// Turns any neighbor-combination rule into a reversible one at the cost of
/// one retained timestep.
pub fn second_order_step<F>(
    rule: F,
    neighbors: &[Ternary],
    current: Ternary,
    previous: Ternary,
) -> (Ternary, Ternary)
where
    F: Fn(&[Ternary]) -> Ternary,
{
    (rule(neighbors).sub(previous), current)
}

/// Inverse of [`second_order_step`].
///
/// `neighbors` must be the neighbor values the forward step saw.
pub fn second_order_unstep<F>(
    rule: F,
    neighbors: &[Ternary],
    current: Ternary,
    previous: Ternary,
) -> (Ternary, Ternary)
where
    F: Fn(&[Ternary]) -> Ternary,
{
    (previous, rule(neighbors).sub(current))
}

/// Toroidal 2-D ternary field with second-order history.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SecondOrderField {
    width: usize,
    height: usize,
    current: Vec<Ternary>,
    previous: Vec<Ternary>,
}

impl SecondOrderField {
    pub fn new(width: usize, height: usize, current: Vec<Ternary>, previous: Vec<Ternary>) -> Result<Self> {
        let n = width * height;
        if current.len() != n || previous.len() != n {
            return Err(LatticeError::shape(
                "second-order field",
                n,
                format!("{}/{}", current.len(), previous.len()),
            ));
        }
        Ok(Self {
            width,
            height,
            current,
            previous,
        })
    }

    pub fn current(&self) -> &[Ternary] {
        &self.current
    }

    pub fn previous(&self) -> &[Ternary] {
        &self.previous
    }

    fn von_neumann(&self, state: &[Ternary], i: usize) -> [Ternary; 4] {
        let (x, y) = (i % self.width, i / self.width);
        let (w, h) = (self.width, self.height);
        [
            state[y * w + (x + w - 1) % w],
            state[y * w + (x + 1) % w],
            state[((y + h - 1) % h) * w + x],
            state[((y + 1) % h) * w + x],
        ]
    }

    /// Advance every cell against the same snapshot of `current`.
    pub fn step<F>(&mut self, rule: F)
    where
        F: Fn(&[Ternary]) -> Ternary,
    {
        let next: Vec<Ternary> = (0..self.current.len())
            .map(|i| {
                let nbrs = self.von_neumann(&self.current, i);
                second_order_step(&rule, &nbrs, self.current[i], self.previous[i]).0
            })
            .collect();
        self.previous = std::mem::replace(&mut self.current, next);
    }

    /// Exact inverse of [`SecondOrderField::step`].
    pub fn unstep<F>(&mut self, rule: F)
    where
        F: Fn(&[Ternary]) -> Ternary,
    {
        let restored_prev: Vec<Ternary> = (0..self.current.len())
            .map(|i| {
                let nbrs = self.von_neumann(&self.previous, i);
                second_order_unstep(&rule, &nbrs, self.current[i], self.previous[i]).1
            })
            .collect();
        self.current = std::mem::replace(&mut self.previous, restored_prev);
    }
}

// =============================================================================
// MARGOLUS PARTITIONING
// =============================================================================

/// Block partition phase; alternates every step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MargolusPhase {
    Even,
    Odd,
}

impl MargolusPhase {
    pub fn flip(self) -> Self {
        match self {
            MargolusPhase::Even => MargolusPhase::Odd,
            MargolusPhase::Odd => MargolusPhase::Even,
        }
    }

    /// Block origin offset on both axes.
    pub fn offset(self) -> usize {
        match self {
            MargolusPhase::Even => 0,
            MargolusPhase::Odd => 1,
        }
    }
}

/// 2×2 block as `[top_left, top_right, bottom_left, bottom_right]`.
pub type Block = [Ternary; 4];

fn rotate_cw([tl, tr, bl, br]: Block) -> Block {
    [bl, tl, br, tr]
}

fn rotate_ccw([tl, tr, bl, br]: Block) -> Block {
    [tr, br, tl, bl]
}

/// Clockwise rotation on even phase, counter-clockwise on odd.
pub fn forward_margolus(block: Block, phase: MargolusPhase) -> Block {
    match phase {
        MargolusPhase::Even => rotate_cw(block),
        MargolusPhase::Odd => rotate_ccw(block),
    }
}

/// Opposite rotation of [`forward_margolus`].
pub fn reverse_margolus(block: Block, phase: MargolusPhase) -> Block {
    match phase {
        MargolusPhase::Even => rotate_ccw(block),
        MargolusPhase::Odd => rotate_cw(block),
    }
}

/// Toroidal 2-D ternary field stepped by Margolus blocks.
///
/// Width and height must be even so both phase partitions tile exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MargolusField {
    width: usize,
    height: usize,
    cells: Vec<Ternary>,
    phase: MargolusPhase,
}

impl MargolusField {
    pub fn new(width: usize, height: usize, cells: Vec<Ternary>) -> Result<Self> {
        if width % 2 != 0 || height % 2 != 0 || width == 0 || height == 0 {
            return Err(LatticeError::shape(
                "margolus field",
                "even non-zero width and height",
                format!("{width}x{height}"),
            ));
        }
        if cells.len() != width * height {
            return Err(LatticeError::shape("margolus field", width * height, cells.len()));
        }
        Ok(Self {
            width,
            height,
            cells,
            phase: MargolusPhase::Even,
        })
    }

    pub fn cells(&self) -> &[Ternary] {
        &self.cells
    }

    pub fn phase(&self) -> MargolusPhase {
        self.phase
    }

    fn block_indices(&self, bx: usize, by: usize, offset: usize) -> [usize; 4] {
        let (w, h) = (self.width, self.height);
        let x0 = (bx * 2 + offset) % w;
        let y0 = (by * 2 + offset) % h;
        let x1 = (x0 + 1) % w;
        let y1 = (y0 + 1) % h;
        [y0 * w + x0, y0 * w + x1, y1 * w + x0, y1 * w + x1]
    }

    fn transform(&mut self, phase: MargolusPhase, op: fn(Block, MargolusPhase) -> Block) {
        let offset = phase.offset();
        for by in 0..self.height / 2 {
            for bx in 0..self.width / 2 {
                let idx = self.block_indices(bx, by, offset);
                let block = [
                    self.cells[idx[0]],
                    self.cells[idx[1]],
                    self.cells[idx[2]],
                    self.cells[idx[3]],
                ];
                let out = op(block, phase);
                for (i, v) in idx.into_iter().zip(out) {
                    self.cells[i] = v;
                }
            }
        }
    }

    /// Apply one block step and advance the phase.
    pub fn step(&mut self) {
        self.transform(self.phase, forward_margolus);
        self.phase = self.phase.flip();
    }

    /// Undo the most recent [`MargolusField::step`].
    pub fn unstep(&mut self) {
        self.phase = self.phase.flip();
        self.transform(self.phase, reverse_margolus);
    }
}

// =============================================================================
// COMPOSITION
// =============================================================================

/// A gate bound to state indices.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WiredGate {
    pub gate: Gate,
    pub wires: Vec<usize>,
}

impl WiredGate {
    pub fn new(gate: Gate, wires: Vec<usize>) -> Self {
        Self { gate, wires }
    }
}

/// Ordered sequence of wired gates over one shared state vector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Composite {
    steps: Vec<WiredGate>,
}

/// Build a composite from wired gates.
pub fn compose(steps: Vec<WiredGate>) -> Composite {
    Composite { steps }
}

impl Composite {
    pub fn steps(&self) -> &[WiredGate] {
        &self.steps
    }

    /// Apply each gate in order, returning the final state and one inverse
    /// descriptor per step in application order.
    pub fn apply(&self, inputs: &[Ternary]) -> Result<(Vec<Ternary>, Vec<InverseDescriptor>)> {
        let mut state = inputs.to_vec();
        let mut descriptors = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            state = apply_wired(step.gate, &step.wires, &state)?;
            descriptors.push(InverseDescriptor {
                gate: step.gate,
                wires: step.wires.clone(),
                result: state.clone(),
            });
        }
        Ok((state, descriptors))
    }

    /// Undo the whole composite from its final state.
    pub fn invert(&self, outputs: &[Ternary]) -> Result<Vec<Ternary>> {
        let mut state = outputs.to_vec();
        for step in self.steps.iter().rev() {
            state = apply_wired(step.gate, &step.wires, &state)?;
        }
        Ok(state)
    }

    /// Apply recorded descriptors in application order.
    ///
    /// Entry `i` of the returned trace is the state that entered step `i`;
    /// entry `0` is the original input.
    pub fn rollback(descriptors: &[InverseDescriptor]) -> Result<Vec<Vec<Ternary>>> {
        descriptors.iter().map(apply_inverse).collect()
    }

    /// True when the composite is a bijection on states of `width`.
    pub fn is_reversible(&self, width: usize) -> bool {
        is_reversible(width, |input| {
            self.apply(input).map(|(out, _)| out).unwrap_or_default()
        })
    }
}

// =============================================================================
// ENTROPY ACCOUNTING
// =============================================================================

/// Shannon entropy (bits) over a histogram of counts.
fn entropy_of_counts<I: IntoIterator<Item = usize>>(counts: I, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    counts
        .into_iter()
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Shannon entropy (bits) of the ternary value distribution in `states`.
pub fn shannon_entropy(states: &[Ternary]) -> f64 {
    let mut counts = [0usize; 3];
    for s in states {
        counts[(s.to_balanced() + 1) as usize] += 1;
    }
    entropy_of_counts(counts, states.len())
}

/// Entropy before and after a rule application.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntropyDelta {
    pub before: f64,
    pub after: f64,
    pub delta: f64,
}

impl EntropyDelta {
    fn new(before: f64, after: f64) -> Self {
        Self {
            before,
            after,
            delta: after - before,
        }
    }
}

/// Value-distribution entropy of one state vector before and after `gate`.
pub fn entropy_delta(gate: Gate, inputs: &[Ternary]) -> Result<EntropyDelta> {
    let after = gate.apply(inputs)?;
    Ok(EntropyDelta::new(shannon_entropy(inputs), shannon_entropy(&after)))
}

/// Entropy of the uniform input ensemble before and after `gate`.
///
/// Bijections map the uniform prior to a uniform posterior, so `delta` is `0.0`.
pub fn ensemble_entropy_delta(gate: Gate) -> Result<EntropyDelta> {
    let inputs = enumerate_inputs(gate.arity());
    let mut after: HashMap<Vec<Ternary>, usize> = HashMap::new();
    for input in &inputs {
        *after.entry(gate.apply(input)?).or_default() += 1;
    }
    let before = entropy_of_counts(inputs.iter().map(|_| 1), inputs.len());
    let after = entropy_of_counts(after.into_values(), inputs.len());
    Ok(EntropyDelta::new(before, after))
}

// =============================================================================
// AUDIT
// =============================================================================

/// Record that lets an external history store roll back one application.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AuditEntry {
    pub cell_id: Uuid,
    pub tick: u64,
    pub rule_name: String,
    pub input_values: Vec<Ternary>,
    pub output_values: Vec<Ternary>,
    pub inverse: InverseDescriptor,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Apply `gate` and record the application.
    pub fn record(cell_id: Uuid, tick: u64, gate: Gate, inputs: &[Ternary]) -> Result<Self> {
        let (outputs, inverse) = apply_rule(gate, inputs)?;
        Ok(Self {
            cell_id,
            tick,
            rule_name: gate.name().to_string(),
            input_values: inputs.to_vec(),
            output_values: outputs,
            inverse,
            timestamp: Utc::now(),
        })
    }

    /// Recompute the inputs from the stored inverse.
    pub fn rollback(&self) -> Result<Vec<Ternary>> {
        apply_inverse(&self.inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ternary::majority;
    use Ternary::*;

    #[test]
    fn test_gate_involution_all_inputs() {
        for gate in Gate::ALL {
            for input in enumerate_inputs(gate.arity()) {
                let (_, inverse) = apply_rule(gate, &input).unwrap();
                assert_eq!(apply_inverse(&inverse).unwrap(), input, "{gate}");
            }
        }
    }

    #[test]
    fn test_arity_is_checked() {
        let err = Gate::Toffoli.apply(&[Pos, Pos]).unwrap_err();
        assert_eq!(
            err,
            LatticeError::Arity {
                gate: "toffoli",
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_gate_names() {
        assert_eq!("cnot".parse::<Gate>().unwrap(), Gate::Feynman);
        assert_eq!("Fredkin".parse::<Gate>().unwrap(), Gate::Fredkin);
        assert!(matches!(
            "hadamard".parse::<Gate>(),
            Err(LatticeError::UnknownGate(_))
        ));
    }

    #[test]
    fn test_reversibility_oracle() {
        assert!(!is_reversible(3, |x| vec![x[0]]));
        assert!(!is_reversible(3, |x| vec![x[0], x[0], x[0]]));
        assert!(is_reversible(2, |x| Gate::Feynman.apply(x).unwrap()));
        for gate in Gate::ALL {
            assert!(is_reversible(gate.arity(), |x| gate.apply(x).unwrap()));
        }
    }

    #[test]
    fn test_enumerate_inputs() {
        let all = enumerate_inputs(3);
        assert_eq!(all.len(), 27);
        assert_eq!(all[0], vec![Neg, Neg, Neg]);
        assert_eq!(all[26], vec![Pos, Pos, Pos]);
    }

    #[test]
    fn test_second_order_cell_round_trip() {
        let nbrs = [Pos, Pos, Neg];
        for cur in Ternary::ALL {
            for prev in Ternary::ALL {
                let (c, p) = second_order_step(majority, &nbrs, cur, prev);
                assert_eq!(second_order_unstep(majority, &nbrs, c, p), (cur, prev));
            }
        }
    }

    #[test]
    fn test_second_order_field_reverses_irreversible_rule() {
        let current = vec![Pos, Zero, Neg, Pos, Neg, Neg, Zero, Pos, Pos, Zero, Zero, Neg];
        let previous = vec![Zero; 12];
        let mut field = SecondOrderField::new(4, 3, current.clone(), previous.clone()).unwrap();
        for _ in 0..5 {
            field.step(majority);
        }
        for _ in 0..5 {
            field.unstep(majority);
        }
        assert_eq!(field.current(), current.as_slice());
        assert_eq!(field.previous(), previous.as_slice());
    }

    #[test]
    fn test_margolus_block_invertibility() {
        for phase in [MargolusPhase::Even, MargolusPhase::Odd] {
            for input in enumerate_inputs(4) {
                let block = [input[0], input[1], input[2], input[3]];
                assert_eq!(reverse_margolus(forward_margolus(block, phase), phase), block);
            }
        }
    }

    #[test]
    fn test_margolus_rotation_direction() {
        let block = [Pos, Zero, Zero, Zero];
        // Top-left moves to top-right under clockwise rotation.
        assert_eq!(forward_margolus(block, MargolusPhase::Even), [Zero, Pos, Zero, Zero]);
        assert_eq!(forward_margolus(block, MargolusPhase::Odd), [Zero, Zero, Pos, Zero]);
    }

    #[test]
    fn test_margolus_field_round_trip() {
        let cells: Vec<Ternary> = (0..16).map(|i| Ternary::ALL[i % 3]).collect();
        let mut field = MargolusField::new(4, 4, cells.clone()).unwrap();
        for _ in 0..7 {
            field.step();
        }
        assert_eq!(field.phase(), MargolusPhase::Odd);
        for _ in 0..7 {
            field.unstep();
        }
        assert_eq!(field.cells(), cells.as_slice());
        assert_eq!(field.phase(), MargolusPhase::Even);
        assert!(MargolusField::new(3, 4, vec![Zero; 12]).is_err());
    }

    #[test]
    fn test_composite_invert_and_rollback() {
        let composite = compose(vec![
            WiredGate::new(Gate::Feynman, vec![0, 1]),
            WiredGate::new(Gate::Toffoli, vec![0, 1, 2]),
            WiredGate::new(Gate::Fredkin, vec![2, 0, 1]),
        ]);
        assert!(composite.is_reversible(3));
        for input in enumerate_inputs(3) {
            let (out, descriptors) = composite.apply(&input).unwrap();
            assert_eq!(descriptors.len(), 3);
            assert_eq!(composite.invert(&out).unwrap(), input);
            let trace = Composite::rollback(&descriptors).unwrap();
            assert_eq!(trace[0], input);
        }
    }

    #[test]
    fn test_composite_wire_out_of_range() {
        let composite = compose(vec![WiredGate::new(Gate::Feynman, vec![0, 5])]);
        assert_eq!(
            composite.apply(&[Pos, Neg]).unwrap_err(),
            LatticeError::WireOutOfRange { wire: 5, width: 2 }
        );
    }

    #[test]
    fn test_entropy() {
        assert_eq!(shannon_entropy(&[Pos, Pos, Pos]), 0.0);
        assert!((shannon_entropy(&[Neg, Zero, Pos]) - 3f64.log2()).abs() < 1e-12);
        let d = entropy_delta(Gate::Fredkin, &[Zero, Pos, Neg]).unwrap();
        assert_eq!(d.delta, 0.0);
        for gate in Gate::ALL {
            let d = ensemble_entropy_delta(gate).unwrap();
            assert_eq!(d.delta, 0.0, "{gate}");
            assert!(d.before > 0.0);
        }
    }

    #[test]
    fn test_audit_entry_rollback() {
        let entry = AuditEntry::record(Uuid::new_v4(), 3, Gate::Feynman, &[Pos, Zero]).unwrap();
        assert_eq!(entry.rule_name, "feynman");
        assert_eq!(entry.output_values, vec![Pos, Pos]);
        assert_eq!(entry.rollback().unwrap(), vec![Pos, Zero]);
    }
}
