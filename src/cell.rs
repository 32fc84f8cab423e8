//! Thunderbit - the mutable unit of simulation
//!
//! One voxel of the lattice: CA state, dynamics metrics (phase, flow,
//! sensitivity), trust, a presence map of external actors, and security-layer
//! bindings that this crate stores but never interprets.
//!
//! All bounded metrics are clamped (or wrapped, for phase) on write:
//!
//! - phase ∈ `[0, 2π)`
//! - flow, sensitivity, trust ∈ `[0, 1]`

use crate::coord::{Bounds, Coord, NeighborhoodPolicy};
use crate::error::{LatticeError, Result};
use crate::ternary::Ternary;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::f32::consts::TAU;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Presence strengths below this are pruned by a decay pass.
pub const PRESENCE_FLOOR: f32 = 0.01;

/// Minimum channel count for [`Thunderbit::encode_channels`].
pub const ENCODED_CHANNELS: usize = 5;

/// Wrap an angle into `[0, 2π)`. Non-finite input maps to `0.0`.
#[inline]
pub fn wrap_phase(phase: f32) -> f32 {
    if !phase.is_finite() {
        return 0.0;
    }
    let wrapped = phase.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

#[inline]
fn unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Discrete or continuous CA state.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CaState {
    Discrete(Ternary),
    Continuous(f32),
}

impl CaState {
    /// Ternary view; continuous values use the default float thresholds.
    pub fn as_ternary(&self) -> Ternary {
        match *self {
            CaState::Discrete(t) => t,
            CaState::Continuous(v) => Ternary::from_float(v),
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            CaState::Discrete(t) => t.to_float(),
            CaState::Continuous(v) => v,
        }
    }

    /// Non-quiescent state.
    pub fn is_active(&self) -> bool {
        self.as_ternary() != Ternary::Zero
    }
}

impl Default for CaState {
    fn default() -> Self {
        CaState::Discrete(Ternary::Zero)
    }
}

/// Structured presence entry.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PresenceRecord {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Simulation tick the record was written at, if any.
    pub tick: Option<u64>,
    pub fields: BTreeMap<String, f32>,
}

impl PresenceRecord {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timestamp: Utc::now(),
            tick: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn at_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: f32) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<f32> {
        self.fields.get(key).copied()
    }
}

/// What an external actor leaves on a cell.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Presence {
    Strength(f32),
    Record(PresenceRecord),
}

impl Presence {
    pub fn strength(&self) -> Option<f32> {
        match self {
            Presence::Strength(s) => Some(*s),
            Presence::Record(_) => None,
        }
    }

    pub fn record(&self) -> Option<&PresenceRecord> {
        match self {
            Presence::Record(r) => Some(r),
            Presence::Strength(_) => None,
        }
    }
}

/// Coefficients produced by an external numeric transform.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransformCoefficients {
    pub config: BTreeMap<String, f32>,
    pub coefficients: Vec<f32>,
}

/// Outcome of one rule application on a cell.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transition {
    pub state: CaState,
    pub flow: f32,
    pub phase: f32,
    pub sensitivity: f32,
}

/// One voxel of the simulation lattice.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Thunderbit {
    id: Uuid,
    coord: Coord,

    state: CaState,
    rule_id: String,
    policy: NeighborhoodPolicy,
    neighborhood: Vec<Coord>,

    phase: f32,
    flow: f32,
    sensitivity: f32,
    trust: f32,

    presence: HashMap<String, Presence>,

    relay_weight: f32,
    channel: Option<String>,
    key_ref: Option<String>,
    key_fragment: Option<Vec<u8>>,
    transform: Option<TransformCoefficients>,

    last_tick: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Thunderbit {
    /// Create a cell at `coord` with its neighborhood resolved against `bounds`.
    pub fn new(coord: Coord, bounds: &Bounds, policy: NeighborhoodPolicy) -> Result<Self> {
        bounds.check(coord)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            coord,
            state: CaState::default(),
            rule_id: "feynman".to_string(),
            policy,
            neighborhood: policy.neighbors(coord, bounds),
            phase: 0.0,
            flow: 0.5,
            sensitivity: 0.0,
            trust: 0.5,
            presence: HashMap::new(),
            relay_weight: 1.0,
            channel: None,
            key_ref: None,
            key_fragment: None,
            transform: None,
            last_tick: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // =========================================================================
    // IDENTITY / CA STATE
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn coord(&self) -> Coord {
        self.coord
    }

    pub fn state(&self) -> CaState {
        self.state
    }

    pub fn set_state(&mut self, state: CaState) {
        self.state = state;
        self.touch();
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub fn set_rule_id(&mut self, rule_id: impl Into<String>) {
        self.rule_id = rule_id.into();
        self.touch();
    }

    pub fn policy(&self) -> NeighborhoodPolicy {
        self.policy
    }

    /// Cached neighbor coordinates.
    pub fn neighborhood(&self) -> &[Coord] {
        &self.neighborhood
    }

    /// Recompute the cached neighborhood (shape change).
    pub fn set_neighborhood(&mut self, policy: NeighborhoodPolicy, bounds: &Bounds) {
        self.policy = policy;
        self.neighborhood = policy.neighbors(self.coord, bounds);
        self.touch();
    }

    /// Replace the neighborhood with an explicit list; every entry must be in bounds.
    pub fn set_neighbors(&mut self, neighbors: Vec<Coord>, bounds: &Bounds) -> Result<()> {
        for c in &neighbors {
            bounds.check(*c)?;
        }
        self.neighborhood = neighbors;
        self.touch();
        Ok(())
    }

    // =========================================================================
    // DYNAMICS
    // =========================================================================

    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn flow(&self) -> f32 {
        self.flow
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn set_phase(&mut self, phase: f32) {
        self.phase = wrap_phase(phase);
        self.touch();
    }

    pub fn set_flow(&mut self, flow: f32) {
        self.flow = unit(flow);
        self.touch();
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = unit(sensitivity);
        self.touch();
    }

    /// Commit a rule outcome for `tick`.
    pub fn update_state(&mut self, t: Transition, tick: u64) {
        self.state = t.state;
        self.flow = unit(t.flow);
        self.phase = wrap_phase(t.phase);
        self.sensitivity = unit(t.sensitivity);
        self.last_tick = tick;
        self.touch();
    }

    /// Current values as a no-op transition.
    pub fn transition(&self) -> Transition {
        Transition {
            state: self.state,
            flow: self.flow,
            phase: self.phase,
            sensitivity: self.sensitivity,
        }
    }

    // =========================================================================
    // TRUST
    // =========================================================================

    pub fn trust(&self) -> f32 {
        self.trust
    }

    /// Add `delta` to trust and clamp. Returns the change actually applied.
    pub fn update_trust(&mut self, delta: f32) -> f32 {
        let before = self.trust;
        self.trust = unit(self.trust + delta);
        self.touch();
        self.trust - before
    }

    // =========================================================================
    // PRESENCE
    // =========================================================================

    pub fn presence(&self) -> &HashMap<String, Presence> {
        &self.presence
    }

    pub fn presence_of(&self, actor: &str) -> Option<&Presence> {
        self.presence.get(actor)
    }

    /// Set an actor's strength; strengths under the floor remove the entry.
    pub fn add_presence(&mut self, actor: impl Into<String>, strength: f32) {
        let actor = actor.into();
        if strength.abs() < PRESENCE_FLOOR || !strength.is_finite() {
            self.presence.remove(&actor);
        } else {
            self.presence.insert(actor, Presence::Strength(strength));
        }
        self.touch();
    }

    pub fn set_presence_record(&mut self, key: impl Into<String>, record: PresenceRecord) {
        self.presence.insert(key.into(), Presence::Record(record));
        self.touch();
    }

    pub fn remove_presence(&mut self, actor: &str) -> Option<Presence> {
        let removed = self.presence.remove(actor);
        self.touch();
        removed
    }

    /// Scale every strength by `1 - rate` and prune those under the floor.
    ///
    /// Records are kept. Returns the number of pruned entries.
    pub fn decay_presence(&mut self, rate: f32) -> usize {
        let retention = 1.0 - rate.clamp(0.0, 1.0);
        let before = self.presence.len();
        self.presence.retain(|_, p| match p {
            Presence::Strength(s) => {
                *s *= retention;
                s.abs() >= PRESENCE_FLOOR
            }
            Presence::Record(_) => true,
        });
        self.touch();
        before - self.presence.len()
    }

    // =========================================================================
    // BINDINGS
    // =========================================================================

    pub fn relay_weight(&self) -> f32 {
        self.relay_weight
    }

    pub fn set_relay_weight(&mut self, weight: f32) {
        self.relay_weight = weight;
        self.touch();
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn assign_channel(&mut self, channel: Option<String>) {
        self.channel = channel;
        self.touch();
    }

    pub fn key_ref(&self) -> Option<&str> {
        self.key_ref.as_deref()
    }

    pub fn key_fragment(&self) -> Option<&[u8]> {
        self.key_fragment.as_deref()
    }

    pub fn set_key(&mut self, key_ref: Option<String>, fragment: Option<Vec<u8>>) {
        self.key_ref = key_ref;
        self.key_fragment = fragment;
        self.touch();
    }

    pub fn transform(&self) -> Option<&TransformCoefficients> {
        self.transform.as_ref()
    }

    pub fn set_transform(&mut self, transform: Option<TransformCoefficients>) {
        self.transform = transform;
        self.touch();
    }

    // =========================================================================
    // BOOKKEEPING
    // =========================================================================

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // =========================================================================
    // CHANNEL ENCODING
    // =========================================================================

    /// Encode onto the perception channel layout.
    ///
    /// `0` state, `1` sin(phase), `2` cos(phase), `3` flow (aliveness),
    /// `4` sensitivity, remaining channels zero.
    pub fn encode_channels(&self, channels: usize) -> Result<Vec<f32>> {
        if channels < ENCODED_CHANNELS {
            return Err(LatticeError::shape(
                "cell encoding",
                format!(">= {ENCODED_CHANNELS} channels"),
                channels,
            ));
        }
        let mut v = vec![0.0; channels];
        v[0] = self.state.as_f32();
        v[1] = self.phase.sin();
        v[2] = self.phase.cos();
        v[3] = self.flow;
        v[4] = self.sensitivity;
        Ok(v)
    }

    /// Decode an additive channel delta into a transition.
    pub fn apply_channel_delta(&self, delta: &[f32]) -> Result<Transition> {
        if delta.len() < ENCODED_CHANNELS {
            return Err(LatticeError::shape(
                "cell delta",
                format!(">= {ENCODED_CHANNELS} channels"),
                delta.len(),
            ));
        }
        let value = self.state.as_f32() + delta[0];
        let state = match self.state {
            CaState::Discrete(_) => CaState::Discrete(Ternary::from_float(value)),
            CaState::Continuous(_) => CaState::Continuous(value),
        };
        let s = self.phase.sin() + delta[1];
        let c = self.phase.cos() + delta[2];
        let phase = if s == 0.0 && c == 0.0 {
            self.phase
        } else {
            wrap_phase(s.atan2(c))
        };
        Ok(Transition {
            state,
            flow: unit(self.flow + delta[3]),
            phase,
            sensitivity: unit(self.sensitivity + delta[4]),
        })
    }
}
