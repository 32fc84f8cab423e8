//! Thunderbit - voxel-lattice cellular automaton core
//!
//! Every step reads a snapshot and writes a new generation. No cell ever sees a
//! neighbor's update from the same tick.
//!
//! # Core Types
//!
//! - **Ternary**: balanced ternary value with Łukasiewicz logic and reversible gates
//! - **Thunderbit**: one voxel (state, phase, flow, sensitivity, trust, presence)
//! - **Lattice**: arena of cells with synchronous, parallel batch stepping
//! - **Grid**: dense `[H, W, C]` / `[H, W, D, C]` perception tensor
//!
//! # Architecture: Rules / Reflexes / Monitor
//!
//! 1. **Rules** - local update functions: gradient NCA, single-head attention,
//!    multi-head attention with positional bias, or the ternary Feynman fallback
//! 2. **Reflexes** - per-cell behavioral transitions driven by local metrics
//!    (stability, chaos, decay, trust), emitted as typed events
//! 3. **Monitor** - bounded sample histories and edge-of-chaos metrics
//!    (PLV, permutation entropy, Langton's λ̂, Lyapunov estimate)
//!
//! Events reach subscribers through [`ReflexObserver`]s once a tick commits.
//! The reversible layer ([`reversible`]) guarantees every ternary rule
//! application can be undone from its [`AuditEntry`].
//!
//! # Example: Reflex Batch Step
//!
//! ```rust
//! use thunderbit::{
//!     Bounds, ChannelObserver, Coord, CriticalityMonitor, Lattice, MonitorConfig,
//!     NeighborhoodPolicy, ReflexConfig, ReflexEngine, ReflexKind, UpdateRule,
//! };
//! use std::sync::{mpsc, Arc};
//!
//! // 1. Create the lattice (dense, 4x4x1, 8-connected in plane)
//! let mut lattice = Lattice::new(Bounds::new(4, 4, 1), NeighborhoodPolicy::Moore).unwrap();
//!
//! // 2. Starve one cell of flow
//! lattice.get_mut(Coord::new(1, 1, 0)).unwrap().set_flow(0.05);
//!
//! // 3. Subscribe a reader
//! let (tx, rx) = mpsc::channel();
//! lattice.subscribe(Arc::new(ChannelObserver::new(tx)));
//!
//! // 4. Step with the ternary rule
//! let engine = ReflexEngine::new(ReflexConfig::default(), UpdateRule::Ternary).unwrap();
//! let report = lattice.step(&engine, 7);
//! assert!(report.is_clean());
//!
//! let stability: Vec<_> = rx
//!     .try_iter()
//!     .filter(|e| e.kind == ReflexKind::Stability)
//!     .collect();
//! assert_eq!(stability.len(), 1);
//! assert_eq!(stability[0].coord, Coord::new(1, 1, 0));
//!
//! // 5. Spread the low-stability signal, then sample the monitor
//! lattice.apply_propagations(&report.propagations, engine.config().propagation_strength);
//! let mut monitor = CriticalityMonitor::new(MonitorConfig::default()).unwrap();
//! lattice.sample_into(&mut monitor);
//! let metrics = monitor.compute();
//! assert!((0.0..=1.0).contains(&metrics.criticality_score));
//! ```
//!
//! # Example: Grid Rule
//!
//! ```rust
//! use thunderbit::{Grid, NcaRule, RuleKind, StepParams, ALPHA_CHANNEL};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let rule = RuleKind::Nca(NcaRule::new(16, 32, &mut rng));
//!
//! let mut grid = Grid::new(5, 5, 16);
//! grid.set(2, 2, 0, ALPHA_CHANNEL, 1.0);
//! grid.set(0, 0, 0, 0, 0.5); // no alpha nearby: cleared by the seed mask
//!
//! let params = StepParams::default().with_update_probability(1.0);
//! let grid = rule.seed(&grid, &params).unwrap();
//! assert_eq!(grid.get(0, 0, 0, 0), 0.0);
//!
//! // Fresh rules output zero: the seed survives unchanged.
//! let out = rule.run(&grid, &params, 10, &mut rng).unwrap();
//! assert_eq!(out, grid);
//! ```

mod cell;
mod config;
mod coord;
mod error;
mod grid;
mod lattice;
mod monitor;
mod observer;
mod reflex;
mod ring;

pub mod reversible;
pub mod rules;
pub mod ternary;

pub use cell::{
    wrap_phase, CaState, Presence, PresenceRecord, Thunderbit, TransformCoefficients, Transition,
    ENCODED_CHANNELS, PRESENCE_FLOOR,
};
pub use config::{MonitorConfig, ReflexConfig};
pub use coord::{Bounds, Coord, NeighborhoodPolicy};
pub use error::{LatticeError, Result};
pub use grid::{Grid, GridShape, ALIVE_THRESHOLD, ALPHA_CHANNEL};
pub use lattice::{BatchReport, Lattice, PROPAGATED_PREFIX};
pub use monitor::{
    circular_mean, classify_zone, criticality_score, hamming_distance, langton_lambda,
    langton_lambda_from_rule_table, lyapunov_estimate, permutation_entropy, phase_locking_value,
    recommended_perturbation, CriticalityMetrics, CriticalityMonitor, Zone, LYAPUNOV_FLOOR,
};
pub use observer::{ChannelObserver, FnObserver, KindFilter, ReflexObserver};
pub use reflex::{
    CustomRule, LocalMetrics, PolicyOverride, Propagation, ReflexEngine, ReflexEvent, ReflexKind,
    StepOutcome, UpdateRule, METRICS_KEY, QUARANTINE_KEY,
};
pub use reversible::{AuditEntry, Gate, InverseDescriptor};
pub use ring::RingBuffer;
pub use rules::{
    AttentionRule, MultiHeadAttentionRule, MultiHeadParts, NcaRule, RuleKind, StepParams,
};
pub use ternary::Ternary;
