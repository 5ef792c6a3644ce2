//! `strata-perception` – the alignment and debounce core.
//!
//! Turns noisy per-frame detector output into temporally stable, binary
//! layer states and binds them to the first-person trajectory.
//!
//! # Modules
//!
//! - [`trajectory`] – [`TrajectoryAligner`][trajectory::TrajectoryAligner]:
//!   validates the 1:1 frame ↔ trajectory correspondence and serves
//!   `(time, position)` lookups.
//! - [`activation`] – [`LayerActivator`][activation::LayerActivator]: pure
//!   threshold predicates producing a raw boolean per layer.
//! - [`smoothing`] – [`LayerSmoother`][smoothing::LayerSmoother]: one
//!   symmetric hysteresis automaton per layer; the only stateful,
//!   order-sensitive stage.
//! - [`assembler`] – [`SampleAssembler`][assembler::SampleAssembler]: joins
//!   smoothed layers and trajectory into one
//!   [`PerceptualSample`][strata_types::PerceptualSample] per frame.

pub mod activation;
pub mod assembler;
pub mod smoothing;
pub mod trajectory;

pub use activation::{LayerActivator, RawFrame, RawState};
pub use assembler::SampleAssembler;
pub use smoothing::{Hysteresis, HysteresisState, LayerSmoother, SmoothedFrame};
pub use trajectory::TrajectoryAligner;
