//! Temporal Smoother – symmetric hysteresis debounce.
//!
//! Turns a layer's raw per-frame boolean into a sustained *event* signal so
//! that a single-frame detection blip never flips the reported state.
//!
//! # Algorithm
//!
//! Each layer owns one [`Hysteresis`] automaton with window `N`:
//!
//! | State | raw = true | raw = false |
//! |---|---|---|
//! | `Inactive` | `PendingActive(1)`, or `Active` if N = 1 | `Inactive` |
//! | `PendingActive(c)` | `PendingActive(c+1)`, `Active` once c+1 = N | `Inactive` |
//! | `Active` | `Active` | `PendingInactive(1)`, or `Inactive` if N = 1 |
//! | `PendingInactive(c)` | `Active` | `PendingInactive(c+1)`, `Inactive` once c+1 = N |
//!
//! Pending states keep reporting the last confirmed state: `PendingActive`
//! reports `false` and `PendingInactive` reports `true`.  A flip therefore
//! lands on the N-th consecutive confirming frame in both directions.
//!
//! State is O(1) per layer and the output for frame `t` depends only on
//! frames `≤ t`.
//!
//! # Example
//!
//! ```rust
//! use strata_perception::smoothing::Hysteresis;
//!
//! let mut h = Hysteresis::new(2);
//! let raw = [false, true, true, false, true, true];
//! let out: Vec<bool> = raw.iter().map(|&r| h.step(r)).collect();
//! assert_eq!(out, [false, false, true, true, true, true]);
//! ```

use strata_types::{LayerDefinition, StrataError};

use crate::activation::RawFrame;

// ────────────────────────────────────────────────────────────────────────────
// Single-layer automaton
// ────────────────────────────────────────────────────────────────────────────

/// Automaton state; the counter is the length of the current confirming
/// streak and is always below the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HysteresisState {
    #[default]
    Inactive,
    PendingActive(u32),
    Active,
    PendingInactive(u32),
}

impl HysteresisState {
    /// The smoothed value reported while in this state.
    pub fn reported(self) -> bool {
        matches!(self, HysteresisState::Active | HysteresisState::PendingInactive(_))
    }
}

/// Debounce automaton for one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hysteresis {
    window: u32,
    state: HysteresisState,
}

impl Hysteresis {
    /// Create an automaton in [`HysteresisState::Inactive`].
    ///
    /// `window` is clamped to at least 1; configuration validation rejects
    /// zero before an automaton is ever built.
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            state: HysteresisState::Inactive,
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn state(&self) -> HysteresisState {
        self.state
    }

    /// Feed the raw value of the next frame and return the smoothed value.
    pub fn step(&mut self, raw: bool) -> bool {
        use HysteresisState::*;

        let n = self.window;
        self.state = match (self.state, raw) {
            (Inactive, false) => Inactive,
            (Inactive, true) | (PendingActive(_), true) => {
                let streak = match self.state {
                    PendingActive(c) => c + 1,
                    _ => 1,
                };
                if streak >= n { Active } else { PendingActive(streak) }
            }
            (PendingActive(_), false) => Inactive,
            (Active, true) | (PendingInactive(_), true) => Active,
            (Active, false) | (PendingInactive(_), false) => {
                let streak = match self.state {
                    PendingInactive(c) => c + 1,
                    _ => 1,
                };
                if streak >= n { Inactive } else { PendingInactive(streak) }
            }
        };
        self.state.reported()
    }

    /// The value reported after the most recent [`step`][Self::step].
    pub fn is_active(&self) -> bool {
        self.state.reported()
    }

    /// Return to the initial state.
    pub fn reset(&mut self) {
        self.state = HysteresisState::Inactive;
    }
}

/// Smooth a whole raw sequence with a fresh automaton.
pub fn smooth_sequence(window: u32, raw: &[bool]) -> Vec<bool> {
    let mut h = Hysteresis::new(window);
    raw.iter().map(|&r| h.step(r)).collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Per-stream bank
// ────────────────────────────────────────────────────────────────────────────

/// Smoothed layer states of one frame, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmoothedFrame {
    pub frame_index: u64,
    pub values: Vec<bool>,
}

/// One automaton per configured layer, driven in strict frame order.
///
/// Layers share no state; each automaton only ever sees its own raw column.
#[derive(Debug, Clone)]
pub struct LayerSmoother {
    automata: Vec<Hysteresis>,
    next_frame: u64,
}

impl LayerSmoother {
    pub fn new(layers: &[LayerDefinition]) -> Self {
        Self {
            automata: layers.iter().map(|l| Hysteresis::new(l.window)).collect(),
            next_frame: 0,
        }
    }

    /// Frame index the smoother expects next.
    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }

    pub fn automata(&self) -> &[Hysteresis] {
        &self.automata
    }

    /// Advance every automaton by one frame.
    ///
    /// # Errors
    ///
    /// [`StrataError::Assembly`] when `raw` is not the next frame in order or
    /// does not carry one state per layer.  The automata are left untouched.
    pub fn step(&mut self, raw: &RawFrame) -> Result<SmoothedFrame, StrataError> {
        if raw.frame_index != self.next_frame {
            return Err(StrataError::Assembly {
                frame_index: raw.frame_index,
                reason: format!("smoother expected frame {}", self.next_frame),
            });
        }
        if raw.states.len() != self.automata.len() {
            return Err(StrataError::Assembly {
                frame_index: raw.frame_index,
                reason: format!(
                    "raw frame has {} layer states, expected {}",
                    raw.states.len(),
                    self.automata.len()
                ),
            });
        }

        let values = self
            .automata
            .iter_mut()
            .zip(&raw.states)
            .map(|(automaton, &r)| automaton.step(r))
            .collect();
        self.next_frame += 1;

        Ok(SmoothedFrame {
            frame_index: raw.frame_index,
            values,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
