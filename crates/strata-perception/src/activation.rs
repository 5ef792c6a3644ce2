//! Layer Activator.
//!
//! Maps one frame's [`FrameFeatures`] to a raw boolean per configured layer.
//! Evaluation is pure: no history, no side effects, and no layer may look at
//! another layer's output.  Every predicate is a strict numeric threshold.
//!
//! A predicate that meets an unknown value (a NaN score, or a NaN confidence
//! on an object it would otherwise count) yields [`RawState::Undetermined`].
//! The frame still records `false` for that layer, and the layer index is
//! listed in [`RawFrame::undetermined`] so the caller can tally it.

use std::collections::HashSet;
use std::sync::Arc;

use strata_types::{FrameFeatures, LayerDefinition, Predicate, StrataError};

/// Outcome of one predicate on one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawState {
    Active,
    Inactive,
    /// An input value was NaN; treated as inactive.
    Undetermined,
}

impl RawState {
    pub fn is_active(self) -> bool {
        matches!(self, RawState::Active)
    }
}

/// Evaluate `layer`'s predicate against `features`.
pub fn evaluate(features: &FrameFeatures, layer: &LayerDefinition) -> RawState {
    let verdict = |known: bool, active: bool| match (known, active) {
        (false, _) => RawState::Undetermined,
        (true, true) => RawState::Active,
        (true, false) => RawState::Inactive,
    };

    match &layer.predicate {
        Predicate::ObjectCount {
            class,
            min_confidence,
            greater_than,
        } => {
            if min_confidence.is_some() {
                let unknown = features.objects.iter().any(|o| {
                    class.as_deref().is_none_or(|c| c == o.class)
                        && o.confidence.is_some_and(f32::is_nan)
                });
                if unknown {
                    return RawState::Undetermined;
                }
            }
            let count = features
                .objects
                .iter()
                .filter(|o| layer.predicate.counts_object(o))
                .count();
            verdict(true, count > *greater_than as usize)
        }
        Predicate::MotionAbove { threshold } => {
            verdict(!features.motion_score.is_nan(), features.motion_score > *threshold)
        }
        Predicate::DensityAbove { threshold } => {
            verdict(!features.density_score.is_nan(), features.density_score > *threshold)
        }
        Predicate::LuminanceAbove { threshold } => {
            verdict(!features.luminance.mean.is_nan(), features.luminance.mean > *threshold)
        }
        Predicate::LuminanceBelow { threshold } => {
            verdict(!features.luminance.mean.is_nan(), features.luminance.mean < *threshold)
        }
    }
}

/// Check a layer set before any frame is processed.
///
/// # Errors
///
/// [`StrataError::InvalidConfig`] when the set is empty, a name is empty or
/// repeated, a window is zero, a threshold is not finite, or a confidence
/// floor lies outside `[0, 1]`.
pub fn validate_layers(layers: &[LayerDefinition]) -> Result<(), StrataError> {
    if layers.is_empty() {
        return Err(StrataError::InvalidConfig("no layers enabled".to_string()));
    }

    let mut seen = HashSet::new();
    for layer in layers {
        let name = layer.name.trim();
        if name.is_empty() {
            return Err(StrataError::InvalidConfig("layer name must not be empty".to_string()));
        }
        if !seen.insert(name) {
            return Err(StrataError::InvalidConfig(format!("duplicate layer name '{name}'")));
        }
        if layer.window == 0 {
            return Err(StrataError::InvalidConfig(format!(
                "layer '{name}': smoothing window must be at least 1"
            )));
        }

        match &layer.predicate {
            Predicate::ObjectCount {
                class,
                min_confidence,
                ..
            } => {
                if class.as_deref().is_some_and(|c| c.trim().is_empty()) {
                    return Err(StrataError::InvalidConfig(format!(
                        "layer '{name}': object class must not be empty"
                    )));
                }
                if let Some(min) = min_confidence
                    && !(min.is_finite() && (0.0..=1.0).contains(min))
                {
                    return Err(StrataError::InvalidConfig(format!(
                        "layer '{name}': min_confidence {min} outside [0, 1]"
                    )));
                }
            }
            Predicate::MotionAbove { threshold }
            | Predicate::DensityAbove { threshold }
            | Predicate::LuminanceAbove { threshold }
            | Predicate::LuminanceBelow { threshold } => {
                if !threshold.is_finite() {
                    return Err(StrataError::InvalidConfig(format!(
                        "layer '{name}': threshold {threshold} is not finite"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Raw layer states of one frame, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub frame_index: u64,
    pub states: Vec<bool>,
    /// Indices of layers whose predicate met an unknown value.
    pub undetermined: Vec<usize>,
    /// True when no feature record existed and every layer was forced off.
    pub missing: bool,
}

/// Evaluates every configured layer for a frame.
///
/// Cheap to clone; workers share one instance.
#[derive(Debug, Clone)]
pub struct LayerActivator {
    layers: Arc<[LayerDefinition]>,
}

impl LayerActivator {
    /// Validate `layers` and build an activator over them.
    pub fn new(layers: Vec<LayerDefinition>) -> Result<Self, StrataError> {
        validate_layers(&layers)?;
        Ok(Self {
            layers: layers.into(),
        })
    }

    pub fn layers(&self) -> &[LayerDefinition] {
        &self.layers
    }

    /// Raw states for `features`.
    pub fn activate(&self, features: &FrameFeatures) -> RawFrame {
        let mut states = Vec::with_capacity(self.layers.len());
        let mut undetermined = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let state = evaluate(features, layer);
            if state == RawState::Undetermined {
                undetermined.push(i);
            }
            states.push(state.is_active());
        }
        RawFrame {
            frame_index: features.frame_index,
            states,
            undetermined,
            missing: false,
        }
    }

    /// Fail-open frame: every layer off, flagged as missing.
    pub fn missing_frame(&self, frame_index: u64) -> RawFrame {
        RawFrame {
            frame_index,
            states: vec![false; self.layers.len()],
            undetermined: Vec::new(),
            missing: true,
        }
    }
}
