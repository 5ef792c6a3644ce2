//! Immutable run configuration.
//!
//! One [`PipelineConfig`] is built per run and handed to
//! [`Pipeline::new`][crate::pipeline::Pipeline::new], which validates it
//! before any input is touched.  No stage reads process-wide settings.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_cloud::CloudSchema;
use strata_perception::activation::validate_layers;
use strata_types::{LayerDefinition, Predicate, StrataError};

/// Default number of concurrent feature workers.
pub const DEFAULT_WORKERS: usize = 4;
/// Default bound on frames in flight between the workers and the smoother.
pub const DEFAULT_REORDER_CAPACITY: usize = 32;

/// What to do when a frame has no feature record (or timed out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFramePolicy {
    /// Treat the frame as "no detections": every raw layer false.
    #[default]
    FailOpen,
    /// Abort the run with [`StrataError::MissingFeatures`].
    Fail,
}

impl std::str::FromStr for MissingFramePolicy {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fail_open" | "fail-open" => Ok(MissingFramePolicy::FailOpen),
            "fail" => Ok(MissingFramePolicy::Fail),
            other => Err(StrataError::InvalidConfig(format!(
                "unknown missing-frame policy '{other}'"
            ))),
        }
    }
}

/// Everything the core needs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Enabled layers, in output field order.
    pub layers: Vec<LayerDefinition>,
    pub missing_frame_policy: MissingFramePolicy,
    /// Horizon after which a frame's features count as missing.
    pub frame_timeout: Option<Duration>,
    pub workers: usize,
    pub reorder_capacity: usize,
    /// Layers whose responsible objects the annotation exporter highlights.
    /// Empty means every object-count layer.
    pub highlight_layers: Vec<String>,
}

impl PipelineConfig {
    pub fn new(layers: Vec<LayerDefinition>) -> Self {
        Self {
            layers,
            missing_frame_policy: MissingFramePolicy::default(),
            frame_timeout: None,
            workers: DEFAULT_WORKERS,
            reorder_capacity: DEFAULT_REORDER_CAPACITY,
            highlight_layers: Vec::new(),
        }
    }

    /// Fail-fast validation.
    ///
    /// # Errors
    ///
    /// [`StrataError::InvalidConfig`] for any malformed layer, a layer name
    /// that cannot become a point-cloud field, zero workers or reorder
    /// capacity, a zero timeout, or a highlight entry that names an unknown
    /// or non-object layer.
    pub fn validate(&self) -> Result<(), StrataError> {
        validate_layers(&self.layers)?;
        CloudSchema::from_layers(&self.layers)?;
        self.validate_settings()
    }

    /// Worker, timeout and highlight checks, leaving the layer set itself to
    /// the caller.
    pub(crate) fn validate_settings(&self) -> Result<(), StrataError> {
        if self.workers == 0 {
            return Err(StrataError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.reorder_capacity == 0 {
            return Err(StrataError::InvalidConfig(
                "reorder_capacity must be at least 1".to_string(),
            ));
        }
        if self.frame_timeout.is_some_and(|t| t.is_zero()) {
            return Err(StrataError::InvalidConfig(
                "frame timeout must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &self.highlight_layers {
            let layer = self
                .layers
                .iter()
                .find(|l| &l.name == name)
                .ok_or_else(|| StrataError::InvalidConfig(format!("unknown layer reference '{name}'")))?;
            if !matches!(layer.predicate, Predicate::ObjectCount { .. }) {
                return Err(StrataError::InvalidConfig(format!(
                    "layer '{name}' has no objects to highlight"
                )));
            }
            if !seen.insert(name) {
                return Err(StrataError::InvalidConfig(format!(
                    "layer '{name}' listed twice in highlight_layers"
                )));
            }
        }
        Ok(())
    }
}
