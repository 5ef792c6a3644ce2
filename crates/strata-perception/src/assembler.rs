//! Sample Assembler.
//!
//! Joins a frame's smoothed layer vector with its trajectory entry to build
//! the immutable [`PerceptualSample`].  Samples leave in strictly ascending
//! frame order and nothing is buffered beyond the current frame.

use strata_types::{LayerDefinition, LayerVector, PerceptualSample, StrataError};

use crate::smoothing::SmoothedFrame;
use crate::trajectory::TrajectoryAligner;

#[derive(Debug, Clone)]
pub struct SampleAssembler {
    names: Vec<String>,
    next_frame: u64,
}

impl SampleAssembler {
    pub fn new(layers: &[LayerDefinition]) -> Self {
        Self {
            names: layers.iter().map(|l| l.name.clone()).collect(),
            next_frame: 0,
        }
    }

    /// Layer names in configuration order.
    pub fn layer_names(&self) -> &[String] {
        &self.names
    }

    /// Number of samples produced so far.
    pub fn assembled(&self) -> u64 {
        self.next_frame
    }

    /// Build the sample for `smoothed`.
    ///
    /// # Errors
    ///
    /// [`StrataError::Assembly`] when the frame is out of order, a layer
    /// value is missing, or the trajectory has no entry for the frame.
    pub fn assemble(
        &mut self,
        aligner: &TrajectoryAligner,
        smoothed: &SmoothedFrame,
    ) -> Result<PerceptualSample, StrataError> {
        let frame_index = smoothed.frame_index;
        if frame_index != self.next_frame {
            return Err(StrataError::Assembly {
                frame_index,
                reason: format!("assembler expected frame {}", self.next_frame),
            });
        }
        if smoothed.values.len() != self.names.len() {
            let missing = self
                .names
                .get(smoothed.values.len()..)
                .and_then(|rest| rest.first())
                .map(String::as_str)
                .unwrap_or("<extra value>");
            return Err(StrataError::Assembly {
                frame_index,
                reason: format!("smoothed value mismatch at layer '{missing}'"),
            });
        }
        let (time, position) = aligner.lookup(frame_index).ok_or_else(|| StrataError::Assembly {
            frame_index,
            reason: "no trajectory entry".to_string(),
        })?;

        let mut ai_layers = LayerVector::with_capacity(self.names.len());
        for (name, &value) in self.names.iter().zip(&smoothed.values) {
            ai_layers.push(name.clone(), value);
        }

        self.next_frame += 1;
        Ok(PerceptualSample {
            frame_index,
            time,
            position,
            ai_layers,
        })
    }
}
