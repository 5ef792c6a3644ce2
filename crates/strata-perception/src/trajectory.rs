//! Trajectory Aligner.
//!
//! Binds frame index `i` of the detection stream to trajectory entry `i`.
//! The correspondence is strictly positional: there is no nearest-time
//! lookup, so the two streams must have identical cardinality and the
//! trajectory's clock must be strictly increasing.
//!
//! # Example
//!
//! ```rust
//! use strata_perception::trajectory::TrajectoryAligner;
//! use strata_types::{Position, TrajectoryPoint};
//!
//! let points = vec![
//!     TrajectoryPoint { time: 0.0, position: Position::new(0.0, 0.0, 0.0), orientation: None },
//!     TrajectoryPoint { time: 0.5, position: Position::new(1.0, 0.0, 0.0), orientation: None },
//! ];
//! let aligner = TrajectoryAligner::new(points, 2).unwrap();
//!
//! let (time, position) = aligner.lookup(1).unwrap();
//! assert!((time - 0.5).abs() < 1e-9);
//! assert!((position.x - 1.0).abs() < 1e-9);
//! ```

use strata_types::{Misalignment, Position, TrajectoryPoint};
use tracing::debug;

/// Validated, read-only frame index → (time, position) table.
#[derive(Debug, Clone)]
pub struct TrajectoryAligner {
    points: Vec<TrajectoryPoint>,
}

impl TrajectoryAligner {
    /// Validate `points` against a detection stream of `detections` frames.
    ///
    /// # Errors
    ///
    /// - [`Misalignment::LengthMismatch`] when the lengths differ.
    /// - [`Misalignment::NonFiniteEntry`] when a time, position or
    ///   orientation component is NaN or infinite.
    /// - [`Misalignment::NonMonotonicTime`] when a time is not strictly
    ///   greater than its predecessor.
    pub fn new(points: Vec<TrajectoryPoint>, detections: usize) -> Result<Self, Misalignment> {
        if points.len() != detections {
            return Err(Misalignment::LengthMismatch {
                detections,
                trajectory: points.len(),
            });
        }

        for (index, point) in points.iter().enumerate() {
            let finite = point.time.is_finite()
                && point.position.is_finite()
                && point.orientation.is_none_or(|q| q.is_finite());
            if !finite {
                return Err(Misalignment::NonFiniteEntry { index });
            }
        }

        if let Some(index) = points.windows(2).position(|w| w[1].time <= w[0].time) {
            return Err(Misalignment::NonMonotonicTime {
                index: index + 1,
                previous: points[index].time,
                current: points[index + 1].time,
            });
        }

        debug!(frames = points.len(), "trajectory aligned with detection stream");
        Ok(Self { points })
    }

    /// Time and position of `frame_index`, or `None` past the end.
    pub fn lookup(&self, frame_index: u64) -> Option<(f64, Position)> {
        self.pose(frame_index).map(|p| (p.time, p.position))
    }

    /// Full trajectory entry of `frame_index`, orientation included.
    pub fn pose(&self, frame_index: u64) -> Option<&TrajectoryPoint> {
        usize::try_from(frame_index)
            .ok()
            .and_then(|i| self.points.get(i))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Elapsed time between the first and last entry (zero for fewer than
    /// two entries).
    pub fn duration(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}
