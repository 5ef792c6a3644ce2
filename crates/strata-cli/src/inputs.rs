//! Input file loading: detection features and camera trajectory.
//!
//! Features are JSON lines, one [`FrameFeatures`] per line, keyed by
//! `frame_index`.  The trajectory is either a CSV file with a
//! `time,x,y,z[,qw,qx,qy,qz]` header or a JSON array of
//! [`TrajectoryPoint`]s.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use strata_types::{
    FrameFeatures, Misalignment, Orientation, Position, StrataError, TrajectoryPoint,
};

/// Feature records keyed by frame index.
///
/// The stream is as long as its highest `frame_index` plus one.  Indices
/// below that without a record are gaps, handled later by the missing-frame
/// policy.
#[derive(Debug, Default)]
pub struct FeatureStream {
    records: BTreeMap<u64, FrameFeatures>,
}

impl FeatureStream {
    pub fn frame_count(&self) -> u64 {
        self.records
            .last_key_value()
            .map_or(0, |(&index, _)| index.saturating_add(1))
    }

    pub fn gaps(&self) -> u64 {
        self.frame_count() - self.records.len() as u64
    }

    /// Lay the records out by frame index for a trajectory of
    /// `trajectory_len` entries.
    ///
    /// A stream longer than the trajectory fails here; a shorter one is
    /// rejected by the pipeline's alignment check.
    pub fn into_frames(
        self,
        trajectory_len: usize,
    ) -> Result<Vec<Option<FrameFeatures>>, StrataError> {
        let detections = usize::try_from(self.frame_count()).unwrap_or(usize::MAX);
        if detections > trajectory_len {
            return Err(Misalignment::LengthMismatch {
                detections,
                trajectory: trajectory_len,
            }
            .into());
        }
        let mut frames: Vec<Option<FrameFeatures>> = vec![None; detections];
        for (index, features) in self.records {
            // Every key is below `detections`, which fits in usize.
            if let Some(slot) = usize::try_from(index).ok().and_then(|i| frames.get_mut(i)) {
                *slot = Some(features);
            }
        }
        Ok(frames)
    }
}

/// Load a features file, one JSON record per line.
pub fn load_features(path: &Path) -> Result<FeatureStream> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut stream = FeatureStream::default();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let features: FrameFeatures = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid feature record", path.display(), line_no + 1))?;

        let index = features.frame_index;
        if stream.records.insert(index, features).is_some() {
            bail!("{}:{}: duplicate frame_index {index}", path.display(), line_no + 1);
        }
    }
    Ok(stream)
}

#[derive(Debug, Deserialize)]
struct TrajectoryRow {
    time: f64,
    x: f64,
    y: f64,
    z: f64,
    qw: Option<f64>,
    qx: Option<f64>,
    qy: Option<f64>,
    qz: Option<f64>,
}

impl TrajectoryRow {
    fn into_point(self, row: usize) -> Result<TrajectoryPoint> {
        let orientation = match (self.qw, self.qx, self.qy, self.qz) {
            (Some(w), Some(x), Some(y), Some(z)) => Some(Orientation { w, x, y, z }),
            (None, None, None, None) => None,
            _ => bail!("trajectory row {row}: orientation needs all of qw, qx, qy, qz"),
        };
        Ok(TrajectoryPoint {
            time: self.time,
            position: Position::new(self.x, self.y, self.z),
            orientation,
        })
    }
}

/// Load a trajectory; `.json` files are parsed as JSON, anything else as CSV.
///
/// Ordering and finiteness are checked later against the detection stream.
pub fn load_trajectory(path: &Path) -> Result<Vec<TrajectoryPoint>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        return serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse trajectory {}", path.display()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut points = Vec::new();
    for (row, record) in reader.deserialize::<TrajectoryRow>().enumerate() {
        let record = record.with_context(|| format!("failed to read trajectory row {row}"))?;
        points.push(record.into_point(row)?);
    }
    Ok(points)
}
