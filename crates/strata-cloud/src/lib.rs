//! `strata-cloud` – Point-Cloud Encoder.
//!
//! Serialises the ordered [`PerceptualSample`] sequence into a PLY point
//! cloud: one vertex per sample carrying `x, y, z, time` and one `0/1`
//! field per configured layer, in configuration order.
//!
//! # Modules
//!
//! - [`ply`] – [`CloudSchema`], [`PlyFormat`], header/vertex encoding and
//!   [`encode_ply`] for in-memory documents.
//! - [`writer`] – [`PlyWriter`]: streaming file output that never leaves a
//!   valid-looking file behind after a failed run.

pub mod ply;
pub mod writer;

pub use ply::{CloudSchema, PlyFormat, encode_ply};
pub use writer::{CloudSummary, PlyWriter};

use strata_types::{PerceptualSample, StrataError};

/// Destination of the assembled samples, fed in ascending frame order.
pub trait SampleSink: Send {
    fn append(&mut self, sample: &PerceptualSample) -> Result<(), StrataError>;
}

/// Collects samples in memory.
impl SampleSink for Vec<PerceptualSample> {
    fn append(&mut self, sample: &PerceptualSample) -> Result<(), StrataError> {
        self.push(sample.clone());
        Ok(())
    }
}
