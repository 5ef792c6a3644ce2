//! Detection input.
//!
//! The object, motion and scene detectors live outside the core.  They are
//! reached through [`FeatureSource`], which hands out one [`FrameFeatures`]
//! record per contiguous frame index.

use std::sync::Mutex;

use async_trait::async_trait;
use strata_types::FrameFeatures;

/// Producer of per-frame detector measurements.
///
/// # Contract
///
/// * `frame_count` – length of the detection stream; frame indices run
///   `0..frame_count` without gaps.
/// * `features` – the record for `frame_index`, or `None` when the
///   collaborator has nothing for that frame.  Called at most once per
///   index, possibly concurrently for different indices and in any order.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    fn frame_count(&self) -> usize;

    async fn features(&self, frame_index: u64) -> Option<FrameFeatures>;
}

/// Serves preloaded records; each record is handed out once and then
/// released.
#[derive(Debug, Default)]
pub struct VecFeatureSource {
    frames: Mutex<Vec<Option<FrameFeatures>>>,
    len: usize,
}

impl VecFeatureSource {
    /// Frame `i` is `frames[i]`.
    pub fn new(frames: Vec<FrameFeatures>) -> Self {
        Self::with_gaps(frames.into_iter().map(Some).collect())
    }

    /// Like [`new`][Self::new], with `None` marking missing records.
    pub fn with_gaps(frames: Vec<Option<FrameFeatures>>) -> Self {
        let len = frames.len();
        Self {
            frames: Mutex::new(frames),
            len,
        }
    }
}

#[async_trait]
impl FeatureSource for VecFeatureSource {
    fn frame_count(&self) -> usize {
        self.len
    }

    async fn features(&self, frame_index: u64) -> Option<FrameFeatures> {
        let index = usize::try_from(frame_index).ok()?;
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.get_mut(index).and_then(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_handed_out_once() {
        let source = VecFeatureSource::new(vec![FrameFeatures::empty(0), FrameFeatures::empty(1)]);
        assert_eq!(source.frame_count(), 2);
        assert_eq!(source.features(1).await.map(|f| f.frame_index), Some(1));
        assert!(source.features(1).await.is_none());
        assert!(source.features(0).await.is_some());
        assert!(source.features(2).await.is_none());
    }

    #[tokio::test]
    async fn gaps_count_toward_frame_count() {
        let source = VecFeatureSource::with_gaps(vec![Some(FrameFeatures::empty(0)), None]);
        assert_eq!(source.frame_count(), 2);
        assert!(source.features(1).await.is_none());
    }
}
