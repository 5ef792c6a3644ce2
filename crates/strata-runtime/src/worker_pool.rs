//! Feature worker pool.
//!
//! `workers` tokio tasks pull frame indices from a shared counter, fetch the
//! frame's features from the [`FeatureSource`] and evaluate the layer
//! predicates.  Outcomes go to the single consumer over an mpsc channel and
//! may arrive in any order.
//!
//! A worker takes a permit from the reorder semaphore *before* claiming an
//! index, and the permit travels with the outcome until the consumer has
//! smoothed that frame.  At most `reorder_capacity` frames are therefore in
//! flight, and they always form a contiguous index range starting at the
//! frame the consumer is waiting for.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strata_perception::{LayerActivator, RawFrame};
use strata_types::{FrameFeatures, Misalignment, StrataError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::shutdown::ShutdownSignal;
use crate::source::FeatureSource;

/// How a frame's features were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    /// The source had no record for the frame.
    Missing,
    /// The source did not answer within the frame timeout.
    TimedOut,
}

/// One worker's result for one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub status: FrameStatus,
    /// `None` unless `status` is [`FrameStatus::Ready`].
    pub features: Option<FrameFeatures>,
    pub raw: RawFrame,
    /// Returned to the pool when the consumer drops the outcome.
    _permit: OwnedSemaphorePermit,
}

pub(crate) type OutcomeResult = Result<FrameOutcome, StrataError>;

/// Settings shared by every worker of one run.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workers: usize,
    pub reorder_capacity: usize,
    pub frame_timeout: Option<Duration>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the workers and return the pool with the outcome receiver.
    pub fn spawn<S>(
        settings: &WorkerSettings,
        source: Arc<S>,
        activator: LayerActivator,
        shutdown: ShutdownSignal,
    ) -> (Self, mpsc::Receiver<OutcomeResult>)
    where
        S: FeatureSource + ?Sized + 'static,
    {
        let capacity = settings.reorder_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let permits = Arc::new(Semaphore::new(capacity));
        let next = Arc::new(AtomicU64::new(0));
        let frame_count = source.frame_count() as u64;

        let handles = (0..settings.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    source: Arc::clone(&source),
                    activator: activator.clone(),
                    permits: Arc::clone(&permits),
                    next: Arc::clone(&next),
                    frame_count,
                    timeout: settings.frame_timeout,
                    tx: tx.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        (Self { handles }, rx)
    }

    /// Wait for every worker to exit.
    ///
    /// # Errors
    ///
    /// [`StrataError::WorkerFailed`] when a worker panicked or was aborted.
    pub async fn join(mut self) -> Result<(), StrataError> {
        let mut first_failure = None;
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await
                && first_failure.is_none()
            {
                first_failure = Some(StrataError::WorkerFailed(e.to_string()));
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

struct Worker<S: ?Sized> {
    id: usize,
    source: Arc<S>,
    activator: LayerActivator,
    permits: Arc<Semaphore>,
    next: Arc<AtomicU64>,
    frame_count: u64,
    timeout: Option<Duration>,
    tx: mpsc::Sender<OutcomeResult>,
    shutdown: ShutdownSignal,
}

impl<S: FeatureSource + ?Sized + 'static> Worker<S> {
    async fn run(self) {
        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.shutdown.wait() => break,
            };
            let frame_index = self.next.fetch_add(1, Ordering::SeqCst);
            if frame_index >= self.frame_count {
                break;
            }

            // A panicking source must surface as an error, not as a lost frame.
            let task = tokio::spawn(process(
                Arc::clone(&self.source),
                self.activator.clone(),
                self.timeout,
                frame_index,
                permit,
            ));
            let outcome = task.await.unwrap_or_else(|e| {
                Err(StrataError::WorkerFailed(format!(
                    "worker {} failed on frame {frame_index}: {e}",
                    self.id
                )))
            });
            if self.tx.send(outcome).await.is_err() {
                break;
            }
        }
        debug!(worker = self.id, "feature worker exiting");
    }
}

async fn process<S: FeatureSource + ?Sized>(
    source: Arc<S>,
    activator: LayerActivator,
    timeout: Option<Duration>,
    frame_index: u64,
    permit: OwnedSemaphorePermit,
) -> OutcomeResult {
    let fetched = match timeout {
        Some(limit) => tokio::time::timeout(limit, source.features(frame_index))
            .await
            .map_err(|_| ()),
        None => Ok(source.features(frame_index).await),
    };

    let (status, features, raw) = match fetched {
        Ok(Some(features)) => {
            if features.frame_index != frame_index {
                return Err(Misalignment::FrameIndex {
                    expected: frame_index,
                    got: features.frame_index,
                }
                .into());
            }
            let raw = activator.activate(&features);
            (FrameStatus::Ready, Some(features), raw)
        }
        Ok(None) => (FrameStatus::Missing, None, activator.missing_frame(frame_index)),
        Err(()) => {
            warn!(frame_index, "feature fetch timed out");
            (FrameStatus::TimedOut, None, activator.missing_frame(frame_index))
        }
    };

    Ok(FrameOutcome {
        frame_index,
        status,
        features,
        raw,
        _permit: permit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecFeatureSource;
    use strata_types::{LayerCategory, LayerDefinition, Predicate};

    fn activator() -> LayerActivator {
        LayerActivator::new(vec![LayerDefinition {
            name: "motion".to_string(),
            category: LayerCategory::Motion,
            predicate: Predicate::MotionAbove { threshold: 0.5 },
            window: 1,
        }])
        .unwrap()
    }

    fn settings(workers: usize, reorder_capacity: usize) -> WorkerSettings {
        WorkerSettings {
            workers,
            reorder_capacity,
            frame_timeout: None,
        }
    }

    #[tokio::test]
    async fn every_frame_is_processed_once() {
        let frames = (0..20)
            .map(|i| {
                let mut f = FrameFeatures::empty(i);
                f.motion_score = if i % 2 == 0 { 1.0 } else { 0.0 };
                f
            })
            .collect();
        let source = Arc::new(VecFeatureSource::new(frames));
        let (pool, mut rx) =
            WorkerPool::spawn(&settings(3, 64), source, activator(), ShutdownSignal::new());

        let mut seen = Vec::new();
        while let Some(outcome) = rx.recv().await {
            let outcome = outcome.unwrap();
            assert_eq!(outcome.status, FrameStatus::Ready);
            assert_eq!(outcome.raw.states, vec![outcome.frame_index % 2 == 0]);
            seen.push(outcome.frame_index);
        }
        pool.join().await.unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn gaps_become_missing_frames() {
        let source = Arc::new(VecFeatureSource::with_gaps(vec![
            Some(FrameFeatures::empty(0)),
            None,
        ]));
        let (_pool, mut rx) =
            WorkerPool::spawn(&settings(1, 4), source, activator(), ShutdownSignal::new());
        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.status, FrameStatus::Ready);
        assert_eq!(second.status, FrameStatus::Missing);
        assert!(second.raw.missing);
    }

    #[tokio::test]
    async fn mislabelled_record_is_a_misalignment() {
        let source = Arc::new(VecFeatureSource::new(vec![FrameFeatures::empty(7)]));
        let (_pool, mut rx) =
            WorkerPool::spawn(&settings(1, 4), source, activator(), ShutdownSignal::new());
        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StrataError::Misalignment(Misalignment::FrameIndex { expected: 0, got: 7 })
        ));
    }

    #[tokio::test]
    async fn in_flight_frames_are_bounded_by_capacity() {
        let frames = (0..10).map(FrameFeatures::empty).collect();
        let source = Arc::new(VecFeatureSource::new(frames));
        let (_pool, mut rx) =
            WorkerPool::spawn(&settings(4, 2), source, activator(), ShutdownSignal::new());

        // Hold the first two outcomes: no permits remain, so nothing else arrives.
        let a = rx.recv().await.unwrap().unwrap();
        let b = rx.recv().await.unwrap().unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(blocked.is_err());

        drop(a);
        let c = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("a permit was released")
            .unwrap()
            .unwrap();
        assert_eq!(c.frame_index, 2);
        drop(b);
    }

    #[tokio::test]
    async fn shutdown_stops_claiming() {
        let frames = (0..100).map(FrameFeatures::empty).collect();
        let source = Arc::new(VecFeatureSource::new(frames));
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let (pool, mut rx) = WorkerPool::spawn(&settings(2, 8), source, activator(), shutdown);
        assert!(rx.recv().await.is_none());
        pool.join().await.unwrap();
    }
}
