//! Run orchestration.
//!
//! ```text
//!  FeatureSource ──► WorkerPool (N tasks: fetch + activate)
//!                        │ mpsc, any order
//!                        ▼
//!                  ReorderBuffer ──► LayerSmoother ──► SampleAssembler ──► SampleSink
//!                                                             │
//!                                                             └─► EventBus (Frames)
//! ```
//!
//! Everything from the reorder boundary onward runs on one consumer, so
//! the smoother sees frames in strictly ascending order no matter how the
//! workers were scheduled.  The trajectory is validated before any worker
//! is spawned: a misaligned run produces no samples at all.

use std::sync::Arc;

use serde::Serialize;
use strata_cloud::{CloudSchema, SampleSink};
use strata_middleware::{EventBus, Topic};
use strata_perception::{LayerActivator, LayerSmoother, SampleAssembler, TrajectoryAligner};
use strata_types::{
    Event, EventPayload, FrameEvent, RunSummary, StrataError, TrajectoryPoint,
};
use tracing::{debug, info, instrument, warn};

use crate::config::{MissingFramePolicy, PipelineConfig};
use crate::reorder::ReorderBuffer;
use crate::shutdown::ShutdownSignal;
use crate::source::FeatureSource;
use crate::worker_pool::{FrameOutcome, FrameStatus, WorkerPool, WorkerSettings};

const EVENT_SOURCE: &str = "strata-runtime::pipeline";

/// Per-layer diagnostic counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerTally {
    pub layer: String,
    /// Frames whose smoothed value was 1.
    pub active_frames: u64,
    /// Frames whose predicate met an unknown (non-finite) input.
    pub undetermined: u64,
}

/// Outcome of a completed or cancelled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Length of the detection stream.
    pub frames: u64,
    pub samples_written: u64,
    pub missing_frames: u64,
    pub timed_out_frames: u64,
    pub layers: Vec<LayerTally>,
    pub cancelled: bool,
}

impl RunReport {
    fn new(frames: u64, names: &[String]) -> Self {
        Self {
            frames,
            samples_written: 0,
            missing_frames: 0,
            timed_out_frames: 0,
            layers: names
                .iter()
                .map(|name| LayerTally {
                    layer: name.clone(),
                    active_frames: 0,
                    undetermined: 0,
                })
                .collect(),
            cancelled: false,
        }
    }

    pub fn complete(&self) -> bool {
        !self.cancelled && self.samples_written == self.frames
    }
}

/// A validated, reusable pipeline.  Each [`run`][Pipeline::run] starts
/// from fresh smoothing state.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    activator: LayerActivator,
    schema: CloudSchema,
    bus: Option<EventBus>,
}

impl Pipeline {
    /// # Errors
    ///
    /// [`StrataError::InvalidConfig`] when `config` fails validation.
    pub fn new(config: PipelineConfig) -> Result<Self, StrataError> {
        // The activator checks the layer set and the schema its field names.
        let activator = LayerActivator::new(config.layers.clone())?;
        let schema = CloudSchema::from_layers(&config.layers)?;
        config.validate_settings()?;
        Ok(Self {
            config,
            activator,
            schema,
            bus: None,
        })
    }

    /// Publish per-frame events on `bus` for read-only subscribers.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Output field schema for this pipeline's layers.
    pub fn schema(&self) -> &CloudSchema {
        &self.schema
    }

    pub fn activator(&self) -> &LayerActivator {
        &self.activator
    }

    /// Process the whole detection stream into `sink`.
    ///
    /// Samples reach `sink` in ascending frame order.  On cancellation the
    /// report carries `cancelled = true` and every fully processed frame has
    /// been appended.
    ///
    /// # Errors
    ///
    /// * [`StrataError::Misalignment`] before any sample is produced when the
    ///   trajectory does not match the detection stream, or later when a
    ///   feature record carries the wrong frame index.
    /// * [`StrataError::MissingFeatures`] under [`MissingFramePolicy::Fail`].
    /// * Any error returned by `sink`.
    #[instrument(skip_all, fields(layers = self.config.layers.len()))]
    pub async fn run<S, K>(
        &self,
        source: Arc<S>,
        trajectory: Vec<TrajectoryPoint>,
        sink: &mut K,
        shutdown: &ShutdownSignal,
    ) -> Result<RunReport, StrataError>
    where
        S: FeatureSource + ?Sized + 'static,
        K: SampleSink + ?Sized,
    {
        let frame_count = source.frame_count();
        let aligner = TrajectoryAligner::new(trajectory, frame_count)?;
        info!(frames = frame_count, duration_s = aligner.duration(), "run starting");

        let mut smoother = LayerSmoother::new(&self.config.layers);
        let mut assembler = SampleAssembler::new(&self.config.layers);
        let mut report = RunReport::new(frame_count as u64, assembler.layer_names());
        let mut reorder = ReorderBuffer::new(self.config.reorder_capacity);

        let settings = WorkerSettings {
            workers: self.config.workers,
            reorder_capacity: self.config.reorder_capacity,
            frame_timeout: self.config.frame_timeout,
        };
        let (pool, mut rx) =
            WorkerPool::spawn(&settings, source, self.activator.clone(), shutdown.clone());

        while reorder.next_index() < frame_count as u64 {
            let received = tokio::select! {
                biased;
                _ = shutdown.wait() => None,
                outcome = rx.recv() => Some(outcome),
            };
            let outcome = match received {
                None => {
                    report.cancelled = true;
                    break;
                }
                Some(Some(outcome)) => outcome?,
                Some(None) => {
                    // Every worker is gone but frames remain.
                    drop(rx);
                    pool.join().await?;
                    return Err(StrataError::WorkerFailed(format!(
                        "workers exited before frame {}",
                        reorder.next_index()
                    )));
                }
            };

            reorder.insert(outcome.frame_index, outcome)?;
            while let Some((_, ready)) = reorder.pop_ready() {
                self.consume(ready, &aligner, &mut smoother, &mut assembler, sink, &mut report)?;
            }
        }
        drop(rx);
        drop(pool);

        if report.cancelled {
            warn!(
                samples = report.samples_written,
                frames = report.frames,
                "run cancelled"
            );
        }
        self.log_tally(&report);
        self.publish_finished(&report);
        info!(samples = report.samples_written, "run finished");
        Ok(report)
    }

    fn consume<K: SampleSink + ?Sized>(
        &self,
        outcome: FrameOutcome,
        aligner: &TrajectoryAligner,
        smoother: &mut LayerSmoother,
        assembler: &mut SampleAssembler,
        sink: &mut K,
        report: &mut RunReport,
    ) -> Result<(), StrataError> {
        let frame_index = outcome.frame_index;
        match outcome.status {
            FrameStatus::Ready => {}
            FrameStatus::Missing | FrameStatus::TimedOut
                if self.config.missing_frame_policy == MissingFramePolicy::Fail =>
            {
                return Err(StrataError::MissingFeatures { frame_index });
            }
            FrameStatus::Missing => {
                report.missing_frames += 1;
                debug!(frame_index, "missing features, layers forced off");
            }
            FrameStatus::TimedOut => report.timed_out_frames += 1,
        }
        for &layer in &outcome.raw.undetermined {
            if let Some(tally) = report.layers.get_mut(layer) {
                tally.undetermined += 1;
            }
        }

        let smoothed = smoother.step(&outcome.raw)?;
        let sample = assembler.assemble(aligner, &smoothed)?;
        sink.append(&sample)?;
        report.samples_written += 1;
        for (tally, &value) in report.layers.iter_mut().zip(&smoothed.values) {
            tally.active_frames += u64::from(value);
        }

        if let Some(bus) = &self.bus
            && bus.has_subscribers(Topic::Frames)
        {
            let event = Event::new(
                EVENT_SOURCE,
                EventPayload::Frame(FrameEvent {
                    frame_index,
                    time: sample.time,
                    objects: outcome.features.map(|f| f.objects).unwrap_or_default(),
                    layers: sample.ai_layers,
                }),
            );
            // Subscribers may leave at any moment; the output never depends on them.
            let _ = bus.publish_to(Topic::Frames, event);
        }
        Ok(())
    }

    fn log_tally(&self, report: &RunReport) {
        let undetermined: u64 = report.layers.iter().map(|l| l.undetermined).sum();
        if report.missing_frames == 0 && report.timed_out_frames == 0 && undetermined == 0 {
            return;
        }
        warn!(
            missing = report.missing_frames,
            timed_out = report.timed_out_frames,
            undetermined,
            "frames evaluated with incomplete features"
        );
        for tally in report.layers.iter().filter(|l| l.undetermined > 0) {
            warn!(layer = %tally.layer, count = tally.undetermined, "undetermined activations");
        }
    }

    fn publish_finished(&self, report: &RunReport) {
        let Some(bus) = &self.bus else {
            return;
        };
        let summary = RunSummary {
            frames: report.samples_written,
            cancelled: report.cancelled,
        };
        for topic in [Topic::Frames, Topic::Diagnostics] {
            if bus.has_subscribers(topic) {
                let _ = bus.publish_to(
                    topic,
                    Event::new(EVENT_SOURCE, EventPayload::RunFinished(summary)),
                );
            }
        }
    }
}
