//! `strata-runtime` – runs the perceptual layering pipeline.
//!
//! Turns a detection stream plus a camera trajectory into an ordered
//! sequence of [`PerceptualSample`][strata_types::PerceptualSample]s and
//! feeds them to a [`SampleSink`][strata_cloud::SampleSink].
//!
//! # Modules
//!
//! - [`config`] – [`PipelineConfig`], the immutable per-run configuration,
//!   and [`MissingFramePolicy`].
//! - [`source`] – the [`FeatureSource`] seam to the external detectors.
//! - [`worker_pool`] – concurrent feature fetch and layer activation.
//! - [`reorder`] – [`ReorderBuffer`], the ascending-order release boundary.
//! - [`pipeline`] – [`Pipeline`]: smoothing, assembly, sink and event
//!   publication on a single consumer; [`RunReport`].
//! - [`shutdown`] – [`ShutdownSignal`] for cooperative cancellation.
//! - [`annotation`] – [`AnnotationExporter`], an optional read-only
//!   subscriber of per-frame events.
//! - [`telemetry`] – [`init_tracing`].

pub mod annotation;
pub mod config;
pub mod pipeline;
pub mod reorder;
pub mod shutdown;
pub mod source;
pub mod telemetry;
pub mod worker_pool;

pub use annotation::{AnnotationExporter, AnnotationRecord, ExportSummary, Highlight};
pub use config::{MissingFramePolicy, PipelineConfig};
pub use pipeline::{LayerTally, Pipeline, RunReport};
pub use reorder::ReorderBuffer;
pub use shutdown::ShutdownSignal;
pub use source::{FeatureSource, VecFeatureSource};
pub use telemetry::{TracerProviderGuard, init_tracing};
