//! Annotation exporter.
//!
//! A read-only subscriber of [`Topic::Frames`][strata_middleware::Topic].
//! For each finalised frame it lists the detected objects responsible for
//! every *active* object-count layer it highlights, one JSON line per frame.
//! An image overlay tool draws the boxes from these records.
//!
//! The exporter owns nothing the pipeline reads.  Leaving it out changes
//! only whether events are published, never the point cloud.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_middleware::TopicReceiver;
use tokio::sync::broadcast::error::RecvError;
use strata_types::{
    BoundingBox, EventPayload, FrameEvent, LayerDefinition, Predicate, StrataError,
};
use tracing::{debug, info, warn};

/// One highlighted object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub layer: String,
    pub class: String,
    pub bbox: BoundingBox,
    pub confidence: Option<f32>,
}

/// One JSON line of the annotation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub frame_index: u64,
    pub time: f64,
    pub active_layers: Vec<String>,
    pub highlights: Vec<Highlight>,
}

/// What one export wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub records: u64,
    /// Frame events dropped because the exporter fell behind the bus.
    pub skipped: u64,
}

impl ExportSummary {
    /// True when every published frame made it into the file.
    pub fn is_complete(&self) -> bool {
        self.skipped == 0
    }
}

#[derive(Debug, Clone)]
pub struct AnnotationExporter {
    /// Highlighted object-count layers with their predicates.
    highlighted: Vec<(String, Predicate)>,
}

impl AnnotationExporter {
    /// Highlight the object-count layers named in `highlight`, or every
    /// object-count layer when `highlight` is empty.
    ///
    /// # Errors
    ///
    /// [`StrataError::InvalidConfig`] when `highlight` names a layer that is
    /// not configured or is not an object-count layer.
    pub fn new(layers: &[LayerDefinition], highlight: &[String]) -> Result<Self, StrataError> {
        let is_object = |l: &LayerDefinition| matches!(l.predicate, Predicate::ObjectCount { .. });

        let highlighted = if highlight.is_empty() {
            layers
                .iter()
                .filter(|l| is_object(l))
                .map(|l| (l.name.clone(), l.predicate.clone()))
                .collect()
        } else {
            highlight
                .iter()
                .map(|name| {
                    let layer = layers.iter().find(|l| &l.name == name).ok_or_else(|| {
                        StrataError::InvalidConfig(format!("unknown layer reference '{name}'"))
                    })?;
                    if !is_object(layer) {
                        return Err(StrataError::InvalidConfig(format!(
                            "layer '{name}' has no objects to highlight"
                        )));
                    }
                    Ok((layer.name.clone(), layer.predicate.clone()))
                })
                .collect::<Result<_, _>>()?
        };
        Ok(Self { highlighted })
    }

    /// Names of the layers this exporter highlights.
    pub fn highlighted_layers(&self) -> impl Iterator<Item = &str> {
        self.highlighted.iter().map(|(name, _)| name.as_str())
    }

    /// Build the record for one frame.
    pub fn annotate(&self, frame: &FrameEvent) -> AnnotationRecord {
        let mut highlights = Vec::new();
        for (layer, predicate) in &self.highlighted {
            if frame.layers.get(layer) != Some(true) {
                continue;
            }
            highlights.extend(frame.objects.iter().filter(|o| predicate.counts_object(o)).map(
                |o| Highlight {
                    layer: layer.clone(),
                    class: o.class.clone(),
                    bbox: o.bbox,
                    confidence: o.confidence,
                },
            ));
        }
        AnnotationRecord {
            frame_index: frame.frame_index,
            time: frame.time,
            active_layers: frame.layers.active().map(str::to_string).collect(),
            highlights,
        }
    }

    /// Consume frame events from `rx` and write JSON lines to `path` until
    /// the run finishes or the bus closes.
    ///
    /// A lagging receiver loses frames; the loss is counted in
    /// [`ExportSummary::skipped`] rather than failing the export, since the
    /// point cloud must not depend on this subscriber.
    ///
    /// # Errors
    ///
    /// [`StrataError::Encoding`] when the file cannot be written.
    pub async fn export_to(
        self,
        mut rx: TopicReceiver,
        path: impl AsRef<Path>,
    ) -> Result<ExportSummary, StrataError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| encoding(&path, e))?;
        let mut out = BufWriter::new(file);
        let mut summary = ExportSummary {
            records: 0,
            skipped: 0,
        };

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "annotation export fell behind; frames skipped");
                    summary.skipped += n;
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event.payload {
                EventPayload::Frame(frame) => {
                    let record = self.annotate(&frame);
                    serde_json::to_writer(&mut out, &record)
                        .map_err(|e| encoding(&path, e.into()))?;
                    out.write_all(b"\n").map_err(|e| encoding(&path, e))?;
                    summary.records += 1;
                }
                EventPayload::RunFinished(run) => {
                    debug!(frames = run.frames, "annotation export saw run end");
                    break;
                }
            }
        }
        out.flush().map_err(|e| encoding(&path, e))?;
        info!(
            path = %path.display(),
            records = summary.records,
            skipped = summary.skipped,
            "annotations written"
        );
        Ok(summary)
    }
}

fn encoding(path: &Path, source: std::io::Error) -> StrataError {
    StrataError::Encoding {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_middleware::{EventBus, Topic};
    use strata_types::{DetectedObject, Event, LayerCategory, LayerVector, RunSummary};

    fn object_layer(name: &str, class: &str) -> LayerDefinition {
        LayerDefinition {
            name: name.to_string(),
            category: LayerCategory::Object,
            predicate: Predicate::ObjectCount {
                class: Some(class.to_string()),
                min_confidence: Some(0.5),
                greater_than: 0,
            },
            window: 1,
        }
    }

    fn motion_layer() -> LayerDefinition {
        LayerDefinition {
            name: "motion".to_string(),
            category: LayerCategory::Motion,
            predicate: Predicate::MotionAbove { threshold: 0.2 },
            window: 1,
        }
    }

    fn object(class: &str, confidence: f32) -> DetectedObject {
        DetectedObject {
            class: class.to_string(),
            bbox: BoundingBox {
                x_min: 1.0,
                y_min: 2.0,
                x_max: 3.0,
                y_max: 4.0,
            },
            confidence: Some(confidence),
        }
    }

    fn frame(people: bool, cars: bool) -> FrameEvent {
        let mut layers = LayerVector::new();
        layers.push("people", people);
        layers.push("cars", cars);
        layers.push("motion", true);
        FrameEvent {
            frame_index: 3,
            time: 0.3,
            objects: vec![object("person", 0.9), object("person", 0.2), object("car", 0.8)],
            layers,
        }
    }

    fn layers() -> Vec<LayerDefinition> {
        vec![object_layer("people", "person"), object_layer("cars", "car"), motion_layer()]
    }

    #[test]
    fn only_objects_of_active_layers_are_highlighted() {
        let exporter = AnnotationExporter::new(&layers(), &[]).unwrap();
        let record = exporter.annotate(&frame(true, false));
        assert_eq!(record.active_layers, vec!["people", "motion"]);
        assert_eq!(record.highlights.len(), 1);
        assert_eq!(record.highlights[0].layer, "people");
        assert_eq!(record.highlights[0].confidence, Some(0.9));
    }

    #[test]
    fn highlight_list_restricts_layers() {
        let exporter = AnnotationExporter::new(&layers(), &["cars".to_string()]).unwrap();
        assert_eq!(exporter.highlighted_layers().collect::<Vec<_>>(), vec!["cars"]);
        let record = exporter.annotate(&frame(true, true));
        assert_eq!(record.highlights.len(), 1);
        assert_eq!(record.highlights[0].class, "car");
    }

    #[test]
    fn bad_highlight_references_rejected() {
        assert!(AnnotationExporter::new(&layers(), &["ghost".to_string()]).is_err());
        assert!(AnnotationExporter::new(&layers(), &["motion".to_string()]).is_err());
    }

    #[tokio::test]
    async fn export_writes_one_line_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.jsonl");
        let bus = EventBus::default();
        let rx = bus.subscribe_to(Topic::Frames);
        let exporter = AnnotationExporter::new(&layers(), &[]).unwrap();
        let task = tokio::spawn(exporter.export_to(rx, path.clone()));

        bus.publish_to(Topic::Frames, Event::new("test", EventPayload::Frame(frame(true, true))))
            .unwrap();
        bus.publish_to(
            Topic::Frames,
            Event::new(
                "test",
                EventPayload::RunFinished(RunSummary {
                    frames: 1,
                    cancelled: false,
                }),
            ),
        )
        .unwrap();

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.records, 1);
        assert!(summary.is_complete());
        let text = std::fs::read_to_string(&path).unwrap();
        let record: AnnotationRecord = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(record.frame_index, 3);
        assert_eq!(record.highlights.len(), 2);
    }

    #[tokio::test]
    async fn lagging_export_counts_skipped_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.jsonl");
        let bus = EventBus::new(2);
        let rx = bus.subscribe_to(Topic::Frames);

        // Overrun the channel before the exporter starts reading.
        for _ in 0..5 {
            bus.publish_to(Topic::Frames, Event::new("test", EventPayload::Frame(frame(true, false))))
                .unwrap();
        }
        bus.publish_to(
            Topic::Frames,
            Event::new(
                "test",
                EventPayload::RunFinished(RunSummary {
                    frames: 5,
                    cancelled: false,
                }),
            ),
        )
        .unwrap();

        let exporter = AnnotationExporter::new(&layers(), &[]).unwrap();
        let summary = exporter.export_to(rx, path.clone()).await.unwrap();
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.records, 1);
        assert!(!summary.is_complete());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
