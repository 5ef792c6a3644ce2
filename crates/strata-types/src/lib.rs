//! `strata-types` – shared data model for the Strata perceptual-sample
//! pipeline.
//!
//! Every other crate in the workspace speaks in these types: per-frame
//! detector measurements ([`FrameFeatures`]), trajectory entries
//! ([`TrajectoryPoint`]), layer configuration ([`LayerDefinition`]), the
//! immutable per-frame output ([`PerceptualSample`]) and the single error
//! enum ([`StrataError`]).

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Detector input
// ────────────────────────────────────────────────────────────────────────────

/// Axis-aligned bounding region of a detection, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// A single object reported by the external detector for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// Detector class label, e.g. `"person"` or `"car"`.
    pub class: String,
    pub bbox: BoundingBox,
    /// Detector confidence in `[0, 1]`, when the detector reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Luminance statistics of a frame (0–255 scale).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Luminance {
    pub mean: f32,
    #[serde(default)]
    pub std_dev: f32,
}

/// Per-frame measurement bundle produced by the perception collaborators.
///
/// Consumed exactly once by the layer activator and, when annotation export
/// is enabled, forwarded read-only on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameFeatures {
    pub frame_index: u64,
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
    #[serde(default)]
    pub motion_score: f32,
    #[serde(default)]
    pub density_score: f32,
    #[serde(default)]
    pub luminance: Luminance,
}

impl FrameFeatures {
    /// A frame with no detections and zeroed scores.
    pub fn empty(frame_index: u64) -> Self {
        Self {
            frame_index,
            objects: Vec::new(),
            motion_score: 0.0,
            density_score: 0.0,
            luminance: Luminance::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trajectory
// ────────────────────────────────────────────────────────────────────────────

/// Camera position in the trajectory's world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Camera orientation as a unit quaternion (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Orientation {
    pub fn identity() -> Self {
        Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 }
    }

    pub fn is_finite(&self) -> bool {
        [self.w, self.x, self.y, self.z].iter().all(|c| c.is_finite())
    }
}

/// One trajectory entry; entry `i` corresponds to frame index `i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Seconds since the start of the capture.
    pub time: f64,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
}

// ────────────────────────────────────────────────────────────────────────────
// Layer configuration
// ────────────────────────────────────────────────────────────────────────────

/// Broad family a layer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerCategory {
    Object,
    Motion,
    Scene,
    Lighting,
}

impl fmt::Display for LayerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerCategory::Object => write!(f, "object"),
            LayerCategory::Motion => write!(f, "motion"),
            LayerCategory::Scene => write!(f, "scene"),
            LayerCategory::Lighting => write!(f, "lighting"),
        }
    }
}

/// Threshold predicate deciding a layer's raw state for one frame.
///
/// Every comparison is strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Count of matching objects is strictly greater than `greater_than`.
    ///
    /// `class = None` matches every class; `min_confidence = None` accepts
    /// every detection regardless of confidence.
    ObjectCount {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_confidence: Option<f32>,
        #[serde(default)]
        greater_than: u32,
    },
    MotionAbove { threshold: f32 },
    DensityAbove { threshold: f32 },
    LuminanceAbove { threshold: f32 },
    LuminanceBelow { threshold: f32 },
}

impl Predicate {
    /// True when `object` is one of the detections this predicate counts.
    ///
    /// Always false for predicates that do not look at objects.
    pub fn counts_object(&self, object: &DetectedObject) -> bool {
        match self {
            Predicate::ObjectCount {
                class,
                min_confidence,
                ..
            } => {
                let class_ok = class.as_deref().is_none_or(|c| c == object.class);
                let confidence_ok = match (min_confidence, object.confidence) {
                    (None, _) => true,
                    (Some(min), Some(conf)) => conf >= *min,
                    (Some(_), None) => false,
                };
                class_ok && confidence_ok
            }
            _ => false,
        }
    }
}

/// A named binary perceptual signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub name: String,
    pub category: LayerCategory,
    pub predicate: Predicate,
    /// Hysteresis window N: consecutive confirming frames needed to flip the
    /// reported state.
    pub window: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

/// Ordered `layer name → active` mapping covering every configured layer.
///
/// Serialised as a map of `name: 0 | 1`, preserving configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerVector {
    entries: Vec<(String, bool)>,
}

impl LayerVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, active: bool) {
        self.entries.push((name.into(), active));
    }

    /// Value of `name`, or `None` when the layer is not part of the vector.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Names of the layers that are currently active.
    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, v)| *v)
            .map(|(n, _)| n.as_str())
    }
}

impl Serialize for LayerVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, active) in &self.entries {
            map.serialize_entry(name, &u8::from(*active))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LayerVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LayerVectorVisitor;

        impl<'de> Visitor<'de> for LayerVectorVisitor {
            type Value = LayerVector;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of layer name to 0 or 1")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<LayerVector, A::Error> {
                let mut vector = LayerVector::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, u8>()? {
                    vector.push(name, value != 0);
                }
                Ok(vector)
            }
        }

        deserializer.deserialize_map(LayerVectorVisitor)
    }
}

/// Immutable evidence record for one moment in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptualSample {
    pub frame_index: u64,
    pub time: f64,
    pub position: Position,
    pub ai_layers: LayerVector,
}

// ────────────────────────────────────────────────────────────────────────────
// Event bus payloads
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the per-frame event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"strata-runtime::pipeline"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A frame has been finalised: its detections and smoothed layers.
    Frame(FrameEvent),
    /// The run ended; no further frame events will follow.
    RunFinished(RunSummary),
}

/// Read-only view of one finalised frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEvent {
    pub frame_index: u64,
    pub time: f64,
    /// Detections of the frame; empty when the frame was missing.
    pub objects: Vec<DetectedObject>,
    pub layers: LayerVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub frames: u64,
    pub cancelled: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Ways the frame ↔ time ↔ position correspondence can be broken.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Misalignment {
    #[error("detection stream has {detections} frames but trajectory has {trajectory} entries")]
    LengthMismatch { detections: usize, trajectory: usize },

    #[error("trajectory time not strictly increasing at index {index}: {previous} -> {current}")]
    NonMonotonicTime {
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error("trajectory entry {index} has a non-finite time, position or orientation")]
    NonFiniteEntry { index: usize },

    #[error("feature record for frame {expected} carries frame index {got}")]
    FrameIndex { expected: u64, got: u64 },
}

/// Error type spanning misalignment, configuration, missing input and output
/// failures.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Misalignment: {0}")]
    Misalignment(#[from] Misalignment),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No features available for frame {frame_index}")]
    MissingFeatures { frame_index: u64 },

    #[error("Assembly failed at frame {frame_index}: {reason}")]
    Assembly { frame_index: u64, reason: String },

    #[error("Sample for frame {got} arrived after frame {previous}")]
    OutOfOrderSample { previous: u64, got: u64 },

    #[error("Encoding error on {}: {source}", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Event bus error: {0}")]
    Channel(String),

    #[error("Feature worker failed: {0}")]
    WorkerFailed(String),
}

impl StrataError {
    /// True when the error reports a broken frame ↔ trajectory correspondence.
    pub fn is_misalignment(&self) -> bool {
        matches!(self, StrataError::Misalignment(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(conf: Option<f32>) -> DetectedObject {
        DetectedObject {
            class: "person".to_string(),
            bbox: BoundingBox {
                x_min: 0.0,
                y_min: 0.0,
                x_max: 10.0,
                y_max: 20.0,
            },
            confidence: conf,
        }
    }

    #[test]
    fn predicate_deserializes_from_tagged_form() {
        let json = r#"{"kind":"object_count","class":"person","greater_than":0}"#;
        let p: Predicate = serde_json::from_str(json).unwrap();
        assert_eq!(
            p,
            Predicate::ObjectCount {
                class: Some("person".to_string()),
                min_confidence: None,
                greater_than: 0,
            }
        );

        let json = r#"{"kind":"motion_above","threshold":0.4}"#;
        let p: Predicate = serde_json::from_str(json).unwrap();
        assert!(matches!(p, Predicate::MotionAbove { threshold } if (threshold - 0.4).abs() < 1e-6));
    }

    #[test]
    fn counts_object_respects_class_and_confidence() {
        let p = Predicate::ObjectCount {
            class: Some("person".to_string()),
            min_confidence: Some(0.5),
            greater_than: 0,
        };
        assert!(p.counts_object(&person(Some(0.9))));
        assert!(p.counts_object(&person(Some(0.5))));
        assert!(!p.counts_object(&person(Some(0.2))));
        assert!(!p.counts_object(&person(None)));

        let mut car = person(Some(0.9));
        car.class = "car".to_string();
        assert!(!p.counts_object(&car));

        let any = Predicate::ObjectCount {
            class: None,
            min_confidence: None,
            greater_than: 0,
        };
        assert!(any.counts_object(&car));
        assert!(!Predicate::MotionAbove { threshold: 0.1 }.counts_object(&car));
    }

    #[test]
    fn layer_vector_serializes_as_ordered_binary_map() {
        let mut v = LayerVector::new();
        v.push("people", true);
        v.push("motion", false);
        v.push("crowd", true);

        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"people":1,"motion":0,"crowd":1}"#);

        let back: LayerVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["people", "motion", "crowd"]);
        assert_eq!(back.active().collect::<Vec<_>>(), vec!["people", "crowd"]);
        assert_eq!(back.get("motion"), Some(false));
        assert_eq!(back.get("ghost"), None);
    }

    #[test]
    fn frame_features_defaults_missing_fields() {
        let f: FrameFeatures = serde_json::from_str(r#"{"frame_index":7}"#).unwrap();
        assert_eq!(f, FrameFeatures::empty(7));
    }

    #[test]
    fn event_roundtrip() {
        let mut layers = LayerVector::new();
        layers.push("people", true);
        let event = Event::new(
            "strata-runtime::pipeline",
            EventPayload::Frame(FrameEvent {
                frame_index: 3,
                time: 0.1,
                objects: vec![person(Some(0.8))],
                layers,
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        match back.payload {
            EventPayload::Frame(frame) => {
                assert_eq!(frame.frame_index, 3);
                assert_eq!(frame.layers.get("people"), Some(true));
            }
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn strata_error_display() {
        let err = StrataError::from(Misalignment::LengthMismatch {
            detections: 10,
            trajectory: 9,
        });
        assert!(err.to_string().contains("Misalignment"));
        assert!(err.to_string().contains("10"));
        assert!(err.is_misalignment());

        let err = StrataError::Encoding {
            path: PathBuf::from("/tmp/out.ply"),
            source: std::io::Error::other("disk full"),
        };
        assert!(err.to_string().contains("/tmp/out.ply"));
        assert!(!err.is_misalignment());
    }
}
