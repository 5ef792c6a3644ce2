//! PLY 1.0 point-cloud encoding.
//!
//! One `vertex` per [`PerceptualSample`]:
//!
//! ```text
//! ply
//! format binary_little_endian 1.0
//! comment strata layers: people,motion
//! element vertex 120
//! property double x
//! property double y
//! property double z
//! property double time
//! property uchar people
//! property uchar motion
//! end_header
//! ```
//!
//! The layer properties follow the schema declared when encoding starts; a
//! sample whose layer set differs is rejected rather than reconciled.

use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use strata_types::{LayerDefinition, PerceptualSample, StrataError};

// ────────────────────────────────────────────────────────────────────────────
// Format & schema
// ────────────────────────────────────────────────────────────────────────────

/// PLY body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlyFormat {
    Ascii,
    #[default]
    BinaryLittleEndian,
}

impl fmt::Display for PlyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlyFormat::Ascii => write!(f, "ascii"),
            PlyFormat::BinaryLittleEndian => write!(f, "binary_little_endian"),
        }
    }
}

/// Layer fields of the cloud, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSchema {
    layers: Vec<String>,
}

impl CloudSchema {
    /// Declare the schema.
    ///
    /// # Errors
    ///
    /// [`StrataError::InvalidConfig`] for an empty, blank, duplicated or
    /// whitespace-containing layer name (PLY property names are
    /// whitespace-delimited).
    pub fn new(layers: Vec<String>) -> Result<Self, StrataError> {
        for (i, name) in layers.iter().enumerate() {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(StrataError::InvalidConfig(format!(
                    "layer name '{name}' cannot be used as a point-cloud field"
                )));
            }
            if matches!(name.as_str(), "x" | "y" | "z" | "time") {
                return Err(StrataError::InvalidConfig(format!(
                    "layer name '{name}' collides with a point-cloud coordinate field"
                )));
            }
            if layers[..i].contains(name) {
                return Err(StrataError::InvalidConfig(format!(
                    "duplicate point-cloud field '{name}'"
                )));
            }
        }
        Ok(Self { layers })
    }

    pub fn from_layers(layers: &[LayerDefinition]) -> Result<Self, StrataError> {
        Self::new(layers.iter().map(|l| l.name.clone()).collect())
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Check that `sample` carries exactly the declared layers, in order.
    pub fn check(&self, sample: &PerceptualSample) -> Result<(), StrataError> {
        let matches = sample.ai_layers.len() == self.layers.len()
            && sample
                .ai_layers
                .names()
                .zip(&self.layers)
                .all(|(got, want)| got == want);
        if matches {
            Ok(())
        } else {
            Err(StrataError::InvalidConfig(format!(
                "layer set changed mid-run at frame {}: expected [{}], got [{}]",
                sample.frame_index,
                self.layers.join(","),
                sample.ai_layers.names().collect::<Vec<_>>().join(",")
            )))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Header & body
// ────────────────────────────────────────────────────────────────────────────

/// Write the PLY header for `vertex_count` points.
pub fn write_header<W: Write>(
    writer: &mut W,
    schema: &CloudSchema,
    format: PlyFormat,
    vertex_count: u64,
) -> io::Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format {format} 1.0")?;
    writeln!(writer, "comment strata layers: {}", schema.layers.join(","))?;
    writeln!(writer, "element vertex {vertex_count}")?;
    for axis in ["x", "y", "z", "time"] {
        writeln!(writer, "property double {axis}")?;
    }
    for layer in &schema.layers {
        writeln!(writer, "property uchar {layer}")?;
    }
    writeln!(writer, "end_header")
}

/// Write one vertex.  The caller has already checked the schema.
pub fn write_point<W: Write>(
    writer: &mut W,
    format: PlyFormat,
    sample: &PerceptualSample,
) -> io::Result<()> {
    let p = sample.position;
    match format {
        PlyFormat::Ascii => {
            write!(writer, "{} {} {} {}", p.x, p.y, p.z, sample.time)?;
            for (_, active) in sample.ai_layers.iter() {
                write!(writer, " {}", u8::from(active))?;
            }
            writeln!(writer)
        }
        PlyFormat::BinaryLittleEndian => {
            for v in [p.x, p.y, p.z, sample.time] {
                writer.write_all(&v.to_le_bytes())?;
            }
            for (_, active) in sample.ai_layers.iter() {
                writer.write_all(&[u8::from(active)])?;
            }
            Ok(())
        }
    }
}

/// Guards the append-only contract: schema fixed, frames strictly ascending.
#[derive(Debug, Clone)]
pub(crate) struct AppendGuard {
    schema: CloudSchema,
    last_frame: Option<u64>,
    points: u64,
}

impl AppendGuard {
    pub(crate) fn new(schema: CloudSchema) -> Self {
        Self {
            schema,
            last_frame: None,
            points: 0,
        }
    }

    pub(crate) fn admit(&mut self, sample: &PerceptualSample) -> Result<(), StrataError> {
        self.schema.check(sample)?;
        if let Some(previous) = self.last_frame
            && sample.frame_index <= previous
        {
            return Err(StrataError::OutOfOrderSample {
                previous,
                got: sample.frame_index,
            });
        }
        self.last_frame = Some(sample.frame_index);
        self.points += 1;
        Ok(())
    }

    pub(crate) fn schema(&self) -> &CloudSchema {
        &self.schema
    }

    pub(crate) fn points(&self) -> u64 {
        self.points
    }
}

/// Encode a complete sample sequence into an in-memory PLY document.
pub fn encode_ply(
    schema: &CloudSchema,
    format: PlyFormat,
    samples: &[PerceptualSample],
) -> Result<Vec<u8>, StrataError> {
    let mut guard = AppendGuard::new(schema.clone());
    let mut body = Vec::new();
    for sample in samples {
        guard.admit(sample)?;
        write_point(&mut body, format, sample).map_err(in_memory)?;
    }

    let mut out = Vec::with_capacity(body.len() + 256);
    write_header(&mut out, schema, format, guard.points()).map_err(in_memory)?;
    out.extend_from_slice(&body);
    Ok(out)
}

fn in_memory(source: io::Error) -> StrataError {
    StrataError::Encoding {
        path: "<memory>".into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::{LayerVector, Position};

    fn schema() -> CloudSchema {
        CloudSchema::new(vec!["people".to_string(), "motion".to_string()]).unwrap()
    }

    fn sample(frame_index: u64, people: bool, motion: bool) -> PerceptualSample {
        let mut ai_layers = LayerVector::new();
        ai_layers.push("people", people);
        ai_layers.push("motion", motion);
        PerceptualSample {
            frame_index,
            time: frame_index as f64 * 0.5,
            position: Position::new(1.0, -2.5, 0.25),
            ai_layers,
        }
    }

    #[test]
    fn ascii_document_layout() {
        let bytes = encode_ply(
            &schema(),
            PlyFormat::Ascii,
            &[sample(0, false, true), sample(1, true, true)],
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let expected = "ply\n\
format ascii 1.0\n\
comment strata layers: people,motion\n\
element vertex 2\n\
property double x\n\
property double y\n\
property double z\n\
property double time\n\
property uchar people\n\
property uchar motion\n\
end_header\n\
1 -2.5 0.25 0 0 1\n\
1 -2.5 0.25 0.5 1 1\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn binary_body_is_little_endian_and_packed() {
        let bytes = encode_ply(
            &schema(),
            PlyFormat::BinaryLittleEndian,
            &[sample(3, true, false)],
        )
        .unwrap();
        let marker = b"end_header\n";
        let start = bytes
            .windows(marker.len())
            .position(|w| w == marker)
            .unwrap()
            + marker.len();
        let body = &bytes[start..];
        assert_eq!(body.len(), 4 * 8 + 2);
        assert_eq!(f64::from_le_bytes(body[0..8].try_into().unwrap()), 1.0);
        assert_eq!(f64::from_le_bytes(body[24..32].try_into().unwrap()), 1.5);
        assert_eq!(&body[32..], &[1, 0]);
    }

    #[test]
    fn empty_sequence_has_zero_vertices() {
        let bytes = encode_ply(&schema(), PlyFormat::Ascii, &[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("element vertex 0\n"));
        assert!(text.ends_with("end_header\n"));
    }

    #[test]
    fn reordered_samples_are_rejected() {
        let err = encode_ply(
            &schema(),
            PlyFormat::Ascii,
            &[sample(1, false, false), sample(0, false, false)],
        )
        .unwrap_err();
        assert!(matches!(err, StrataError::OutOfOrderSample { previous: 1, got: 0 }));
    }

    #[test]
    fn changed_layer_set_is_a_config_error() {
        let mut extra = sample(1, false, false);
        extra.ai_layers.push("crowd", true);
        let err = encode_ply(&schema(), PlyFormat::Ascii, &[sample(0, false, false), extra])
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidConfig(msg) if msg.contains("mid-run")));
    }

    #[test]
    fn schema_rejects_unusable_names() {
        assert!(CloudSchema::new(vec!["two words".to_string()]).is_err());
        assert!(CloudSchema::new(vec!["time".to_string()]).is_err());
        assert!(CloudSchema::new(vec!["a".to_string(), "a".to_string()]).is_err());
        assert!(CloudSchema::new(vec![String::new()]).is_err());
    }
}
