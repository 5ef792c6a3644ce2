//! Run configuration file – reads/writes `strata.toml`.
//!
//! The file is parsed once, `STRATA_*` overrides are applied, and the result
//! is turned into one immutable [`PipelineConfig`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strata_cloud::PlyFormat;
use strata_runtime::config::{DEFAULT_REORDER_CAPACITY, DEFAULT_WORKERS};
use strata_runtime::{MissingFramePolicy, PipelineConfig};
use strata_types::{LayerCategory, LayerDefinition, Predicate};

/// One `[[layers]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub category: LayerCategory,
    pub window: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub predicate: Predicate,
}

impl LayerConfig {
    fn definition(&self) -> LayerDefinition {
        LayerDefinition {
            name: self.name.clone(),
            category: self.category,
            predicate: self.predicate.clone(),
            window: self.window,
        }
    }
}

/// Contents of `strata.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub missing_frame_policy: MissingFramePolicy,

    /// Per-frame feature timeout; absent means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_timeout_ms: Option<u64>,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_reorder_capacity")]
    pub reorder_capacity: usize,

    #[serde(default)]
    pub output_format: PlyFormat,

    /// Layers whose objects the annotation export highlights.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlight_layers: Vec<String>,

    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

fn default_enabled() -> bool {
    true
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_reorder_capacity() -> usize {
    DEFAULT_REORDER_CAPACITY
}

impl FileConfig {
    /// Starter configuration written by `strata init`.
    pub fn example() -> Self {
        Self {
            missing_frame_policy: MissingFramePolicy::FailOpen,
            frame_timeout_ms: Some(2_000),
            workers: DEFAULT_WORKERS,
            reorder_capacity: DEFAULT_REORDER_CAPACITY,
            output_format: PlyFormat::BinaryLittleEndian,
            highlight_layers: vec!["people".to_string()],
            layers: vec![
                LayerConfig {
                    name: "people".to_string(),
                    category: LayerCategory::Object,
                    window: 3,
                    enabled: true,
                    predicate: Predicate::ObjectCount {
                        class: Some("person".to_string()),
                        min_confidence: Some(0.5),
                        greater_than: 0,
                    },
                },
                LayerConfig {
                    name: "motion".to_string(),
                    category: LayerCategory::Motion,
                    window: 5,
                    enabled: true,
                    predicate: Predicate::MotionAbove { threshold: 0.3 },
                },
                LayerConfig {
                    name: "dark".to_string(),
                    category: LayerCategory::Lighting,
                    window: 10,
                    enabled: true,
                    predicate: Predicate::LuminanceBelow { threshold: 40.0 },
                },
            ],
        }
    }

    /// Build the run configuration.  Disabled layers are dropped here, so a
    /// highlight entry naming one fails validation as an unknown reference.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let layers = self
            .layers
            .iter()
            .filter(|l| l.enabled)
            .map(LayerConfig::definition)
            .collect();
        let mut config = PipelineConfig::new(layers);
        config.missing_frame_policy = self.missing_frame_policy;
        config.frame_timeout = self.frame_timeout_ms.map(Duration::from_millis);
        config.workers = self.workers;
        config.reorder_capacity = self.reorder_capacity;
        config.highlight_layers = self.highlight_layers.clone();
        config
    }
}

/// Load the config at `path` and apply environment overrides.
pub fn load_from(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let mut cfg: FileConfig =
        toml::from_str(&raw).with_context(|| format!("failed to parse config at {}", path.display()))?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `STRATA_*` environment variable overrides to `cfg`.
///
/// Values that do not parse are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRATA_WORKERS` | `workers` |
/// | `STRATA_REORDER_CAPACITY` | `reorder_capacity` |
/// | `STRATA_FRAME_TIMEOUT_MS` | `frame_timeout_ms` |
/// | `STRATA_MISSING_FRAME_POLICY` | `missing_frame_policy` |
pub fn apply_env_overrides(cfg: &mut FileConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut FileConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("STRATA_WORKERS")
        && let Ok(n) = v.trim().parse::<usize>()
    {
        cfg.workers = n;
    }
    if let Some(v) = lookup("STRATA_REORDER_CAPACITY")
        && let Ok(n) = v.trim().parse::<usize>()
    {
        cfg.reorder_capacity = n;
    }
    if let Some(v) = lookup("STRATA_FRAME_TIMEOUT_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.frame_timeout_ms = Some(ms);
    }
    if let Some(v) = lookup("STRATA_MISSING_FRAME_POLICY")
        && let Ok(policy) = v.parse::<MissingFramePolicy>()
    {
        cfg.missing_frame_policy = policy;
    }
}

/// Write `cfg` to `path`, creating parent directories.
pub fn save_to(cfg: &FileConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let raw = toml::to_string_pretty(cfg).context("failed to serialize config")?;
    fs::write(path, raw).with_context(|| format!("failed to write config at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_runtime::Pipeline;

    const SAMPLE: &str = r#"
missing_frame_policy = "fail"
frame_timeout_ms = 1500
workers = 2
output_format = "ascii"
highlight_layers = ["people"]

[[layers]]
name = "people"
category = "object"
window = 3
[layers.predicate]
kind = "object_count"
class = "person"
greater_than = 0

[[layers]]
name = "crowd"
category = "scene"
window = 4
enabled = false
[layers.predicate]
kind = "density_above"
threshold = 0.7

[[layers]]
name = "bright"
category = "lighting"
window = 2
[layers.predicate]
kind = "luminance_above"
threshold = 180.0
"#;

    fn write(dir: &tempfile::TempDir, text: &str) -> std::path::PathBuf {
        let path = dir.path().join("strata.toml");
        fs::write(&path, text).expect("write config");
        path
    }

    #[test]
    fn parses_full_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = load_from(&write(&dir, SAMPLE)).expect("load");

        assert_eq!(cfg.missing_frame_policy, MissingFramePolicy::Fail);
        assert_eq!(cfg.frame_timeout_ms, Some(1500));
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.reorder_capacity, DEFAULT_REORDER_CAPACITY);
        assert_eq!(cfg.output_format, PlyFormat::Ascii);
        assert_eq!(cfg.layers.len(), 3);
        assert!(cfg.layers[0].enabled);
        assert!(!cfg.layers[1].enabled);
        assert_eq!(
            cfg.layers[0].predicate,
            Predicate::ObjectCount {
                class: Some("person".to_string()),
                min_confidence: None,
                greater_than: 0,
            }
        );
    }

    #[test]
    fn disabled_layers_are_dropped() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let pipeline = load_from(&write(&dir, SAMPLE)).expect("load").pipeline_config();
        let names: Vec<_> = pipeline.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["people", "bright"]);
        assert_eq!(pipeline.frame_timeout, Some(Duration::from_millis(1500)));
        assert!(Pipeline::new(pipeline).is_ok());
    }

    #[test]
    fn highlight_of_disabled_layer_fails_validation() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut cfg = load_from(&write(&dir, SAMPLE)).expect("load");
        cfg.highlight_layers = vec!["crowd".to_string()];
        assert!(Pipeline::new(cfg.pipeline_config()).is_err());
    }

    #[test]
    fn unknown_predicate_kind_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let text = r#"
[[layers]]
name = "x"
category = "scene"
window = 1
[layers.predicate]
kind = "vibes_above"
threshold = 1.0
"#;
        assert!(load_from(&write(&dir, text)).is_err());
    }

    #[test]
    fn example_roundtrips_and_validates() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("strata.toml");
        save_to(&FileConfig::example(), &path).expect("save");

        let loaded = load_from(&path).expect("load");
        assert_eq!(loaded.layers, FileConfig::example().layers);
        assert!(Pipeline::new(loaded.pipeline_config()).is_ok());
    }

    #[test]
    fn load_from_missing_file_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(load_from(&dir.path().join("absent.toml")).is_err());
    }

    fn overrides(vars: &[(&str, &str)]) -> FileConfig {
        let mut cfg = FileConfig::example();
        apply_overrides(&mut cfg, |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        });
        cfg
    }

    #[test]
    fn env_override_changes_workers() {
        assert_eq!(overrides(&[("STRATA_WORKERS", " 7 ")]).workers, 7);
    }

    #[test]
    fn env_override_ignores_invalid_capacity() {
        let cfg = overrides(&[("STRATA_REORDER_CAPACITY", "lots")]);
        assert_eq!(cfg.reorder_capacity, DEFAULT_REORDER_CAPACITY);
    }

    #[test]
    fn env_override_sets_timeout_and_policy() {
        let cfg = overrides(&[
            ("STRATA_FRAME_TIMEOUT_MS", "250"),
            ("STRATA_MISSING_FRAME_POLICY", "fail"),
        ]);
        assert_eq!(cfg.frame_timeout_ms, Some(250));
        assert_eq!(cfg.missing_frame_policy, MissingFramePolicy::Fail);
    }

    #[test]
    fn no_overrides_leaves_config_untouched() {
        assert_eq!(overrides(&[]), FileConfig::example());
    }
}
