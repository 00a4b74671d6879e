//! Model configuration
//!
//! Parsed from the model directory's `config.json`. The configuration is
//! immutable once a model is created; every request is validated against
//! the input/output sections here.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::dtype::DataType;
use crate::error::{Error, Result};

/// Where an instance replica runs.
///
/// `Auto` is the unset default in the wire format; it must be resolved
/// to a concrete kind before instances are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum InstanceKind {
    #[serde(rename = "KIND_AUTO")]
    Auto,
    #[serde(rename = "KIND_CPU")]
    Cpu,
    #[serde(rename = "KIND_GPU")]
    Gpu,
    #[serde(rename = "KIND_MODEL")]
    Model,
}

impl std::fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "KIND_AUTO",
            Self::Cpu => "KIND_CPU",
            Self::Gpu => "KIND_GPU",
            Self::Model => "KIND_MODEL",
        };
        f.write_str(s)
    }
}

/// Reshape override applied to an input after batch-dim handling.
#[derive(Debug, Clone, Deserialize)]
pub struct ReshapeConfig {
    pub shape: Vec<i64>,
}

/// One declared model input.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInputConfig {
    pub name: String,
    pub data_type: DataType,
    pub dims: Vec<i64>,
    /// The tensor's value is itself a shape; it is never batch-reshaped.
    #[serde(default)]
    pub is_shape_tensor: bool,
    #[serde(default)]
    pub reshape: Option<ReshapeConfig>,
}

/// One declared model output.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelOutputConfig {
    pub name: String,
    pub data_type: DataType,
    pub dims: Vec<i64>,
    /// Classification labels for this output, one per line, resolved
    /// relative to the model directory.
    #[serde(default)]
    pub label_filename: Option<String>,
    #[serde(default)]
    pub reshape: Option<ReshapeConfig>,
}

/// Per-instance rate-limit hints, passed through to the scheduler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub resources: Vec<RateLimiterResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterResource {
    pub name: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub global: bool,
}

/// One instance group: `count` replicas of the model on the listed
/// devices (or CPU).
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceGroupConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: InstanceKind,
    #[serde(default = "default_count")]
    pub count: i32,
    #[serde(default)]
    pub gpus: Vec<i32>,
    /// Passive instances are created and initialized but never
    /// registered with the scheduler.
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub profile: Vec<String>,
    #[serde(default)]
    pub rate_limiter: Option<RateLimiterConfig>,
}

fn default_kind() -> InstanceKind {
    InstanceKind::Cpu
}

fn default_count() -> i32 {
    1
}

/// Synthetic-data source for one warmup input.
///
/// In JSON: `"source": "zero_data"`, `"source": "random_data"`, or
/// `"source": {"input_data_file": "raw.bin"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupSource {
    ZeroData,
    RandomData,
    InputDataFile(String),
}

/// One input of a warmup sample. `dims` must be fully specified (no
/// wildcards) and exclude the batch dimension.
#[derive(Debug, Clone, Deserialize)]
pub struct WarmupInputConfig {
    pub data_type: DataType,
    pub dims: Vec<i64>,
    pub source: WarmupSource,
}

/// One warmup entry: a synthetic batch dispatched to every instance
/// before the model becomes serviceable. `batch_size == 0` disables
/// the entry.
#[derive(Debug, Clone, Deserialize)]
pub struct WarmupConfig {
    pub name: String,
    #[serde(default)]
    pub batch_size: u32,
    #[serde(default)]
    pub inputs: BTreeMap<String, WarmupInputConfig>,
}

/// Dynamic-batching tuning knobs consumed by the scheduler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DynamicBatchingConfig {
    /// How long a partial batch may wait for more requests.
    #[serde(default)]
    pub max_queue_delay_microseconds: u64,
    /// Number of priority levels; 0 disables priorities.
    #[serde(default)]
    pub priority_levels: u32,
    /// Level assigned to requests that don't set one.
    #[serde(default)]
    pub default_priority_level: u32,
}

/// Model configuration, the unit of validation for every request.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// 0 disables server-side batching; the model sees request shapes
    /// verbatim.
    #[serde(default)]
    pub max_batch_size: i32,
    #[serde(default)]
    pub input: Vec<ModelInputConfig>,
    #[serde(default)]
    pub output: Vec<ModelOutputConfig>,
    #[serde(default)]
    pub instance_group: Vec<InstanceGroupConfig>,
    #[serde(default)]
    pub model_warmup: Vec<WarmupConfig>,
    #[serde(default)]
    pub dynamic_batching: Option<DynamicBatchingConfig>,
    /// Consumed by the sequence scheduler; opaque to the execution core.
    #[serde(default)]
    pub sequence_batching: Option<serde_json::Value>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl ModelConfig {
    /// Load a configuration from a `config.json` file.
    ///
    /// # Errors
    /// Returns an error if the file is missing or malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty model name, duplicate
    /// tensor names, or a batching model whose warmup dims contain
    /// wildcards.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_arg("model configuration must specify name"));
        }
        let mut seen = std::collections::HashSet::new();
        for io in &self.input {
            if !seen.insert(io.name.as_str()) {
                return Err(Error::invalid_arg(format!(
                    "duplicate input '{}' in configuration for model '{}'",
                    io.name, self.name
                )));
            }
        }
        seen.clear();
        for io in &self.output {
            if !seen.insert(io.name.as_str()) {
                return Err(Error::invalid_arg(format!(
                    "duplicate output '{}' in configuration for model '{}'",
                    io.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// Whether server-side batching is enabled.
    #[must_use]
    pub fn supports_batching(&self) -> bool {
        self.max_batch_size > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ModelConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_config() {
        let c = parse(r#"{"name": "m"}"#);
        assert_eq!(c.name, "m");
        assert_eq!(c.max_batch_size, 0);
        assert!(!c.supports_batching());
        assert!(c.input.is_empty());
        c.validate().unwrap();
    }

    #[test]
    fn full_input_section() {
        let c = parse(
            r#"{
            "name": "m",
            "max_batch_size": 4,
            "input": [
                {"name": "x", "data_type": "FP32", "dims": [3]},
                {"name": "dims", "data_type": "INT32", "dims": [2], "is_shape_tensor": true},
                {"name": "y", "data_type": "FP32", "dims": [2, 2], "reshape": {"shape": [4]}}
            ],
            "output": [{"name": "out", "data_type": "FP32", "dims": [3]}]
        }"#,
        );
        assert!(c.supports_batching());
        assert_eq!(c.input.len(), 3);
        assert!(c.input[1].is_shape_tensor);
        assert_eq!(c.input[2].reshape.as_ref().unwrap().shape, vec![4]);
        c.validate().unwrap();
    }

    #[test]
    fn instance_groups() {
        let c = parse(
            r#"{
            "name": "m",
            "instance_group": [
                {"kind": "KIND_GPU", "count": 2, "gpus": [0, 1], "profile": ["fp16"]},
                {"kind": "KIND_CPU", "passive": true}
            ]
        }"#,
        );
        assert_eq!(c.instance_group.len(), 2);
        assert_eq!(c.instance_group[0].kind, InstanceKind::Gpu);
        assert_eq!(c.instance_group[0].count, 2);
        assert_eq!(c.instance_group[1].count, 1);
        assert!(c.instance_group[1].passive);
    }

    #[test]
    fn warmup_sources() {
        let c = parse(
            r#"{
            "name": "m",
            "model_warmup": [{
                "name": "sample",
                "batch_size": 3,
                "inputs": {
                    "x": {"data_type": "INT32", "dims": [4], "source": "zero_data"},
                    "y": {"data_type": "FP32", "dims": [2], "source": "random_data"},
                    "z": {"data_type": "UINT8", "dims": [8], "source": {"input_data_file": "z.bin"}}
                }
            }]
        }"#,
        );
        let w = &c.model_warmup[0];
        assert_eq!(w.batch_size, 3);
        assert!(matches!(w.inputs["x"].source, WarmupSource::ZeroData));
        assert!(matches!(w.inputs["y"].source, WarmupSource::RandomData));
        assert!(
            matches!(&w.inputs["z"].source, WarmupSource::InputDataFile(f) if f == "z.bin")
        );
    }

    #[test]
    fn duplicate_input_rejected() {
        let c = parse(
            r#"{
            "name": "m",
            "input": [
                {"name": "x", "data_type": "FP32", "dims": [1]},
                {"name": "x", "data_type": "FP32", "dims": [1]}
            ]
        }"#,
        );
        assert!(c.validate().is_err());
    }

    #[test]
    fn sequence_batching_is_passthrough() {
        let c = parse(
            r#"{"name": "m", "sequence_batching": {"max_sequence_idle_microseconds": 1000}}"#,
        );
        assert!(c.sequence_batching.is_some());
    }

    #[test]
    fn empty_name_rejected() {
        let c = parse(r#"{"name": ""}"#);
        assert!(c.validate().is_err());
    }
}
