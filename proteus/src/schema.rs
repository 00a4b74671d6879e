//! Immutable model schema shared with requests
//!
//! A request validates and normalizes against its model's input/output
//! declarations. The model itself lives in the runtime crate and owns
//! its instances; requests hold an `Arc<ModelSchema>` — an immutable
//! projection of the model — instead of a back-pointer into it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ModelConfig, ModelInputConfig, ModelOutputConfig};
use crate::error::{Error, Result};

/// Immutable, shareable view of a model's identity and I/O declarations.
#[derive(Debug)]
pub struct ModelSchema {
    name: String,
    version: i64,
    max_batch_size: i32,
    inputs: Vec<ModelInputConfig>,
    outputs: Vec<ModelOutputConfig>,
    input_index: HashMap<String, usize>,
    output_index: HashMap<String, usize>,
    max_priority_level: u32,
    default_priority_level: u32,
}

impl ModelSchema {
    /// Build a schema from a validated configuration.
    #[must_use]
    pub fn new(config: &ModelConfig, version: i64) -> Arc<Self> {
        let input_index = config
            .input
            .iter()
            .enumerate()
            .map(|(i, io)| (io.name.clone(), i))
            .collect();
        let output_index = config
            .output
            .iter()
            .enumerate()
            .map(|(i, io)| (io.name.clone(), i))
            .collect();
        let (max_priority_level, default_priority_level) = config
            .dynamic_batching
            .as_ref()
            .map_or((0, 0), |db| (db.priority_levels, db.default_priority_level));

        Arc::new(Self {
            name: config.name.clone(),
            version,
            max_batch_size: config.max_batch_size,
            inputs: config.input.clone(),
            outputs: config.output.clone(),
            input_index,
            output_index,
            max_priority_level,
            default_priority_level,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    #[must_use]
    pub fn max_batch_size(&self) -> i32 {
        self.max_batch_size
    }

    #[must_use]
    pub fn supports_batching(&self) -> bool {
        self.max_batch_size > 0
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Look up a declared input by name.
    ///
    /// # Errors
    /// `InvalidArgument` when the input is not part of the model.
    pub fn input(&self, name: &str) -> Result<&ModelInputConfig> {
        self.input_index
            .get(name)
            .map(|&i| &self.inputs[i])
            .ok_or_else(|| {
                Error::invalid_arg(format!(
                    "unexpected inference input '{name}' for model '{}'",
                    self.name
                ))
            })
    }

    /// Look up a declared output by name.
    ///
    /// # Errors
    /// `InvalidArgument` when the output is not part of the model.
    pub fn output(&self, name: &str) -> Result<&ModelOutputConfig> {
        self.output_index
            .get(name)
            .map(|&i| &self.outputs[i])
            .ok_or_else(|| {
                Error::invalid_arg(format!(
                    "unexpected inference output '{name}' for model '{}'",
                    self.name
                ))
            })
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ModelInputConfig> {
        self.inputs.iter()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ModelOutputConfig> {
        self.outputs.iter()
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }

    #[must_use]
    pub fn max_priority_level(&self) -> u32 {
        self.max_priority_level
    }

    #[must_use]
    pub fn default_priority_level(&self) -> u32 {
        self.default_priority_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<ModelSchema> {
        let config: ModelConfig = serde_json::from_str(
            r#"{
            "name": "m",
            "max_batch_size": 8,
            "input": [{"name": "x", "data_type": "FP32", "dims": [3]}],
            "output": [
                {"name": "out0", "data_type": "FP32", "dims": [3]},
                {"name": "out1", "data_type": "FP32", "dims": [1]}
            ],
            "dynamic_batching": {"priority_levels": 4, "default_priority_level": 2}
        }"#,
        )
        .unwrap();
        ModelSchema::new(&config, 2)
    }

    #[test]
    fn lookups() {
        let s = schema();
        assert_eq!(s.name(), "m");
        assert_eq!(s.version(), 2);
        assert_eq!(s.input("x").unwrap().dims, vec![3]);
        assert!(s.input("nope").is_err());
        assert!(s.output("out1").is_ok());
        assert!(s.output("x").is_err());
        assert_eq!(s.output_names().collect::<Vec<_>>(), vec!["out0", "out1"]);
    }

    #[test]
    fn priority_levels_from_dynamic_batching() {
        let s = schema();
        assert_eq!(s.max_priority_level(), 4);
        assert_eq!(s.default_priority_level(), 2);
    }
}
