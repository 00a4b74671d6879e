//! Classification labels for model outputs

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// Holds the label tables declared by a model's outputs.
///
/// Each table is loaded from a text file, one label per line; the label
/// for class `i` is line `i`.
#[derive(Debug, Default)]
pub struct LabelProvider {
    labels: HashMap<String, Vec<String>>,
}

impl LabelProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the label file for the named output.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn add_labels(&mut self, output_name: &str, path: impl AsRef<Path>) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let labels = raw.lines().map(str::to_string).collect();
        self.labels.insert(output_name.to_string(), labels);
        Ok(())
    }

    /// The label for class `index` of the named output, or `None` when
    /// the output has no label table or the index is out of range.
    #[must_use]
    pub fn label(&self, output_name: &str, index: usize) -> Option<&str> {
        self.labels
            .get(output_name)
            .and_then(|l| l.get(index))
            .map(String::as_str)
    }

    #[must_use]
    pub fn has_labels(&self, output_name: &str) -> bool {
        self.labels.contains_key(output_name)
    }
}
