//! Data types for request and response tensors

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported element types for inference tensors.
///
/// `String` tensors are variable-length; they have no fixed per-element
/// byte size and are carried as length-prefixed byte runs inside their
/// buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Fp16,
    Fp32,
    Fp64,
    String,
}

impl DataType {
    /// Size of the dtype in bytes per element, or `None` when the size
    /// is not fixed (`String`).
    #[must_use]
    pub const fn size_in_bytes(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Uint8 | Self::Int8 => Some(1),
            Self::Uint16 | Self::Int16 | Self::Fp16 => Some(2),
            Self::Uint32 | Self::Int32 | Self::Fp32 => Some(4),
            Self::Uint64 | Self::Int64 | Self::Fp64 => Some(8),
            Self::String => None,
        }
    }

    /// Whether two wire tensors of this type can be compared byte-wise.
    #[must_use]
    pub const fn is_fixed_size(self) -> bool {
        !matches!(self, Self::String)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "BOOL",
            Self::Uint8 => "UINT8",
            Self::Uint16 => "UINT16",
            Self::Uint32 => "UINT32",
            Self::Uint64 => "UINT64",
            Self::Int8 => "INT8",
            Self::Int16 => "INT16",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Fp16 => "FP16",
            Self::Fp32 => "FP32",
            Self::Fp64 => "FP64",
            Self::String => "STRING",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sizes() {
        assert_eq!(DataType::Fp32.size_in_bytes(), Some(4));
        assert_eq!(DataType::Int64.size_in_bytes(), Some(8));
        assert_eq!(DataType::Bool.size_in_bytes(), Some(1));
        assert_eq!(DataType::String.size_in_bytes(), None);
    }

    #[test]
    fn serde_round_trip() {
        let json = "\"FP32\"";
        let dt: DataType = serde_json::from_str(json).unwrap();
        assert_eq!(dt, DataType::Fp32);
        assert_eq!(serde_json::to_string(&dt).unwrap(), json);

        let dt: DataType = serde_json::from_str("\"STRING\"").unwrap();
        assert_eq!(dt, DataType::String);
    }

    #[test]
    fn display_matches_config_spelling() {
        assert_eq!(DataType::Uint16.to_string(), "UINT16");
        assert_eq!(DataType::String.to_string(), "STRING");
    }
}
