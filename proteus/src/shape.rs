//! Dimension-list helpers
//!
//! Shapes are `Vec<i64>` dim lists. A configured dimension of
//! [`WILDCARD_DIM`] matches any size in that position; a concrete
//! request shape never contains wildcards.

use crate::dtype::DataType;

/// Configured dimension value that matches any request dimension.
pub const WILDCARD_DIM: i64 = -1;

/// Total number of elements for a dim list, or `None` when any
/// dimension is a wildcard.
#[must_use]
pub fn element_count(dims: &[i64]) -> Option<i64> {
    let mut count: i64 = 1;
    for &d in dims {
        if d == WILDCARD_DIM {
            return None;
        }
        count *= d;
    }
    Some(count)
}

/// Byte size of a tensor with the given dtype and dims, or `None` when
/// the dims contain a wildcard or the dtype has no fixed element size.
#[must_use]
pub fn byte_size(dtype: DataType, dims: &[i64]) -> Option<i64> {
    let count = element_count(dims)?;
    let elem = dtype.size_in_bytes()?;
    Some(count * elem as i64)
}

/// Whether `shape` matches `config_dims`, treating [`WILDCARD_DIM`] in
/// the configured dims as matching any value.
#[must_use]
pub fn compare_dims_with_wildcard(config_dims: &[i64], shape: &[i64]) -> bool {
    if config_dims.len() != shape.len() {
        return false;
    }
    config_dims
        .iter()
        .zip(shape.iter())
        .all(|(&c, &s)| c == WILDCARD_DIM || c == s)
}

/// Render a dim list the way it appears in error messages: `[2,3]`.
#[must_use]
pub fn dims_to_string(dims: &[i64]) -> String {
    let inner = dims
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("[{inner}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_concrete() {
        assert_eq!(element_count(&[2, 3, 4]), Some(24));
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[7]), Some(7));
    }

    #[test]
    fn element_count_wildcard() {
        assert_eq!(element_count(&[2, WILDCARD_DIM]), None);
    }

    #[test]
    fn byte_size_fp32() {
        assert_eq!(byte_size(DataType::Fp32, &[3]), Some(12));
        assert_eq!(byte_size(DataType::Int64, &[2, 2]), Some(32));
    }

    #[test]
    fn byte_size_string_is_unknown() {
        assert_eq!(byte_size(DataType::String, &[4]), None);
    }

    #[test]
    fn wildcard_comparison() {
        assert!(compare_dims_with_wildcard(&[WILDCARD_DIM, 3], &[9, 3]));
        assert!(compare_dims_with_wildcard(&[2, 3], &[2, 3]));
        assert!(!compare_dims_with_wildcard(&[2, 3], &[2, 4]));
        assert!(!compare_dims_with_wildcard(&[2, 3], &[2, 3, 1]));
        assert!(compare_dims_with_wildcard(&[], &[]));
    }

    #[test]
    fn dims_formatting() {
        assert_eq!(dims_to_string(&[2, 3]), "[2,3]");
        assert_eq!(dims_to_string(&[]), "[]");
        assert_eq!(dims_to_string(&[WILDCARD_DIM, 5]), "[-1,5]");
    }
}
