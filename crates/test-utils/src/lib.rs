//! Shared test utilities for the zarr-remap workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic chunked-array generators
//! - Zarr store fixtures on temporary directories
//! - Approximate and bitwise float assertions
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{create_test_cube, write_test_array};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Macro asserting two `f32` slices are identical bit for bit, NaN included.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_bits_eq;
///
/// assert_bits_eq!(&[1.0, f32::NAN], &[1.0, f32::NAN]);
/// ```
#[macro_export]
macro_rules! assert_bits_eq {
    ($left:expr, $right:expr) => {{
        let left: &[f32] = $left;
        let right: &[f32] = $right;
        assert_eq!(left.len(), right.len(), "length mismatch");
        if let Some(i) = (0..left.len()).find(|&i| left[i].to_bits() != right[i].to_bits()) {
            panic!(
                "assertion failed: `(left == right)` bitwise at index {}\n  left: `{:?}`,\n right: `{:?}`",
                i, left[i], right[i]
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_assert_bits_eq_passes_with_nan() {
        assert_bits_eq!(&[1.0, f32::NAN], &[1.0, f32::NAN]);
    }

    #[test]
    #[should_panic(expected = "bitwise at index 1")]
    fn test_assert_bits_eq_fails() {
        assert_bits_eq!(&[1.0, 2.0], &[1.0, 2.5]);
    }
}
