//! Test data generators for creating synthetic chunked-array data.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

/// Creates an N-dimensional test cube with predictable values.
///
/// Each element holds its row-major flat index, so any region read back
/// can be checked against the index arithmetic that produced it. Values are
/// exact in `f32` for cubes below 2^24 elements.
///
/// # Example
///
/// ```
/// use test_utils::create_test_cube;
///
/// let cube = create_test_cube(&[2, 3]);
/// assert_eq!(cube, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
/// ```
pub fn create_test_cube(shape: &[u64]) -> Vec<f32> {
    let len: u64 = shape.iter().product();
    (0..len).map(|i| i as f32).collect()
}

/// Creates a test cube with temperature-like values in Kelvin.
///
/// Values vary smoothly along every axis between roughly 250K and 310K and
/// are not integers, so float conversions are exercised.
pub fn create_temperature_cube(shape: &[u64]) -> Vec<f32> {
    let len: u64 = shape.iter().product();
    let mut data = Vec::with_capacity(len as usize);
    let mut index = vec![0u64; shape.len()];
    for _ in 0..len {
        let mut factor = 0.0f32;
        for (axis, (&i, &n)) in index.iter().zip(shape).enumerate() {
            factor += (i as f32 / n.max(1) as f32) * (axis as f32 + 1.0);
        }
        let norm = (shape.len() * (shape.len() + 1) / 2).max(1) as f32;
        data.push(250.0 + 60.0 * factor / norm + 0.125);

        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    data
}

/// Creates a test cube with NaN at every `every`-th element, flat index
/// values elsewhere.
///
/// Useful for testing missing data handling.
pub fn create_cube_with_nans(shape: &[u64], every: usize) -> Vec<f32> {
    let mut data = create_test_cube(shape);
    if every > 0 {
        data.iter_mut().step_by(every).for_each(|v| *v = f32::NAN);
    }
    data
}
