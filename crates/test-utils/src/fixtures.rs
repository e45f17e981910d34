//! Zarr store fixtures for tests.
//!
//! Arrays are written to filesystem stores the same way the engine lays
//! them out: one array per variable at `/<name>`, dimension names both in
//! the V3 `dimension_names` metadata and in the `_ARRAY_DIMENSIONS`
//! attribute, NaN fill for floats, no compression.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use zarrs::array::{Array, ArrayBuilder, DataType, Element, ElementOwned, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

/// Result type of fixture helpers.
pub type TestResult<T> = Result<T, Box<dyn Error>>;

/// Writes a `float32` array named `name` into the store at `root`.
///
/// # Example
///
/// ```ignore
/// let data = create_test_cube(&[4, 6]);
/// write_test_array(dir.path(), "tas", &[4, 6], &[2, 3], &data, &["time", "cell"])?;
/// ```
pub fn write_test_array(
    root: &Path,
    name: &str,
    shape: &[u64],
    chunks: &[u64],
    data: &[f32],
    dims: &[&str],
) -> TestResult<()> {
    write_test_array_typed(
        root,
        name,
        shape,
        chunks,
        DataType::Float32,
        FillValue::from(f32::NAN),
        data,
        dims,
    )
}

/// Writes a `float32` array that names its dimensions only through the V3
/// `dimension_names` metadata, as non-xarray writers do.
pub fn write_v3_test_array(
    root: &Path,
    name: &str,
    shape: &[u64],
    chunks: &[u64],
    data: &[f32],
    dims: &[&str],
) -> TestResult<()> {
    write_array(
        root,
        name,
        shape,
        chunks,
        DataType::Float32,
        FillValue::from(f32::NAN),
        data,
        dims,
        false,
    )
}

/// Writes an array of any element type into the store at `root`.
#[allow(clippy::too_many_arguments)]
pub fn write_test_array_typed<T: Element>(
    root: &Path,
    name: &str,
    shape: &[u64],
    chunks: &[u64],
    data_type: DataType,
    fill_value: FillValue,
    data: &[T],
    dims: &[&str],
) -> TestResult<()> {
    write_array(root, name, shape, chunks, data_type, fill_value, data, dims, true)
}

#[allow(clippy::too_many_arguments)]
fn write_array<T: Element>(
    root: &Path,
    name: &str,
    shape: &[u64],
    chunks: &[u64],
    data_type: DataType,
    fill_value: FillValue,
    data: &[T],
    dims: &[&str],
    xarray_attribute: bool,
) -> TestResult<()> {
    std::fs::create_dir_all(root)?;
    let store = Arc::new(FilesystemStore::new(root)?);

    let chunk_grid: zarrs::array::ChunkGrid = chunks
        .to_vec()
        .try_into()
        .map_err(|e| format!("invalid chunk grid {chunks:?}: {e:?}"))?;

    let mut attributes = serde_json::Map::new();
    if xarray_attribute {
        attributes.insert("_ARRAY_DIMENSIONS".to_string(), serde_json::json!(dims));
    }

    let array = ArrayBuilder::new(shape.to_vec(), data_type, chunk_grid, fill_value)
        .attributes(attributes)
        .dimension_names(Some(dims.iter().copied()))
        .build(store, &format!("/{name}"))?;
    array.store_metadata()?;

    let subset = ArraySubset::new_with_shape(shape.to_vec());
    array.store_array_subset_elements::<T>(&subset, data)?;
    Ok(())
}

/// Opens the array `name` of the store at `root`.
pub fn open_test_array(root: &Path, name: &str) -> TestResult<Array<FilesystemStore>> {
    let store = Arc::new(FilesystemStore::new(root)?);
    Ok(Array::open(store, &format!("/{name}"))?)
}

/// Reads an entire `float32` array.
pub fn read_test_array(root: &Path, name: &str) -> TestResult<Vec<f32>> {
    read_test_elements::<f32>(root, name)
}

/// Reads an entire array as elements of type `T`.
pub fn read_test_elements<T: ElementOwned>(root: &Path, name: &str) -> TestResult<Vec<T>> {
    let array = open_test_array(root, name)?;
    let subset = ArraySubset::new_with_shape(array.shape().to_vec());
    Ok(array.retrieve_array_subset_elements::<T>(&subset)?)
}

/// Creates a temporary directory for a test store.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_store_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("zarr_test_")
        .tempdir()
        .expect("Failed to create temporary test directory")
}
