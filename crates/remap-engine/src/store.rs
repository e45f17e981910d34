//! Zarr V3 array handles on a local filesystem store.
//!
//! Reads convert any supported numeric type to `f32`; writes of `f32`
//! require a `float32` target. Arrays whose type must be preserved are
//! copied as raw bytes with [`copy_raw`].

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use num_traits::AsPrimitive;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, ElementOwned, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::config::{CompressionConfig, ShuffleMode, ZarrCompression};
use crate::error::{RemapError, Result};

/// Attribute holding dimension names, as written by xarray.
pub const DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";

/// Shared handle to an array in a filesystem store.
pub type ArrayHandle = Arc<Array<FilesystemStore>>;

/// Create (if needed) and open a filesystem store rooted at `path`.
pub fn create_store(path: &Path) -> Result<Arc<FilesystemStore>> {
    std::fs::create_dir_all(path)?;
    let store = FilesystemStore::new(path)
        .map_err(|e| RemapError::open_failed(format!("{}: {e}", path.display())))?;
    Ok(Arc::new(store))
}

/// Open an existing filesystem store rooted at `path`.
pub fn open_store(path: &Path) -> Result<Arc<FilesystemStore>> {
    if !path.is_dir() {
        return Err(RemapError::open_failed(format!(
            "store {} does not exist",
            path.display()
        )));
    }
    let store = FilesystemStore::new(path)
        .map_err(|e| RemapError::open_failed(format!("{}: {e}", path.display())))?;
    Ok(Arc::new(store))
}

/// Store path of a named array.
pub fn array_path(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/'))
}

/// Whether `root/name` holds Zarr array metadata (V3 or V2).
pub fn array_exists(root: &Path, name: &str) -> bool {
    let dir = root.join(name.trim_start_matches('/'));
    dir.join("zarr.json").is_file() || dir.join(".zarray").is_file()
}

/// Open a named array in a store.
pub fn open_array(store: &Arc<FilesystemStore>, name: &str) -> Result<ArrayHandle> {
    Array::open(store.clone(), &array_path(name))
        .map(Arc::new)
        .map_err(|e| RemapError::open_failed(format!("{name}: {e}")))
}

/// Metadata view of an array.
#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub data_type: DataType,
    pub fill_value: FillValue,
    pub dims: Vec<String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ArrayInfo {
    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Whether the first dimension is time.
    pub fn is_time_varying(&self) -> bool {
        self.dims.first().is_some_and(|d| d == "time")
    }
}

/// Extract shape, chunking, type and attributes from an array.
pub fn array_info(array: &Array<FilesystemStore>) -> Result<ArrayInfo> {
    let shape = array.shape().to_vec();

    let origin = vec![0u64; shape.len()];
    let chunks: Vec<u64> = array
        .chunk_grid()
        .chunk_shape(&origin, array.shape())
        .map_err(|e| RemapError::InvalidMetadata(e.to_string()))?
        .ok_or_else(|| RemapError::InvalidMetadata("missing chunk shape".to_string()))?
        .iter()
        .map(|c| c.get())
        .collect();

    let attributes = array.attributes().clone();
    let dims = native_dimension_names(array)
        .filter(|names| names.len() == shape.len())
        .or_else(|| {
            attributes
                .get(DIMENSIONS_ATTR)
                .and_then(|v| v.as_array())
                .map(|names| {
                    names
                        .iter()
                        .filter_map(|n| n.as_str().map(str::to_string))
                        .collect::<Vec<_>>()
                })
                .filter(|names| names.len() == shape.len())
        })
        .unwrap_or_else(|| (0..shape.len()).map(|i| format!("dim_{i}")).collect());

    Ok(ArrayInfo {
        shape,
        chunks,
        data_type: array.data_type().clone(),
        fill_value: array.fill_value().clone(),
        dims,
        attributes,
    })
}

/// Dimension names from the V3 `dimension_names` metadata, if every axis
/// is named.
fn native_dimension_names(array: &Array<FilesystemStore>) -> Option<Vec<String>> {
    array
        .dimension_names()
        .as_ref()?
        .iter()
        .map(|name| name.as_str().map(str::to_string))
        .collect()
}

/// Declaration of an array to create.
#[derive(Debug, Clone)]
pub struct ArraySpec {
    pub name: String,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    /// Written both as V3 `dimension_names` and as `_ARRAY_DIMENSIONS`.
    pub dims: Option<Vec<String>>,
    pub data_type: DataType,
    pub fill_value: FillValue,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ArraySpec {
    /// A `float32` array filled with NaN.
    pub fn float32(name: impl Into<String>, shape: Vec<u64>, chunks: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            shape,
            chunks,
            dims: None,
            data_type: DataType::Float32,
            fill_value: FillValue::from(f32::NAN),
            attributes: serde_json::Map::new(),
        }
    }

    /// Record dimension names in the attributes.
    pub fn with_dims(mut self, dims: &[String]) -> Self {
        self.dims = Some(dims.to_vec());
        self.attributes
            .insert(DIMENSIONS_ATTR.to_string(), serde_json::json!(dims));
        self
    }

    /// Merge attributes, keeping existing keys.
    pub fn with_attributes(mut self, attributes: &serde_json::Map<String, serde_json::Value>) -> Self {
        for (key, value) in attributes {
            self.attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

/// Fill value for an array stored as `data_type`, derived from the source's.
pub fn storage_fill_value(data_type: &DataType, source_fill: &FillValue) -> FillValue {
    if *data_type == DataType::Float32 {
        FillValue::from(f32::NAN)
    } else {
        source_fill.clone()
    }
}

/// Create an array and store its metadata.
pub fn declare_array(
    store: &Arc<FilesystemStore>,
    spec: &ArraySpec,
    compression: &CompressionConfig,
) -> Result<ArrayHandle> {
    let chunk_grid: zarrs::array::ChunkGrid = spec
        .chunks
        .clone()
        .try_into()
        .map_err(|e| RemapError::config(format!("chunk grid {:?}: {:?}", spec.chunks, e)))?;

    let mut binding = ArrayBuilder::new(
        spec.shape.clone(),
        spec.data_type.clone(),
        chunk_grid,
        spec.fill_value.clone(),
    );
    let mut builder = binding.attributes(spec.attributes.clone());

    if let Some(dims) = &spec.dims {
        builder = builder.dimension_names(Some(dims.iter().map(String::as_str)));
    }

    if compression.codec != ZarrCompression::None {
        let codec = create_compression_codec(compression, element_size(&spec.data_type))?;
        builder = builder.bytes_to_bytes_codecs(vec![codec]);
    }

    let array = builder
        .build(store.clone(), &array_path(&spec.name))
        .map_err(|e| RemapError::zarr_error(format!("{}: {e}", spec.name)))?;

    array
        .store_metadata()
        .map_err(|e| RemapError::StorageError(e.to_string()))?;

    Ok(Arc::new(array))
}

/// Create a blosc codec for the given settings.
fn create_compression_codec(
    compression: &CompressionConfig,
    typesize: Option<usize>,
) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
    let level = BloscCompressionLevel::try_from(compression.level)
        .map_err(|_| RemapError::config("invalid compression level"))?;

    // typesize is required whenever a shuffle filter is active
    let (shuffle, typesize) = match (compression.shuffle, typesize) {
        (ShuffleMode::Shuffle, Some(size)) => (BloscShuffleMode::Shuffle, Some(size)),
        (ShuffleMode::BitShuffle, Some(size)) => (BloscShuffleMode::BitShuffle, Some(size)),
        _ => (BloscShuffleMode::NoShuffle, None),
    };

    let compressor = match compression.codec {
        ZarrCompression::None => {
            return Err(RemapError::config("no compression configured"));
        }
        ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
        ZarrCompression::BloscZstd => BloscCompressor::Zstd,
    };

    let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
        .map_err(|e| RemapError::config(e.to_string()))?;

    Ok(Arc::new(codec))
}

/// Size in bytes of one element, for fixed-size numeric types.
pub fn element_size(data_type: &DataType) -> Option<usize> {
    match data_type {
        DataType::Bool | DataType::Int8 | DataType::UInt8 => Some(1),
        DataType::Int16 | DataType::UInt16 | DataType::Float16 | DataType::BFloat16 => Some(2),
        DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
        DataType::Int64 | DataType::UInt64 | DataType::Float64 | DataType::Complex64 => Some(8),
        DataType::Complex128 => Some(16),
        _ => None,
    }
}

/// Read a region of an array as `f32`.
pub fn read_f32(array: &Array<FilesystemStore>, region: &[Range<u64>]) -> Result<Vec<f32>> {
    let subset = ArraySubset::new_with_ranges(region);
    match array.data_type() {
        DataType::Float32 => retrieve_as::<f32>(array, &subset),
        DataType::Float64 => retrieve_as::<f64>(array, &subset),
        DataType::Int8 => retrieve_as::<i8>(array, &subset),
        DataType::Int16 => retrieve_as::<i16>(array, &subset),
        DataType::Int32 => retrieve_as::<i32>(array, &subset),
        DataType::Int64 => retrieve_as::<i64>(array, &subset),
        DataType::UInt8 => retrieve_as::<u8>(array, &subset),
        DataType::UInt16 => retrieve_as::<u16>(array, &subset),
        DataType::UInt32 => retrieve_as::<u32>(array, &subset),
        DataType::UInt64 => retrieve_as::<u64>(array, &subset),
        DataType::Float16 => retrieve_with::<half::f16>(array, &subset, f32::from),
        DataType::BFloat16 => retrieve_with::<half::bf16>(array, &subset, f32::from),
        other => Err(RemapError::UnsupportedDataType(format!(
            "cannot read {other:?} as float32"
        ))),
    }
}

fn retrieve_as<T>(array: &Array<FilesystemStore>, subset: &ArraySubset) -> Result<Vec<f32>>
where
    T: ElementOwned + AsPrimitive<f32>,
{
    retrieve_with::<T>(array, subset, |v: T| v.as_())
}

fn retrieve_with<T: ElementOwned>(
    array: &Array<FilesystemStore>,
    subset: &ArraySubset,
    convert: fn(T) -> f32,
) -> Result<Vec<f32>> {
    let values: Vec<T> = array
        .retrieve_array_subset_elements(subset)
        .map_err(|e| RemapError::read_failed(e.to_string()))?;
    Ok(values.into_iter().map(convert).collect())
}

/// Write `f32` values to a region of a `float32` array.
pub fn write_f32(
    array: &Array<FilesystemStore>,
    region: &[Range<u64>],
    data: &[f32],
) -> Result<()> {
    if *array.data_type() != DataType::Float32 {
        return Err(RemapError::UnsupportedDataType(format!(
            "cannot write float32 values into {:?}",
            array.data_type()
        )));
    }
    let subset = ArraySubset::new_with_ranges(region);
    array
        .store_array_subset_elements::<f32>(&subset, data)
        .map_err(|e| RemapError::write_failed(e.to_string()))
}

/// Copy a region verbatim between two arrays of the same data type.
pub fn copy_raw(
    source: &Array<FilesystemStore>,
    target: &Array<FilesystemStore>,
    region: &[Range<u64>],
) -> Result<()> {
    if source.data_type() != target.data_type() {
        return Err(RemapError::UnsupportedDataType(format!(
            "raw copy from {:?} to {:?}",
            source.data_type(),
            target.data_type()
        )));
    }
    let subset = ArraySubset::new_with_ranges(region);
    let bytes = source
        .retrieve_array_subset(&subset)
        .map_err(|e| RemapError::read_failed(e.to_string()))?;
    target
        .store_array_subset(&subset, bytes)
        .map_err(|e| RemapError::write_failed(e.to_string()))
}
