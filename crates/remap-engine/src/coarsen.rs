//! Coarsening of HEALPix variables by one zoom level.
//!
//! In nested ordering the four children of a cell are stored next to each
//! other, so zooming out is a block mean of 4 along the cell axis.

use std::ops::Range;

use crate::error::{RemapError, Result};
use crate::resumable::{OutputDataset, OutputVariable};
use crate::store::{array_info, read_f32, ArrayHandle, ArrayInfo};
use crate::transform::SourceCatalog;

/// Children per cell between consecutive zoom levels.
pub const HEALPIX_FACTOR: u64 = 4;

/// Mean over non-overlapping blocks of `factor` along the last axis.
///
/// NaN values are ignored; a block of only NaN gives NaN. A trailing
/// partial block is averaged over the values it has.
pub fn coarsen_mean(data: &[f32], shape: &[u64], factor: u64) -> Result<Vec<f32>> {
    if factor == 0 {
        return Err(RemapError::config("coarsening factor must be > 0"));
    }
    let expected: u64 = shape.iter().product();
    if data.len() as u64 != expected {
        return Err(RemapError::transform_failed(format!(
            "block has {} elements, shape {shape:?} needs {expected}",
            data.len()
        )));
    }
    let Some(&last) = shape.last() else {
        return Ok(data.to_vec());
    };
    if last == 0 {
        return Ok(Vec::new());
    }

    let row = last as usize;
    let factor = factor as usize;
    let mut out = Vec::with_capacity(data.len() / row * row.div_ceil(factor));
    for values in data.chunks(row) {
        out.extend(values.chunks(factor).map(mean_of_block));
    }
    Ok(out)
}

/// Mean of the non-NaN values of a block, NaN if there are none.
#[inline]
fn mean_of_block(values: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0;

    for &v in values {
        if !v.is_nan() {
            sum += v;
            count += 1;
        }
    }

    if count == 0 {
        f32::NAN
    } else {
        sum / count as f32
    }
}

/// A stored variable viewed at the next coarser zoom level.
#[derive(Clone)]
pub struct CoarsenedVariable {
    name: String,
    source: ArrayHandle,
    info: ArrayInfo,
    shape: Vec<u64>,
    factor: u64,
}

impl std::fmt::Debug for CoarsenedVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoarsenedVariable")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("factor", &self.factor)
            .finish()
    }
}

impl CoarsenedVariable {
    /// Coarsen `source` by [`HEALPIX_FACTOR`] along its last axis.
    pub fn new(name: impl Into<String>, source: ArrayHandle) -> Result<Self> {
        Self::with_factor(name, source, HEALPIX_FACTOR)
    }

    pub fn with_factor(name: impl Into<String>, source: ArrayHandle, factor: u64) -> Result<Self> {
        let name = name.into();
        if factor == 0 {
            return Err(RemapError::config("coarsening factor must be > 0"));
        }
        let info = array_info(&source)?;
        let mut shape = info.shape.clone();
        match shape.last_mut() {
            Some(cells) => *cells = cells.div_ceil(factor),
            None => {
                return Err(RemapError::config(format!(
                    "cannot coarsen scalar variable '{name}'"
                )))
            }
        }
        Ok(Self {
            name,
            source,
            info,
            shape,
            factor,
        })
    }

    fn source_region(&self, region: &[Range<u64>]) -> Vec<Range<u64>> {
        let mut source = region.to_vec();
        if let (Some(r), Some(&cells)) = (source.last_mut(), self.info.shape.last()) {
            *r = (r.start * self.factor).min(cells)..(r.end * self.factor).min(cells);
        }
        source
    }
}

impl OutputVariable for CoarsenedVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> &[String] {
        &self.info.dims
    }

    fn shape(&self) -> &[u64] {
        &self.shape
    }

    fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        self.info.attributes.clone()
    }

    fn read(&self, region: &[Range<u64>]) -> Result<Vec<f32>> {
        let source_region = self.source_region(region);
        let block_shape: Vec<u64> = source_region.iter().map(|r| r.end - r.start).collect();
        let data = read_f32(&self.source, &source_region)?;
        coarsen_mean(&data, &block_shape, self.factor)
    }
}

/// Coarsened views of the named variables of a source store.
pub fn coarsen_dataset(catalog: &SourceCatalog, variables: &[String]) -> Result<OutputDataset> {
    let mut dataset = OutputDataset::new();
    for name in variables {
        if !catalog.contains(name) {
            return Err(RemapError::unknown_variable(name.as_str(), name.as_str()));
        }
        dataset.push(CoarsenedVariable::new(name.as_str(), catalog.array(name)?)?);
    }
    Ok(dataset)
}
