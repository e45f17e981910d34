//! Chunk shapes for HEALPix-gridded output variables.
//!
//! The cell count of a HEALPix grid grows by 4 per zoom order. Below the
//! split order the spatial chunk grows at the same rate so every chunk holds
//! roughly the same fraction of the sphere; from the split order on the
//! chunk is pinned to cap the chunk byte size.

use serde::{Deserialize, Serialize};
use zarrs::array::DataType;

use crate::error::{RemapError, Result};

/// Highest variable rank with a chunk layout.
pub const MAX_RANK: usize = 3;

/// Policy constants for chunk planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// First order at which the spatial chunk stops growing.
    pub split_order: u32,
    /// Spatial chunk at order 0 (the 12 HEALPix base pixels).
    pub base_chunk: u64,
    /// Growth of the spatial chunk per order.
    pub growth: u64,
    /// Extent of the level axis for rank-3 variables.
    pub level_chunk: u64,
    /// Upper bound for rank-1 variables.
    pub max_1d_chunk: u64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            split_order: 8,
            base_chunk: 12,
            growth: 4,
            level_chunk: 5,
            max_1d_chunk: 1024 * 1024,
        }
    }
}

impl ChunkPolicy {
    /// Spatial chunk extent for a zoom order.
    pub fn chunk_size(&self, order: u32) -> u64 {
        if order < self.split_order {
            self.base_chunk * self.growth.pow(order)
        } else {
            self.growth.pow(self.split_order + 1)
        }
    }

    /// Chunk shape for a variable of the given shape.
    ///
    /// Rank 1 variables are either pure time or pure space and get one
    /// bounded extent; rank 2 is `(time, cell)`; rank 3 is
    /// `(time, level, cell)`. Higher ranks are rejected.
    pub fn chunk_shape(&self, var_shape: &[u64], timechunk: u64, order: u32) -> Result<Vec<u64>> {
        let spacechunk = self.chunk_size(order);
        match var_shape {
            [] => Ok(vec![]),
            [len] => Ok(vec![(*len).min(self.max_1d_chunk).max(1)]),
            [time, _] => Ok(vec![timechunk.min(*time).max(1), spacechunk]),
            [time, _, _] => Ok(vec![
                timechunk.min(*time).max(1),
                self.level_chunk,
                spacechunk,
            ]),
            _ => Err(RemapError::UnsupportedRank {
                rank: var_shape.len(),
            }),
        }
    }

    /// Read-ahead chunks for coarsening from `zoom_out + 1` to `zoom_out`.
    ///
    /// The cell chunk covers four output chunks, and the time chunk keeps a
    /// read block at roughly `18 * 4^10` elements.
    pub fn read_chunks(&self, zoom_out: u32) -> ReadChunks {
        let cell = self.chunk_size(zoom_out) * 4;
        let time = (18 * 4u64.pow(10) / cell).max(1);
        ReadChunks {
            cell,
            time,
            level: self.level_chunk,
        }
    }
}

/// Spatial chunk extent for a zoom order under the default policy.
pub fn chunk_size(order: u32) -> u64 {
    ChunkPolicy::default().chunk_size(order)
}

/// Chunk extents used when reading a dataset for coarsening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadChunks {
    pub cell: u64,
    pub time: u64,
    pub level: u64,
}

/// Storage data type: floats are stored as `float32`, everything else as is.
pub fn storage_dtype(data_type: &DataType) -> DataType {
    if is_float(data_type) {
        DataType::Float32
    } else {
        data_type.clone()
    }
}

/// Whether a data type is a real floating-point type.
pub fn is_float(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Float16 | DataType::BFloat16 | DataType::Float32 | DataType::Float64
    )
}

/// Clip chunk extents so they never exceed a non-empty array extent.
pub fn clip_to_shape(chunks: &[u64], shape: &[u64]) -> Vec<u64> {
    chunks
        .iter()
        .zip(shape)
        .map(|(&c, &s)| if s == 0 { c.max(1) } else { c.min(s).max(1) })
        .collect()
}
