//! Configuration for the remap engine.

use serde::{Deserialize, Serialize};

/// Configuration for the remap engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker threads used by the dispatcher.
    pub workers: usize,

    /// Units whose projected element count (region size times number of
    /// inputs) exceeds this value are remapped through a scratch store.
    pub staging_threshold_elements: u64,

    /// Last-axis chunk of the scratch store, as a multiple of the output
    /// chunk along that axis.
    pub staging_last_axis_factor: u64,

    /// Directory in which scratch stores are created.
    pub scratch_dir: std::path::PathBuf,

    /// Compression for remapped output arrays.
    pub output_compression: CompressionConfig,

    /// Compression for scratch stores (favour speed).
    pub scratch_compression: CompressionConfig,

    /// Compression for datasets committed by the resumable writer.
    pub dataset_compression: CompressionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            staging_threshold_elements: 1 << 27,
            staging_last_axis_factor: 16,
            scratch_dir: std::env::temp_dir(),
            output_compression: CompressionConfig {
                codec: ZarrCompression::BloscLz4,
                level: 5,
                shuffle: ShuffleMode::Shuffle,
            },
            scratch_compression: CompressionConfig {
                codec: ZarrCompression::BloscLz4,
                level: 1,
                shuffle: ShuffleMode::None,
            },
            dataset_compression: CompressionConfig {
                codec: ZarrCompression::BloscZstd,
                level: 5,
                shuffle: ShuffleMode::BitShuffle,
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REMAP_WORKERS") {
            if let Ok(workers) = val.parse() {
                config.workers = workers;
            }
        }

        if let Ok(val) = std::env::var("REMAP_STAGING_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                config.staging_threshold_elements = threshold;
            }
        }

        if let Ok(val) = std::env::var("REMAP_STAGING_FACTOR") {
            if let Ok(factor) = val.parse() {
                config.staging_last_axis_factor = factor;
            }
        }

        if let Ok(val) = std::env::var("REMAP_SCRATCH_DIR") {
            config.scratch_dir = val.into();
        }

        if let Ok(val) = std::env::var("REMAP_COMPRESSION") {
            config.output_compression.codec = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("REMAP_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.output_compression.level = level;
            }
        }

        if let Ok(val) = std::env::var("REMAP_SHUFFLE") {
            config.output_compression.shuffle = ShuffleMode::from_str(&val);
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }

        if self.staging_threshold_elements == 0 {
            return Err("staging_threshold_elements must be > 0".to_string());
        }

        if self.staging_last_axis_factor == 0 {
            return Err("staging_last_axis_factor must be > 0".to_string());
        }

        for (name, compression) in [
            ("output", &self.output_compression),
            ("scratch", &self.scratch_compression),
            ("dataset", &self.dataset_compression),
        ] {
            if compression.codec != ZarrCompression::None
                && (compression.level == 0 || compression.level > 9)
            {
                return Err(format!("{name} compression level must be 1-9"));
            }
        }

        Ok(())
    }
}

/// Codec, level and shuffle for one class of arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub codec: ZarrCompression,
    pub level: u8,
    pub shuffle: ShuffleMode,
}

impl CompressionConfig {
    /// Store chunks uncompressed.
    pub fn none() -> Self {
        Self {
            codec: ZarrCompression::None,
            level: 0,
            shuffle: ShuffleMode::None,
        }
    }
}

/// Compression codec for Zarr files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd.
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" | "blosc_lz4" => Self::BloscLz4,
            "zstd" | "blosc_zstd" => Self::BloscZstd,
            _ => Self::BloscZstd,
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Blosc shuffle filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleMode {
    None,
    #[default]
    Shuffle,
    BitShuffle,
}

impl ShuffleMode {
    /// Parse from string (case-insensitive). Unknown values mean byte shuffle.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" | "false" | "0" => Self::None,
            "bit" | "bitshuffle" => Self::BitShuffle,
            _ => Self::Shuffle,
        }
    }
}
