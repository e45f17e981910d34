//! Error types for remapping.

use thiserror::Error;

/// Errors that can occur while planning or executing a remap.
#[derive(Error, Debug)]
pub enum RemapError {
    /// No chunk layout is defined for arrays of this rank.
    #[error("can't compute chunking for variables with {rank} dimensions (at most 3 supported)")]
    UnsupportedRank { rank: usize },

    /// A transform references a source variable that does not exist.
    #[error("transform for '{output}' references unknown source variable '{variable}'")]
    UnknownVariable { output: String, variable: String },

    /// A transform references a function id missing from the registry.
    #[error("transform for '{output}' references unknown function '{function}'")]
    UnknownFunction { output: String, function: String },

    /// Two shapes or chunk grids that must agree in rank do not.
    #[error("rank mismatch: {0}")]
    RankMismatch(String),

    /// The data type cannot be handled by the requested operation.
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Failed to open an array or store.
    #[error("failed to open array: {0}")]
    OpenFailed(String),

    /// Failed to read data from an array.
    #[error("failed to read array data: {0}")]
    ReadFailed(String),

    /// Failed to write data to an array.
    #[error("failed to write array data: {0}")]
    WriteFailed(String),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    ZarrError(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid array metadata or attributes.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A transform function rejected its inputs.
    #[error("transform failed: {0}")]
    TransformFailed(String),

    /// The worker pool could not be created.
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl RemapError {
    /// Create an UnknownVariable error.
    pub fn unknown_variable(output: impl Into<String>, variable: impl Into<String>) -> Self {
        Self::UnknownVariable {
            output: output.into(),
            variable: variable.into(),
        }
    }

    /// Create an OpenFailed error.
    pub fn open_failed(msg: impl Into<String>) -> Self {
        Self::OpenFailed(msg.into())
    }

    /// Create a ReadFailed error.
    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    /// Create a WriteFailed error.
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Create a ZarrError.
    pub fn zarr_error(msg: impl Into<String>) -> Self {
        Self::ZarrError(msg.into())
    }

    /// Create a ConfigError.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a TransformFailed error.
    pub fn transform_failed(msg: impl Into<String>) -> Self {
        Self::TransformFailed(msg.into())
    }

    /// Whether this error is a configuration problem that must abort
    /// before any work is dispatched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedRank { .. }
                | Self::UnknownVariable { .. }
                | Self::UnknownFunction { .. }
                | Self::RankMismatch(_)
                | Self::ConfigError(_)
        )
    }
}

impl From<std::io::Error> for RemapError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for RemapError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

impl From<serde_yaml::Error> for RemapError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Result type for remap operations.
pub type Result<T> = std::result::Result<T, RemapError>;
