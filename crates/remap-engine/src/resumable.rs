//! Time-ordered, resumable commit of a whole dataset.
//!
//! A dataset is written in consecutive windows along its time axis. After
//! every window the next unwritten time index is persisted in a progress
//! marker next to the data, so an interrupted run continues at the last
//! committed boundary. Time-invariant variables are written once, on a run
//! that starts from index 0. The marker is removed when the run completes.

use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zarrs::array::{Array, DataType, FillValue};
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use crate::chunk_plan::{clip_to_shape, ChunkPolicy};
use crate::config::CompressionConfig;
use crate::error::{RemapError, Result};
use crate::slices::{iter_slices, whole_domain};
use crate::store::{
    array_info, copy_raw, create_store, declare_array, open_array, open_store, read_f32,
    storage_fill_value, write_f32, ArrayHandle, ArrayInfo, ArraySpec,
};
use crate::transform::{resolve, FunctionRegistry, SourceCatalog, Transform, TransformOp};

/// File name of the progress marker inside a destination store.
pub const MARKER_FILE: &str = ".write_status";

/// Name of the leading dimension of time-varying variables.
pub const TIME_DIM: &str = "time";

/// Persistent cursor holding the next unwritten time index.
#[derive(Debug, Clone)]
pub struct ProgressMarker {
    path: PathBuf,
}

impl ProgressMarker {
    pub fn new(destination: &Path) -> Self {
        Self {
            path: destination.join(MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The resume index. A missing marker means a fresh run; an unreadable
    /// one is logged and also treated as 0.
    pub fn read(&self) -> u64 {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No progress marker, starting from zero");
                return 0;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read progress marker, starting from zero");
                return 0;
            }
        };
        match contents.trim().parse() {
            Ok(start) => {
                info!(path = %self.path.display(), start, "Found progress marker");
                start
            }
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    contents = %contents.trim(),
                    "Progress marker is not an integer, starting from zero"
                );
                0
            }
        }
    }

    /// Atomically replace the marker with `index`.
    pub fn write(&self, index: u64) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            write!(file, "{index}")?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Remove the marker. A missing marker is not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A variable of a dataset to be committed.
pub trait OutputVariable: Send + Sync {
    fn name(&self) -> &str;

    fn dims(&self) -> &[String];

    fn shape(&self) -> &[u64];

    /// Type the variable is stored as.
    fn data_type(&self) -> DataType {
        DataType::Float32
    }

    fn fill_value(&self) -> FillValue {
        FillValue::from(f32::NAN)
    }

    fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    /// Values of a region as `f32`, row-major.
    fn read(&self, region: &[Range<u64>]) -> Result<Vec<f32>>;

    /// Write a region of this variable into `target`.
    fn commit(&self, target: &Array<FilesystemStore>, region: &[Range<u64>]) -> Result<()> {
        let data = self.read(region)?;
        write_f32(target, region, &data)
    }

    fn is_time_varying(&self) -> bool {
        self.dims().first().is_some_and(|d| d == TIME_DIM)
    }
}

/// A set of variables written together to one destination.
#[derive(Default)]
pub struct OutputDataset {
    variables: Vec<Box<dyn OutputVariable>>,
    attributes: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for OutputDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDataset")
            .field(
                "variables",
                &self.variables.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl OutputDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes(mut self, attributes: serde_json::Map<String, serde_json::Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn push(&mut self, variable: impl OutputVariable + 'static) {
        self.variables.push(Box::new(variable));
    }

    pub fn variables(&self) -> impl Iterator<Item = &dyn OutputVariable> {
        self.variables.iter().map(|v| v.as_ref())
    }

    pub fn attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Length of the shared time axis, or `None` without time-varying
    /// variables. All time-varying variables must agree.
    pub fn time_len(&self) -> Result<Option<u64>> {
        let mut len = None;
        for var in self.variables().filter(|v| v.is_time_varying()) {
            let n = var.shape()[0];
            match len {
                None => len = Some(n),
                Some(existing) if existing != n => {
                    return Err(RemapError::config(format!(
                        "'{}' has {n} time steps, other variables have {existing}",
                        var.name()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(len)
    }
}

/// A stored source variable, optionally transformed from several inputs.
pub struct StoredVariable {
    name: String,
    inputs: Vec<ArrayHandle>,
    info: ArrayInfo,
    op: TransformOp,
    data_type: DataType,
}

impl std::fmt::Debug for StoredVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredVariable")
            .field("name", &self.name)
            .field("shape", &self.info.shape)
            .field("op", &self.op)
            .finish()
    }
}

impl StoredVariable {
    /// Expose a source variable under its own name.
    pub fn open(catalog: &SourceCatalog, name: &str) -> Result<Self> {
        Self::derive(catalog, name, &Transform::Rename(name.to_string()), &FunctionRegistry::new())
    }

    /// Expose the result of `transform` as variable `name`.
    pub fn derive(
        catalog: &SourceCatalog,
        name: &str,
        transform: &Transform,
        registry: &FunctionRegistry,
    ) -> Result<Self> {
        let resolved = resolve(name, transform, catalog, registry)?;
        let info = resolved.primary().clone();
        let data_type = if resolved.op.is_identity() {
            crate::chunk_plan::storage_dtype(&info.data_type)
        } else {
            DataType::Float32
        };
        Ok(Self {
            name: name.to_string(),
            inputs: resolved.inputs,
            info,
            op: resolved.op,
            data_type,
        })
    }
}

impl OutputVariable for StoredVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> &[String] {
        &self.info.dims
    }

    fn shape(&self) -> &[u64] {
        &self.info.shape
    }

    fn data_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn fill_value(&self) -> FillValue {
        storage_fill_value(&self.data_type, &self.info.fill_value)
    }

    fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        self.info.attributes.clone()
    }

    fn read(&self, region: &[Range<u64>]) -> Result<Vec<f32>> {
        let blocks = self
            .inputs
            .iter()
            .map(|input| read_f32(input, region))
            .collect::<Result<Vec<_>>>()?;
        if self.op.is_identity() {
            return blocks
                .into_iter()
                .next()
                .ok_or_else(|| RemapError::transform_failed("no input"));
        }
        let views: Vec<&[f32]> = blocks.iter().map(Vec::as_slice).collect();
        let mut out = vec![0.0f32; views.first().map_or(0, |v| v.len())];
        self.op.apply(&views, &mut out)?;
        Ok(out)
    }

    fn commit(&self, target: &Array<FilesystemStore>, region: &[Range<u64>]) -> Result<()> {
        if self.op.is_identity() && self.inputs[0].data_type() == target.data_type() {
            return copy_raw(&self.inputs[0], target, region);
        }
        let data = self.read(region)?;
        write_f32(target, region, &data)
    }
}

/// What a call to [`ResumableWriter::write`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub resumed_from: u64,
    pub time_len: u64,
    pub windows_written: usize,
    pub invariant_written: usize,
    pub structure_created: bool,
}

/// Commits datasets window by window with a persistent progress marker.
#[derive(Debug, Clone)]
pub struct ResumableWriter {
    policy: ChunkPolicy,
    order: u32,
    storage_time_chunk: u64,
    compression: CompressionConfig,
}

impl ResumableWriter {
    /// Writer for a grid of zoom `order`, storing `storage_time_chunk` time
    /// steps per chunk.
    pub fn new(order: u32, storage_time_chunk: u64, compression: CompressionConfig) -> Self {
        Self {
            policy: ChunkPolicy::default(),
            order,
            storage_time_chunk: storage_time_chunk.max(1),
            compression,
        }
    }

    pub fn with_policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Declare every variable of `dataset` in `destination`.
    ///
    /// Returns `false` without touching anything if the destination already
    /// holds a dataset. Chunk layouts are checked for all variables before
    /// the first array is declared.
    pub fn create_structure(&self, dataset: &OutputDataset, destination: &Path) -> Result<bool> {
        if destination.join("zarr.json").is_file() {
            debug!(destination = %destination.display(), "Destination exists, keeping structure");
            return Ok(false);
        }

        let specs = dataset
            .variables()
            .map(|var| {
                let chunks = self
                    .policy
                    .chunk_shape(var.shape(), self.storage_time_chunk, self.order)
                    .map_err(|e| match e {
                        RemapError::UnsupportedRank { .. } => e,
                        other => RemapError::config(format!("{}: {other}", var.name())),
                    })?;
                Ok(ArraySpec {
                    name: var.name().to_string(),
                    shape: var.shape().to_vec(),
                    chunks: clip_to_shape(&chunks, var.shape()),
                    dims: None,
                    data_type: var.data_type(),
                    fill_value: var.fill_value(),
                    attributes: var.attributes(),
                }
                .with_dims(var.dims()))
            })
            .collect::<Result<Vec<_>>>()?;

        let store = create_store(destination)?;
        for spec in &specs {
            declare_array(&store, spec, &self.compression)?;
        }

        // Group metadata goes last; its presence marks a complete structure.
        let mut binding = GroupBuilder::new();
        let group = binding
            .attributes(dataset.attributes().clone())
            .build(store.clone(), "/")
            .map_err(|e| RemapError::zarr_error(e.to_string()))?;
        group
            .store_metadata()
            .map_err(|e| RemapError::StorageError(e.to_string()))?;

        info!(
            destination = %destination.display(),
            variables = specs.len(),
            order = self.order,
            "Created dataset structure"
        );
        Ok(true)
    }

    /// Write `dataset` to `destination` in windows of `time_chunk` steps,
    /// resuming from the progress marker if one is present.
    ///
    /// Errors abort the run and leave the marker at the last committed
    /// window boundary.
    pub fn write(
        &self,
        dataset: &OutputDataset,
        destination: &Path,
        time_chunk: u64,
    ) -> Result<WriteSummary> {
        if time_chunk == 0 {
            return Err(RemapError::config("time chunk must be > 0"));
        }
        let time_len = dataset.time_len()?.unwrap_or(0);
        let marker = ProgressMarker::new(destination);

        let mut start = marker.read();
        if start > 0 && !destination.join("zarr.json").is_file() {
            warn!(start, destination = %destination.display(), "Progress marker without dataset, starting from zero");
            start = 0;
        }
        if start > time_len {
            warn!(start, time_len, "Progress marker beyond end of time axis, starting from zero");
            start = 0;
        }

        let structure_created = self.create_structure(dataset, destination)?;
        let store = open_store(destination)?;

        let mut varying = Vec::new();
        let mut invariant = Vec::new();
        for var in dataset.variables() {
            let target = open_array(&store, var.name())?;
            let chunks = array_info(&target)?.chunks;
            if var.is_time_varying() {
                varying.push((var, target, chunks));
            } else {
                invariant.push((var, target, chunks));
            }
        }

        let mut summary = WriteSummary {
            resumed_from: start,
            time_len,
            structure_created,
            ..WriteSummary::default()
        };

        // Rewriting in full is idempotent, so a crash before the first
        // marker update is safe to replay.
        if start == 0 {
            for (var, target, chunks) in &invariant {
                for region in iter_slices(&whole_domain(var.shape()), chunks)? {
                    var.commit(target, &region)?;
                }
                debug!(variable = %var.name(), "Wrote time-invariant variable");
                summary.invariant_written += 1;
            }
        }

        let mut t = start;
        while t < time_len {
            let end = (t + time_chunk).min(time_len);
            for (var, target, chunks) in &varying {
                let mut window = whole_domain(var.shape());
                window[0] = t..end;
                let mut grid = chunks.clone();
                grid[0] = end - t;
                for region in iter_slices(&window, &grid)? {
                    var.commit(target, &region)?;
                }
            }
            marker.write(end)?;
            summary.windows_written += 1;
            info!(start = t, end, time_len, "Processed time steps");
            t = end;
        }

        marker.clear()?;
        info!(
            destination = %destination.display(),
            windows = summary.windows_written,
            resumed_from = start,
            "Dataset complete"
        );
        Ok(summary)
    }
}
