//! Chunk-aligned, resumable Zarr V3 remapping
//!
//! This crate converts chunked array stores between layouts while applying
//! per-variable transforms. It provides:
//!
//! - **Chunk planning**: output chunk shapes per HEALPix zoom order
//! - **Partitioning**: exact, restartable walks over chunk-aligned regions
//! - **Two-phase remapping**: bounded memory when input and output chunk
//!   grids disagree, by staging through a scratch store
//! - **Parallel dispatch**: per-unit failure isolation on a worker pool
//! - **Resumable writes**: time-windowed commits with a progress marker
//!
//! # Architecture
//!
//! ```text
//! RemapJob (source, destination, chunks_per_rank, variables)
//!      │
//!      ├─► resolve() every Transform against the SourceCatalog
//!      │
//!      ├─► plan_output() + declare_array() per variable
//!      │
//!      ├─► partition_units(): iter_slices over tuple_max(in, out) chunks
//!      │
//!      └─► ParallelDispatcher::run()
//!               │
//!               ▼
//!          TwoPhaseRemapper::execute(unit)
//!               │
//!               ├─► Direct: read → transform → write
//!               │
//!               └─► Staged: inputs → ScratchStore → output
//! ```
//!
//! # Example
//!
//! ```ignore
//! use remap_engine::{remap_dataset, EngineConfig, FunctionRegistry, RemapJob};
//!
//! let job: RemapJob = serde_yaml::from_str(&yaml)?;
//! let report = remap_dataset(&job, &EngineConfig::from_env(), &FunctionRegistry::with_builtins())?;
//! for failure in report.failures() {
//!     eprintln!("{} {:?}", failure.output_name(), failure.region());
//! }
//! ```

pub mod chunk_plan;
pub mod coarsen;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod healpix;
pub mod job;
pub mod remap;
pub mod resumable;
pub mod scratch;
pub mod slices;
pub mod store;
pub mod transform;

// Re-export commonly used types at crate root
pub use chunk_plan::{chunk_size, storage_dtype, ChunkPolicy, ReadChunks};
pub use coarsen::{coarsen_dataset, coarsen_mean, CoarsenedVariable};
pub use config::{CompressionConfig, EngineConfig, ShuffleMode, ZarrCompression};
pub use dispatch::{DispatchReport, ParallelDispatcher, VariableSummary};
pub use error::{RemapError, Result};
pub use healpix::attach_crs;
pub use job::{partition_units, plan_output, plan_variable, remap_dataset, RemapJob};
pub use remap::{RemapMode, RemapUnit, TwoPhaseRemapper, UnitOutcome, VariablePlan};
pub use resumable::{
    OutputDataset, OutputVariable, ProgressMarker, ResumableWriter, StoredVariable, WriteSummary,
};
pub use scratch::{sweep_stale, ScratchStore};
pub use slices::{iter_slices, tuple_max, whole_domain, Region, SliceIter};
pub use transform::{resolve, FunctionRegistry, SourceCatalog, Transform, TransformOp};
