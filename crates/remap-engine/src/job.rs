//! Planning and running a variable-level remap of one source store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use zarrs::array::DataType;

use crate::chunk_plan::{clip_to_shape, storage_dtype, MAX_RANK};
use crate::config::EngineConfig;
use crate::dispatch::{DispatchReport, ParallelDispatcher};
use crate::error::{RemapError, Result};
use crate::healpix::attach_crs;
use crate::remap::{RemapUnit, TwoPhaseRemapper, VariablePlan};
use crate::slices::{align_up, iter_slices, tuple_max, whole_domain};
use crate::store::{array_info, create_store, declare_array, storage_fill_value, ArrayHandle, ArraySpec};
use crate::transform::{resolve, FunctionRegistry, ResolvedTransform, SourceCatalog, Transform};

/// A remap of selected variables from one store into another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemapJob {
    pub source: PathBuf,
    pub destination: PathBuf,

    /// Output chunk shape by variable rank. Ranks without an entry keep
    /// the source chunking.
    #[serde(default)]
    pub chunks_per_rank: BTreeMap<usize, Vec<u64>>,

    /// Output variable name to transform.
    pub variables: BTreeMap<String, Transform>,

    /// HEALPix zoom of the grid; when set, a `crs` marker is written.
    #[serde(default)]
    pub zoom: Option<u32>,
}

/// Declaration of the output array for a resolved transform.
///
/// Fails without side effects if the rank is unsupported or the configured
/// chunking does not match the rank.
pub fn plan_output(
    resolved: &ResolvedTransform,
    chunks_per_rank: &BTreeMap<usize, Vec<u64>>,
) -> Result<ArraySpec> {
    let primary = resolved.primary();
    let rank = primary.rank();
    if rank > MAX_RANK {
        return Err(RemapError::UnsupportedRank { rank });
    }

    let chunks = match chunks_per_rank.get(&rank) {
        Some(chunks) if chunks.len() != rank => {
            return Err(RemapError::RankMismatch(format!(
                "'{}': chunks {:?} configured for rank {rank}",
                resolved.output, chunks
            )));
        }
        Some(chunks) => clip_to_shape(chunks, &primary.shape),
        None => primary.chunks.clone(),
    };

    // Computed variables always come out as float32.
    let data_type = if resolved.op.is_identity() {
        storage_dtype(&primary.data_type)
    } else {
        DataType::Float32
    };

    Ok(ArraySpec {
        name: resolved.output.clone(),
        shape: primary.shape.clone(),
        chunks,
        dims: Some(primary.dims.clone()),
        fill_value: storage_fill_value(&data_type, &primary.fill_value),
        data_type,
        attributes: primary.attributes.clone(),
    })
}

/// Bind a resolved transform to its declared output array.
pub fn plan_variable(resolved: ResolvedTransform, output: ArrayHandle) -> Result<Arc<VariablePlan>> {
    let output_info = array_info(&output)?;
    Ok(Arc::new(VariablePlan {
        output_name: resolved.output,
        inputs: resolved.inputs,
        input_infos: resolved.input_infos,
        output,
        output_info,
        op: resolved.op,
    }))
}

/// Partition a variable's output domain into units.
///
/// Units step by the coarser of the input and output chunk grids, rounded
/// up to whole output chunks so no two units ever write the same chunk.
pub fn partition_units(plan: &Arc<VariablePlan>) -> Result<Vec<RemapUnit>> {
    let mut grids: Vec<&[u64]> = vec![plan.output_info.chunks.as_slice()];
    grids.extend(plan.input_infos.iter().map(|i| i.chunks.as_slice()));
    let grid = align_up(&tuple_max(&grids)?, &plan.output_info.chunks)?;

    Ok(iter_slices(&whole_domain(&plan.output_info.shape), &grid)?
        .map(|region| RemapUnit {
            plan: Arc::clone(plan),
            region,
        })
        .collect())
}

/// Whether two paths name the same store, resolving links when both exist.
fn same_store(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Run a whole job.
///
/// Every transform is resolved and every output planned before anything is
/// written, so configuration errors abort the job with the destination
/// untouched. Per-unit failures are reported in the returned
/// [`DispatchReport`].
pub fn remap_dataset(
    job: &RemapJob,
    config: &EngineConfig,
    registry: &FunctionRegistry,
) -> Result<DispatchReport> {
    if same_store(&job.source, &job.destination) {
        return Err(RemapError::config(format!(
            "source and destination are the same store: {}",
            job.source.display()
        )));
    }
    let catalog = SourceCatalog::open(&job.source)?;

    let resolved = job
        .variables
        .iter()
        .map(|(output, transform)| resolve(output, transform, &catalog, registry))
        .collect::<Result<Vec<_>>>()?;
    let specs = resolved
        .iter()
        .map(|r| plan_output(r, &job.chunks_per_rank))
        .collect::<Result<Vec<_>>>()?;

    let destination = create_store(&job.destination)?;
    let mut units = Vec::new();
    for (resolved, spec) in resolved.into_iter().zip(&specs) {
        let output = declare_array(&destination, spec, &config.output_compression)?;
        let plan = plan_variable(resolved, output)?;
        let variable_units = partition_units(&plan)?;
        info!(
            variable = %spec.name,
            shape = ?spec.shape,
            chunks = ?spec.chunks,
            units = variable_units.len(),
            "Planned variable"
        );
        units.extend(variable_units);
    }

    if let Some(zoom) = job.zoom {
        attach_crs(&destination, zoom)?;
    }

    let dispatcher = ParallelDispatcher::new(config.workers)?;
    let remapper = TwoPhaseRemapper::new(config);
    Ok(dispatcher.run_for(specs.iter().map(|s| s.name.clone()), units, &remapper))
}
