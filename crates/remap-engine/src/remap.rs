//! Execution of a single partition unit.
//!
//! A unit is remapped directly when its inputs fit the materialization
//! budget. Otherwise it is staged: the transform writes into a scratch
//! array that keeps the input chunking on all but the last axis, and the
//! result is then copied into the output in output-compatible pieces. Both
//! paths produce identical bytes.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{CompressionConfig, EngineConfig};
use crate::error::{RemapError, Result};
use crate::scratch::ScratchStore;
use crate::slices::{iter_slices, region_len, tuple_max, Region};
use crate::store::{copy_raw, read_f32, write_f32, ArrayHandle, ArrayInfo, ArraySpec};
use crate::transform::TransformOp;

/// Everything needed to remap any unit of one output variable.
#[derive(Clone)]
pub struct VariablePlan {
    pub output_name: String,
    pub inputs: Vec<ArrayHandle>,
    pub input_infos: Vec<ArrayInfo>,
    pub output: ArrayHandle,
    pub output_info: ArrayInfo,
    pub op: TransformOp,
}

impl VariablePlan {
    fn primary(&self) -> &ArrayInfo {
        &self.input_infos[0]
    }
}

/// One self-contained piece of work: a region of one output variable.
#[derive(Clone)]
pub struct RemapUnit {
    pub plan: Arc<VariablePlan>,
    pub region: Region,
}

impl std::fmt::Debug for RemapUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemapUnit")
            .field("output", &self.plan.output_name)
            .field("region", &self.region)
            .finish()
    }
}

/// How a unit was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapMode {
    Direct,
    Staged,
}

/// Result of executing one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Done {
        output_name: String,
        region: Region,
        mode: RemapMode,
    },
    Failed {
        output_name: String,
        region: Region,
        reason: String,
    },
}

impl UnitOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    pub fn output_name(&self) -> &str {
        match self {
            Self::Done { output_name, .. } | Self::Failed { output_name, .. } => output_name,
        }
    }

    pub fn region(&self) -> &[Range<u64>] {
        match self {
            Self::Done { region, .. } | Self::Failed { region, .. } => region,
        }
    }
}

/// Executes partition units, staging through scratch stores when needed.
#[derive(Debug, Clone)]
pub struct TwoPhaseRemapper {
    threshold: u64,
    last_axis_factor: u64,
    scratch_dir: PathBuf,
    scratch_compression: CompressionConfig,
}

impl TwoPhaseRemapper {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.staging_threshold_elements,
            last_axis_factor: config.staging_last_axis_factor.max(1),
            scratch_dir: config.scratch_dir.clone(),
            scratch_compression: config.scratch_compression,
        }
    }

    /// Direct if the unit's elements across all inputs fit the budget.
    pub fn mode_for(&self, unit: &RemapUnit) -> RemapMode {
        let projected = region_len(&unit.region).saturating_mul(unit.plan.inputs.len() as u64);
        if projected > self.threshold && !unit.region.is_empty() {
            RemapMode::Staged
        } else {
            RemapMode::Direct
        }
    }

    /// Execute a unit. Errors and panics are contained and reported as
    /// [`UnitOutcome::Failed`]; they never propagate.
    pub fn execute(&self, unit: &RemapUnit) -> UnitOutcome {
        let mode = self.mode_for(unit);
        let result = panic::catch_unwind(AssertUnwindSafe(|| match mode {
            RemapMode::Direct => self.remap_direct(&unit.plan, &unit.region),
            RemapMode::Staged => self.remap_staged(&unit.plan, &unit.region),
        }));

        let reason = match result {
            Ok(Ok(())) => {
                debug!(variable = %unit.plan.output_name, region = ?unit.region, ?mode, "Remapped unit");
                return UnitOutcome::Done {
                    output_name: unit.plan.output_name.clone(),
                    region: unit.region.clone(),
                    mode,
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        warn!(
            variable = %unit.plan.output_name,
            region = ?unit.region,
            error = %reason,
            "Failed to remap unit"
        );
        UnitOutcome::Failed {
            output_name: unit.plan.output_name.clone(),
            region: unit.region.clone(),
            reason,
        }
    }

    /// Read, transform and write the whole region in one step.
    pub fn remap_direct(&self, plan: &VariablePlan, region: &[Range<u64>]) -> Result<()> {
        apply_region(&plan.inputs, &plan.output, &plan.op, region)
    }

    /// Transform into a scratch array, then copy into the output.
    pub fn remap_staged(&self, plan: &VariablePlan, region: &[Range<u64>]) -> Result<()> {
        let primary = plan.primary();
        let rank = primary.rank();
        if rank == 0 {
            return self.remap_direct(plan, region);
        }

        let mut temp_chunks = primary.chunks.clone();
        temp_chunks[rank - 1] = plan.output_info.chunks[rank - 1] * self.last_axis_factor;

        let spec = ArraySpec {
            name: "staged".to_string(),
            shape: primary.shape.clone(),
            chunks: temp_chunks.clone(),
            dims: Some(primary.dims.clone()),
            data_type: plan.output_info.data_type.clone(),
            fill_value: plan.output_info.fill_value.clone(),
            attributes: serde_json::Map::new(),
        };
        let scratch = ScratchStore::create(&self.scratch_dir, &spec, &self.scratch_compression)?;

        let mut grids: Vec<&[u64]> = plan.input_infos.iter().map(|i| i.chunks.as_slice()).collect();
        grids.push(&temp_chunks);
        let transform_grid = tuple_max(&grids)?;
        for sub in iter_slices(region, &transform_grid)? {
            apply_region(&plan.inputs, scratch.array(), &plan.op, &sub)?;
        }

        let copy_grid = tuple_max(&[temp_chunks.as_slice(), plan.output_info.chunks.as_slice()])?;
        let staged = [scratch.array().clone()];
        for sub in iter_slices(region, &copy_grid)? {
            apply_region(&staged, &plan.output, &TransformOp::Identity, &sub)?;
        }

        debug!(
            variable = %plan.output_name,
            scratch = %scratch.path().display(),
            ?transform_grid,
            ?copy_grid,
            "Staged unit through scratch store"
        );
        Ok(())
    }
}

/// Apply `op` to one region of `inputs` and write the result to `output`.
fn apply_region(
    inputs: &[ArrayHandle],
    output: &ArrayHandle,
    op: &TransformOp,
    region: &[Range<u64>],
) -> Result<()> {
    if op.is_identity() && inputs.len() == 1 && inputs[0].data_type() == output.data_type() {
        return copy_raw(&inputs[0], output, region);
    }

    let blocks = inputs
        .iter()
        .map(|input| read_f32(input, region))
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<&[f32]> = blocks.iter().map(Vec::as_slice).collect();

    let len = usize::try_from(region_len(region))
        .map_err(|_| RemapError::config(format!("region {region:?} is too large")))?;
    let mut out = vec![0.0f32; len];
    op.apply(&views, &mut out)?;
    write_f32(output, region, &out)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {msg}")
    } else {
        "panic with non-string payload".to_string()
    }
}
