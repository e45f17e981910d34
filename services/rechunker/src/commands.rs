//! Subcommand implementations.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info};

use remap_engine::store::open_store;
use remap_engine::{
    attach_crs, coarsen_dataset, remap_dataset, sweep_stale, ChunkPolicy, EngineConfig,
    FunctionRegistry, ResumableWriter, SourceCatalog, UnitOutcome,
};

use crate::config_loader;

fn engine_config(workers: Option<usize>) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env();
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

/// Run a remap job file.
pub fn remap(job_path: &Path, workers: Option<usize>, sweep: bool) -> Result<()> {
    let job = config_loader::load_job(job_path)?;
    let config = engine_config(workers)?;
    info!(
        job = %job_path.display(),
        source = %job.source.display(),
        destination = %job.destination.display(),
        variables = job.variables.len(),
        workers = config.workers,
        "Starting remap"
    );

    if sweep {
        let removed = sweep_stale(&config.scratch_dir)
            .with_context(|| format!("Failed to sweep {}", config.scratch_dir.display()))?;
        if removed > 0 {
            info!(removed, "Removed stale scratch stores");
        }
    }

    let registry = FunctionRegistry::with_builtins();
    let report = remap_dataset(&job, &config, &registry)
        .with_context(|| format!("Remap job {} failed", job_path.display()))?;

    for failure in report.failures() {
        if let UnitOutcome::Failed {
            output_name,
            region,
            reason,
        } = failure
        {
            error!(variable = %output_name, region = ?region, reason = %reason, "Unit failed");
        }
    }

    let failed = report.failures().count();
    anyhow::ensure!(
        failed == 0,
        "{} of {} units failed; destination regions of failed units are unwritten",
        failed,
        report.total_units()
    );

    info!(units = report.total_units(), "Remap completed");
    Ok(())
}

/// Coarsen `variables` from `zoom_in` to `zoom_in - 1`.
pub fn coarsen(
    source: &Path,
    destination: &Path,
    zoom_in: u32,
    variables: &[String],
    time_chunk_factor: u64,
) -> Result<()> {
    let zoom_out = zoom_in
        .checked_sub(1)
        .context("zoom_in must be at least 1")?;
    anyhow::ensure!(time_chunk_factor > 0, "time_chunk_factor must be > 0");
    let config = engine_config(None)?;

    let read = ChunkPolicy::default().read_chunks(zoom_out);
    info!(
        source = %source.display(),
        destination = %destination.display(),
        zoom_in,
        cell_chunk = read.cell,
        time_chunk = read.time,
        "Starting coarsening"
    );

    let catalog = SourceCatalog::open(source)?;
    let dataset = coarsen_dataset(&catalog, variables)?;

    let writer = ResumableWriter::new(zoom_out, read.time, config.dataset_compression);
    let summary = writer.write(&dataset, destination, read.time * time_chunk_factor)?;
    attach_crs(&open_store(destination)?, zoom_out)?;

    info!(
        resumed_from = summary.resumed_from,
        windows = summary.windows_written,
        time_len = summary.time_len,
        "Coarsening completed"
    );
    Ok(())
}

/// Print the chunk shape planned for a variable of `shape`.
pub fn chunks(order: u32, timechunk: u64, shape: &[u64]) -> Result<()> {
    let policy = ChunkPolicy::default();
    let chunks = policy.chunk_shape(shape, timechunk, order)?;
    println!("{}", serde_json::to_string(&chunks)?);
    Ok(())
}
