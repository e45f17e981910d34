//! Zarr rechunking service.
//!
//! Remaps variables of a source store into a new chunk layout, coarsens
//! HEALPix datasets by one zoom level, and prints planned chunk shapes.

mod commands;
mod config_loader;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rechunker")]
#[command(about = "Chunk-aligned, resumable Zarr remapping")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remap variables into a new store as described by a job file
    Remap {
        /// Job file path
        #[arg(short, long)]
        job: PathBuf,

        /// Worker threads (default: REMAP_WORKERS or available cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Keep scratch stores left behind by earlier runs
        #[arg(long)]
        no_sweep: bool,
    },

    /// Coarsen a HEALPix dataset from zoom Z to Z-1
    Coarsen {
        /// Source store
        #[arg(long)]
        source: PathBuf,

        /// Destination store (resumed if it already exists)
        #[arg(long)]
        destination: PathBuf,

        /// Zoom level of the source
        #[arg(long)]
        zoom_in: u32,

        /// Variables to coarsen
        #[arg(long, value_delimiter = ',', required = true)]
        variables: Vec<String>,

        /// Time steps per write window, in multiples of the storage time chunk
        #[arg(long, default_value_t = 8)]
        time_chunk_factor: u64,
    },

    /// Print the planned chunk shape of a variable
    Chunks {
        /// HEALPix zoom order
        #[arg(long)]
        order: u32,

        /// Time steps per chunk
        #[arg(long, default_value_t = 24)]
        timechunk: u64,

        /// Variable shape, comma separated
        #[arg(long, value_delimiter = ',')]
        shape: Vec<u64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level, args.json)?;

    match args.command {
        Command::Remap {
            job,
            workers,
            no_sweep,
        } => commands::remap(&job, workers, !no_sweep),
        Command::Coarsen {
            source,
            destination,
            zoom_in,
            variables,
            time_chunk_factor,
        } => commands::coarsen(&source, &destination, zoom_in, &variables, time_chunk_factor),
        Command::Chunks {
            order,
            timechunk,
            shape,
        } => commands::chunks(order, timechunk, &shape),
    }
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}
