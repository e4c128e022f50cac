//! # mpi-mesh - Main Entry Point
//!
//! One binary, two personalities:
//!
//! 1. **Launcher mode** (no `MPI_RANK` in the environment): spawn `--np`
//!    copies of this binary as the ranks of a local world, each with the
//!    bootstrap environment set, wait for all of them, and optionally
//!    write a JSON run report.
//! 2. **Worker mode** (`MPI_RANK` present): join the world described by
//!    the environment, run the selected demo program against the runtime
//!    API, and exit zero on success.
//!
//! Any fatal initialization or runtime error exits non-zero with a
//! message on standard error.

use anyhow::{bail, Context, Result};
use clap::Parser;
use mpi_mesh::cli::{Args, Demo};
use mpi_mesh::config::ENV_RANK;
use mpi_mesh::{launch, Communicator};
use tracing::info;

mod demos;
mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the logging guard alive for the duration of the program.
    let _log_guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref())?;

    if std::env::var(ENV_RANK).is_ok() {
        run_worker(&args).await
    } else {
        run_launcher(&args).await
    }
}

/// Worker mode: join the world and run the selected demo.
async fn run_worker(args: &Args) -> Result<()> {
    let world = Communicator::init()
        .await
        .context("failed to initialize world from environment")?;

    let outcome = match args.demo {
        Demo::ArraySum => demos::array_sum(&world).await,
        Demo::Ring => demos::ring(&world).await,
        Demo::ScatterGather => demos::scatter_gather(&world).await,
        Demo::MatMul => demos::matmul(&world).await,
    };

    // Tear the world down even when the demo failed, then surface the
    // demo's error as the process outcome.
    world.finalize().await;
    outcome.with_context(|| format!("demo '{}' failed at rank {}", args.demo, world.rank()))
}

/// Launcher mode: stand up a local world and wait for it.
async fn run_launcher(args: &Args) -> Result<()> {
    info!("mpi-mesh {} launching local world", mpi_mesh::VERSION);

    let report = launch::run_world(args).await?;
    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("failed to write run report to {path:?}"))?;
        info!("launcher: run report written to {:?}", path);
    }

    if !report.success {
        bail!(
            "world failed: {} of {} ranks exited abnormally",
            report.ranks.iter().filter(|r| !r.success).count(),
            report.world_size
        );
    }
    info!(
        "demo '{}' completed across {} ranks in {} ms",
        report.demo, report.world_size, report.duration_ms
    );
    Ok(())
}
