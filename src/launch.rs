//! # Local World Launcher
//!
//! Spawns a complete world on this machine: `np` copies of the current
//! binary, each with `MPI_RANK`, `MPI_SIZE`, and the full `MPI_ADDRESS_i`
//! table in its environment, all on loopback addresses. This is the
//! smallest launcher that satisfies the bootstrap contract; cluster
//! tooling does the same job with real hosts.
//!
//! The launcher waits for every rank to exit and reports the world as
//! failed if any rank failed. An optional JSON run report captures the
//! outcome per rank for scripting and CI.

use crate::cli::Args;
use crate::config::{ENV_ADDRESS_PREFIX, ENV_RANK, ENV_SIZE};
use crate::error::{MeshError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::{Child, Command};
use tracing::{error, info};
use uuid::Uuid;

/// Outcome of one rank's worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankOutcome {
    pub rank: usize,
    pub exit_code: Option<i32>,
    pub success: bool,
}

/// Summary of one launched world, serializable as the JSON run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub demo: String,
    pub world_size: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub ranks: Vec<RankOutcome>,
    pub success: bool,
}

impl RunReport {
    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MeshError::Config(format!("failed to serialize run report: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| MeshError::Config(format!("failed to write run report to {path:?}: {e}")))
    }
}

/// Build the loopback address table for a local world.
pub fn local_address_table(host: &str, base_port: u16, np: usize) -> Vec<String> {
    (0..np)
        .map(|rank| format!("{host}:{}", base_port as usize + rank))
        .collect()
}

/// Launch a local world and wait for it to finish.
pub async fn run_world(args: &Args) -> Result<RunReport> {
    if args.np == 0 {
        return Err(MeshError::Config("--np must be at least 1".to_string()));
    }
    let exe = std::env::current_exe()
        .map_err(|e| MeshError::Config(format!("cannot locate own executable: {e}")))?;
    let addresses = local_address_table(&args.host, args.base_port, args.np);

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let started = Instant::now();
    info!(
        "launcher: run {} starting demo '{}' with {} ranks on {}:{}..{}",
        run_id,
        args.demo,
        args.np,
        args.host,
        args.base_port,
        args.base_port as usize + args.np - 1
    );

    let mut children: Vec<(usize, Child)> = Vec::with_capacity(args.np);
    for rank in 0..args.np {
        let mut command = Command::new(&exe);
        command
            .arg("--demo")
            .arg(args.demo.to_string())
            .env(ENV_RANK, rank.to_string())
            .env(ENV_SIZE, args.np.to_string())
            .stdin(Stdio::null());
        if args.quiet {
            command.arg("--quiet");
        }
        if args.verbose > 0 {
            command.arg(format!("-{}", "v".repeat(args.verbose as usize)));
        }
        for (peer, addr) in addresses.iter().enumerate() {
            command.env(format!("{ENV_ADDRESS_PREFIX}{peer}"), addr);
        }

        let child = command.spawn().map_err(|e| {
            MeshError::Config(format!("failed to spawn worker for rank {rank}: {e}"))
        })?;
        children.push((rank, child));
    }

    let mut ranks = Vec::with_capacity(args.np);
    for (rank, mut child) in children {
        let status = child.wait().await.map_err(|e| {
            MeshError::Config(format!("failed to wait for rank {rank}: {e}"))
        })?;
        let outcome = RankOutcome {
            rank,
            exit_code: status.code(),
            success: status.success(),
        };
        if !outcome.success {
            error!(
                "launcher: rank {} exited abnormally (code {:?})",
                rank, outcome.exit_code
            );
        }
        ranks.push(outcome);
    }

    let success = ranks.iter().all(|r| r.success);
    let report = RunReport {
        run_id,
        demo: args.demo.to_string(),
        world_size: args.np,
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
        ranks,
        success,
    };

    info!(
        "launcher: run {} finished in {} ms, success = {}",
        report.run_id, report.duration_ms, report.success
    );
    Ok(report)
}
