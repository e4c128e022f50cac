//! # Command-Line Interface Module
//!
//! Argument parsing for the `mpi-mesh` binary, built on the `clap` derive
//! API. The binary has two personalities selected by the environment, not
//! by flags:
//!
//! - **Launcher mode** (no `MPI_RANK` in the environment): spawn a local
//!   world of worker processes on loopback addresses, run the selected
//!   demo program in every rank, and wait for the world to finish.
//! - **Worker mode** (`MPI_RANK` present): join the world described by the
//!   environment and run the selected demo against the runtime API.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Sum an array across four local ranks
//! mpi-mesh --demo array-sum --np 4
//!
//! # Pass a message around a ring, with debug logging
//! mpi-mesh --demo ring --np 3 -v
//!
//! # Scatter/gather round trip with a JSON run report
//! mpi-mesh --demo scatter-gather --np 2 --report run.json
//! ```

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Demo program to run in every rank of the world
    #[arg(short, long, value_enum, default_value_t = Demo::ArraySum, help_heading = "Core Options")]
    pub demo: Demo,

    /// Number of ranks to launch (launcher mode only)
    ///
    /// Defaults to the number of logical CPUs on this machine.
    #[arg(short = 'n', long, default_value_t = num_cpus::get(), help_heading = "Core Options")]
    pub np: usize,

    /// Host address the local world binds its rank servers to
    #[arg(long, default_value = "127.0.0.1", help_heading = "Network")]
    pub host: String,

    /// Base TCP port; rank r listens on base_port + r
    #[arg(short = 'p', long, default_value_t = 7100, help_heading = "Network")]
    pub base_port: u16,

    /// Write a JSON run report to this path after the world finishes
    /// (launcher mode only)
    #[arg(short = 'o', long, help_heading = "Output and Logging")]
    pub report: Option<PathBuf>,

    /// Write detailed logs to this file instead of stderr
    #[arg(long, help_heading = "Output and Logging")]
    pub log_file: Option<PathBuf>,

    /// Silence all user-facing informational output on stdout
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity.
    ///
    /// Can be used multiple times to increase detail:
    ///  (default): info
    ///  -v: debug
    ///  -vv and more: trace
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

/// The bundled rank-aware demo programs.
///
/// Each demo is a small user program written against the public API; the
/// launcher runs the same demo in every rank of the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Demo {
    /// Broadcast an array, sum chunks locally, reduce the partial sums
    /// at rank 0.
    #[value(name = "array-sum")]
    ArraySum,

    /// Every rank sends a greeting to its right neighbor and receives one
    /// from its left.
    #[value(name = "ring")]
    Ring,

    /// Scatter a buffer from rank 0, gather it back, and verify the round
    /// trip.
    #[value(name = "scatter-gather")]
    ScatterGather,

    /// Distributed matrix multiply: scatter rows of A, broadcast B,
    /// gather the result rows.
    #[value(name = "matmul")]
    MatMul,
}

impl std::fmt::Display for Demo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Demo::ArraySum => "array-sum",
            Demo::Ring => "ring",
            Demo::ScatterGather => "scatter-gather",
            Demo::MatMul => "matmul",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let args = Args::parse_from(["mpi-mesh"]);
        assert_eq!(args.demo, Demo::ArraySum);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.base_port, 7100);
        assert!(args.np >= 1);
        assert!(!args.quiet);
    }

    #[test]
    fn demo_names_parse() {
        let args = Args::parse_from(["mpi-mesh", "--demo", "matmul", "--np", "2"]);
        assert_eq!(args.demo, Demo::MatMul);
        assert_eq!(args.np, 2);
    }

    #[test]
    fn display_matches_value_names() {
        assert_eq!(Demo::ScatterGather.to_string(), "scatter-gather");
        assert_eq!(Demo::ArraySum.to_string(), "array-sum");
    }
}
