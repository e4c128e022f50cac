use anyhow::Result;
use colored::*;
use mpi_mesh::config::ENV_RANK;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{prelude::*, Layer};

/// Console formatter for worlds whose ranks share a terminal.
///
/// The local launcher inherits every worker's stdout, so lines from all
/// ranks interleave. Each line therefore starts with the identity of the
/// process that wrote it (`[rank 2]`, or `[launcher]` outside a world),
/// colored by severity; the message itself stays uncolored so interleaved
/// output remains readable.
struct RankPrefixFormatter {
    identity: String,
}

impl RankPrefixFormatter {
    fn from_env() -> Self {
        let identity = match std::env::var(ENV_RANK) {
            Ok(rank) => format!("rank {rank}"),
            Err(_) => "launcher".to_string(),
        };
        Self { identity }
    }
}

impl<S, N> FormatEvent<S, N> for RankPrefixFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let prefix = format!("[{}]", self.identity);
        let prefix = match *event.metadata().level() {
            Level::ERROR => prefix.red().bold(),
            Level::WARN => prefix.yellow(),
            Level::INFO => prefix.cyan(),
            Level::DEBUG | Level::TRACE => prefix.dimmed(),
        };
        write!(writer, "{} ", prefix)?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Initialize the process-wide tracing subscriber.
///
/// Verbosity maps `0 → INFO`, `1 → DEBUG`, `2+ → TRACE`. Clean rank-tagged
/// output goes to stdout unless `quiet` is set; detailed logs go either to
/// stderr or, when `log_file` is given, to a daily-rolling file through a
/// non-blocking writer. The returned guard must stay alive for the
/// duration of the program or file logging stops working.
pub fn init(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let log_level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_layer;
    match log_file {
        Some(path) => {
            let log_dir = path.parent().unwrap_or_else(|| Path::new("."));
            let log_name = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("mpi_mesh.log"));
            let appender = tracing_appender::rolling::daily(log_dir, log_name);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            detailed_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false) // Disable color codes for the file logger
                .with_filter(log_level)
                .boxed();
            guard = Some(file_guard);
        }
        None => {
            detailed_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(log_level)
                .boxed();
            guard = None;
        }
    }

    let stdout_layer = if !quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(RankPrefixFormatter::from_env())
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_layer)
        .with(stdout_layer)
        .init();

    Ok(guard)
}
