//! CLI argument parsing for sigtrace

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sigtrace")]
#[command(version)]
#[command(about = "Numeric-precision tracing: aggregate recorded call traces", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Aggregate trace streams into a summary table, bulk arrays and a header
    Export {
        /// Trace stream files to merge
        #[arg(required = true, value_name = "TRACE")]
        traces: Vec<PathBuf>,

        /// Output directory (default: <cache_dir>/<stats_dir> from the configuration)
        #[arg(short = 'o', long = "out", value_name = "DIR")]
        out: Option<PathBuf>,

        /// Base name of the export files (default: the configured trace name)
        #[arg(short = 'n', long = "name", value_name = "BASE")]
        name: Option<String>,

        /// TOML configuration file
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Keep each recording thread's statistics apart (`<arg>_TID<n>` rows)
        #[arg(long = "per-thread")]
        per_thread: bool,
    },

    /// Print the callable registry stored in an export header
    Show {
        /// Header file (`<base>.<seq>.header.msgpack`)
        #[arg(value_name = "HEADER")]
        header: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_export() {
        let cli = Cli::parse_from(["sigtrace", "export", "a.0.msgpack", "b.0.msgpack", "--out", "stats"]);
        match cli.command {
            Command::Export {
                traces,
                out,
                name,
                config,
                per_thread,
            } => {
                assert_eq!(traces.len(), 2);
                assert_eq!(out, Some(PathBuf::from("stats")));
                assert!(name.is_none());
                assert!(config.is_none());
                assert!(!per_thread);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_export_requires_trace() {
        assert!(Cli::try_parse_from(["sigtrace", "export"]).is_err());
    }

    #[test]
    fn test_cli_debug_flag_is_global() {
        let cli = Cli::parse_from(["sigtrace", "show", "h.0.header.msgpack", "--debug"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Show { .. }));
    }

    #[test]
    fn test_cli_debug_default_false() {
        let cli = Cli::parse_from(["sigtrace", "show", "h.0.header.msgpack"]);
        assert!(!cli.debug);
    }
}
