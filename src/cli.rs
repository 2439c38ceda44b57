//! CLI argument parsing for sersec

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the serial-section report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "sersec")]
#[command(version)]
#[command(about = "Serial-section analysis of multi-cpu memory access traces", long_about = None)]
pub struct Cli {
    /// Trace file (JSON lines, one entry per line)
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// TOML configuration (miss limits, latency model)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only report the N buckets with the most held cycles
    #[arg(long = "top", value_name = "N")]
    pub top: Option<usize>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
