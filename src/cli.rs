use clap::Parser;
use std::path::PathBuf;

/// Filter and format firewall session-table dumps
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Session dump to read, `-` for standard input
    #[arg(short = 'r', long = "file", default_value = "-")]
    pub file: String,

    /// Output template, e.g. '${serial} ${sap} -> ${dap}'
    #[arg(short, long)]
    pub output: Option<String>,

    /// Filter expression, e.g. 'proto tcp and dport 443'
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Number of worker threads (default: one per CPU)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Input is gzip compressed
    #[arg(short, long)]
    pub gzip: bool,

    /// Load a plugin, `name` or `name|key=value,flag` (repeatable)
    #[arg(short = 'p', long = "plugin")]
    pub plugins: Vec<String>,

    /// Write sessions as JSON lines instead of the template
    #[arg(long)]
    pub json: bool,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    pub write: Option<PathBuf>,

    /// Flush every line immediately
    #[arg(long)]
    pub no_buffer: bool,

    /// Parse every field group, not only the ones in use
    #[arg(long)]
    pub parse_all: bool,

    /// Print the compiled filter and exit
    #[arg(long)]
    pub dump_filter: bool,

    /// Show read progress on stderr
    #[arg(long)]
    pub progress: bool,

    /// TOML configuration file
    #[arg(short, long, env = "SESSION_SIEVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Enable trace logging (very verbose)
    #[arg(long)]
    pub trace: bool,
}
