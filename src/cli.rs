use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "dep-checkr",
    about = "Audit a directory of .NET assemblies for missing, mismatched and redirected dependencies",
    version
)]
pub struct Cli {
    /// Directory of modules to inspect
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Config file [default: <path>/.dep-checkr/config.toml, fallback ~/.config/dep-checkr/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Extra directory to probe for references not found locally (repeatable)
    #[arg(long = "ambient-path", value_name = "DIR")]
    pub ambient_path: Vec<PathBuf>,

    /// Never look outside the scanned directory
    #[arg(long)]
    pub no_ambient: bool,

    /// Show the tree of every module (not just those with findings)
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print summary line
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}
