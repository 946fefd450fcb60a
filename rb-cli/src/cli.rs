use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rb_client::ExportMode;

#[derive(Parser, Debug)]
#[command(name = "rb", author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to <config dir>/rb/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "RB_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "RB_ORG_ID", global = true)]
    pub org_id: Option<String>,

    #[arg(long, env = "RB_PROJECT_ID", global = true)]
    pub project_id: Option<String>,

    /// GraphQL endpoint of the annotation service
    #[arg(long, env = "RB_ENDPOINT", global = true)]
    pub endpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export project tasks as JSON
    Export {
        #[arg(long, value_enum, default_value_t = Mode::Latest)]
        mode: Mode,

        #[arg(long, value_enum, default_value_t = Format::Flat)]
        format: Format,

        /// Use the first annotator's labels instead of consensus entries
        #[arg(long)]
        no_consensus: bool,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create datapoints from a JSON array of entries
    Upload {
        #[arg(long)]
        storage_id: String,

        /// JSON file holding `[{name, items, labels?, ...}]`
        #[arg(short, long)]
        input: PathBuf,

        /// Maximum number of datapoints created at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write failed entries to this file instead of stdout
        #[arg(long)]
        failed_output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Latest,
    GroundTruth,
}

impl From<Mode> for ExportMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Latest => ExportMode::Latest,
            Mode::GroundTruth => ExportMode::GroundTruth,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One label list per task
    Flat,
    /// Labels grouped per volume
    Series,
    /// Flat tasks with empty keys pruned
    Legacy,
}
