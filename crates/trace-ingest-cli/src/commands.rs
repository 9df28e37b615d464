use clap::{Parser, Subcommand};
use trace_ingest_core::ProcessingState;

#[derive(Debug, Parser)]
#[command(name = "trace-ingest")]
#[command(about = "Discover, archive and measure trace packages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run discovery, move and measure once over the configured directories
    Run,
    /// Show how many packages are in each processing state
    Status,
    /// Show a package with its transition history and measurements
    Show {
        /// Package file name (case-insensitive)
        name: String,
    },
    /// List packages whose current state matches
    List {
        /// discovered, moved, measured or post-measure-action-invoked
        #[arg(value_parser = parse_state)]
        state: ProcessingState,
    },
    /// Record that the post-measure action ran for a measured package
    MarkHandled {
        /// Package file name (case-insensitive)
        name: String,
    },
    /// Print configuration values
    PrintConfig,
    /// Truncate all catalog tables
    TruncateDb,
}

fn parse_state(raw: &str) -> Result<ProcessingState, String> {
    raw.parse()
}
