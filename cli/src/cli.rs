use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

/// Command-line client for the notes API.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    /// TOML file with `SyncConfig` overrides. A missing file means defaults.
    #[arg(long, short = 'c', value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the notes API, e.g. `http://localhost:8000/api/v1`.
    #[arg(long, env = "NOTES_API_BASE", global = true)]
    pub base_url: Option<String>,

    /// Bearer token sent with every request.
    #[arg(long, env = "NOTES_API_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Page through the most recent notes.
    List {
        /// Maximum number of pages to load.
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },

    /// Search notes and page through the results.
    Search {
        query: String,

        #[arg(long, default_value_t = 1)]
        pages: usize,
    },

    /// Ask the assistant one question and stream the reply.
    Chat {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
}
