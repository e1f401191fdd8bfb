use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Dispatch;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;
mod embeddings;
mod error;
mod index;
mod mcp;
mod memory;
mod search;
mod types;

/// Environment variable holding the log filter
const LOG_ENV: &str = "MEMORYPILOT_LOG";

#[derive(Parser)]
#[command(name = "memorypilot")]
#[command(version)]
#[command(about = "Persistent memory for coding assistants")]
struct Cli {
    /// Data directory (default: $MEMORYPILOT_HOME or ~/.memorypilot)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC on stdin/stdout (default)
    Serve,

    /// Remember something
    Remember {
        /// Content to remember
        content: String,

        /// Memory type: decision, pattern, fact, preference, mistake, learning
        #[arg(short = 'T', long = "type", default_value = "fact")]
        memory_type: String,

        /// Comma-separated topics
        #[arg(short, long, default_value = "")]
        topics: String,

        /// Importance (0-1)
        #[arg(short, long, default_value = "0.5")]
        importance: f64,

        /// personal or project
        #[arg(short, long, default_value = "personal")]
        scope: String,

        /// Project the memory belongs to
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Recall memories by search
    Recall {
        /// Search query
        query: String,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,

        /// Only this memory type
        #[arg(short = 'T', long = "type")]
        memory_type: Option<String>,

        /// Only memories with this topic
        #[arg(short, long)]
        topic: Option<String>,

        /// Only this scope
        #[arg(short, long)]
        scope: Option<String>,

        /// Only this project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show one memory
    Show {
        /// Memory ID
        id: String,

        /// Do not count this as an access
        #[arg(long)]
        peek: bool,
    },

    /// Show statistics
    Stats,

    /// Embed memories that have no embedding from the configured model
    Reembed {
        /// Re-embed every memory
        #[arg(long)]
        all: bool,
    },

    /// View or set configuration
    Config {
        /// Config key, e.g. embedding.backend
        key: Option<String>,

        /// Config value
        value: Option<String>,
    },
}

fn log_dispatch(verbose: bool) -> Dispatch {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    Dispatch::new(subscriber)
}

fn run(cli: Cli, log: &Dispatch) -> error::Result<()> {
    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cli::serve::run_serve(&data_dir, log.clone()),
        Commands::Remember {
            content,
            memory_type,
            topics,
            importance,
            scope,
            project,
        } => cli::memory::run_remember(
            &data_dir,
            &content,
            &memory_type,
            &topics,
            importance,
            &scope,
            project.as_deref(),
        ),
        Commands::Recall {
            query,
            limit,
            memory_type,
            topic,
            scope,
            project,
        } => cli::memory::run_recall(
            &data_dir,
            &query,
            limit,
            memory_type.as_deref(),
            topic,
            scope.as_deref(),
            project,
        ),
        Commands::Show { id, peek } => cli::memory::run_show(&data_dir, &id, peek),
        Commands::Stats => cli::memory::run_stats(&data_dir),
        Commands::Reembed { all } => cli::memory::run_reembed(&data_dir, all),
        Commands::Config { key, value } => {
            cli::config::run_config(&data_dir, key.as_deref(), value.as_deref())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let log = log_dispatch(cli.verbose);

    let result = tracing::dispatcher::with_default(&log, || run(cli, &log));

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
