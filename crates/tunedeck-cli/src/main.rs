//! `tunedeck`: headless driver for the Tunedeck catalog.
//!
//! Scans the configured music folders, searches and downloads remote audio
//! and queries the catalog from a terminal.

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::commands::CliError;
use crate::logging::LoggingConfig;

#[derive(Parser)]
#[command(name = "tunedeck")]
#[command(about = "Scan, search and download music into a local catalog", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// More console output (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only warnings and errors on the console
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan library folders into the catalog
    Scan {
        /// Re-probe files already in the catalog and refresh their metadata
        #[arg(long)]
        force: bool,
        /// Scan these folders instead of the configured roots
        #[arg(long = "root")]
        roots: Vec<PathBuf>,
    },
    /// List catalogued tracks, optionally filtered
    List {
        /// Case-insensitive text matched against title, artist and album
        query: Option<String>,
    },
    /// Search the remote platform
    Search {
        /// Search text
        query: String,
        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Download remote items and add them to the catalog
    Download {
        /// Remote identifiers
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Resolve the playback locator of a catalogued track
    Play {
        /// Catalog id
        id: i64,
    },
    /// Show or replace the now-playing list
    NowPlaying {
        /// New list of catalog ids, in order
        ids: Vec<i64>,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration back to disk
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::auto().with_verbosity(cli.verbose, cli.quiet);
    if let Some(dir) = cli.log_dir.clone() {
        logging = logging.with_log_directory(dir);
    }
    let _guard = match logging::init(&logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: {e}");
            None
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "tunedeck starting");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config { save } => commands::show_config(&config, cli.config.as_deref(), save),
        Commands::Scan { force, roots } => commands::scan(config, force, roots).await,
        Commands::List { query } => commands::list(config, query.as_deref()).await,
        Commands::Search { query, pages } => commands::search(config, &query, pages).await,
        Commands::Download { ids } => commands::download(config, &ids).await,
        Commands::Play { id } => commands::play(config, id).await,
        Commands::NowPlaying { ids } => commands::now_playing(config, &ids).await,
    }
}
