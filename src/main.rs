//! Grove CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Classpath resolution and element structure for multi-project workspaces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved classpath of a project
    Resolve {
        project: String,

        /// Include the exported entries of referenced projects
        #[arg(short, long)]
        expand: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Report reference cycles between projects
    Cycles,
    /// Print the element tree of a project
    Tree { project: String },
    /// Resolve every project and write the session state
    Save,
    /// List classpath variables
    Vars,
    /// Delete the saved session state
    Clear,
    /// Show version
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("grove={}", log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Grove v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Workspace root: {}", cli.root.display());

    match cli.command {
        Commands::Resolve { project, expand, json } => commands::resolve(&cli.root, &project, expand, json),
        Commands::Cycles => commands::cycles(&cli.root),
        Commands::Tree { project } => commands::tree(&cli.root, &project),
        Commands::Save => commands::save(&cli.root),
        Commands::Vars => commands::vars(&cli.root),
        Commands::Clear => commands::clear(&cli.root),
        Commands::Version => {
            println!("Grove v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
