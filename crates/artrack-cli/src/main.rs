//! artrack CLI - planar-target database tooling
//!
//! Build a Bag-of-Words target database from a directory of reference
//! images, inspect its contents, or query a single frame against it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// artrack - planar-target detection database tool
#[derive(Parser, Debug)]
#[command(name = "artrack")]
#[command(about = "Build and query planar-target databases for AR tracking", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a target database from a directory of reference images
    Build {
        /// Directory of reference images (png, jpg)
        #[arg(short, long)]
        input: PathBuf,

        /// Output database path
        #[arg(short, long, default_value = "targets.json")]
        output: PathBuf,

        /// Weighting scheme (bm25, tfidf)
        #[arg(short, long, default_value = "bm25")]
        scheme: String,

        /// Keypoint cap per reference image
        #[arg(long, default_value = "500")]
        max_features: usize,
    },

    /// Show database metadata and per-target statistics
    Info {
        /// Database path
        #[arg(short, long)]
        database: PathBuf,
    },

    /// Detect database targets in a single image
    Query {
        /// Database path
        #[arg(short, long)]
        database: PathBuf,

        /// Frame image to search
        #[arg(short, long)]
        image: PathBuf,

        /// Weighting scheme the database was built with (bm25, tfidf)
        #[arg(short, long, default_value = "bm25")]
        scheme: String,

        /// Keypoint cap the database was built with
        #[arg(long, default_value = "500")]
        max_features: usize,

        /// Output format (text, json)
        #[arg(short = 'F', long, default_value = "text")]
        format: String,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            input,
            output,
            scheme,
            max_features,
        } => commands::build(&input, &output, &scheme, max_features),
        Commands::Info { database } => commands::info(&database),
        Commands::Query {
            database,
            image,
            scheme,
            max_features,
            format,
        } => commands::query(&database, &image, &scheme, max_features, &format),
    }
}
