// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "framegrab")]
#[command(about = "Grab frames from webcams")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices and their capture settings
    List,

    /// Capture frames and save them
    Grab {
        /// Device index to use (from 'framegrab list')
        #[arg(short, long, default_value = "0")]
        device: usize,

        /// Settings index to use (default: remembered settings, else the first)
        #[arg(short, long, conflicts_with = "all")]
        settings: Option<usize>,

        /// Walk every supported setting
        #[arg(short, long)]
        all: bool,

        /// Frames to wait for before saving (default: from config)
        #[arg(short, long)]
        frames: Option<u32>,

        /// Output directory (default: ~/Pictures/framegrab)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Encode as PNG instead of PPM
        #[arg(long)]
        png: bool,
    },

    /// Print device arrival and removal until interrupted
    Watch,

    /// Print version and configuration details
    Info,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set RUST_LOG to override, e.g. RUST_LOG=framegrab=trace
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let result = match cli.command {
        Commands::List => cli::list_devices(),
        Commands::Grab {
            device,
            settings,
            all,
            frames,
            output,
            png,
        } => cli::grab(cli::GrabOptions {
            device,
            settings,
            all,
            frames,
            output,
            png,
        }),
        Commands::Watch => cli::watch(),
        Commands::Info => cli::info(),
    };

    result.map_err(Into::into)
}
