use std::{env, path::PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use fewshot::{
    burn_backend_types::{InferenceBackend, InferenceDevice, NAME},
    commands,
};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fewshot")]
#[command(about = "Few-shot segmentation of volumetric images with a conditioner/segmentor pair")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend information
    Info,

    /// Initialize a model and write a snapshot
    Init {
        /// Model configuration (JSON); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Snapshot path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the architecture of a snapshot
    Describe {
        /// Snapshot path
        #[arg(short, long)]
        model: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run `predict` on a synthetic volume
    Smoke {
        /// Snapshot path
        #[arg(short, long)]
        model: PathBuf,

        /// Number of slices; the first half is used as support
        #[arg(long, default_value_t = 4)]
        slices: usize,

        /// Slice height and width
        #[arg(long, default_value_t = 64)]
        size: usize,

        /// Label value of the structure to segment
        #[arg(long, default_value_t = 1)]
        query_label: i64,

        /// Sample with test-time dropout
        #[arg(long)]
        dropout: bool,
    },
}

fn main() -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()),
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let cli = Cli::parse();
    let device = InferenceDevice::default();
    tracing::info!(backend = NAME, "device ready");

    match cli.command {
        Commands::Info => {
            println!("Few-shot segmentor:");
            println!("  Backend: {NAME}");
            println!("  Device: {device:?}");
            println!(
                "  Snapshot format: {}",
                fewshot_model::SNAPSHOT_FORMAT_VERSION
            );
            Ok(())
        }

        Commands::Init { config, output } => {
            let config = commands::load_config(config.as_deref())?;
            commands::run_init::<InferenceBackend>(&config, &output, &device)
        }

        Commands::Describe { model, json } => {
            commands::run_describe::<InferenceBackend>(&model, &device, json)
        }

        Commands::Smoke {
            model,
            slices,
            size,
            query_label,
            dropout,
        } => commands::run_smoke::<InferenceBackend>(
            &model,
            slices,
            size,
            query_label,
            dropout,
            &device,
        ),
    }
}
