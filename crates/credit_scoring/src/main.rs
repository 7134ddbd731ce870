//! Credit Scoring Service
//!
//! Batch inference API and operator CLI for the credit-scoring models.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use database::create_pool;
use tracing_subscriber::EnvFilter;

mod commands;

/// Credit Scoring Service
#[derive(Parser)]
#[command(name = "credit-scoring")]
#[command(about = "Batch credit-scoring inference with an audited prediction trail")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to listen on (defaults to `BIND_ADDRESS`)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Score a batch of records from a JSON file
    Predict {
        /// Registered model name
        #[arg(short, long)]
        model: String,

        /// JSON file holding one record or an array of records
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Register a model, or update an existing registration
    Register {
        /// Model name, also the checkpoint file stem
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        version: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// Register the model as inactive
        #[arg(long)]
        inactive: bool,
    },

    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url, config.database_max_connections).await?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind_address.clone());
            commands::serve::run(&pool, &config, &bind).await?;
        }
        Commands::Predict { model, input } => {
            commands::predict::run(&pool, &config, &model, &input).await?;
        }
        Commands::Register {
            name,
            version,
            description,
            inactive,
        } => {
            commands::register::run(
                &pool,
                &name,
                version.as_deref(),
                description.as_deref(),
                inactive,
            )
            .await?;
        }
        Commands::Migrate => {
            commands::migrate::run(&pool).await?;
        }
    }

    Ok(())
}
