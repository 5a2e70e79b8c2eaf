use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

mod auth;
mod calendar;
mod config;
mod db;
mod error;
mod html;
mod journal;
mod markdown;
mod server;
mod timezone;
mod types;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "taccuino")]
#[command(about = "Personal Markdown journal with a month calendar view")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the web server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Apply pending migrations and normalize legacy timestamps
    Migrate,

    /// Print the sanitized HTML of a Markdown file
    Render {
        /// Path to the Markdown file
        file: PathBuf,
    },
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level))
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower_http=warn".parse()?);

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_max_level(Level::TRACE)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level)?;

    match args.command {
        // Default to serve if no command specified
        None => {
            server::serve(8080, Config::from_env()?).await?;
        }
        Some(Commands::Serve { port }) => {
            server::serve(port, Config::from_env()?).await?;
        }
        Some(Commands::Migrate) => {
            let config = Config::from_env()?;
            let conn = db::init_db(&config.database_path, &config.migrations_dir)?;
            let normalized = db::normalize_legacy_rows(&conn, &config.display_zone)?;
            info!(
                db = %config.database_path.display(),
                entries = db::count_entries(&conn)?,
                normalized = normalized,
                "Database is up to date"
            );
        }
        Some(Commands::Render { file }) => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("{}", markdown::render(&raw));
        }
    }

    Ok(())
}
