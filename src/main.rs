//! Persona Chat - talk to AI personas from the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use persona_chat::cli::{self, BackendOptions};
use persona_chat::db::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Persona Chat - converse with configurable AI personas
#[derive(Parser, Debug)]
#[command(name = "pchat")]
#[command(version, about, long_about = None)]
struct Args {
    /// Persona to start with (id or name)
    #[arg(short, long)]
    persona: Option<String>,

    /// Gemini model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Send a single message and exit
    #[arg(long)]
    prompt: Option<String>,

    /// Use the offline echo backend instead of Gemini
    #[arg(long)]
    offline: bool,

    /// Database file (defaults to the XDG data directory)
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Enable verbose logging (equivalent to RUST_LOG=trace)
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let default_filter = if args.verbose {
            "trace"
        } else if args.debug {
            "debug"
        } else {
            "warn" // Quiet by default for normal use
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();

        if args.debug || args.verbose {
            tracing::info!("Debug logging enabled");
        }

        let db = match &args.db {
            Some(path) => Database::open_at(path.clone())?,
            None => Database::open()?,
        };
        db.migrate()?;
        let db = Arc::new(db);

        let options = BackendOptions {
            offline: args.offline,
            model: args.model.clone(),
        };

        if let Some(prompt) = &args.prompt {
            cli::run_single_prompt(db, options, args.persona.as_deref(), prompt).await?;
        } else {
            cli::run_interactive(db, options, args.persona.as_deref()).await?;
        }

        Ok(())
    })
}
