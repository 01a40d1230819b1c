//! Keelson CLI - Drive chart releases from a local checkpoint file

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;
mod exit_codes;
mod state;

use commands::{InputArgs, ProviderArgs, up::UpOptions};
use state::DEFAULT_STATE_FILE;

/// Log filter variable, in `EnvFilter` syntax
const LOG_ENV: &str = "KEELSON_LOG";

#[derive(Parser)]
#[command(name = "keelson")]
#[command(author = "Keelson Contributors")]
#[command(version)]
#[command(about = "Reconcile chart releases against a local state file", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate inputs and print the normalized document
    Check {
        #[command(flatten)]
        inputs: InputArgs,

        /// State file
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,
    },

    /// Show what `up` would change
    Diff {
        #[command(flatten)]
        inputs: InputArgs,

        /// State file
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Print the diff as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create or upgrade the release and save its state
    Up {
        #[command(flatten)]
        inputs: InputArgs,

        /// State file
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Validate and plan without touching the release store
        #[arg(long)]
        preview: bool,

        /// Deadline for each release action, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Refresh the state from the release store
    Refresh {
        /// State file
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,
    },

    /// Uninstall the release and remove the state file
    Destroy {
        /// State file
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Deadline for the uninstall, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> error::Result<()> {
    let provider = cli.provider.provider().await?;

    match cli.command {
        Commands::Check { inputs, state } => commands::check::run(&provider, &inputs, &state),

        Commands::Diff {
            inputs,
            state,
            json,
        } => commands::diff::run(&provider, &inputs, &state, json),

        Commands::Up {
            inputs,
            state,
            preview,
            timeout,
        } => {
            let opts = UpOptions {
                preview,
                timeout: commands::timeout(timeout),
            };
            commands::up::run(&provider, &inputs, &state, opts).await
        }

        Commands::Refresh { state } => commands::refresh::run(&provider, &state).await,

        Commands::Destroy { state, timeout } => {
            commands::destroy::run(&provider, &state, commands::timeout(timeout)).await
        }
    }
}
