use clap::{Parser, Subcommand};
use hawkeye::cli::status::StatusArgs;
use hawkeye::cli::watch::WatchArgs;
use hawkeye::config::{load_config, resolve_config_path};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hawkeye")]
#[command(about = "Watch log streams and batch the problems they report", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sources defined in the config file
    Run,
    /// Watch sources given on the command line, no config file needed
    Watch(WatchArgs),
    /// Summarize recent problems in a log file
    Status(StatusArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config file
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Check a config file without running it
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Diagnostics go to stderr so stdout stays clean for batch output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hawkeye=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            hawkeye::cli::run::run(config_path).await?;
        }
        Some(Commands::Watch(args)) => {
            hawkeye::cli::watch::watch(args).await?;
        }
        Some(Commands::Status(args)) => {
            // Custom detection patterns apply when a config file is present
            let config = config_path.as_deref().map(load_config).transpose()?;
            hawkeye::cli::status::status(args, config.as_ref()).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                hawkeye::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                hawkeye::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
