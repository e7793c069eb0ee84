mod app;
mod commands;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use vetemr::config::{self, ApiConfig};
use vetemr::logging;

#[derive(Parser, Debug)]
#[command(name = "vetemr")]
#[command(about = "Cached command-line client for a veterinary EMR server")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vetemr/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// EMR server base URL (overrides config and VETEMR_API_URL)
  #[arg(long)]
  api_url: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override API URL if specified on command line
  let config = if let Some(url) = args.api_url {
    config::Config {
      api: ApiConfig { url },
      ..config
    }
  } else {
    config
  };

  let _guard = logging::init(&config.log, args.log_stderr)?;

  let app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
