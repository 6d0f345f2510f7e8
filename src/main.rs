mod app;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use natur::config::{Config, LOG_VAR};

#[derive(Parser, Debug)]
#[command(name = "natur")]
#[command(about = "Command-line client for the Festival NATUR marketplace")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/natur/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Marketplace API base URL, overriding the config file
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Companies placed on the map
  Map {
    #[arg(short, long)]
    search: Option<String>,
    #[arg(short = 'k', long)]
    category: Option<String>,
  },
  /// Company directory
  Directory {
    #[arg(short, long)]
    search: Option<String>,
    #[arg(short = 'k', long)]
    category: Option<String>,
  },
  /// Conversation list
  Conversations {
    #[arg(short, long)]
    search: Option<String>,
  },
  /// Messages of one conversation
  Messages { conversation_id: u64 },
  /// Send a message to a conversation
  Send { conversation_id: u64, text: String },
  /// Start (or reopen) a conversation with a user
  Contact { user_id: u64 },
  /// Show the signed-in user
  Whoami,
  /// Show or edit the signed-in user's profile
  Profile {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    bio: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    website: Option<String>,
    #[arg(long)]
    avatar_url: Option<String>,
  },
}

/// Logs go to a file so stdout only carries command output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("natur");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "natur.log"));
  let filter = EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("natur=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;

  // Override API URL if specified on command line
  let config = if let Some(base_url) = args.api_url {
    let mut config = config;
    config.api.base_url = base_url;
    config
  } else {
    config
  };

  let app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
