//! respack: overlay custom resources onto a game directory and restore it afterwards.

mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "respack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// More output (-v for info, -vv for debug)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Config file (default: config.toml in the respack config directory)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Overlay the resource folders onto the target and follow their changes
  Apply {
    #[command(flatten)]
    overlay: OverlayArgs,

    /// Apply once and leave the overlay in place
    #[arg(long)]
    no_watch: bool,
  },

  /// Put the target back the way it was before the overlay
  Restore {
    /// Target directory (defaults to the one the backup was taken from)
    #[arg(long, value_name = "DIR")]
    target: Option<PathBuf>,
  },

  /// Show what the backup manifest still records
  Status {
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
  },

  /// Forget the backup manifest and preserved originals without restoring
  Discard {
    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,
  },
}

#[derive(Args)]
struct OverlayArgs {
  /// Target directory (overrides the config file)
  #[arg(long, value_name = "DIR")]
  target: Option<PathBuf>,

  /// Resource folder; repeat for several (replaces the configured roots)
  #[arg(long = "root", value_name = "DIR")]
  roots: Vec<PathBuf>,

  /// Glob for directories to skip; repeat for several (added to the configured ones)
  #[arg(long, value_name = "GLOB")]
  exclude: Vec<String>,
}

fn init_logging(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let mut config = cmd::load_config(cli.config.as_deref())?;

  match cli.command {
    Commands::Apply { overlay, no_watch } => {
      if let Some(target) = overlay.target {
        config.target = Some(target);
      }
      if !overlay.roots.is_empty() {
        config.roots = overlay.roots;
      }
      config.exclude.extend(overlay.exclude);
      cmd::cmd_apply(config, no_watch)
    }
    Commands::Restore { target } => cmd::cmd_restore(config, target),
    Commands::Status { json } => cmd::cmd_status(&config, cli.verbose > 0, json),
    Commands::Discard { yes } => cmd::cmd_discard(config, yes),
  }
}
