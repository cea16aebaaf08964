use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use offline_sw::app::App;
use offline_sw::commands::Command;
use offline_sw::config::Config;
use offline_sw::logging;

#[derive(Parser, Debug)]
#[command(name = "offline-sw")]
#[command(about = "Offline request caching and deferred action sync for the bionic hand dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Dashboard origin, e.g. https://hand.example.com
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    let config = Config { origin, ..config };
    config.validate()?;
    config
  } else {
    config
  };

  let _guard = logging::init(&Config::data_dir()?)?;

  let app = App::new(config)?;
  let output = app.run(args.command).await?;
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}
