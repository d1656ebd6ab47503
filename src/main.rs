mod commands;
mod logging;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sluice_template::AppIdentity;

use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Lint, wire and run declarative stage pipelines", long_about = None)]
struct Cli {
  /// Data directory (default: ~/.sluice)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Log level used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  /// Default pipeline options (default: <data-dir>/options.json)
  #[arg(long, global = true)]
  options: Option<PathBuf>,

  #[command(flatten)]
  identity: IdentityArgs,

  #[command(subcommand)]
  command: Commands,
}

/// Values bound under the `app` template namespace.
#[derive(Args)]
struct IdentityArgs {
  #[arg(long, global = true, default_value = "sluice")]
  app_id: String,

  #[arg(long, global = true, default_value = "localhost")]
  hostname: String,

  #[arg(long, global = true, default_value = "sluice@localhost")]
  service_account: String,
}

impl From<IdentityArgs> for AppIdentity {
  fn from(args: IdentityArgs) -> Self {
    AppIdentity {
      id: args.app_id,
      hostname: args.hostname,
      service_account_name: args.service_account,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Lint a pipeline document
  Lint {
    /// Path to the pipeline document
    file: PathBuf,

    /// Bind a template variable (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Re-lint whenever the file changes
    #[arg(long)]
    watch: bool,
  },

  /// Print the wired stage graph without running it
  Wire {
    file: PathBuf,

    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,
  },

  /// Run a pipeline document locally
  Run {
    file: PathBuf,

    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,
  },

  /// List the template variables a document references
  Vars {
    file: PathBuf,

    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,
  },

  /// Show help for the available stage types
  Stages {
    /// A single stage type to describe
    stage_type: Option<String>,
  },

  /// Serve the trigger API for the pipelines in <data-dir>/pipelines
  Serve {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,
  },
}

fn parse_var(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  logging::init(&cli.log_level);

  let settings = Settings::load(cli.data_dir, cli.options, cli.identity.into())?;
  let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;

  match cli.command {
    Commands::Lint { file, vars, watch } => {
      rt.block_on(commands::lint(&settings, &file, &vars, watch))
    }
    Commands::Wire { file, vars } => commands::wire(&settings, &file, &vars),
    Commands::Run { file, vars } => rt.block_on(commands::run(&settings, &file, &vars)),
    Commands::Vars { file, vars } => commands::vars(&settings, &file, &vars),
    Commands::Stages { stage_type } => commands::stages(stage_type.as_deref()),
    Commands::Serve { addr } => rt.block_on(commands::serve(&settings, addr)),
  }
}
