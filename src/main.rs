#[macro_use]
extern crate log;
#[macro_use]
extern crate diesel;

mod api;
mod app;
mod bootstrap;
mod cache;
mod coin_utils;
mod config;
mod daemon_client;
mod db;
mod error;
mod monitor;
mod slices;
mod stats;
mod tasks;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use app::App;
use bootstrap::BootstrapPlan;
use config::Config;
use error::{PoolError, Result};

#[derive(Parser, Debug)]
#[command(name = "simplevert", version, about = "Mining pool stats site")]
struct Cli {
  /// Path to the YAML config
  #[arg(short, long, default_value = "config.yml")]
  config: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Serve the stats site and run the refresh loop
  Serve,
  /// Create the pool role and databases
  Bootstrap {
    /// Print the psql script instead of running it
    #[arg(long)]
    print: bool,
    /// Use the historical script verbatim
    #[arg(long)]
    original: bool,
  },
  /// Validate the config and print it back
  CheckConfig,
  /// Apply pending schema migrations
  Migrate,
  /// Fold finished time slices into coarser ones
  Compress,
}

fn setup_logging(config: &Config) -> Result<()> {
  let level = config.log_level.parse()
    .map_err(|_| PoolError::InvalidConfig(format!("unknown log level {}", config.log_level)))?;
  let mut dispatch = fern::Dispatch::new()
    .format(|out, message, record| {
      out.finish(format_args!(
        "{}[{}][{}] {}",
        chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
        record.target(),
        record.level(),
        message
      ))
    })
    .level(level)
    .chain(std::io::stdout());
  if let Some(path) = &config.log_file {
    let file = fern::log_file(path).map_err(|source| PoolError::ConfigIo {
      path: path.to_owned(),
      source,
    })?;
    dispatch = dispatch.chain(file);
  }
  dispatch.apply().map_err(|err| PoolError::InvalidConfig(err.to_string()))
}

fn serve(config: Config) -> Result<()> {
  let app = Arc::new(App::new(config)?);
  let applied = app.db.run_migrations()?;
  if applied > 0 {
    info!("Applied {} migrations", applied);
  }
  tasks::spawn(app.clone())?;
  info!("Serving {} on {}:{}", app.config.site_title, app.config.web.address, app.config.web.port);
  rocket::execute(api::rocket(app).launch())
    .map(|_| ())
    .map_err(|err| PoolError::Web(err.to_string()))
}

fn bootstrap(config: &Config, print: bool, original: bool) -> Result<()> {
  let plan = if original {
    let password = config.bootstrap.password.as_ref()
      .ok_or_else(|| PoolError::Bootstrap("bootstrap.password is required".to_owned()))?;
    BootstrapPlan::original(password)
  } else {
    BootstrapPlan::from_config(&config.bootstrap)?
  };
  if print {
    print!("{}", plan.to_psql());
    return Ok(());
  }
  info!("Bootstrapping databases through {}", config.bootstrap.admin_uri);
  plan.execute(&config.bootstrap.admin_uri)
}

fn run(cli: Cli) -> Result<()> {
  let config = config::read_config(&cli.config)?;
  setup_logging(&config)?;
  match cli.command {
    Command::Serve => serve(config),
    Command::Bootstrap { print, original } => bootstrap(&config, print, original),
    Command::CheckConfig => {
      print!("{}", config.to_yaml()?);
      info!("{} is valid", cli.config);
      Ok(())
    }
    Command::Migrate => {
      let db = db::DbAccess::new(&config.database_uri)?;
      let applied = db.run_migrations()?;
      info!("Applied {} migrations", applied);
      Ok(())
    }
    Command::Compress => {
      let app = App::new(config)?;
      let folded = tasks::compress_once(&app)?;
      info!("Compressed {} time slices", folded);
      Ok(())
    }
  }
}

fn main() {
  if let Err(err) = run(Cli::parse()) {
    eprintln!("simplevert: {}", err);
    std::process::exit(1);
  }
}
