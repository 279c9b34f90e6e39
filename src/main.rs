use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use offcache::agent::{Agent, Handlers};
use offcache::cache::{CacheStorage, SqliteStorage};
use offcache::config::Config;
use offcache::host::{AgentState, Registration};
use offcache::logging;
use offcache::net::{HttpNetwork, Request};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Offline cache agent for web application shells")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offcache.yaml or $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the configured cache version
  Install,
  /// Send one request through the agent and print the response body
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Print status line and headers before the body
    #[arg(short, long)]
    include: bool,
  },
  /// List cache identifiers in the store
  Caches,
  /// List entries stored in a cache (default: the current one)
  Entries { cache: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);

  match args.command {
    Command::Install => install(&config, storage).await,
    Command::Fetch {
      url,
      method,
      include,
    } => fetch(&config, storage, &url, &method, include).await,
    Command::Caches => list_caches(&config, storage.as_ref()),
    Command::Entries { cache } => {
      let cache = cache.unwrap_or_else(|| config.cache.name.clone());
      list_entries(storage.as_ref(), &cache)
    }
  }
}

fn registration(
  config: &Config,
  storage: Arc<SqliteStorage>,
) -> Result<Registration<SqliteStorage, HttpNetwork>> {
  let network = Arc::new(HttpNetwork::new(config.network.timeout())?);
  let agent = Agent::from_config(config, storage, network)?;
  Ok(Registration::new(agent, Handlers::offline_shell()))
}

async fn install(config: &Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let already_installed = storage.has(&config.cache.name)?;
  let mut registration = registration(config, storage)?;

  let state = registration.start().await?;
  let name = registration.agent().cache_name();
  match state {
    AgentState::Activated if already_installed => eprintln!("{} already installed", name),
    AgentState::Activated => {
      let entries = registration.agent().storage().entries(name)?;
      eprintln!("{} installed and active ({} entries)", name, entries.len());
    }
    other => eprintln!("{} is {:?}", name, other),
  }

  Ok(())
}

async fn fetch(
  config: &Config,
  storage: Arc<SqliteStorage>,
  url: &str,
  method: &str,
  include: bool,
) -> Result<()> {
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut registration = registration(config, storage)?;
  let request = Request::new(method, registration.agent().resolve(url)?);

  // A failed install leaves requests going straight to the network
  if let Err(e) = registration.start().await {
    warn!(error = %e, "Agent not started");
  }

  let served = registration.handle_fetch(request).await?;
  let response = &served.response;
  eprintln!("{} {} ({})", response.status, response.status_text, served.source);

  let mut stdout = std::io::stdout().lock();
  if include {
    writeln!(stdout, "{} {}", response.status, response.status_text)?;
    for (name, value) in &response.headers {
      writeln!(stdout, "{}: {}", name, value)?;
    }
    writeln!(stdout)?;
  }
  stdout.write_all(&response.body)?;
  stdout.flush()?;

  Ok(())
}

fn list_caches(config: &Config, storage: &SqliteStorage) -> Result<()> {
  let keys = storage.keys()?;
  if keys.is_empty() {
    eprintln!("No caches");
    return Ok(());
  }

  for name in keys {
    let marker = if name == config.cache.name { "current" } else { "stale" };
    println!("{}\t{}", name, marker);
  }

  Ok(())
}

fn list_entries(storage: &SqliteStorage, cache: &str) -> Result<()> {
  if !storage.has(cache)? {
    return Err(eyre!("No cache named {}", cache));
  }

  for entry in storage.entries(cache)? {
    println!("{}\t{}\t{}", entry.status, entry.size, entry.key);
  }

  Ok(())
}
