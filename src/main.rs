use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use swarden::cache::{CacheStorage, SqliteStorage};
use swarden::config::Config;
use swarden::http::{Destination, Request};
use swarden::network::HttpNetwork;
use swarden::notify::{HeadlessClients, PrintNotifier};
use swarden::worker::{Agent, Event, Outcome};

#[derive(Parser, Debug)]
#[command(name = "swarden")]
#[command(about = "An offline-first request caching agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swarden/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Preload core assets, then activate the current generation
  Install,
  /// Delete stores that belong to other generations
  Activate,
  /// Run one request through the caching strategy
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    #[arg(long, value_enum)]
    destination: Option<Destination>,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache stores and their entry counts
  Stores,
  /// Display the notification for a push payload
  Push { payload: Option<String> },
  /// Trigger the background-sync hook
  Sync {
    /// Sync tag (defaults to the configured one)
    #[arg(long)]
    tag: Option<String>,
  },
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG overrides the default `swarden=info` filter. The returned guard
/// must live until exit so buffered file logs are flushed.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swarden=info"));

  match log_file {
    Some(path) => {
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
      Ok(None)
    }
  }
}

type CliAgent = Agent<SqliteStorage, HttpNetwork>;

fn build_agent(config: Config) -> Result<CliAgent> {
  let storage = SqliteStorage::open(config.database.as_deref())?;
  let network = HttpNetwork::new(&config)?;

  let agent = Agent::new(
    config,
    Arc::new(storage),
    Arc::new(network),
    Arc::new(PrintNotifier),
    Arc::new(HeadlessClients),
  )?;
  Ok(agent)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let agent = build_agent(config)?;

  let result = run(&agent, args.command).await;

  // Let write-backs finish before the process goes away
  agent.settle().await;
  result
}

async fn run(agent: &CliAgent, command: Command) -> Result<()> {
  match command {
    Command::Install => {
      agent.dispatch(Event::Install).await?;
      agent.dispatch(Event::Activate).await?;
    }
    Command::Activate => {
      // Reconcile only once the current generation's static store exists
      agent.resume()?;
      agent.dispatch(Event::Activate).await?;
    }
    Command::Fetch {
      url,
      method,
      accept,
      destination,
      output,
    } => {
      let url = Url::parse(&url)
        .or_else(|_| agent.config().origin.join(&url))
        .map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;

      let mut request = Request::new(method, url);
      if let Some(accept) = accept {
        request = request.with_header("Accept", &accept);
      }
      request.destination = destination;

      if !agent.resume()? {
        info!("Current generation is not installed; requests pass through");
      }

      let Outcome::Response(served) = agent.dispatch(Event::Fetch(request)).await? else {
        return Err(eyre!("Fetch produced no response"));
      };

      eprintln!(
        "{} {} ({})",
        served.response.status, served.response.status_text, served.source
      );
      for (name, value) in served.response.headers.iter() {
        eprintln!("{}: {}", name, value);
      }

      match output {
        Some(path) => std::fs::write(&path, &served.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout()
          .write_all(&served.response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?,
      }
    }
    Command::Stores => {
      for name in agent.storage().names()? {
        let marker = if agent.names().is_current(&name) {
          "*"
        } else {
          " "
        };
        let entries = agent.storage().keys(&name)?.len();
        println!("{} {} ({} entries)", marker, name, entries);
      }
    }
    Command::Push { payload } => {
      let payload = payload.map(String::into_bytes);
      if let Outcome::Notified(None) = agent.dispatch(Event::Push(payload)).await? {
        info!("Nothing to display");
      }
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| agent.config().sync_tag.clone());
      match agent.dispatch(Event::Sync { tag }).await? {
        Outcome::Synced { refreshed } => info!("Refreshed {} assets", refreshed),
        _ => info!("Sync tag ignored"),
      }
    }
  }

  Ok(())
}
