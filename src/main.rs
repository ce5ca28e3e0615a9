mod agent;
mod api;
mod cache;
mod config;
mod db;
mod event;
mod notify;
mod queue;
mod sync;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::event::{ControlMessage, Trigger, TriggerHandler};
use crate::notify::NotificationData;

#[derive(Parser, Debug)]
#[command(name = "villasync")]
#[command(about = "Offline cache and background sync agent for the villa booking stack")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/villasync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Fire one sync trigger by tag and exit
  #[arg(long, value_name = "TAG")]
  sync: Option<String>,

  /// Resolve a URL through the resource cache and print the body
  #[arg(long, value_name = "URL")]
  fetch: Option<String>,

  /// Treat --fetch as a plain resource request instead of a navigation
  #[arg(long, requires = "fetch")]
  resource: bool,

  /// Queue a mutation for later replay: STORE ID JSON
  #[arg(long, value_names = ["STORE", "ID", "JSON"], num_args = 3)]
  enqueue: Vec<String>,

  /// Remove a queued mutation by id: STORE ID
  #[arg(long, value_names = ["STORE", "ID"], num_args = 2)]
  dequeue: Vec<String>,

  /// List the mutations queued in a store and exit
  #[arg(long, value_name = "STORE")]
  pending: Option<String>,

  /// Deliver a push payload (JSON) and exit
  #[arg(long, value_name = "JSON")]
  push: Option<String>,

  /// Simulate a notification click by action name and exit
  #[arg(long, value_name = "ACTION")]
  click: Option<String>,

  /// Force the configured cache generation to activate and exit
  #[arg(long)]
  skip_waiting: bool,

  /// Print the current cache generation identifier and exit
  #[arg(long)]
  cache_version: bool,

  /// Add the given URLs to the cache generation and exit
  #[arg(long, value_name = "URL", num_args = 1..)]
  cache_urls: Vec<String>,
}

impl Args {
  fn is_one_shot(&self) -> bool {
    self.sync.is_some()
      || self.push.is_some()
      || self.click.is_some()
      || self.skip_waiting
      || self.cache_version
      || !self.cache_urls.is_empty()
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config)?;

  let mut agent = agent::Agent::new(&config)?;
  agent.startup().await?;

  // One-shot: resolve a resource through the cache
  if let Some(raw) = args.fetch {
    let url = agent.resolve_url(&raw)?;
    let request = if args.resource {
      cache::ResourceRequest::resource(url)
    } else {
      cache::ResourceRequest::navigation(url)
    };
    let resource = agent.fetch(&request).await?;
    tracing::info!(
      status = resource.status,
      source = ?resource.source,
      content_type = resource.content_type.as_deref().unwrap_or(""),
      "resource resolved"
    );
    std::io::stdout().write_all(&resource.body)?;
    return Ok(());
  }

  // One-shot: queue a mutation the way the host page would
  if let [store, id, payload] = args.enqueue.as_slice() {
    let store = parse_store(store)?;
    let payload: serde_json::Value =
      serde_json::from_str(payload).map_err(|e| eyre!("Invalid payload JSON: {}", e))?;
    agent
      .queue()
      .put(store, &queue::QueuedRecord::new(id.clone(), payload))?;
    return Ok(());
  }

  // One-shot: drop a queued mutation
  if let [store, id] = args.dequeue.as_slice() {
    agent.queue().remove(parse_store(store)?, id)?;
    return Ok(());
  }

  // One-shot: list queued mutations
  if let Some(store) = args.pending {
    for record in agent.queue().get_all(parse_store(&store)?)? {
      println!(
        "{}",
        serde_json::json!({
          "id": record.id,
          "attempts": record.attempts,
          "queuedAt": record.queued_at,
          "payload": record.payload,
        })
      );
    }
    return Ok(());
  }

  // One-shot: inject the requested triggers and drain the channel
  if args.is_one_shot() {
    let (mut handler, tx) = TriggerHandler::manual();
    let mut version_reply = None;

    if let Some(tag) = &args.sync {
      let tag = sync::SyncTag::parse(tag).ok_or_else(|| eyre!("Unknown sync tag: {}", tag))?;
      let _ = tx.send(Trigger::Sync(tag));
    }
    if let Some(payload) = args.push {
      let _ = tx.send(Trigger::Push(Some(payload.into_bytes())));
    }
    if let Some(action) = args.click {
      let _ = tx.send(Trigger::NotificationClick {
        action: Some(action),
        data: NotificationData::default(),
      });
    }
    if args.skip_waiting {
      let _ = tx.send(Trigger::Control(ControlMessage::SkipWaiting));
    }
    if !args.cache_urls.is_empty() {
      let _ = tx.send(Trigger::Control(ControlMessage::CacheUrls(args.cache_urls)));
    }
    if args.cache_version {
      let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
      let _ = tx.send(Trigger::Control(ControlMessage::GetVersion(reply_tx)));
      version_reply = Some(reply_rx);
    }
    let _ = tx.send(Trigger::Control(ControlMessage::Shutdown));

    agent.run(&mut handler).await?;

    if let Some(reply) = version_reply {
      println!("{}", reply.await?);
    }
    return Ok(());
  }

  // Run until ctrl-c
  let api = api::ApiClient::new(config.server_url()?)?;
  let mut handler = TriggerHandler::new(
    api,
    config.periodic_interval(),
    config.connectivity_interval(),
  );
  agent.run(&mut handler).await
}

fn parse_store(name: &str) -> Result<queue::StoreKind> {
  queue::StoreKind::parse(name)
    .ok_or_else(|| eyre!("Unknown store: {} (reservations|messages|analytics)", name))
}

fn init_tracing(config: &config::Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  use tracing_subscriber::layer::SubscriberExt;
  use tracing_subscriber::util::SubscriberInitExt;

  let log_dir = match &config.data_dir {
    Some(dir) => dir.clone(),
    None => db::Database::default_path()?
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from(".")),
  };
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let file_appender = tracing_appender::rolling::daily(&log_dir, "villasync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("villasync=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false),
    )
    .init();

  Ok(guard)
}
