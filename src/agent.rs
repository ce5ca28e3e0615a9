use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{ApiClient, ApiError};
use crate::cache::{
  CacheSettings, FetchedResource, GenerationState, ResourceCache, ResourceRequest, SqliteStorage,
};
use crate::config::Config;
use crate::db::Database;
use crate::event::{ControlMessage, Trigger, TriggerHandler};
use crate::notify::{self, ClientWindows, LogSink, LogWindows, NotificationData, NotificationSink};
use crate::queue::{DrainReport, MutationQueue, SqliteQueue, StoreKind};
use crate::sync::SyncTag;

/// The agent: resource cache, mutation queue and API client composed
/// behind one dispatch loop. Components are constructed here and passed
/// explicit references; nothing is looked up ambiently.
pub struct Agent {
  cache: ResourceCache<SqliteStorage>,
  queue: MutationQueue<SqliteQueue>,
  api: ApiClient,
  sink: Arc<dyn NotificationSink>,
  windows: Arc<dyn ClientWindows>,
}

impl Agent {
  pub fn new(config: &Config) -> Result<Self> {
    let db = Arc::new(Database::open(config.database_path().as_deref())?);
    Self::with_parts(config, db, Arc::new(LogSink), Arc::new(LogWindows))
  }

  /// Construct from explicit parts. Tests inject an in-memory database
  /// and recording sinks here.
  pub fn with_parts(
    config: &Config,
    db: Arc<Database>,
    sink: Arc<dyn NotificationSink>,
    windows: Arc<dyn ClientWindows>,
  ) -> Result<Self> {
    let api = ApiClient::new(config.server_url()?)?;
    let settings: CacheSettings = config.cache_settings()?;
    let cache = ResourceCache::new(SqliteStorage::new(Arc::clone(&db)), settings);
    let queue = MutationQueue::new(SqliteQueue::new(db), config.sync.max_attempts);

    Ok(Self {
      cache,
      queue,
      api,
      sink,
      windows,
    })
  }

  /// The durable mutation queue. The host enqueues failed writes here.
  pub fn queue(&self) -> &MutationQueue<SqliteQueue> {
    &self.queue
  }

  /// Bring the configured cache generation in control: install it if
  /// it does not exist yet, then activate. An install failure is not
  /// fatal to the agent; whatever was cached before stays in place and
  /// the next start retries.
  pub async fn startup(&self) -> Result<()> {
    match self.cache.state()? {
      None => {
        let api = self.api.clone();
        let install = self
          .cache
          .install(|url| {
            let api = api.clone();
            async move { api.fetch_resource(&url).await }
          })
          .await;

        match install {
          Ok(()) => self.cache.activate()?,
          Err(e) => warn!("cache install failed, continuing without it: {e}"),
        }
      }
      Some(GenerationState::Waiting) => self.cache.activate()?,
      Some(GenerationState::Active) => {
        debug!(generation = %self.cache.generation(), "cache generation already active");
      }
    }
    Ok(())
  }

  /// Dispatch triggers until the channel closes or a shutdown arrives.
  pub async fn run(&mut self, handler: &mut TriggerHandler) -> Result<()> {
    info!(generation = %self.cache.generation(), "agent running");

    while let Some(trigger) = handler.next().await {
      match trigger {
        Trigger::Sync(tag) => self.handle_sync(tag).await,
        Trigger::Push(payload) => self.handle_push(payload.as_deref()),
        Trigger::NotificationClick { action, data } => {
          self.handle_click(action.as_deref(), &data);
        }
        Trigger::Control(message) => {
          if !self.handle_control(message).await? {
            break;
          }
        }
      }
    }

    info!("agent stopped");
    Ok(())
  }

  /// Handle one sync trigger: drain the matching store, or hit the
  /// plain server-side sync endpoint for the periodic tags.
  pub async fn handle_sync(&self, tag: SyncTag) {
    debug!(%tag, "sync trigger");

    if let Some(store) = tag.store() {
      self.drain(store).await;
      return;
    }

    let result = match tag {
      SyncTag::CalendarSync => self.api.sync_calendar().await,
      SyncTag::PriceUpdates => self.api.sync_prices().await,
      _ => return,
    };
    if let Err(e) = result {
      warn!(%tag, "server-side sync failed: {e}");
    }
  }

  async fn drain(&self, store: StoreKind) -> DrainReport {
    let api = self.api.clone();
    let sink = Arc::clone(&self.sink);

    self
      .queue
      .drain(store, move |record| {
        let api = api.clone();
        let sink = Arc::clone(&sink);
        let record = record.clone();
        async move {
          api.replay(store, &record).await?;
          if store == StoreKind::Reservations {
            let guest = record
              .payload
              .get("guestName")
              .and_then(|v| v.as_str())
              .unwrap_or("guest");
            sink.show(&notify::reservation_synced(guest));
          }
          Ok::<(), ApiError>(())
        }
      })
      .await
  }

  /// Show the notification a push payload resolves to.
  pub fn handle_push(&self, payload: Option<&[u8]>) {
    let notification = notify::resolve_push(payload);
    self.sink.show(&notification);
  }

  /// Route a notification click to a client window.
  pub fn handle_click(&self, action: Option<&str>, data: &NotificationData) {
    notify::handle_click(action, data, self.windows.as_ref());
  }

  /// Handle a control message. Returns false when the agent should stop.
  pub async fn handle_control(&self, message: ControlMessage) -> Result<bool> {
    match message {
      ControlMessage::SkipWaiting => {
        self.cache.activate()?;
        Ok(true)
      }
      ControlMessage::GetVersion(reply) => {
        let _ = reply.send(self.cache.generation().to_string());
        Ok(true)
      }
      ControlMessage::CacheUrls(urls) => {
        let parsed: Vec<Url> = urls
          .iter()
          .filter_map(|raw| match self.resolve_url(raw) {
            Ok(url) => Some(url),
            Err(e) => {
              warn!(url = %raw, "skipping uncacheable url: {e}");
              None
            }
          })
          .collect();

        let api = self.api.clone();
        let result = self
          .cache
          .cache_urls(&parsed, |url| {
            let api = api.clone();
            async move { api.fetch_resource(&url).await }
          })
          .await;
        if let Err(e) = result {
          warn!("failed to cache requested urls: {e}");
        }
        Ok(true)
      }
      ControlMessage::Shutdown => {
        info!("shutdown requested");
        Ok(false)
      }
    }
  }

  /// Resolve one resource through the cache: cache-first, network
  /// fallback, offline document for failed navigations.
  pub async fn fetch(&self, request: &ResourceRequest) -> Result<FetchedResource> {
    let api = self.api.clone();
    self
      .cache
      .fetch(request, |url| async move { api.fetch_resource(&url).await })
      .await
  }

  /// Resolve a possibly relative URL against the server origin.
  pub fn resolve_url(&self, raw: &str) -> Result<Url> {
    use color_eyre::eyre::eyre;
    match Url::parse(raw) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .cache
        .own_origin()
        .join(raw)
        .map_err(|e| eyre!("Invalid url {}: {}", raw, e)),
      Err(e) => Err(eyre!("Invalid url {}: {}", raw, e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheStorage;
  use crate::notify::Notification;
  use crate::queue::QueuedRecord;
  use serde_json::json;
  use std::sync::Mutex;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[derive(Default)]
  struct RecordingSink {
    shown: Mutex<Vec<Notification>>,
  }

  impl NotificationSink for RecordingSink {
    fn show(&self, notification: &Notification) {
      self.shown.lock().unwrap().push(notification.clone());
    }
  }

  fn test_config(server_url: &str) -> Config {
    serde_yaml::from_str(&format!(
      r#"
server:
  url: {}
cache:
  manifest: []
"#,
      server_url
    ))
    .unwrap()
  }

  fn agent_with_sink(server_url: &str) -> (Agent, Arc<RecordingSink>, Arc<Database>) {
    let sink = Arc::new(RecordingSink::default());
    let db = Arc::new(Database::open_in_memory().unwrap());
    let agent = Agent::with_parts(
      &test_config(server_url),
      Arc::clone(&db),
      Arc::clone(&sink) as Arc<dyn NotificationSink>,
      Arc::new(LogWindows),
    )
    .unwrap();
    (agent, sink, db)
  }

  #[tokio::test]
  async fn test_sync_trigger_replays_and_confirms_reservations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/reservations"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let (agent, sink, _db) = agent_with_sink(&server.uri());
    agent
      .queue()
      .put(
        StoreKind::Reservations,
        &QueuedRecord::new("r1", json!({"guestName": "Ana"})),
      )
      .unwrap();

    agent.handle_sync(SyncTag::Reservations).await;

    assert!(agent.queue().get_all(StoreKind::Reservations).unwrap().is_empty());
    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].tag, "sync-success");
    assert!(shown[0].body.contains("Ana"));
  }

  #[tokio::test]
  async fn test_failed_replay_keeps_record_queued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/messages"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let (agent, sink, _db) = agent_with_sink(&server.uri());
    agent
      .queue()
      .put(StoreKind::Messages, &QueuedRecord::new("m1", json!({"text": "hi"})))
      .unwrap();

    agent.handle_sync(SyncTag::Messages).await;

    let remaining = agent.queue().get_all(StoreKind::Messages).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].attempts, 1);
    assert!(sink.shown.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_get_version_replies_with_generation() {
    let server = MockServer::start().await;
    let (agent, _, _db) = agent_with_sink(&server.uri());

    let (tx, rx) = tokio::sync::oneshot::channel();
    agent
      .handle_control(ControlMessage::GetVersion(tx))
      .await
      .unwrap();

    assert_eq!(rx.await.unwrap(), "villa-v1.0.0");
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_generation() {
    let server = MockServer::start().await;
    let (agent, _, db) = agent_with_sink(&server.uri());

    agent
      .handle_control(ControlMessage::SkipWaiting)
      .await
      .unwrap();

    let storage = SqliteStorage::new(db);
    assert_eq!(
      storage.generation_state("villa-v1.0.0").unwrap(),
      Some(GenerationState::Active)
    );
  }

  #[tokio::test]
  async fn test_shutdown_stops_the_run_loop() {
    let server = MockServer::start().await;
    let (mut agent, _, _db) = agent_with_sink(&server.uri());

    let (mut handler, tx) = TriggerHandler::manual();
    tx.send(Trigger::Control(ControlMessage::Shutdown)).unwrap();

    agent.run(&mut handler).await.unwrap();
  }
}
