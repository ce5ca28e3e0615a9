use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::api::ApiClient;
use crate::notify::NotificationData;
use crate::sync::SyncTag;

/// Control messages from other contexts
#[derive(Debug)]
pub enum ControlMessage {
  /// Force a waiting cache generation to take over immediately
  SkipWaiting,
  /// Reply with the current cache generation identifier
  GetVersion(oneshot::Sender<String>),
  /// Add the given URLs to the current cache generation
  CacheUrls(Vec<String>),
  /// Stop the agent loop
  Shutdown,
}

/// Events the agent reacts to
#[derive(Debug)]
pub enum Trigger {
  /// A sync tag fired: connectivity restored or periodic timer
  Sync(SyncTag),
  /// A push payload arrived, possibly empty
  Push(Option<Vec<u8>>),
  /// A notification was clicked
  NotificationClick {
    action: Option<String>,
    data: NotificationData,
  },
  /// A control message from another context
  Control(ControlMessage),
}

/// Trigger source that merges the periodic timer, the connectivity
/// watcher and externally injected events into one channel
pub struct TriggerHandler {
  rx: mpsc::UnboundedReceiver<Trigger>,
}

impl TriggerHandler {
  /// Create a handler with the built-in trigger producers running
  pub fn new(
    api: ApiClient,
    periodic_interval: Duration,
    connectivity_interval: Duration,
  ) -> Self {
    let (handler, tx) = Self::manual();

    // Periodic timer: server-side calendar and price syncs
    {
      let tx = tx.clone();
      tokio::spawn(async move {
        let mut interval = tokio::time::interval(periodic_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it
        interval.tick().await;
        loop {
          interval.tick().await;
          if tx.send(Trigger::Sync(SyncTag::CalendarSync)).is_err() {
            break;
          }
          if tx.send(Trigger::Sync(SyncTag::PriceUpdates)).is_err() {
            break;
          }
        }
      });
    }

    // Connectivity watcher: an offline-to-online transition replays
    // everything queued while offline
    {
      let tx = tx.clone();
      tokio::spawn(async move {
        let mut online = api.health().await;
        loop {
          tokio::time::sleep(connectivity_interval).await;
          let now_online = api.health().await;
          if now_online && !online {
            info!("connectivity restored, replaying queued mutations");
            for tag in [SyncTag::Reservations, SyncTag::Messages, SyncTag::Analytics] {
              if tx.send(Trigger::Sync(tag)).is_err() {
                return;
              }
            }
          }
          online = now_online;
        }
      });
    }

    // Ctrl-c requests an orderly shutdown
    {
      let tx = tx.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          let _ = tx.send(Trigger::Control(ControlMessage::Shutdown));
        }
      });
    }

    handler
  }

  /// Create a handler with no producers. Triggers only arrive through
  /// the returned sender.
  pub fn manual() -> (Self, mpsc::UnboundedSender<Trigger>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { rx }, tx)
  }

  /// Receive the next trigger
  pub async fn next(&mut self) -> Option<Trigger> {
    self.rx.recv().await
  }
}
