//! Push payload handling and notification click routing.
//!
//! Payloads arrive as optional JSON merged field-wise over a fixed
//! default notification. Clicks resolve to a target URL from the
//! notification data and either focus an existing client window or
//! open a new one.

use serde::{Deserialize, Serialize};
use tracing::info;

/// An action button attached to a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// What a notification is about; drives click routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
  Message,
  Booking,
  Payment,
}

/// Routing data carried by a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  #[serde(default)]
  pub url: Option<String>,
  #[serde(rename = "type", default)]
  pub kind: Option<NotificationKind>,
  #[serde(default)]
  pub conversation_id: Option<String>,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
  pub data: NotificationData,
}

impl Default for Notification {
  /// The fixed default shown when a push arrives without a payload.
  fn default() -> Self {
    Self {
      title: "Villa Vista".to_string(),
      body: "You have a new notification".to_string(),
      icon: "/manifest-icon-192.png".to_string(),
      badge: "/manifest-icon-96.png".to_string(),
      tag: "villa-notification".to_string(),
      require_interaction: false,
      actions: vec![
        NotificationAction {
          action: "view".to_string(),
          title: "View".to_string(),
          icon: Some("/manifest-icon-96.png".to_string()),
        },
        NotificationAction {
          action: "close".to_string(),
          title: "Close".to_string(),
          icon: None,
        },
      ],
      data: NotificationData {
        url: Some("/".to_string()),
        kind: None,
        conversation_id: None,
      },
    }
  }
}

/// Wire format of a push payload; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  tag: Option<String>,
  require_interaction: Option<bool>,
  actions: Option<Vec<NotificationAction>>,
  data: Option<NotificationData>,
}

/// Resolve a push payload into a notification.
///
/// A missing payload yields the default notification; a JSON payload is
/// merged over the defaults field by field; a non-JSON payload becomes
/// the body text of an otherwise default notification.
pub fn resolve_push(payload: Option<&[u8]>) -> Notification {
  let mut notification = Notification::default();

  let Some(bytes) = payload else {
    return notification;
  };

  match serde_json::from_slice::<PushPayload>(bytes) {
    Ok(payload) => {
      if let Some(title) = payload.title {
        notification.title = title;
      }
      if let Some(body) = payload.body {
        notification.body = body;
      }
      if let Some(icon) = payload.icon {
        notification.icon = icon;
      }
      if let Some(badge) = payload.badge {
        notification.badge = badge;
      }
      if let Some(tag) = payload.tag {
        notification.tag = tag;
      }
      if let Some(require_interaction) = payload.require_interaction {
        notification.require_interaction = require_interaction;
      }
      if let Some(actions) = payload.actions {
        notification.actions = actions;
      }
      if let Some(data) = payload.data {
        notification.data = data;
      }
    }
    Err(_) => {
      notification.body = String::from_utf8_lossy(bytes).into_owned();
    }
  }

  notification
}

/// Confirmation shown after a queued reservation reached the server.
pub fn reservation_synced(guest_name: &str) -> Notification {
  Notification {
    title: "Reservation synced".to_string(),
    body: format!("The reservation for {} has been delivered", guest_name),
    tag: "sync-success".to_string(),
    actions: Vec::new(),
    data: NotificationData::default(),
    ..Notification::default()
  }
}

/// Resolve a notification click to a navigation target.
///
/// `close` performs no navigation. `view` and bare clicks route by the
/// notification kind; any other action falls back to the literal data
/// URL. A missing URL means the landing page.
pub fn resolve_click(action: Option<&str>, data: &NotificationData) -> Option<String> {
  let fallback = || data.url.clone().unwrap_or_else(|| "/".to_string());

  match action {
    Some("close") => None,
    Some("view") | None => Some(match data.kind {
      Some(NotificationKind::Message) => format!(
        "/?chat={}",
        data.conversation_id.as_deref().unwrap_or_default()
      ),
      Some(NotificationKind::Booking) => "/admin.html#reservations".to_string(),
      Some(NotificationKind::Payment) => "/admin.html#payments".to_string(),
      None => fallback(),
    }),
    Some(_) => Some(fallback()),
  }
}

/// Where notifications are shown.
pub trait NotificationSink: Send + Sync {
  fn show(&self, notification: &Notification);
}

/// Sink that renders notifications into the log, the headless stand-in
/// for an OS notification surface.
pub struct LogSink;

impl NotificationSink for LogSink {
  fn show(&self, notification: &Notification) {
    let actions = notification
      .actions
      .iter()
      .map(|a| match &a.icon {
        Some(icon) => format!("{} ({}, icon {})", a.title, a.action, icon),
        None => format!("{} ({})", a.title, a.action),
      })
      .collect::<Vec<_>>()
      .join(", ");

    info!(
      title = %notification.title,
      body = %notification.body,
      icon = %notification.icon,
      badge = %notification.badge,
      tag = %notification.tag,
      require_interaction = notification.require_interaction,
      actions = %actions,
      target = %notification.data.url.as_deref().unwrap_or("/"),
      "notification"
    );
  }
}

/// The set of client windows a click can land in.
pub trait ClientWindows: Send + Sync {
  /// Focus an existing window showing the URL; false if there is none.
  fn focus(&self, url: &str) -> bool;

  /// Open a new window at the URL.
  fn open(&self, url: &str);
}

/// Window handling for a headless deployment: opens are logged.
pub struct LogWindows;

impl ClientWindows for LogWindows {
  fn focus(&self, _url: &str) -> bool {
    false
  }

  fn open(&self, url: &str) {
    info!(%url, "open window");
  }
}

/// Route a notification click: resolve the target URL, then focus an
/// existing window showing it or open a new one.
pub fn handle_click<W: ClientWindows + ?Sized>(
  action: Option<&str>,
  data: &NotificationData,
  windows: &W,
) {
  if let Some(url) = resolve_click(action, data) {
    if !windows.focus(&url) {
      windows.open(&url);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[test]
  fn test_missing_payload_yields_default() {
    let notification = resolve_push(None);
    assert_eq!(notification, Notification::default());
  }

  #[test]
  fn test_partial_payload_keeps_other_defaults() {
    let notification = resolve_push(Some(br#"{"title":"X"}"#));
    assert_eq!(notification.title, "X");

    let default = Notification::default();
    assert_eq!(notification.body, default.body);
    assert_eq!(notification.icon, default.icon);
    assert_eq!(notification.actions, default.actions);
  }

  #[test]
  fn test_full_payload_overrides() {
    let payload = br#"{
      "title": "New booking",
      "body": "Room 2, next weekend",
      "requireInteraction": true,
      "data": {"type": "booking"}
    }"#;
    let notification = resolve_push(Some(payload));

    assert_eq!(notification.title, "New booking");
    assert!(notification.require_interaction);
    assert_eq!(notification.data.kind, Some(NotificationKind::Booking));
    // A payload data object replaces the default wholesale
    assert_eq!(notification.data.url, None);
  }

  #[test]
  fn test_non_json_payload_becomes_body() {
    let notification = resolve_push(Some(b"power is back"));
    assert_eq!(notification.body, "power is back");
    assert_eq!(notification.title, Notification::default().title);
  }

  #[test]
  fn test_click_message_routes_to_chat() {
    let data = NotificationData {
      kind: Some(NotificationKind::Message),
      conversation_id: Some("abc".to_string()),
      url: None,
    };
    assert_eq!(resolve_click(None, &data), Some("/?chat=abc".to_string()));
    assert_eq!(
      resolve_click(Some("view"), &data),
      Some("/?chat=abc".to_string())
    );
  }

  #[test]
  fn test_click_booking_and_payment_route_to_admin() {
    let booking = NotificationData {
      kind: Some(NotificationKind::Booking),
      ..NotificationData::default()
    };
    let payment = NotificationData {
      kind: Some(NotificationKind::Payment),
      ..NotificationData::default()
    };
    assert_eq!(
      resolve_click(None, &booking),
      Some("/admin.html#reservations".to_string())
    );
    assert_eq!(
      resolve_click(None, &payment),
      Some("/admin.html#payments".to_string())
    );
  }

  #[test]
  fn test_click_without_kind_uses_data_url() {
    let data = NotificationData {
      url: Some("/promo".to_string()),
      ..NotificationData::default()
    };
    assert_eq!(resolve_click(None, &data), Some("/promo".to_string()));
    assert_eq!(
      resolve_click(None, &NotificationData::default()),
      Some("/".to_string())
    );
  }

  #[test]
  fn test_unrecognized_action_falls_back_to_data_url() {
    let data = NotificationData {
      kind: Some(NotificationKind::Message),
      conversation_id: Some("abc".to_string()),
      url: Some("/inbox".to_string()),
    };
    assert_eq!(
      resolve_click(Some("later"), &data),
      Some("/inbox".to_string())
    );
  }

  #[derive(Default)]
  struct RecordingWindows {
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    has_window: bool,
  }

  impl ClientWindows for RecordingWindows {
    fn focus(&self, url: &str) -> bool {
      self.focused.lock().unwrap().push(url.to_string());
      self.has_window
    }

    fn open(&self, url: &str) {
      self.opened.lock().unwrap().push(url.to_string());
    }
  }

  #[test]
  fn test_close_click_touches_no_window() {
    let windows = RecordingWindows::default();
    handle_click(Some("close"), &NotificationData::default(), &windows);

    assert!(windows.focused.lock().unwrap().is_empty());
    assert!(windows.opened.lock().unwrap().is_empty());
  }

  #[test]
  fn test_click_opens_when_no_window_exists() {
    let windows = RecordingWindows::default();
    let data = NotificationData {
      kind: Some(NotificationKind::Message),
      conversation_id: Some("abc".to_string()),
      url: None,
    };
    handle_click(None, &data, &windows);

    assert_eq!(*windows.opened.lock().unwrap(), vec!["/?chat=abc"]);
  }

  #[test]
  fn test_click_focuses_existing_window() {
    let windows = RecordingWindows {
      has_window: true,
      ..RecordingWindows::default()
    };
    handle_click(None, &NotificationData::default(), &windows);

    assert_eq!(*windows.focused.lock().unwrap(), vec!["/"]);
    assert!(windows.opened.lock().unwrap().is_empty());
  }
}
