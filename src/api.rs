//! HTTP client for the booking backend: replay endpoints for queued
//! mutations, the periodic sync endpoints, and the raw resource fetch
//! used by the cache layer.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::RemoteResponse;
use crate::queue::{QueuedRecord, StoreKind};

/// Failure of a replay or sync call. HTTP 2xx is the sole success
/// signal; everything else maps to one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),
  #[error("server returned status {0}")]
  Status(u16),
  #[error("invalid endpoint url: {0}")]
  InvalidUrl(#[from] url::ParseError),
}

/// Client for the backend API, bound to one base origin.
#[derive(Clone)]
pub struct ApiClient {
  http: Client,
  base: Url,
}

impl ApiClient {
  pub fn new(base: Url) -> Result<Self> {
    let http = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  /// Replay one queued mutation against its per-store endpoint.
  pub async fn replay(&self, store: StoreKind, record: &QueuedRecord) -> Result<(), ApiError> {
    let url = self.base.join(replay_path(store))?;
    debug!(%store, id = %record.id, "replaying queued record");

    let response = self.http.post(url).json(&record.to_body()).send().await?;
    check(response.status())
  }

  /// Trigger a server-side calendar sync with the external booking
  /// channels. Idempotent; the server does the real work.
  pub async fn sync_calendar(&self) -> Result<(), ApiError> {
    self.post_empty("/api/sync-calendar").await
  }

  /// Trigger a server-side refresh of dynamic pricing.
  pub async fn sync_prices(&self) -> Result<(), ApiError> {
    self.post_empty("/api/sync-prices").await
  }

  async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
    let url = self.base.join(path)?;
    let response = self.http.post(url).send().await?;
    check(response.status())
  }

  /// Probe the health endpoint. Used by the connectivity watcher; any
  /// failure just reads as "offline".
  pub async fn health(&self) -> bool {
    let Ok(url) = self.base.join("/api/health") else {
      return false;
    };
    match self.http.get(url).send().await {
      Ok(response) => response.status().is_success(),
      Err(_) => false,
    }
  }

  /// Fetch an arbitrary resource for the cache layer. A non-2xx status
  /// is still an `Ok` response; only transport failures are errors.
  pub async fn fetch_resource(&self, url: &Url) -> Result<RemoteResponse> {
    let response = self
      .http
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let redirected = final_url != *url;
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(RemoteResponse {
      final_url,
      status,
      content_type,
      body,
      redirected,
    })
  }
}

fn replay_path(store: StoreKind) -> &'static str {
  match store {
    StoreKind::Reservations => "/api/reservations",
    StoreKind::Messages => "/api/messages",
    StoreKind::Analytics => "/api/analytics",
  }
}

fn check(status: StatusCode) -> Result<(), ApiError> {
  if status.is_success() {
    Ok(())
  } else {
    Err(ApiError::Status(status.as_u16()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(Url::parse(&server.uri()).unwrap()).unwrap()
  }

  #[tokio::test]
  async fn test_replay_posts_record_with_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/reservations"))
      .and(body_json(json!({"id": "r1", "guest_name": "Ana"})))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let client = client(&server).await;
    let record = QueuedRecord::new("r1", json!({"guest_name": "Ana"}));
    client
      .replay(StoreKind::Reservations, &record)
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_replay_maps_server_error_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/messages"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let client = client(&server).await;
    let record = QueuedRecord::new("m1", json!({"text": "hola"}));
    let result = client.replay(StoreKind::Messages, &record).await;

    assert!(matches!(result, Err(ApiError::Status(503))));
  }

  #[tokio::test]
  async fn test_periodic_sync_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/sync-calendar"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/sync-prices"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let client = client(&server).await;
    client.sync_calendar().await.unwrap();
    client.sync_prices().await.unwrap();
  }

  #[tokio::test]
  async fn test_health_probe() {
    let server = MockServer::start().await;
    let client = client(&server).await;

    // Nothing mounted: the probe gets a 404 and reads as offline
    assert!(!client.health().await);

    Mock::given(method("GET"))
      .and(path("/api/health"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;
    assert!(client.health().await);
  }

  #[tokio::test]
  async fn test_fetch_resource_keeps_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/style.css"))
      .respond_with(
        ResponseTemplate::new(404).set_body_string("not here"),
      )
      .mount(&server)
      .await;

    let client = client(&server).await;
    let url = Url::parse(&format!("{}/style.css", server.uri())).unwrap();
    let response = client.fetch_resource(&url).await.unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.body, b"not here");
    assert!(!response.redirected);
  }
}
