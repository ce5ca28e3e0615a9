//! Core traits and types for the resource cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use url::{Origin, Url};

/// A cached copy of a response, keyed by the full request URL.
///
/// Entries are created at install time (manifest) or lazily on first
/// successful fetch, and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
  /// Full request URL this entry was stored under
  pub url: String,
  /// HTTP status of the stored response
  pub status: u16,
  /// Content-Type header, if the response carried one
  pub content_type: Option<String>,
  /// Response body
  pub body: Vec<u8>,
  /// When the response was fetched and stored
  pub fetched_at: DateTime<Utc>,
}

/// A response as it came back from the network.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
  /// URL the response was ultimately served from
  pub final_url: Url,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  /// Whether the request was redirected before settling
  pub redirected: bool,
}

impl RemoteResponse {
  /// Whether this response may be stored in the cache: a successful,
  /// same-origin, non-redirected response. Everything else is returned
  /// to the caller but never cached.
  pub fn is_cacheable(&self, own_origin: &Origin) -> bool {
    self.status == 200 && !self.redirected && self.final_url.origin() == *own_origin
  }

  /// Snapshot this response for storage under the requested URL.
  pub fn to_snapshot(&self, request_url: &Url) -> ResourceSnapshot {
    ResourceSnapshot {
      url: request_url.as_str().to_string(),
      status: self.status,
      content_type: self.content_type.clone(),
      body: self.body.clone(),
      fetched_at: Utc::now(),
    }
  }
}

/// What kind of request is being resolved.
///
/// Navigations fall back to the offline document when both cache and
/// network fail; plain resource requests propagate the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
  Navigation,
  Resource,
}

/// A request presented to the cache layer.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
  pub url: Url,
  pub kind: FetchKind,
}

impl ResourceRequest {
  pub fn navigation(url: Url) -> Self {
    Self {
      url,
      kind: FetchKind::Navigation,
    }
  }

  pub fn resource(url: Url) -> Self {
    Self {
      url,
      kind: FetchKind::Resource,
    }
  }
}

/// Where a fetched resource came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Served from the current cache generation, no network involved
  Cache,
  /// Fetched from the network (and possibly stored)
  Network,
  /// Network failed on a navigation, offline fallback document served
  OfflineFallback,
  /// Origin not on the allow-list, passed through untouched
  Passthrough,
}

/// A resolved resource, with metadata about how it was obtained.
#[derive(Debug, Clone)]
pub struct FetchedResource {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub source: FetchSource,
}

impl FetchedResource {
  pub fn from_cache(snapshot: ResourceSnapshot) -> Self {
    Self {
      status: snapshot.status,
      content_type: snapshot.content_type,
      body: snapshot.body,
      source: FetchSource::Cache,
    }
  }

  pub fn from_network(response: RemoteResponse) -> Self {
    Self {
      status: response.status,
      content_type: response.content_type,
      body: response.body,
      source: FetchSource::Network,
    }
  }

  pub fn offline_fallback(snapshot: ResourceSnapshot) -> Self {
    Self {
      status: snapshot.status,
      content_type: snapshot.content_type,
      body: snapshot.body,
      source: FetchSource::OfflineFallback,
    }
  }

  pub fn passthrough(response: RemoteResponse) -> Self {
    Self {
      status: response.status,
      content_type: response.content_type,
      body: response.body,
      source: FetchSource::Passthrough,
    }
  }
}

/// Lifecycle state of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Installed, ready to take over
  Waiting,
  /// In control of all lookups
  Active,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Waiting => "waiting",
      Self::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "waiting" => Some(Self::Waiting),
      "active" => Some(Self::Active),
      _ => None,
    }
  }
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Store all entries under the given generation as a single unit and
  /// mark it waiting. Either every entry lands or none do.
  fn install_generation(&self, generation: &str, entries: &[ResourceSnapshot]) -> Result<()>;

  /// Purge every other generation and mark this one active. Returns the
  /// identifiers of the purged generations.
  fn activate_generation(&self, generation: &str) -> Result<Vec<String>>;

  /// Lifecycle state of a generation, if it exists.
  fn generation_state(&self, generation: &str) -> Result<Option<GenerationState>>;

  /// Look up an entry by request URL within a generation.
  fn get(&self, generation: &str, url: &str) -> Result<Option<ResourceSnapshot>>;

  /// Store a single entry within a generation.
  fn put(&self, generation: &str, entry: &ResourceSnapshot) -> Result<()>;
}
