//! Cache layer implementing the cache-first fetch policy and the
//! generation lifecycle (install, activate, purge).

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::{Origin, Url};

use super::traits::{
  CacheStorage, FetchKind, FetchedResource, GenerationState, RemoteResponse, ResourceRequest,
};

/// Everything the cache layer needs to know about its environment:
/// the current generation, the origin allow-list, the install manifest
/// and the offline fallback document.
#[derive(Debug, Clone)]
pub struct CacheSettings {
  /// Current cache generation identifier. Bumping this is the only way
  /// to invalidate previously cached entries.
  pub generation: String,
  /// Own origin; same-origin responses are the only cacheable ones
  pub own_origin: Url,
  /// External origins the fetch path intercepts in addition to our own
  pub allowed_origins: Vec<Url>,
  /// URLs pre-populated at install time
  pub manifest: Vec<Url>,
  /// Document served when a navigation fails with no cached entry
  pub offline_fallback: Url,
}

/// Resource cache with a cache-first, network-fallback policy.
///
/// Network access is supplied by the caller as an async closure, so the
/// layer itself never owns a socket.
pub struct ResourceCache<S: CacheStorage> {
  storage: Arc<S>,
  settings: CacheSettings,
  /// Precomputed allow-list: own origin plus approved external origins
  allowed: Vec<Origin>,
}

impl<S: CacheStorage> ResourceCache<S> {
  pub fn new(storage: S, settings: CacheSettings) -> Self {
    let mut allowed = vec![settings.own_origin.origin()];
    allowed.extend(settings.allowed_origins.iter().map(|u| u.origin()));

    Self {
      storage: Arc::new(storage),
      settings,
      allowed,
    }
  }

  pub fn generation(&self) -> &str {
    &self.settings.generation
  }

  /// Own origin, the base every relative path resolves against.
  pub fn own_origin(&self) -> &Url {
    &self.settings.own_origin
  }

  /// Lifecycle state of the current generation.
  pub fn state(&self) -> Result<Option<GenerationState>> {
    self.storage.generation_state(&self.settings.generation)
  }

  /// Whether the fetch path intercepts requests to this URL.
  pub fn is_allowed(&self, url: &Url) -> bool {
    self.allowed.contains(&url.origin())
  }

  /// Fetch and store every manifest URL under the current generation as
  /// one unit. Any failed or non-200 manifest fetch aborts the whole
  /// install; a previously active generation remains in control.
  pub async fn install<F, Fut>(&self, fetch: F) -> Result<()>
  where
    F: Fn(Url) -> Fut,
    Fut: Future<Output = Result<RemoteResponse>>,
  {
    info!(generation = %self.settings.generation, "installing cache generation");

    let fetches = self.settings.manifest.iter().map(|url| {
      let fetch = &fetch;
      async move {
        let response = fetch(url.clone()).await?;
        if response.status != 200 {
          return Err(eyre!(
            "Manifest fetch for {} returned status {}",
            url,
            response.status
          ));
        }
        Ok(response.to_snapshot(url))
      }
    });

    let entries = try_join_all(fetches).await?;
    self
      .storage
      .install_generation(&self.settings.generation, &entries)?;

    info!(
      generation = %self.settings.generation,
      entries = entries.len(),
      "cache generation installed"
    );
    Ok(())
  }

  /// Purge every superseded generation and take control of lookups.
  pub fn activate(&self) -> Result<()> {
    let purged = self
      .storage
      .activate_generation(&self.settings.generation)?;

    for old in &purged {
      info!(generation = %old, "removed old cache generation");
    }
    info!(generation = %self.settings.generation, "cache generation active");
    Ok(())
  }

  /// Resolve a request: cache-first for allow-listed origins, network
  /// fallback on a miss, offline document for failed navigations.
  pub async fn fetch<F, Fut>(&self, request: &ResourceRequest, fetch: F) -> Result<FetchedResource>
  where
    F: FnOnce(Url) -> Fut,
    Fut: Future<Output = Result<RemoteResponse>>,
  {
    // Requests to origins outside the allow-list are not intercepted
    if !self.is_allowed(&request.url) {
      debug!(url = %request.url, "origin not allowed, passing through");
      let response = fetch(request.url.clone()).await?;
      return Ok(FetchedResource::passthrough(response));
    }

    // Cache hit serves the stored response, no network involved
    match self.storage.get(&self.settings.generation, request.url.as_str()) {
      Ok(Some(snapshot)) => {
        debug!(url = %request.url, "serving from cache");
        return Ok(FetchedResource::from_cache(snapshot));
      }
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, "cache lookup failed, treating as miss: {e}"),
    }

    match fetch(request.url.clone()).await {
      Ok(response) => {
        if response.is_cacheable(&self.settings.own_origin.origin()) {
          let snapshot = response.to_snapshot(&request.url);
          // A failed cache write never fails the request itself
          if let Err(e) = self.storage.put(&self.settings.generation, &snapshot) {
            warn!(url = %request.url, "failed to cache response: {e}");
          }
        }
        Ok(FetchedResource::from_network(response))
      }
      Err(err) => {
        if request.kind == FetchKind::Navigation {
          if let Ok(Some(snapshot)) = self
            .storage
            .get(&self.settings.generation, self.settings.offline_fallback.as_str())
          {
            info!(url = %request.url, "network unavailable, serving offline fallback");
            return Ok(FetchedResource::offline_fallback(snapshot));
          }
        }
        Err(err)
      }
    }
  }

  /// Fetch the given URLs and add them to the current generation.
  pub async fn cache_urls<F, Fut>(&self, urls: &[Url], fetch: F) -> Result<()>
  where
    F: Fn(Url) -> Fut,
    Fut: Future<Output = Result<RemoteResponse>>,
  {
    let fetches = urls.iter().map(|url| {
      let fetch = &fetch;
      async move {
        let response = fetch(url.clone()).await?;
        Ok::<_, color_eyre::Report>(response.to_snapshot(url))
      }
    });

    for snapshot in try_join_all(fetches).await? {
      self.storage.put(&self.settings.generation, &snapshot)?;
    }
    Ok(())
  }
}

impl<S: CacheStorage> Clone for ResourceCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      settings: self.settings.clone(),
      allowed: self.allowed.clone(),
    }
  }
}
