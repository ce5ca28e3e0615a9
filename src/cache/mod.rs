//! Generational resource cache with offline support.
//!
//! This module implements the cache-first serving policy:
//! - A fixed manifest of URLs is stored at install time under a named
//!   generation; activation purges every superseded generation
//! - Lookups hit the cache first and fall back to the network, storing
//!   successful same-origin responses along the way
//! - Failed navigations are answered with a designated offline document

mod layer;
mod storage;
mod traits;

pub use layer::{CacheSettings, ResourceCache};
pub use storage::SqliteStorage;
pub use traits::{
  CacheStorage, FetchKind, FetchSource, FetchedResource, GenerationState, RemoteResponse,
  ResourceRequest, ResourceSnapshot,
};
