//! SQLite implementation of the cache storage backend.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::traits::{CacheStorage, GenerationState, ResourceSnapshot};
use crate::db::Database;

/// Cache storage backed by the shared SQLite database.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

/// Stable fixed-length key for a request URL.
fn entry_key(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

impl CacheStorage for SqliteStorage {
  fn install_generation(&self, generation: &str, entries: &[ResourceSnapshot]) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = (|| -> Result<()> {
      // Reinstalling the same generation replaces its entries wholesale
      conn
        .execute(
          "DELETE FROM asset_cache WHERE generation = ?",
          params![generation],
        )
        .map_err(|e| eyre!("Failed to clear generation: {}", e))?;

      for entry in entries {
        conn
          .execute(
            "INSERT OR REPLACE INTO asset_cache
               (generation, entry_key, url, status, content_type, body, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
              generation,
              entry_key(&entry.url),
              entry.url,
              entry.status,
              entry.content_type,
              entry.body,
              entry.fetched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
          )
          .map_err(|e| eyre!("Failed to store entry {}: {}", entry.url, e))?;
      }

      conn
        .execute(
          "INSERT OR REPLACE INTO cache_generations (generation, state, installed_at)
           VALUES (?, ?, datetime('now'))",
          params![generation, GenerationState::Waiting.as_str()],
        )
        .map_err(|e| eyre!("Failed to record generation: {}", e))?;

      Ok(())
    })();

    match result {
      Ok(()) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  fn activate_generation(&self, generation: &str) -> Result<Vec<String>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare("SELECT generation FROM cache_generations WHERE generation != ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let purged: Vec<String> = stmt
      .query_map(params![generation], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();
    drop(stmt);

    conn
      .execute(
        "DELETE FROM asset_cache WHERE generation != ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to purge old entries: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_generations WHERE generation != ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to purge old generations: {}", e))?;

    conn
      .execute(
        "INSERT INTO cache_generations (generation, state, installed_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(generation) DO UPDATE SET state = ?2",
        params![generation, GenerationState::Active.as_str()],
      )
      .map_err(|e| eyre!("Failed to activate generation: {}", e))?;

    Ok(purged)
  }

  fn generation_state(&self, generation: &str) -> Result<Option<GenerationState>> {
    let conn = self.db.lock()?;

    let state: Option<String> = conn
      .query_row(
        "SELECT state FROM cache_generations WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query generation state: {}", e))?;

    Ok(state.and_then(|s| GenerationState::parse(&s)))
  }

  fn get(&self, generation: &str, url: &str) -> Result<Option<ResourceSnapshot>> {
    let conn = self.db.lock()?;

    let row: Option<(String, u16, Option<String>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, content_type, body, fetched_at FROM asset_cache
         WHERE generation = ? AND entry_key = ?",
        params![generation, entry_key(url)],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    match row {
      Some((url, status, content_type, body, fetched_at)) => Ok(Some(ResourceSnapshot {
        url,
        status,
        content_type,
        body,
        fetched_at: parse_datetime(&fetched_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, entry: &ResourceSnapshot) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO asset_cache
           (generation, entry_key, url, status, content_type, body, fetched_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          generation,
          entry_key(&entry.url),
          entry.url,
          entry.status,
          entry.content_type,
          entry.body,
          entry.fetched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn snapshot(url: &str, body: &str) -> ResourceSnapshot {
    ResourceSnapshot {
      url: url.to_string(),
      status: 200,
      content_type: Some("text/html".to_string()),
      body: body.as_bytes().to_vec(),
      fetched_at: Utc::now(),
    }
  }

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  #[test]
  fn test_install_then_get() {
    let storage = storage();
    storage
      .install_generation("v1", &[snapshot("https://villa.test/", "home")])
      .unwrap();

    let entry = storage.get("v1", "https://villa.test/").unwrap().unwrap();
    assert_eq!(entry.body, b"home");
    assert_eq!(
      storage.generation_state("v1").unwrap(),
      Some(GenerationState::Waiting)
    );
  }

  #[test]
  fn test_activate_purges_old_generations() {
    let storage = storage();
    storage
      .install_generation("v1", &[snapshot("https://villa.test/", "old")])
      .unwrap();
    storage.activate_generation("v1").unwrap();

    storage
      .install_generation("v2", &[snapshot("https://villa.test/", "new")])
      .unwrap();
    let purged = storage.activate_generation("v2").unwrap();

    assert_eq!(purged, vec!["v1".to_string()]);
    assert!(storage.get("v1", "https://villa.test/").unwrap().is_none());
    let entry = storage.get("v2", "https://villa.test/").unwrap().unwrap();
    assert_eq!(entry.body, b"new");
    assert_eq!(
      storage.generation_state("v2").unwrap(),
      Some(GenerationState::Active)
    );
    assert_eq!(storage.generation_state("v1").unwrap(), None);
  }

  #[test]
  fn test_activate_is_idempotent() {
    let storage = storage();
    storage.install_generation("v1", &[]).unwrap();
    storage.activate_generation("v1").unwrap();
    let purged = storage.activate_generation("v1").unwrap();

    assert!(purged.is_empty());
    assert_eq!(
      storage.generation_state("v1").unwrap(),
      Some(GenerationState::Active)
    );
  }

  #[test]
  fn test_put_replaces_entry() {
    let storage = storage();
    storage.install_generation("v1", &[]).unwrap();
    storage.put("v1", &snapshot("https://villa.test/a", "1")).unwrap();
    storage.put("v1", &snapshot("https://villa.test/a", "2")).unwrap();

    let entry = storage.get("v1", "https://villa.test/a").unwrap().unwrap();
    assert_eq!(entry.body, b"2");
  }
}
