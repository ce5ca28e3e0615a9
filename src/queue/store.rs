//! Durable storage for mutations that could not be confirmed delivered.
//!
//! A record's presence in a store means "not yet acknowledged by the
//! server". Records are created when a write fails to reach the server
//! and destroyed only after a replay attempt is confirmed.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::db::Database;

/// The three mutation stores, one per deferred write category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
  Reservations,
  Messages,
  Analytics,
}

impl StoreKind {
  /// Parse a store name as used on the command line and in logs.
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "reservations" => Some(Self::Reservations),
      "messages" => Some(Self::Messages),
      "analytics" => Some(Self::Analytics),
      _ => None,
    }
  }

  fn table(&self) -> &'static str {
    match self {
      Self::Reservations => "pending_reservations",
      Self::Messages => "pending_messages",
      Self::Analytics => "pending_analytics",
    }
  }
}

impl fmt::Display for StoreKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Reservations => "reservations",
      Self::Messages => "messages",
      Self::Analytics => "analytics",
    };
    write!(f, "{}", name)
  }
}

/// One queued mutation: a caller-assigned id plus an opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
  pub id: String,
  pub payload: Value,
  /// Replay attempts so far; maintained by the drain routine
  pub attempts: u32,
  pub queued_at: DateTime<Utc>,
}

impl QueuedRecord {
  pub fn new(id: impl Into<String>, payload: Value) -> Self {
    Self {
      id: id.into(),
      payload,
      attempts: 0,
      queued_at: Utc::now(),
    }
  }

  /// JSON body for the replay POST: the payload with the record id
  /// attached when the payload doesn't already carry one.
  pub fn to_body(&self) -> Value {
    let mut body = self.payload.clone();
    if let Value::Object(map) = &mut body {
      map
        .entry("id")
        .or_insert_with(|| Value::String(self.id.clone()));
    }
    body
  }
}

/// Trait for queue storage backends.
pub trait QueueStorage: Send + Sync {
  /// Every record currently queued in the store, order unspecified.
  fn get_all(&self, store: StoreKind) -> Result<Vec<QueuedRecord>>;

  /// Queue a record, replacing any existing record with the same id.
  fn put(&self, store: StoreKind, record: &QueuedRecord) -> Result<()>;

  /// Delete a record by id. Removing a missing id is not an error.
  fn remove(&self, store: StoreKind, id: &str) -> Result<()>;

  /// Increment the replay attempt counter for a record.
  fn record_attempt(&self, store: StoreKind, id: &str) -> Result<()>;
}

/// Queue storage backed by the shared SQLite database.
pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl QueueStorage for SqliteQueue {
  fn get_all(&self, store: StoreKind) -> Result<Vec<QueuedRecord>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT id, payload, attempts, queued_at FROM {}",
        store.table()
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, u32, String)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query {}: {}", store, e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (id, payload, attempts, queued_at) in rows {
      records.push(QueuedRecord {
        id,
        payload: serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to parse queued payload: {}", e))?,
        attempts,
        queued_at: parse_datetime(&queued_at)?,
      });
    }

    Ok(records)
  }

  fn put(&self, store: StoreKind, record: &QueuedRecord) -> Result<()> {
    let conn = self.db.lock()?;

    let payload = serde_json::to_string(&record.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, payload, attempts, queued_at)
           VALUES (?, ?, ?, ?)",
          store.table()
        ),
        params![
          record.id,
          payload,
          record.attempts,
          record.queued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
      )
      .map_err(|e| eyre!("Failed to queue record in {}: {}", store, e))?;

    Ok(())
  }

  fn remove(&self, store: StoreKind, id: &str) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        &format!("DELETE FROM {} WHERE id = ?", store.table()),
        params![id],
      )
      .map_err(|e| eyre!("Failed to remove record from {}: {}", store, e))?;

    Ok(())
  }

  fn record_attempt(&self, store: StoreKind, id: &str) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        &format!(
          "UPDATE {} SET attempts = attempts + 1 WHERE id = ?",
          store.table()
        ),
        params![id],
      )
      .map_err(|e| eyre!("Failed to record attempt in {}: {}", store, e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn queue() -> SqliteQueue {
    SqliteQueue::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  #[test]
  fn test_put_and_get_all() {
    let queue = queue();
    queue
      .put(
        StoreKind::Reservations,
        &QueuedRecord::new("r1", json!({"guestName": "Ana"})),
      )
      .unwrap();
    queue
      .put(
        StoreKind::Reservations,
        &QueuedRecord::new("r2", json!({"guestName": "Luis"})),
      )
      .unwrap();

    let records = queue.get_all(StoreKind::Reservations).unwrap();
    assert_eq!(records.len(), 2);

    // Stores are independent
    assert!(queue.get_all(StoreKind::Messages).unwrap().is_empty());
  }

  #[test]
  fn test_put_replaces_by_id() {
    let queue = queue();
    queue
      .put(StoreKind::Messages, &QueuedRecord::new("m1", json!({"text": "hola"})))
      .unwrap();
    queue
      .put(StoreKind::Messages, &QueuedRecord::new("m1", json!({"text": "adiós"})))
      .unwrap();

    let records = queue.get_all(StoreKind::Messages).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload["text"], "adiós");
  }

  #[test]
  fn test_remove_is_idempotent() {
    let queue = queue();
    queue
      .put(StoreKind::Analytics, &QueuedRecord::new("e1", json!({"event": "page_view"})))
      .unwrap();

    queue.remove(StoreKind::Analytics, "e1").unwrap();
    // Second remove of the same id is not an error
    queue.remove(StoreKind::Analytics, "e1").unwrap();

    assert!(queue.get_all(StoreKind::Analytics).unwrap().is_empty());
  }

  #[test]
  fn test_record_attempt_increments() {
    let queue = queue();
    queue
      .put(StoreKind::Reservations, &QueuedRecord::new("r1", json!({})))
      .unwrap();

    queue.record_attempt(StoreKind::Reservations, "r1").unwrap();
    queue.record_attempt(StoreKind::Reservations, "r1").unwrap();

    let records = queue.get_all(StoreKind::Reservations).unwrap();
    assert_eq!(records[0].attempts, 2);
  }

  #[test]
  fn test_to_body_attaches_id() {
    let record = QueuedRecord::new("r9", json!({"guestName": "Ana"}));
    let body = record.to_body();
    assert_eq!(body["id"], "r9");
    assert_eq!(body["guestName"], "Ana");

    // An id already present in the payload wins
    let record = QueuedRecord::new("r9", json!({"id": "original"}));
    assert_eq!(record.to_body()["id"], "original");
  }
}
