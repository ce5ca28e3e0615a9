//! Replay of queued mutations.
//!
//! Draining a store sends every queued record to its endpoint and
//! removes each record only on confirmed success. Endpoints see
//! at-least-once delivery: a record is never removed before the server
//! acknowledged it, so a retriggered drain may re-send one.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::store::{QueueStorage, QueuedRecord, StoreKind};

/// Outcome of one drain pass over a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Records found in the store at the start of the pass
  pub attempted: usize,
  /// Confirmed by the server and removed
  pub delivered: usize,
  /// Send failed; left queued for the next trigger
  pub failed: usize,
  /// Past the retry ceiling; removed without delivery
  pub dropped: usize,
}

/// The durable mutation queue: storage plus the drain policy.
pub struct MutationQueue<Q: QueueStorage> {
  storage: Arc<Q>,
  /// Records that failed this many sends are dropped at the next drain
  max_attempts: u32,
}

impl<Q: QueueStorage> MutationQueue<Q> {
  pub fn new(storage: Q, max_attempts: u32) -> Self {
    Self {
      storage: Arc::new(storage),
      max_attempts,
    }
  }

  /// Every record currently queued in the store.
  pub fn get_all(&self, store: StoreKind) -> color_eyre::Result<Vec<QueuedRecord>> {
    self.storage.get_all(store)
  }

  /// Queue a record, replacing any existing one with the same id.
  pub fn put(&self, store: StoreKind, record: &QueuedRecord) -> color_eyre::Result<()> {
    self.storage.put(store, record)
  }

  /// Delete a record by id; removing a missing id is not an error.
  pub fn remove(&self, store: StoreKind, id: &str) -> color_eyre::Result<()> {
    self.storage.remove(store, id)
  }

  /// Replay every queued record in the store through `send`.
  ///
  /// A record is removed only when `send` confirms success; a failure
  /// leaves it queued and moves on to the next record. A storage error
  /// reading the store means there is nothing to drain this pass.
  pub async fn drain<F, Fut, E>(&self, store: StoreKind, send: F) -> DrainReport
  where
    F: Fn(&QueuedRecord) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
  {
    let records = match self.storage.get_all(store) {
      Ok(records) => records,
      Err(e) => {
        warn!(%store, "failed to read queue, nothing to drain: {e}");
        return DrainReport::default();
      }
    };

    let mut report = DrainReport {
      attempted: records.len(),
      ..DrainReport::default()
    };

    for record in &records {
      if record.attempts >= self.max_attempts {
        warn!(
          %store,
          id = %record.id,
          attempts = record.attempts,
          queued_at = %record.queued_at,
          "dropping record past the retry ceiling"
        );
        if let Err(e) = self.storage.remove(store, &record.id) {
          warn!(%store, id = %record.id, "failed to drop record: {e}");
        }
        report.dropped += 1;
        continue;
      }

      match send(record).await {
        Ok(()) => {
          if let Err(e) = self.storage.remove(store, &record.id) {
            // The server has the record; it will be re-sent once more
            warn!(%store, id = %record.id, "delivered but failed to dequeue: {e}");
          }
          debug!(%store, id = %record.id, "record delivered");
          report.delivered += 1;
        }
        Err(e) => {
          warn!(%store, id = %record.id, "send failed, record stays queued: {e}");
          if let Err(e) = self.storage.record_attempt(store, &record.id) {
            warn!(%store, id = %record.id, "failed to record attempt: {e}");
          }
          report.failed += 1;
        }
      }
    }

    info!(
      %store,
      attempted = report.attempted,
      delivered = report.delivered,
      failed = report.failed,
      dropped = report.dropped,
      "drain finished"
    );
    report
  }
}

impl<Q: QueueStorage> Clone for MutationQueue<Q> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      max_attempts: self.max_attempts,
    }
  }
}
