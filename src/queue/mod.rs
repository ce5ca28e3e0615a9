//! Durable mutation queue: persistence for writes that failed while
//! offline, and the drain routine that replays them.

mod drain;
mod store;

pub use drain::{DrainReport, MutationQueue};
pub use store::{QueueStorage, QueuedRecord, SqliteQueue, StoreKind};
