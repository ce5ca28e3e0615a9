/// Sync trigger tags and what they dispatch to.
use std::fmt;

use crate::queue::StoreKind;

/// A recognized sync trigger tag.
///
/// The three `background-sync-*` tags replay a mutation store; the two
/// periodic tags hit plain server-side sync endpoints with no queue
/// involvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  Reservations,
  Messages,
  Analytics,
  CalendarSync,
  PriceUpdates,
}

impl SyncTag {
  /// Parse an external tag string. Unknown tags are ignored by the
  /// dispatcher, so this returns `None` rather than an error.
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "background-sync-reservations" => Some(Self::Reservations),
      "background-sync-messages" => Some(Self::Messages),
      "background-sync-analytics" => Some(Self::Analytics),
      "calendar-sync" => Some(Self::CalendarSync),
      "price-updates" => Some(Self::PriceUpdates),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Reservations => "background-sync-reservations",
      Self::Messages => "background-sync-messages",
      Self::Analytics => "background-sync-analytics",
      Self::CalendarSync => "calendar-sync",
      Self::PriceUpdates => "price-updates",
    }
  }

  /// The queue store this tag drains, if it is a replay tag.
  pub fn store(&self) -> Option<StoreKind> {
    match self {
      Self::Reservations => Some(StoreKind::Reservations),
      Self::Messages => Some(StoreKind::Messages),
      Self::Analytics => Some(StoreKind::Analytics),
      Self::CalendarSync | Self::PriceUpdates => None,
    }
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
