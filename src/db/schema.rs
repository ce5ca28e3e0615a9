/// Schema for the agent database.
///
/// `asset_cache` and `cache_generations` back the resource cache; the three
/// `pending_*` tables hold queued mutations awaiting replay. `offline_cache`
/// is a general-purpose store provisioned alongside the others.
pub const SCHEMA: &str = r#"
-- Cached resources, one row per (generation, request URL)
CREATE TABLE IF NOT EXISTS asset_cache (
    generation TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_asset_cache_generation
    ON asset_cache(generation);

-- Generation lifecycle: state is 'waiting' or 'active'
CREATE TABLE IF NOT EXISTS cache_generations (
    generation TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    installed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Queued mutations, one table per store
CREATE TABLE IF NOT EXISTS pending_reservations (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pending_messages (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pending_analytics (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Reserved key-value store, not exercised by the drain logic
CREATE TABLE IF NOT EXISTS offline_cache (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL
);
"#;
