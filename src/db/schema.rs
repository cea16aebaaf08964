/// Schema for every durable store. Applied on each open.
pub const SCHEMA: &str = r#"
-- Named cache versions; at most one is active (see meta)
CREATE TABLE IF NOT EXISTS cache_versions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, one per (version, key)
CREATE TABLE IF NOT EXISTS cache_entries (
    version TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    body_sha256 TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (version, cache_key)
);

-- Actions awaiting delivery; seq preserves enqueue order
CREATE TABLE IF NOT EXISTS pending_actions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id INTEGER NOT NULL UNIQUE,
    category TEXT NOT NULL,
    payload BLOB NOT NULL,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TEXT,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_pending_actions_category
    ON pending_actions(category, seq);

-- Deferred-execution registrations, one per tag
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    failed_cycles INTEGER NOT NULL DEFAULT 0,
    registered_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_fired_at TEXT
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
