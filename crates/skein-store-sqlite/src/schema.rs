//! SQL schema for the Skein SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! layout so later migrations can be gated on it.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS posts (
    post_id      TEXT PRIMARY KEY,
    url          TEXT NOT NULL UNIQUE,
    external_id  TEXT NOT NULL,
    author       TEXT,
    text         TEXT,
    metrics      TEXT NOT NULL DEFAULT '{}',   -- JSON PageMetrics
    images       TEXT NOT NULL DEFAULT '[]',   -- JSON array
    captured_at  TEXT NOT NULL
);

-- One row per ingestion of a post; re-ingesting a run refreshes it.
CREATE TABLE IF NOT EXISTS runs (
    run_id          TEXT NOT NULL,
    post_id         TEXT NOT NULL REFERENCES posts(post_id),
    crawled_at      TEXT NOT NULL,
    fetcher_version TEXT NOT NULL,
    comment_count   INTEGER NOT NULL,
    edge_count      INTEGER NOT NULL,
    PRIMARY KEY (run_id, post_id)
);

CREATE TABLE IF NOT EXISTS comments (
    post_id            TEXT NOT NULL REFERENCES posts(post_id),
    comment_id         TEXT NOT NULL,
    source_id          TEXT,
    parent_id          TEXT,
    parent_source_id   TEXT,
    root_source_id     TEXT,
    root_id            TEXT,
    fingerprint        TEXT NOT NULL,
    author             TEXT NOT NULL,
    text               TEXT NOT NULL,
    text_fragments     TEXT,                   -- JSON array or NULL
    like_count         INTEGER NOT NULL,
    reply_count        INTEGER NOT NULL,
    repost_count       INTEGER NOT NULL,
    share_count        INTEGER NOT NULL,
    presence_mask      INTEGER NOT NULL,       -- likes=1 replies=2 reposts=4 shares=8
    metrics_confidence TEXT NOT NULL,          -- 'exact' | 'partial' | 'missing'
    images             TEXT NOT NULL DEFAULT '[]',
    time_token         TEXT,
    approx_created_at  TEXT,
    time_precision     TEXT NOT NULL,          -- 'approx' | 'none'
    source             TEXT NOT NULL,          -- 'main' | 'drill'
    drilled            INTEGER NOT NULL,
    reply_to           TEXT,
    depth              INTEGER,
    path               TEXT,
    seq                INTEGER NOT NULL,
    PRIMARY KEY (post_id, comment_id),
    CHECK (parent_id IS NULL OR parent_id != comment_id)
);

CREATE TABLE IF NOT EXISTS edges (
    post_id   TEXT NOT NULL REFERENCES posts(post_id),
    parent_id TEXT NOT NULL,
    child_id  TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    PRIMARY KEY (post_id, parent_id, child_id, edge_type),
    CHECK (parent_id != child_id)
);

CREATE INDEX IF NOT EXISTS comments_seq_idx    ON comments(post_id, seq);
CREATE INDEX IF NOT EXISTS comments_source_idx ON comments(post_id, source_id);

PRAGMA user_version = 1;
";
