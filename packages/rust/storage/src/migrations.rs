//! SQL migration definitions for the kbsync database.
//!
//! Applied in order on open; each migration runs as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: entities, sync_state, sync_runs, field_stats, FTS5",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Canonical records. record_json excludes last_synced_at.
CREATE TABLE IF NOT EXISTS entities (
    entity_type    TEXT NOT NULL,
    key            TEXT NOT NULL,
    name           TEXT NOT NULL,
    record_json    TEXT NOT NULL,
    content_hash   TEXT NOT NULL,
    lat            REAL,
    lon            REAL,
    last_synced_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, key)
);

CREATE INDEX IF NOT EXISTS idx_entities_synced ON entities(entity_type, last_synced_at);

-- Last successful sync per entity type
CREATE TABLE IF NOT EXISTS sync_state (
    entity_type    TEXT PRIMARY KEY,
    last_synced_at TEXT NOT NULL
);

-- Sync pass history
CREATE TABLE IF NOT EXISTS sync_runs (
    id          TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    outcome     TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_type ON sync_runs(entity_type, started_at);

-- Cumulative parse reliability
CREATE TABLE IF NOT EXISTS field_stats (
    source      TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    field       TEXT NOT NULL,
    attempts    INTEGER NOT NULL DEFAULT 0,
    failures    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source, entity_type, field)
);

-- Full-text search on entity names (diacritics folded by unicode61)
CREATE VIRTUAL TABLE IF NOT EXISTS entities_fts USING fts5(
    name,
    content=entities,
    content_rowid=rowid,
    tokenize='unicode61 remove_diacritics 2'
);

CREATE TRIGGER IF NOT EXISTS entities_fts_insert AFTER INSERT ON entities BEGIN
    INSERT INTO entities_fts(rowid, name) VALUES (new.rowid, new.name);
END;

CREATE TRIGGER IF NOT EXISTS entities_fts_delete AFTER DELETE ON entities BEGIN
    INSERT INTO entities_fts(entities_fts, rowid, name) VALUES ('delete', old.rowid, old.name);
END;

CREATE TRIGGER IF NOT EXISTS entities_fts_update AFTER UPDATE OF name ON entities BEGIN
    INSERT INTO entities_fts(entities_fts, rowid, name) VALUES ('delete', old.rowid, old.name);
    INSERT INTO entities_fts(rowid, name) VALUES (new.rowid, new.name);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
