//! SQL migration definitions for the sitekb database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

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
        description: "Initial schema: kb, chunks",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Knowledge base lifecycle records
CREATE TABLE IF NOT EXISTS kb (
    kb_id         TEXT PRIMARY KEY,
    url           TEXT NOT NULL,
    status        TEXT NOT NULL,
    indexed_pages INTEGER NOT NULL DEFAULT 0,
    total_pages   INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    metadata_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_kb_status ON kb(status);

-- Chunk metadata resolved at query time from neighbor ids
CREATE TABLE IF NOT EXISTS chunks (
    id         TEXT NOT NULL,
    kb_id      TEXT NOT NULL REFERENCES kb(kb_id) ON DELETE CASCADE,
    content    TEXT NOT NULL,
    source_url TEXT NOT NULL,
    title      TEXT NOT NULL,
    PRIMARY KEY (kb_id, id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_kb ON chunks(kb_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
