//! SQL migration definitions for the entity graph database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

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
        description: "Initial schema: entities, entity_sources, relationships, relationship_sources",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Entity nodes, one per (label, normalized text)
CREATE TABLE IF NOT EXISTS entities (
    id          TEXT PRIMARY KEY,
    label       TEXT NOT NULL,
    norm_key    TEXT NOT NULL,
    name        TEXT NOT NULL,
    confidence  REAL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE(label, norm_key)
);

CREATE INDEX IF NOT EXISTS idx_entities_norm_key ON entities(norm_key);

-- Attribution: every page an entity was seen on
CREATE TABLE IF NOT EXISTS entity_sources (
    entity_id  TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    source_url TEXT NOT NULL,
    job_id     TEXT,
    seen_at    TEXT NOT NULL,
    PRIMARY KEY (entity_id, source_url)
);

-- Typed edges between entities
CREATE TABLE IF NOT EXISTS relationships (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id  TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target_id  TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    kind       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(source_id, target_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id);

CREATE TABLE IF NOT EXISTS relationship_sources (
    relationship_id INTEGER NOT NULL REFERENCES relationships(id) ON DELETE CASCADE,
    source_url      TEXT NOT NULL,
    PRIMARY KEY (relationship_id, source_url)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
