//! SQL migration definitions for the LearnBits database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: learning_bits, bit_tags, patterns, crawls",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Extracted learning bits, one row per distinct content hash
CREATE TABLE IF NOT EXISTS learning_bits (
    id               TEXT PRIMARY KEY,
    source_url       TEXT NOT NULL,
    title            TEXT NOT NULL DEFAULT '',
    chunk_index      INTEGER NOT NULL,
    crawl_sequence   INTEGER NOT NULL,
    content          TEXT NOT NULL,
    content_hash     TEXT NOT NULL UNIQUE,
    content_type     TEXT NOT NULL,
    category         TEXT NOT NULL,
    subcategory      TEXT NOT NULL,
    importance_score REAL NOT NULL,
    confidence_score REAL NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bits_source ON learning_bits(source_url);
CREATE INDEX IF NOT EXISTS idx_bits_category ON learning_bits(category);
CREATE INDEX IF NOT EXISTS idx_bits_created ON learning_bits(created_at);

-- Append-only tag set per bit
CREATE TABLE IF NOT EXISTS bit_tags (
    bit_id TEXT NOT NULL REFERENCES learning_bits(id) ON DELETE CASCADE,
    tag    TEXT NOT NULL,
    PRIMARY KEY (bit_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_bit_tags_tag ON bit_tags(tag);

-- Derived patterns, regenerable per analysis scope
CREATE TABLE IF NOT EXISTS patterns (
    pattern_id         TEXT NOT NULL,
    scope_key          TEXT NOT NULL,
    description        TEXT NOT NULL,
    category           TEXT NOT NULL,
    strength           REAL NOT NULL,
    supporting_bit_ids TEXT NOT NULL,
    tags               TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    PRIMARY KEY (scope_key, pattern_id)
);

CREATE INDEX IF NOT EXISTS idx_patterns_category ON patterns(category);

-- Crawl history, sequence numbers are per source URL
CREATE TABLE IF NOT EXISTS crawls (
    id          TEXT PRIMARY KEY,
    source_url  TEXT NOT NULL,
    sequence    INTEGER NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT,
    UNIQUE(source_url, sequence)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ascending_and_recorded() {
        let migrations = all_migrations();
        for pair in migrations.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        for m in &migrations {
            let marker = format!("INSERT INTO schema_migrations (version) VALUES ({});", m.version);
            assert!(m.sql.contains(&marker), "migration v{} does not record itself", m.version);
        }
    }
}
