//! Turso Embedded / libSQL storage layer for learning bits and patterns.
//!
//! The [`PatternStore`] wraps a libSQL database holding extracted learning
//! bits, their append-only tag sets, derived patterns and crawl history.
//!
//! **Dedup rules:**
//! - `learning_bits.content_hash` is UNIQUE; inserts are insert-or-ignore.
//! - Writers of the same hash are serialized by one of
//!   [`HASH_LOCK_STRIPES`] async locks, so concurrent identical inserts
//!   produce exactly one row and every caller observes that row's id.
//! - Reads never take the stripe locks. [`PatternStore::snapshot`] holds
//!   the write gate so it sees no partial batch of writes.

mod migrations;

use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use learnbits_shared::{
    BitFilter, Category, CrawlRecord, LearnBitsError, LearningBit, Pattern, PatternFilter,
    Result,
};
use libsql::{Connection, Database, Value, params};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Number of striped locks guarding content-hash writes.
pub const HASH_LOCK_STRIPES: usize = 16;

/// Columns selected for a learning bit, tags folded into a JSON array.
const BIT_COLUMNS: &str = "b.id, b.source_url, b.title, b.chunk_index, b.crawl_sequence, \
     b.content, b.content_hash, b.content_type, b.category, b.subcategory, \
     b.importance_score, b.confidence_score, b.created_at, \
     (SELECT json_group_array(t.tag) FROM bit_tags t WHERE t.bit_id = b.id)";

const CRAWL_COLUMNS: &str = "id, source_url, sequence, started_at, finished_at, stats_json";

const PATTERN_COLUMNS: &str = "pattern_id, scope_key, description, category, strength, \
     supporting_bit_ids, tags, created_at";

/// Result of [`PatternStore::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    /// `true` when this call created the row, `false` for a duplicate hash.
    pub stored: bool,
    /// Id of the row holding the content hash.
    pub id: String,
}

/// Primary storage handle wrapping a libSQL database.
pub struct PatternStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    stripes: Vec<Mutex<()>>,
    /// Shared by single-statement writers, exclusive for transactions.
    write_gate: RwLock<()>,
}

impl PatternStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| LearnBitsError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(unavailable)?;

        let store = Self::from_database(db, false)?;
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LearnBitsError::StorageUnavailable(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(unavailable)?;

        Self::from_database(db, true)
    }

    /// Open a private in-memory database (tests and dry runs).
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(unavailable)?;

        let store = Self::from_database(db, false)?;
        store.run_migrations().await?;
        Ok(store)
    }

    fn from_database(db: Database, readonly: bool) -> Result<Self> {
        let conn = db.connect().map_err(unavailable)?;
        Ok(Self {
            db,
            conn,
            readonly,
            stripes: (0..HASH_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            write_gate: RwLock::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LearnBitsError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LearnBitsError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    fn stripe_for(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    // -----------------------------------------------------------------------
    // Learning bit operations
    // -----------------------------------------------------------------------

    /// Insert a bit unless its content hash is already stored.
    ///
    /// The bit's own `id` is ignored; a fresh UUID v7 is assigned to new rows.
    /// Tags are written only for newly stored rows.
    pub async fn insert(&self, bit: &LearningBit) -> Result<InsertOutcome> {
        self.check_writable()?;
        if bit.content.trim().is_empty() {
            return Err(LearnBitsError::Storage(
                "refusing to store a bit with empty content".into(),
            ));
        }

        let _gate = self.write_gate.read().await;
        let _guard = self.stripe_for(&bit.content_hash).lock().await;

        if let Some(existing) = self.id_for_hash(&bit.content_hash).await? {
            debug!(hash = %bit.content_hash, id = %existing, "duplicate content hash");
            return Ok(InsertOutcome {
                stored: false,
                id: existing,
            });
        }

        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO learning_bits (
                    id, source_url, title, chunk_index, crawl_sequence, content, content_hash,
                    content_type, category, subcategory, importance_score, confidence_score,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id.as_str(),
                    bit.source_url.as_str(),
                    bit.title.as_str(),
                    bit.chunk_index as i64,
                    bit.crawl_sequence as i64,
                    bit.content.as_str(),
                    bit.content_hash.as_str(),
                    bit.content_type.as_str(),
                    bit.category.as_str(),
                    bit.subcategory.as_str(),
                    bit.importance_score,
                    bit.confidence_score,
                    timestamp(&bit.created_at),
                ],
            )
            .await
            .map_err(unavailable)?;

        let Some(stored_id) = self.id_for_hash(&bit.content_hash).await? else {
            return Err(LearnBitsError::Storage(format!(
                "bit {} vanished after insert",
                bit.content_hash
            )));
        };
        let stored = stored_id == id;
        if stored {
            self.insert_tags(&stored_id, &bit.tags).await?;
        }

        Ok(InsertOutcome {
            stored,
            id: stored_id,
        })
    }

    async fn id_for_hash(&self, hash: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM learning_bits WHERE content_hash = ?1",
                params![hash],
            )
            .await
            .map_err(unavailable)?;

        match rows.next().await.map_err(unavailable)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(decode)?)),
            None => Ok(None),
        }
    }

    async fn insert_tags(&self, bit_id: &str, tags: &BTreeSet<String>) -> Result<()> {
        for tag in tags {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() {
                continue;
            }
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO bit_tags (bit_id, tag) VALUES (?1, ?2)",
                    params![bit_id, tag.as_str()],
                )
                .await
                .map_err(unavailable)?;
        }
        Ok(())
    }

    /// Lazily iterate bits matching `filter`, oldest first.
    pub async fn query(&self, filter: &BitFilter) -> Result<BitRows> {
        let mut sql = format!("SELECT {BIT_COLUMNS} FROM learning_bits b WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = filter.category {
            sql.push_str(" AND b.category = ?");
            values.push(Value::Text(category.as_str().to_string()));
        }
        if let Some(tag) = &filter.tag {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM bit_tags ft WHERE ft.bit_id = b.id AND ft.tag = ?)",
            );
            values.push(Value::Text(tag.trim().to_lowercase()));
        }
        if let Some(source_url) = &filter.source_url {
            sql.push_str(" AND b.source_url = ?");
            values.push(Value::Text(source_url.clone()));
        }
        sql.push_str(" ORDER BY b.created_at ASC, b.rowid ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::from(limit)));
        }

        let rows = self
            .conn
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(unavailable)?;

        Ok(BitRows { rows })
    }

    /// Every bit matching `filter`, read while writers are held off.
    ///
    /// Unlike [`PatternStore::query`], no insert or purge can land between
    /// the first and the last row.
    pub async fn snapshot(&self, filter: &BitFilter) -> Result<Vec<LearningBit>> {
        let _gate = self.write_gate.write().await;
        self.query(filter).await?.collect_all().await
    }

    /// Fetch the bit stored under `hash`.
    pub async fn get_by_hash(&self, hash: &str) -> Result<LearningBit> {
        self.fetch_one_bit("b.content_hash = ?1", hash)
            .await?
            .ok_or_else(|| LearnBitsError::NotFound(format!("learning bit with hash {hash}")))
    }

    /// Fetch a bit by its id.
    pub async fn get_by_id(&self, id: &str) -> Result<LearningBit> {
        self.fetch_one_bit("b.id = ?1", id)
            .await?
            .ok_or_else(|| LearnBitsError::NotFound(format!("learning bit {id}")))
    }

    async fn fetch_one_bit(&self, predicate: &str, key: &str) -> Result<Option<LearningBit>> {
        let sql = format!("SELECT {BIT_COLUMNS} FROM learning_bits b WHERE {predicate}");
        let mut rows = self
            .conn
            .query(&sql, params![key])
            .await
            .map_err(unavailable)?;

        match rows.next().await.map_err(unavailable)? {
            Some(row) => Ok(Some(row_to_bit(&row)?)),
            None => Ok(None),
        }
    }

    /// Total number of stored bits.
    pub async fn count_bits(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM learning_bits", params![])
            .await
            .map_err(unavailable)?;

        match rows.next().await.map_err(unavailable)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(decode)? as u64),
            None => Ok(0),
        }
    }

    /// Add tags to an existing bit. Returns how many were new.
    pub async fn append_tags(&self, id: &str, tags: &BTreeSet<String>) -> Result<usize> {
        self.check_writable()?;

        let _gate = self.write_gate.read().await;
        let _guard = self.stripe_for(id).lock().await;

        let before = self.tag_count(id).await?;
        if before == 0 && !self.bit_exists(id).await? {
            return Err(LearnBitsError::NotFound(format!("learning bit {id}")));
        }
        self.insert_tags(id, tags).await?;
        let after = self.tag_count(id).await?;

        Ok(after.saturating_sub(before))
    }

    async fn tag_count(&self, id: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM bit_tags WHERE bit_id = ?1",
                params![id],
            )
            .await
            .map_err(unavailable)?;

        match rows.next().await.map_err(unavailable)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(decode)? as usize),
            None => Ok(0),
        }
    }

    async fn bit_exists(&self, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM learning_bits WHERE id = ?1", params![id])
            .await
            .map_err(unavailable)?;
        Ok(rows.next().await.map_err(unavailable)?.is_some())
    }

    /// Delete every bit (and its tags) that came from `source_url`.
    /// Returns the number of bits removed.
    pub async fn purge_source(&self, source_url: &str) -> Result<usize> {
        self.check_writable()?;
        let _gate = self.write_gate.write().await;

        let tx = self.conn.transaction().await.map_err(unavailable)?;

        let mut rows = tx
            .query(
                "SELECT COUNT(*) FROM learning_bits WHERE source_url = ?1",
                params![source_url],
            )
            .await
            .map_err(unavailable)?;
        let removed = match rows.next().await.map_err(unavailable)? {
            Some(row) => row.get::<i64>(0).map_err(decode)? as usize,
            None => 0,
        };
        drop(rows);

        tx.execute(
            "DELETE FROM bit_tags WHERE bit_id IN
                (SELECT id FROM learning_bits WHERE source_url = ?1)",
            params![source_url],
        )
        .await
        .map_err(unavailable)?;
        tx.execute(
            "DELETE FROM learning_bits WHERE source_url = ?1",
            params![source_url],
        )
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        info!(source_url, removed, "purged source");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Crawl operations
    // -----------------------------------------------------------------------

    /// Record the start of a crawl of `source_url` with the next sequence number.
    pub async fn begin_crawl(&self, source_url: &str) -> Result<CrawlRecord> {
        self.check_writable()?;
        let _gate = self.write_gate.read().await;

        let id = Uuid::now_v7().to_string();
        let now = timestamp(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO crawls (id, source_url, sequence, started_at)
                 SELECT ?1, ?2, COALESCE(MAX(sequence), 0) + 1, ?3
                 FROM crawls WHERE source_url = ?2",
                params![id.as_str(), source_url, now.as_str()],
            )
            .await
            .map_err(unavailable)?;

        self.get_crawl(&id).await
    }

    /// Mark a crawl finished with its stats.
    pub async fn finish_crawl(&self, crawl_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let _gate = self.write_gate.read().await;

        let now = timestamp(&Utc::now());
        self.conn
            .execute(
                "UPDATE crawls SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, crawl_id],
            )
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    /// Get a crawl record by id.
    pub async fn get_crawl(&self, crawl_id: &str) -> Result<CrawlRecord> {
        let sql = format!("SELECT {CRAWL_COLUMNS} FROM crawls WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![crawl_id])
            .await
            .map_err(unavailable)?;

        match rows.next().await.map_err(unavailable)? {
            Some(row) => row_to_crawl(&row),
            None => Err(LearnBitsError::NotFound(format!("crawl {crawl_id}"))),
        }
    }

    /// All crawls of `source_url`, by ascending sequence.
    pub async fn list_crawls(&self, source_url: &str) -> Result<Vec<CrawlRecord>> {
        let sql =
            format!("SELECT {CRAWL_COLUMNS} FROM crawls WHERE source_url = ?1 ORDER BY sequence");
        let mut rows = self
            .conn
            .query(&sql, params![source_url])
            .await
            .map_err(unavailable)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(unavailable)? {
            results.push(row_to_crawl(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Pattern operations
    // -----------------------------------------------------------------------

    /// Atomically replace every pattern stored under `scope_key`.
    pub async fn replace_patterns(&self, scope_key: &str, patterns: &[Pattern]) -> Result<usize> {
        self.check_writable()?;
        let _gate = self.write_gate.write().await;

        let tx = self.conn.transaction().await.map_err(unavailable)?;

        tx.execute(
            "DELETE FROM patterns WHERE scope_key = ?1",
            params![scope_key],
        )
        .await
        .map_err(unavailable)?;

        for pattern in patterns {
            let bit_ids = serde_json::to_string(&pattern.supporting_bit_ids)
                .map_err(|e| LearnBitsError::Storage(e.to_string()))?;
            let tags = serde_json::to_string(&pattern.tags)
                .map_err(|e| LearnBitsError::Storage(e.to_string()))?;
            tx.execute(
                "INSERT OR REPLACE INTO patterns (pattern_id, scope_key, description, category,
                    strength, supporting_bit_ids, tags, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    pattern.pattern_id.as_str(),
                    scope_key,
                    pattern.description.as_str(),
                    pattern.category.as_str(),
                    pattern.strength,
                    bit_ids,
                    tags,
                    timestamp(&pattern.created_at),
                ],
            )
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;

        debug!(scope_key, count = patterns.len(), "patterns replaced");
        Ok(patterns.len())
    }

    /// Patterns matching `filter`, strongest first.
    pub async fn query_patterns(&self, filter: &PatternFilter) -> Result<Vec<Pattern>> {
        let mut sql = format!("SELECT {PATTERN_COLUMNS} FROM patterns WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = filter.category {
            sql.push_str(" AND category = ?");
            values.push(Value::Text(category.as_str().to_string()));
        }
        if let Some(min_strength) = filter.min_strength {
            sql.push_str(" AND strength >= ?");
            values.push(Value::Real(min_strength));
        }
        if let Some(scope_key) = &filter.scope_key {
            sql.push_str(" AND scope_key = ?");
            values.push(Value::Text(scope_key.clone()));
        }
        sql.push_str(" ORDER BY strength DESC, pattern_id ASC");

        let mut rows = self
            .conn
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(unavailable)?;

        let tag = filter.tag.as_ref().map(|t| t.trim().to_lowercase());
        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(unavailable)? {
            let pattern = row_to_pattern(&row)?;
            if tag.as_ref().is_none_or(|t| pattern.tags.contains(t)) {
                results.push(pattern);
            }
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Lazy cursor
// ---------------------------------------------------------------------------

/// Lazy cursor over learning bit rows.
pub struct BitRows {
    rows: libsql::Rows,
}

impl BitRows {
    /// Next bit, or `None` once the cursor is drained.
    pub async fn next(&mut self) -> Result<Option<LearningBit>> {
        match self.rows.next().await.map_err(unavailable)? {
            Some(row) => Ok(Some(row_to_bit(&row)?)),
            None => Ok(None),
        }
    }

    /// Drain the cursor into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<LearningBit>> {
        let mut bits = Vec::new();
        while let Some(bit) = self.next().await? {
            bits.push(bit);
        }
        Ok(bits)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn unavailable(e: libsql::Error) -> LearnBitsError {
    LearnBitsError::StorageUnavailable(e.to_string())
}

fn decode(e: libsql::Error) -> LearnBitsError {
    LearnBitsError::Storage(e.to_string())
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LearnBitsError::Storage(format!("invalid date: {e}")))
}

fn parse_json_set(s: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str::<Vec<Option<String>>>(s)
        .map(|items| items.into_iter().flatten().collect())
        .map_err(|e| LearnBitsError::Storage(format!("invalid json list: {e}")))
}

fn row_to_bit(row: &libsql::Row) -> Result<LearningBit> {
    let tags = match row.get::<String>(13) {
        Ok(json) => parse_json_set(&json)?,
        Err(_) => BTreeSet::new(),
    };

    Ok(LearningBit {
        id: row.get::<String>(0).map_err(decode)?,
        source_url: row.get::<String>(1).map_err(decode)?,
        title: row.get::<String>(2).unwrap_or_default(),
        chunk_index: row.get::<i64>(3).map_err(decode)? as usize,
        crawl_sequence: row.get::<i64>(4).map_err(decode)? as u64,
        content: row.get::<String>(5).map_err(decode)?,
        content_hash: row.get::<String>(6).map_err(decode)?,
        content_type: row.get::<String>(7).map_err(decode)?.parse()?,
        category: row.get::<String>(8).map_err(decode)?.parse()?,
        subcategory: row.get::<String>(9).map_err(decode)?.parse()?,
        importance_score: row.get::<f64>(10).map_err(decode)?,
        confidence_score: row.get::<f64>(11).map_err(decode)?,
        created_at: parse_timestamp(&row.get::<String>(12).map_err(decode)?)?,
        tags,
    })
}

fn row_to_crawl(row: &libsql::Row) -> Result<CrawlRecord> {
    let finished_at = match row.get::<String>(4) {
        Ok(s) => Some(parse_timestamp(&s)?),
        Err(_) => None,
    };

    Ok(CrawlRecord {
        id: row.get::<String>(0).map_err(decode)?,
        source_url: row.get::<String>(1).map_err(decode)?,
        sequence: row.get::<i64>(2).map_err(decode)? as u64,
        started_at: parse_timestamp(&row.get::<String>(3).map_err(decode)?)?,
        finished_at,
        stats_json: row.get::<String>(5).ok(),
    })
}

fn row_to_pattern(row: &libsql::Row) -> Result<Pattern> {
    let category: Category = row.get::<String>(3).map_err(decode)?.parse()?;
    Ok(Pattern {
        pattern_id: row.get::<String>(0).map_err(decode)?,
        scope_key: row.get::<String>(1).map_err(decode)?,
        description: row.get::<String>(2).map_err(decode)?,
        category,
        strength: row.get::<f64>(4).map_err(decode)?,
        supporting_bit_ids: parse_json_set(&row.get::<String>(5).map_err(decode)?)?,
        tags: parse_json_set(&row.get::<String>(6).map_err(decode)?)?,
        created_at: parse_timestamp(&row.get::<String>(7).map_err(decode)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use learnbits_shared::{ContentType, Subcategory, content_hash};

    /// Create a temp file store for testing.
    async fn test_storage() -> PatternStore {
        let tmp = std::env::temp_dir().join(format!("lb_test_{}.db", Uuid::now_v7()));
        PatternStore::open(&tmp).await.expect("open test db")
    }

    fn sample_bit(content: &str, category: Category, tags: &[&str]) -> LearningBit {
        let subcategory = match category {
            Category::Code => Subcategory::FencedBlock,
            Category::ReferenceTable => Subcategory::MarkdownTable,
            Category::Procedure => Subcategory::NumberedSteps,
            Category::Definition => Subcategory::TermDefinition,
            Category::Concept => Subcategory::Explanation,
            Category::Uncategorized => Subcategory::Unknown,
        };
        LearningBit {
            id: String::new(),
            source_url: "https://docs.example.com/guide".into(),
            title: "Guide".into(),
            chunk_index: 0,
            crawl_sequence: 1,
            content: content.into(),
            content_hash: content_hash(content, category),
            content_type: ContentType::Prose,
            category,
            subcategory,
            importance_score: 0.7,
            confidence_score: 0.8,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn sample_pattern(category: Category, tag: &str, strength: f64, scope_key: &str) -> Pattern {
        let tags: BTreeSet<String> = [tag.to_string()].into();
        Pattern {
            pattern_id: Pattern::id_for(category, &tags),
            description: format!("{category} bits about {tag}"),
            category,
            strength,
            supporting_bit_ids: ["a".to_string(), "b".to_string()].into(),
            tags,
            scope_key: scope_key.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("lb_test_{}.db", Uuid::now_v7()));
        let s1 = PatternStore::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = PatternStore::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn in_memory_store_is_usable() {
        let storage = PatternStore::open_in_memory().await.expect("open in memory");
        let outcome = storage
            .insert(&sample_bit("Ownership moves values.", Category::Concept, &[]))
            .await
            .expect("insert");
        assert!(outcome.stored);
        assert_eq!(storage.count_bits().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_and_fetch_roundtrip() {
        let storage = test_storage().await;
        let bit = sample_bit("fn main() {}", Category::Code, &["rust", "Cargo"]);

        let outcome = storage.insert(&bit).await.expect("insert");
        assert!(outcome.stored);
        assert!(!outcome.id.is_empty());

        let fetched = storage.get_by_hash(&bit.content_hash).await.expect("get");
        assert_eq!(fetched.id, outcome.id);
        assert_eq!(fetched.content, bit.content);
        assert_eq!(fetched.category, Category::Code);
        assert_eq!(fetched.subcategory, Subcategory::FencedBlock);
        assert_eq!(fetched.title, "Guide");
        assert_eq!(
            fetched.tags,
            ["cargo".to_string(), "rust".to_string()].into()
        );

        let by_id = storage.get_by_id(&outcome.id).await.expect("get by id");
        assert_eq!(by_id.content_hash, bit.content_hash);
    }

    #[tokio::test]
    async fn duplicate_hash_is_ignored() {
        let storage = test_storage().await;
        let bit = sample_bit("Install the toolchain first.", Category::Procedure, &[]);

        let first = storage.insert(&bit).await.unwrap();
        let mut again = bit.clone();
        again.source_url = "https://mirror.example.com/guide".into();
        let second = storage.insert(&again).await.unwrap();

        assert!(first.stored);
        assert!(!second.stored);
        assert_eq!(first.id, second.id);
        assert_eq!(storage.count_bits().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_inserts_store_one_row() {
        let storage = Arc::new(test_storage().await);
        let bit = sample_bit("let x = 5;", Category::Code, &["rust"]);

        let mut handles = Vec::new();
        for _ in 0..12 {
            let storage = Arc::clone(&storage);
            let bit = bit.clone();
            handles.push(tokio::spawn(async move { storage.insert(&bit).await }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(outcomes.iter().filter(|o| o.stored).count(), 1);
        let ids: BTreeSet<_> = outcomes.iter().map(|o| o.id.clone()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(storage.count_bits().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_by_hash_missing_is_not_found() {
        let storage = test_storage().await;
        let err = storage.get_by_hash("deadbeef").await.unwrap_err();
        assert!(matches!(err, LearnBitsError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_filters_and_orders_by_creation() {
        let storage = test_storage().await;
        let base = Utc::now();

        let mut older = sample_bit("Older concept text.", Category::Concept, &["tokio"]);
        older.created_at = base - Duration::seconds(10);
        let mut newer = sample_bit("Newer code text;", Category::Code, &["tokio", "rust"]);
        newer.created_at = base;
        let mut other = sample_bit("Other source text.", Category::Concept, &[]);
        other.source_url = "https://other.example.com/".into();
        other.created_at = base - Duration::seconds(5);

        // Inserted out of chronological order on purpose.
        storage.insert(&newer).await.unwrap();
        storage.insert(&older).await.unwrap();
        storage.insert(&other).await.unwrap();

        let all = storage
            .query(&BitFilter::default())
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        let contents: Vec<_> = all.iter().map(|b| b.content.as_str()).collect();
        assert_eq!(
            contents,
            ["Older concept text.", "Other source text.", "Newer code text;"]
        );

        let tagged = storage
            .query(&BitFilter {
                tag: Some("TOKIO".into()),
                ..Default::default()
            })
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(tagged.len(), 2);

        let code = storage
            .query(&BitFilter {
                category: Some(Category::Code),
                ..Default::default()
            })
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].content, "Newer code text;");

        let by_source = storage
            .query(&BitFilter {
                source_url: Some("https://other.example.com/".into()),
                ..Default::default()
            })
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(by_source.len(), 1);

        let mut limited = storage
            .query(&BitFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        let first = limited.next().await.unwrap().expect("one row");
        assert_eq!(first.content, "Older concept text.");
        assert!(limited.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_tags_only_adds() {
        let storage = test_storage().await;
        let bit = sample_bit("A term is a word.", Category::Definition, &["glossary"]);
        let outcome = storage.insert(&bit).await.unwrap();

        let added = storage
            .append_tags(&outcome.id, &["glossary".to_string(), "terms".to_string()].into())
            .await
            .unwrap();
        assert_eq!(added, 1);

        let fetched = storage.get_by_id(&outcome.id).await.unwrap();
        assert_eq!(
            fetched.tags,
            ["glossary".to_string(), "terms".to_string()].into()
        );

        let err = storage
            .append_tags("missing", &["x".to_string()].into())
            .await
            .unwrap_err();
        assert!(matches!(err, LearnBitsError::NotFound(_)));
    }

    #[tokio::test]
    async fn purge_source_removes_only_that_source() {
        let storage = test_storage().await;
        storage
            .insert(&sample_bit("First bit.", Category::Concept, &["a"]))
            .await
            .unwrap();
        storage
            .insert(&sample_bit("Second bit.", Category::Concept, &[]))
            .await
            .unwrap();
        let mut other = sample_bit("Third bit.", Category::Concept, &[]);
        other.source_url = "https://other.example.com/".into();
        storage.insert(&other).await.unwrap();

        let removed = storage
            .purge_source("https://docs.example.com/guide")
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(storage.count_bits().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn crawl_sequences_are_per_url() {
        let storage = test_storage().await;

        let first = storage.begin_crawl("https://a.example.com/").await.unwrap();
        let second = storage.begin_crawl("https://a.example.com/").await.unwrap();
        let other = storage.begin_crawl("https://b.example.com/").await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(other.sequence, 1);
        assert!(first.finished_at.is_none());

        storage
            .finish_crawl(&first.id, r#"{"bits_new": 3}"#)
            .await
            .expect("finish crawl");

        let crawls = storage.list_crawls("https://a.example.com/").await.unwrap();
        assert_eq!(crawls.len(), 2);
        assert!(crawls[0].finished_at.is_some());
        assert_eq!(crawls[0].stats_json.as_deref(), Some(r#"{"bits_new": 3}"#));
        assert!(crawls[1].finished_at.is_none());
    }

    #[tokio::test]
    async fn replace_patterns_rewrites_only_its_scope() {
        let storage = test_storage().await;
        let scope_a = "category=*;source=*";
        let scope_b = "category=code;source=*";

        storage
            .replace_patterns(
                scope_a,
                &[
                    sample_pattern(Category::Code, "rust", 2.5, scope_a),
                    sample_pattern(Category::Concept, "tokio", 1.2, scope_a),
                ],
            )
            .await
            .unwrap();
        storage
            .replace_patterns(scope_b, &[sample_pattern(Category::Code, "rust", 2.5, scope_b)])
            .await
            .unwrap();

        // Re-analysis of scope A drops the concept pattern.
        storage
            .replace_patterns(scope_a, &[sample_pattern(Category::Code, "rust", 3.0, scope_a)])
            .await
            .unwrap();

        let in_a = storage
            .query_patterns(&PatternFilter {
                scope_key: Some(scope_a.into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].strength, 3.0);

        let all = storage.query_patterns(&PatternFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].strength >= all[1].strength);

        let strong = storage
            .query_patterns(&PatternFilter {
                min_strength: Some(2.8),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(strong.len(), 1);

        let tagged = storage
            .query_patterns(&PatternFilter {
                tag: Some("tokio".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(tagged.is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("lb_test_{}.db", Uuid::now_v7()));
        let rw = PatternStore::open(&tmp).await.unwrap();
        rw.insert(&sample_bit("Stored before reopening.", Category::Concept, &[]))
            .await
            .unwrap();
        drop(rw);

        let ro = PatternStore::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.count_bits().await.unwrap(), 1);

        let result = ro
            .insert(&sample_bit("Should not be stored.", Category::Concept, &[]))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_missing_file_is_unavailable() {
        let tmp = std::env::temp_dir().join(format!("lb_missing_{}.db", Uuid::now_v7()));
        let err = PatternStore::open_readonly(&tmp).await.err().expect("should fail");
        assert!(matches!(err, LearnBitsError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn snapshot_waits_for_in_flight_writes() {
        let storage = Arc::new(test_storage().await);
        storage
            .insert(&sample_bit("fn first() {}", Category::Code, &["rust"]))
            .await
            .unwrap();

        let writer = storage.write_gate.read().await;
        let reader = {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move { storage.snapshot(&BitFilter::default()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!reader.is_finished());
        drop(writer);

        let bits = reader.await.unwrap().unwrap();
        assert_eq!(bits.len(), 1);
        assert_eq!(bits[0].content, "fn first() {}");
    }

    #[tokio::test]
    async fn snapshot_applies_filter() {
        let storage = test_storage().await;
        storage
            .insert(&sample_bit("fn a() {}", Category::Code, &["rust"]))
            .await
            .unwrap();
        storage
            .insert(&sample_bit("Ownership moves values.", Category::Concept, &["rust"]))
            .await
            .unwrap();

        let filter = BitFilter {
            category: Some(Category::Concept),
            ..Default::default()
        };
        let bits = storage.snapshot(&filter).await.unwrap();
        assert_eq!(bits.len(), 1);
        assert_eq!(bits[0].category, Category::Concept);
    }
}
