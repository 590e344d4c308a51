//! SQLite database layer for clipboard history
//!
//! One `entries` table plus an external-content FTS5 index (`entries_fts`).
//! Triggers keep the index in step with the table inside the same statement.
//! Uses r2d2 connection pooling to allow concurrent reads without mutex blocking.

use crate::interface::{ClipboardPayload, EntryId, HistoryEntry};
use chrono::{DateTime, TimeZone, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Terms shorter than this cannot use the trigram index
pub const MIN_TRIGRAM_TERM_LEN: usize = 3;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const ENTRY_COLUMNS: &str =
    "id, kind, content, source_url, created_at, source_app, is_pinned, copy_count, custom_metadata";

/// Format a timestamp for storage
fn format_db_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse timestamp string from database to DateTime<Utc>
fn parse_db_timestamp(timestamp_str: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(timestamp_str, TIMESTAMP_FORMAT)
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Raw column values of one `entries` row, before validation
struct EntryRow {
    id: String,
    kind: String,
    content: String,
    source_url: Option<String>,
    created_at: String,
    source_app: Option<String>,
    is_pinned: bool,
    copy_count: i64,
    custom_metadata: Option<String>,
}

impl EntryRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            content: row.get(2)?,
            source_url: row.get(3)?,
            created_at: row.get(4)?,
            source_app: row.get(5)?,
            is_pinned: row.get(6)?,
            copy_count: row.get(7)?,
            custom_metadata: row.get(8)?,
        })
    }

    /// Validate into an entry. Returns the reason on failure so callers can log it.
    fn into_entry(self) -> Result<HistoryEntry, String> {
        let id: EntryId = self.id.parse().map_err(|_| format!("bad id {:?}", self.id))?;
        let created_at = parse_db_timestamp(&self.created_at)
            .ok_or_else(|| format!("bad timestamp {:?}", self.created_at))?;
        let payload = match self.kind.as_str() {
            "text" => ClipboardPayload::Text { body: self.content, source_url: self.source_url },
            "color" => ClipboardPayload::Color { hex_code: self.content },
            "image" => ClipboardPayload::Image { blob_key: self.content },
            other => return Err(format!("unknown kind {:?}", other)),
        };
        Ok(HistoryEntry {
            id,
            payload,
            created_at,
            source_app: self.source_app,
            is_pinned: self.is_pinned,
            copy_count: self.copy_count.clamp(1, u32::MAX as i64) as u32,
            custom_metadata: self.custom_metadata,
        })
    }
}

/// Decode rows, skipping (and logging) the ones that fail validation
fn decode_rows(rows: Vec<EntryRow>) -> Vec<HistoryEntry> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match row.into_entry() {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    warn!(id = %id, reason = %reason, "Skipping undecodable history row");
                    None
                }
            }
        })
        .collect()
}

/// Escape a term for use inside an FTS5 phrase
fn fts_phrase(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Escape a term for a LIKE substring pattern
fn like_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Thread-safe database wrapper using connection pooling
///
/// Uses r2d2 connection pool for concurrent read access.
/// WAL mode enables readers to proceed without blocking each other.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA mmap_size=67108864;
                    PRAGMA cache_size=-32000;
                ")?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // In-memory needs single connection to maintain state
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool
    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Set up the table, the FTS index and the triggers that keep them in sync
    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                source_url TEXT,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                source_app TEXT,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                copy_count INTEGER NOT NULL DEFAULT 1,
                custom_metadata TEXT,
                search_content TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_hash ON entries(content_hash);
            CREATE INDEX IF NOT EXISTS idx_entries_blob ON entries(kind, content) WHERE kind = 'image';

            CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
                search_content,
                source_app,
                content='entries',
                content_rowid='seq',
                tokenize='trigram'
            );

            CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
                INSERT INTO entries_fts(rowid, search_content, source_app)
                VALUES (new.seq, new.search_content, new.source_app);
            END;

            CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
                INSERT INTO entries_fts(entries_fts, rowid, search_content, source_app)
                VALUES ('delete', old.seq, old.search_content, old.source_app);
            END;

            CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
                INSERT INTO entries_fts(entries_fts, rowid, search_content, source_app)
                VALUES ('delete', old.seq, old.search_content, old.source_app);
                INSERT INTO entries_fts(rowid, search_content, source_app)
                VALUES (new.seq, new.search_content, new.source_app);
            END;
        "#)?;

        Ok(())
    }

    /// Get the database size in bytes
    pub fn database_size(&self) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    /// Get total number of entries in the database
    pub fn count_entries(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of documents actually held by the full-text index.
    /// Reads the FTS shadow table, not the content table.
    pub fn fts_row_count(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries_fts_docsize", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────────

    fn upsert_with(conn: &rusqlite::Connection, entry: &HistoryEntry) -> rusqlite::Result<usize> {
        conn.execute(
            r#"INSERT INTO entries (id, kind, content, source_url, content_hash, created_at,
                                   source_app, is_pinned, copy_count, custom_metadata, search_content)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(id) DO UPDATE SET
                   kind = excluded.kind,
                   content = excluded.content,
                   source_url = excluded.source_url,
                   content_hash = excluded.content_hash,
                   created_at = excluded.created_at,
                   source_app = excluded.source_app,
                   is_pinned = excluded.is_pinned,
                   copy_count = excluded.copy_count,
                   custom_metadata = excluded.custom_metadata,
                   search_content = excluded.search_content"#,
            params![
                entry.id.to_string(),
                entry.payload.kind(),
                entry.payload.stored_content(),
                entry.payload.source_url(),
                entry.content_hash(),
                format_db_timestamp(&entry.created_at),
                entry.source_app,
                entry.is_pinned,
                entry.copy_count as i64,
                entry.custom_metadata,
                entry.search_content(),
            ],
        )
    }

    /// Insert an entry at the front, or overwrite it in place if the id exists
    pub fn insert_entry(&self, entry: &HistoryEntry) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_with(&conn, entry)?;
        Ok(())
    }

    /// Update an existing entry in place. Returns false if the row is gone.
    pub fn update_entry(&self, entry: &HistoryEntry) -> DatabaseResult<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"UPDATE entries SET
                   kind = ?2, content = ?3, source_url = ?4, content_hash = ?5, created_at = ?6,
                   source_app = ?7, is_pinned = ?8, copy_count = ?9, custom_metadata = ?10,
                   search_content = ?11
               WHERE id = ?1"#,
            params![
                entry.id.to_string(),
                entry.payload.kind(),
                entry.payload.stored_content(),
                entry.payload.source_url(),
                entry.content_hash(),
                format_db_timestamp(&entry.created_at),
                entry.source_app,
                entry.is_pinned,
                entry.copy_count as i64,
                entry.custom_metadata,
                entry.search_content(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete `old` (if given) and insert `new` at the front, in one transaction.
    /// Returns the ordering slot `old` held.
    pub fn replace_entry(&self, old: Option<EntryId>, new: &HistoryEntry) -> DatabaseResult<Option<i64>> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut vacated = None;
        if let Some(old) = old {
            vacated = tx
                .query_row("SELECT seq FROM entries WHERE id = ?1", [old.to_string()], |row| row.get(0))
                .optional()?;
            tx.execute("DELETE FROM entries WHERE id = ?1", [old.to_string()])?;
        }
        Self::upsert_with(&tx, new)?;
        tx.commit()?;
        Ok(vacated)
    }

    /// Recreate an entry in the ordering slot it held before a replace.
    /// Falls back to a plain insert when the slot is unknown or taken, and
    /// overwrites in place if the id still exists.
    pub fn restore_entry(&self, entry: &HistoryEntry, slot: Option<i64>) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let id = entry.id.to_string();
        let exists = tx
            .query_row("SELECT 1 FROM entries WHERE id = ?1", [&id], |_| Ok(()))
            .optional()?
            .is_some();
        let slot = match slot {
            Some(seq) if !exists => tx
                .query_row("SELECT 1 FROM entries WHERE seq = ?1", [seq], |_| Ok(()))
                .optional()?
                .is_none()
                .then_some(seq),
            _ => None,
        };

        match slot {
            Some(seq) => {
                tx.execute(
                    r#"INSERT INTO entries (seq, id, kind, content, source_url, content_hash, created_at,
                                           source_app, is_pinned, copy_count, custom_metadata, search_content)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
                    params![
                        seq,
                        id,
                        entry.payload.kind(),
                        entry.payload.stored_content(),
                        entry.payload.source_url(),
                        entry.content_hash(),
                        format_db_timestamp(&entry.created_at),
                        entry.source_app,
                        entry.is_pinned,
                        entry.copy_count as i64,
                        entry.custom_metadata,
                        entry.search_content(),
                    ],
                )?;
            }
            None => {
                Self::upsert_with(&tx, entry)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert many entries in one transaction, in slice order (last one ends up newest)
    pub fn insert_entries(&self, entries: &[HistoryEntry]) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        for entry in entries {
            Self::upsert_with(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete an entry, returning what was removed
    pub fn delete_entry(&self, id: EntryId) -> DatabaseResult<Option<HistoryEntry>> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let row = tx
            .query_row(
                &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
                [id.to_string()],
                EntryRow::from_row,
            )
            .optional()?;
        tx.execute("DELETE FROM entries WHERE id = ?1", [id.to_string()])?;
        tx.commit()?;
        Ok(row.and_then(|row| row.into_entry().ok()))
    }

    /// Delete every entry, returning what was removed
    pub fn delete_all(&self) -> DatabaseResult<Vec<HistoryEntry>> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let rows = {
            let mut stmt = tx.prepare(&format!("SELECT {} FROM entries ORDER BY seq DESC", ENTRY_COLUMNS))?;
            let rows = stmt.query_map([], EntryRow::from_row)?.collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute("DELETE FROM entries", [])?;
        tx.commit()?;
        Ok(decode_rows(rows))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────────

    fn query_entries(&self, sql: &str, values: Vec<Value>) -> DatabaseResult<Vec<HistoryEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), EntryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(decode_rows(rows))
    }

    /// Most recent entries, newest first
    pub fn load_recent(&self, limit: usize) -> DatabaseResult<Vec<HistoryEntry>> {
        self.query_entries(
            &format!("SELECT {} FROM entries ORDER BY seq DESC LIMIT ?1", ENTRY_COLUMNS),
            vec![Value::Integer(limit as i64)],
        )
    }

    pub fn get_entry(&self, id: EntryId) -> DatabaseResult<Option<HistoryEntry>> {
        let mut found = self.query_entries(
            &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
            vec![Value::Text(id.to_string())],
        )?;
        Ok(found.pop())
    }

    /// Find an existing entry by content hash
    pub fn find_by_hash(&self, hash: &str) -> DatabaseResult<Option<HistoryEntry>> {
        let mut found = self.query_entries(
            &format!(
                "SELECT {} FROM entries WHERE content_hash = ?1 ORDER BY seq DESC LIMIT 1",
                ENTRY_COLUMNS
            ),
            vec![Value::Text(hash.to_string())],
        )?;
        Ok(found.pop())
    }

    /// Number of rows referencing an image blob
    pub fn count_blob_references(&self, blob_key: &str) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE kind = 'image' AND content = ?1",
            [blob_key],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every blob key referenced by some row
    pub fn blob_keys(&self) -> DatabaseResult<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT content FROM entries WHERE kind = 'image'")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }

    /// Index-backed search, newest first.
    ///
    /// Every whitespace-separated term must match. Terms of at least three
    /// characters go through the trigram index; shorter ones fall back to a
    /// LIKE scan. If the index rejects the query, the whole query is retried
    /// as a LIKE scan.
    pub fn search(&self, query: &str, limit: usize) -> DatabaseResult<Vec<HistoryEntry>> {
        let query = query.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return self.load_recent(limit);
        }

        let (long, short): (Vec<&str>, Vec<&str>) = terms
            .iter()
            .partition(|term| term.chars().count() >= MIN_TRIGRAM_TERM_LEN);

        if !long.is_empty() {
            match self.search_indexed(&long, &short, limit) {
                Ok(results) => return Ok(results),
                Err(e) => warn!(error = %e, "FTS query failed, falling back to LIKE scan"),
            }
        }
        self.search_like(&terms, limit)
    }

    fn search_indexed(&self, long: &[&str], short: &[&str], limit: usize) -> DatabaseResult<Vec<HistoryEntry>> {
        let match_expr = long.iter().map(|t| fts_phrase(t)).collect::<Vec<_>>().join(" AND ");
        let mut values = vec![Value::Text(match_expr)];
        let mut sql = format!(
            "SELECT {} FROM entries WHERE seq IN (SELECT rowid FROM entries_fts WHERE entries_fts MATCH ?1)",
            ENTRY_COLUMNS
        );
        for term in short {
            values.push(Value::Text(like_pattern(term)));
            sql.push_str(&Self::like_clause(values.len()));
        }
        values.push(Value::Integer(limit as i64));
        sql.push_str(&format!(" ORDER BY seq DESC LIMIT ?{}", values.len()));
        self.query_entries(&sql, values)
    }

    fn search_like(&self, terms: &[&str], limit: usize) -> DatabaseResult<Vec<HistoryEntry>> {
        let mut values = Vec::with_capacity(terms.len() + 1);
        let mut sql = format!("SELECT {} FROM entries WHERE 1 = 1", ENTRY_COLUMNS);
        for term in terms {
            values.push(Value::Text(like_pattern(term)));
            sql.push_str(&Self::like_clause(values.len()));
        }
        values.push(Value::Integer(limit as i64));
        sql.push_str(&format!(" ORDER BY seq DESC LIMIT ?{}", values.len()));
        self.query_entries(&sql, values)
    }

    fn like_clause(param: usize) -> String {
        format!(
            " AND (search_content LIKE ?{p} ESCAPE '\\' OR lower(coalesce(source_app, '')) LIKE ?{p} ESCAPE '\\')",
            p = param
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_entry(body: &str) -> HistoryEntry {
        HistoryEntry::new(
            ClipboardPayload::Text { body: body.to_string(), source_url: None },
            Some("Notes".to_string()),
        )
    }

    fn assert_index_in_sync(db: &Database) {
        assert_eq!(db.fts_row_count().unwrap(), db.count_entries().unwrap());
    }

    #[test]
    fn test_insert_and_load_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let a = text_entry("alpha");
        let b = text_entry("bravo");
        let c = text_entry("charlie");
        for entry in [&a, &b, &c] {
            db.insert_entry(entry).unwrap();
        }

        let loaded = db.load_recent(10).unwrap();
        assert_eq!(loaded, vec![c.clone(), b.clone(), a.clone()]);
        assert_eq!(db.load_recent(2).unwrap().len(), 2);
        assert_index_in_sync(&db);
    }

    #[test]
    fn test_upsert_keeps_position() {
        let db = Database::open_in_memory().unwrap();
        let mut a = text_entry("alpha");
        let b = text_entry("bravo");
        db.insert_entry(&a).unwrap();
        db.insert_entry(&b).unwrap();

        a.is_pinned = true;
        db.insert_entry(&a).unwrap();

        let loaded = db.load_recent(10).unwrap();
        assert_eq!(loaded[0].id, b.id);
        assert_eq!(loaded[1], a);
        assert_index_in_sync(&db);
    }

    #[test]
    fn test_update_missing_row_returns_false() {
        let db = Database::open_in_memory().unwrap();
        let entry = text_entry("ghost");
        assert!(!db.update_entry(&entry).unwrap());
        assert_eq!(db.count_entries().unwrap(), 0);

        db.insert_entry(&entry).unwrap();
        let mut edited = entry.clone();
        edited.custom_metadata = Some("note".to_string());
        assert!(db.update_entry(&edited).unwrap());
        assert_eq!(db.get_entry(entry.id).unwrap(), Some(edited));
    }

    #[test]
    fn test_edit_then_search() {
        let db = Database::open_in_memory().unwrap();
        let mut entry = text_entry("original wording");
        db.insert_entry(&entry).unwrap();
        db.insert_entry(&text_entry("unrelated")).unwrap();

        entry.payload = ClipboardPayload::Text { body: "replacement wording".to_string(), source_url: None };
        assert!(db.update_entry(&entry).unwrap());

        assert!(db.search("original", 10).unwrap().is_empty());
        let hits = db.search("replacement", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, entry.id);
        assert_index_in_sync(&db);
    }

    #[test]
    fn test_search_terms_and_short_terms() {
        let db = Database::open_in_memory().unwrap();
        let a = text_entry("the quick brown fox");
        let b = text_entry("a lazy dog");
        let c = text_entry("quick ox");
        for entry in [&a, &b, &c] {
            db.insert_entry(entry).unwrap();
        }

        let hits: Vec<EntryId> = db.search("QUICK", 10).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(hits, vec![c.id, a.id]);

        // Two-character term goes through LIKE, combined with an indexed term
        let hits: Vec<EntryId> = db.search("quick ox", 10).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(hits, vec![c.id, a.id]);

        let hits: Vec<EntryId> = db.search("og", 10).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(hits, vec![b.id]);

        // Source app is searchable
        assert_eq!(db.search("notes", 10).unwrap().len(), 3);
        // Empty query lists everything
        assert_eq!(db.search("   ", 10).unwrap().len(), 3);
    }

    #[test]
    fn test_search_handles_fts_syntax_characters() {
        let db = Database::open_in_memory().unwrap();
        let entry = text_entry("say \"hello\" AND* (world)");
        db.insert_entry(&entry).unwrap();

        assert_eq!(db.search("\"hello\"", 10).unwrap().len(), 1);
        assert_eq!(db.search("and*", 10).unwrap().len(), 1);
        assert_eq!(db.search("100%", 10).unwrap().len(), 0);
    }

    #[test]
    fn test_replace_entry_is_atomic_move_to_front() {
        let db = Database::open_in_memory().unwrap();
        let a = text_entry("dup");
        let b = text_entry("other");
        db.insert_entry(&a).unwrap();
        db.insert_entry(&b).unwrap();

        let replacement = a.recaptured(None, Utc::now());
        db.replace_entry(Some(a.id), &replacement).unwrap();

        let loaded = db.load_recent(10).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, replacement.id);
        assert_eq!(loaded[0].copy_count, 2);
        assert!(db.get_entry(a.id).unwrap().is_none());
        assert_eq!(db.find_by_hash(&a.content_hash()).unwrap().map(|e| e.id), Some(replacement.id));
        assert_index_in_sync(&db);
    }

    #[test]
    fn test_restore_entry_returns_to_its_slot() {
        let db = Database::open_in_memory().unwrap();
        let a = text_entry("first");
        let b = text_entry("second");
        db.insert_entry(&a).unwrap();
        db.insert_entry(&b).unwrap();

        let replacement = a.recaptured(None, Utc::now());
        let slot = db.replace_entry(Some(a.id), &replacement).unwrap();
        assert!(slot.is_some());

        let mut edited = a.clone();
        edited.payload = ClipboardPayload::Text { body: "first, edited".to_string(), source_url: None };
        db.restore_entry(&edited, slot).unwrap();

        let order: Vec<EntryId> = db.load_recent(10).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![replacement.id, b.id, a.id]);
        assert_eq!(db.search("edited", 10).unwrap().len(), 1);
        assert_index_in_sync(&db);

        // Id already present: overwritten in place
        edited.is_pinned = true;
        db.restore_entry(&edited, slot).unwrap();
        assert_eq!(db.count_entries().unwrap(), 3);
        assert!(db.get_entry(a.id).unwrap().unwrap().is_pinned);

        // Unknown slot: inserted at the front
        let c = text_entry("third");
        db.restore_entry(&c, None).unwrap();
        assert_eq!(db.load_recent(1).unwrap()[0].id, c.id);
        assert_index_in_sync(&db);
    }

    #[test]
    fn test_delete_and_delete_all_keep_index_in_sync() {
        let db = Database::open_in_memory().unwrap();
        let entries: Vec<HistoryEntry> = (0..5).map(|i| text_entry(&format!("entry {}", i))).collect();
        db.insert_entries(&entries).unwrap();
        assert_index_in_sync(&db);

        let removed = db.delete_entry(entries[2].id).unwrap();
        assert_eq!(removed, Some(entries[2].clone()));
        assert_eq!(db.delete_entry(entries[2].id).unwrap(), None);
        assert_index_in_sync(&db);
        assert!(db.search("entry 2", 10).unwrap().is_empty());

        let removed = db.delete_all().unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(db.count_entries().unwrap(), 0);
        assert_index_in_sync(&db);
    }

    #[test]
    fn test_blob_references() {
        let db = Database::open_in_memory().unwrap();
        let key = "ab".repeat(32);
        let image = HistoryEntry::new(ClipboardPayload::Image { blob_key: key.clone() }, None);
        db.insert_entry(&image).unwrap();
        db.insert_entry(&text_entry("text")).unwrap();

        assert_eq!(db.count_blob_references(&key).unwrap(), 1);
        assert_eq!(db.blob_keys().unwrap(), [key.clone()].into_iter().collect());

        db.delete_entry(image.id).unwrap();
        assert_eq!(db.count_blob_references(&key).unwrap(), 0);
    }

    #[test]
    fn test_undecodable_rows_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        let good = text_entry("good");
        db.insert_entry(&good).unwrap();
        {
            let conn = db.get_conn().unwrap();
            conn.execute(
                "INSERT INTO entries (id, kind, content, content_hash, created_at, search_content)
                 VALUES ('not-a-uuid', 'text', 'bad', 'h1', '2024-01-01 00:00:00', 'bad')",
                [],
            )
            .unwrap();
            conn.execute(
                &format!(
                    "INSERT INTO entries (id, kind, content, content_hash, created_at, search_content)
                     VALUES ('{}', 'video', 'bad', 'h2', '2024-01-01 00:00:00', 'bad')",
                    EntryId::new()
                ),
                [],
            )
            .unwrap();
        }

        let loaded = db.load_recent(10).unwrap();
        assert_eq!(loaded, vec![good]);
    }

    #[test]
    fn test_timestamp_round_trip_keeps_precision() {
        let db = Database::open_in_memory().unwrap();
        let entry = text_entry("precise");
        db.insert_entry(&entry).unwrap();
        let loaded = db.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(loaded.created_at, entry.created_at);
    }
}
