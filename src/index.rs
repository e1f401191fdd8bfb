use crate::error::{MemoryError, Result};
use crate::search::SearchEngine;
use crate::types::{
    normalize_topics, summarize, Embedding, Memory, MemoryStats, NewMemory, RecallFilters,
    RecallRequest, SearchResult, Source,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use ulid::{Generator, Ulid};

/// How long a writer waits on another process holding the write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    memory_type TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT 'personal',
    project TEXT,
    source_type TEXT NOT NULL,
    source_reference TEXT NOT NULL DEFAULT '',
    source_timestamp TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    importance REAL NOT NULL DEFAULT 0.5,
    embedding BLOB,
    embedding_model TEXT,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS topics (
    memory_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    topic TEXT NOT NULL,
    PRIMARY KEY (memory_id, topic),
    FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_topics_topic ON topics(topic COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project);
"#;

const MEMORY_COLUMNS: &str = "id, memory_type, content, summary, scope, project, \
     source_type, source_reference, source_timestamp, confidence, importance, \
     embedding, embedding_model, created_at, last_accessed_at, access_count";

/// Current time at the precision the store persists
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Memory store backed by SQLite.
///
/// Every write is a single SQLite transaction, so readers in this or any
/// other process sharing the file never see a partial record.
pub struct MemoryStore {
    conn: Connection,
    ids: RefCell<Generator>,
    engine: SearchEngine,
}

impl MemoryStore {
    /// Open or create the memory database
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), journal_mode = %mode, "opened memory store");
        Ok(Self::with_connection(conn))
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            ids: RefCell::new(Generator::new()),
            engine: SearchEngine::default(),
        }
    }

    /// Use these ranking settings for `recall`
    pub fn with_search_engine(mut self, engine: SearchEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.engine
    }

    fn next_id(&self) -> String {
        // The generator only fails when a millisecond's random space overflows
        self.ids
            .borrow_mut()
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }

    // -------------------------------------------------------------------------
    // Embedding serialization
    // -------------------------------------------------------------------------

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Memory operations
    // -------------------------------------------------------------------------

    /// Add a new memory, returns the ID
    pub fn create(&self, memory: &NewMemory) -> Result<String> {
        validate(memory)?;

        let id = self.next_id();
        let created = to_db_time(&now());
        let topics = normalize_topics(&memory.topics);
        let project = memory
            .project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO memories (id, memory_type, content, summary, scope, project,
                source_type, source_reference, source_timestamp, confidence, importance,
                created_at, last_accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, 0)",
            params![
                id,
                memory.memory_type.as_str(),
                memory.content,
                summarize(&memory.content),
                memory.scope.as_str(),
                project,
                memory.source.source_type.as_str(),
                memory.source.reference,
                to_db_time(&memory.source.timestamp),
                memory.confidence,
                memory.importance,
                created,
            ],
        )?;

        for (position, topic) in topics.iter().enumerate() {
            tx.execute(
                "INSERT INTO topics (memory_id, position, topic) VALUES (?1, ?2, ?3)",
                params![id, position as i64, topic],
            )?;
        }
        tx.commit()?;

        debug!(id = %id, memory_type = %memory.memory_type, topics = topics.len(), "memory created");
        Ok(id)
    }

    /// Replace the embedding of a memory, leaving every other field alone
    pub fn update_embedding(&self, id: &str, embedding: &Embedding) -> Result<()> {
        if embedding.vector.is_empty() || embedding.vector.iter().any(|v| !v.is_finite()) {
            return Err(MemoryError::Validation(
                "embedding must be a non-empty vector of finite values".to_string(),
            ));
        }

        let changed = self.conn.execute(
            "UPDATE memories SET embedding = ?1, embedding_model = ?2 WHERE id = ?3",
            params![
                Self::serialize_embedding(&embedding.vector),
                embedding.model,
                id
            ],
        )?;

        if changed == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        debug!(id = %id, model = %embedding.model, dim = embedding.vector.len(), "embedding stored");
        Ok(())
    }

    /// Get a memory by ID, recording the access
    pub fn get_by_id(&self, id: &str) -> Result<Memory> {
        let stamp = now();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let bumped = bump_access(&tx, id, &stamp)?;
        if bumped.is_none() {
            return Err(MemoryError::NotFound(id.to_string()));
        }

        let memory = load_one(&tx, id)?.ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(memory)
    }

    /// Get a memory by ID without touching its access statistics
    pub fn peek(&self, id: &str) -> Result<Memory> {
        load_one(&self.conn, id)?.ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    /// Keyword-only recall, ranked and truncated, recording access on every hit
    pub fn recall(&self, request: &RecallRequest) -> Result<Vec<SearchResult>> {
        self.engine.search(self, request, None)
    }

    /// All memories passing the filters, embeddings included
    pub fn candidates(&self, filters: &RecallFilters) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM memories m
             WHERE (?1 IS NULL OR m.memory_type = ?1)
               AND (?2 IS NULL OR m.scope = ?2)
               AND (?3 IS NULL OR m.project = ?3)
               AND (?4 IS NULL OR EXISTS (
                    SELECT 1 FROM topics t
                    WHERE t.memory_id = m.id AND t.topic = ?4 COLLATE NOCASE))
             ORDER BY m.id",
            MEMORY_COLUMNS
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filters.memory_type.map(|t| t.as_str()),
                filters.scope.map(|s| s.as_str()),
                filters.project,
                filters.topic,
            ],
            memory_from_row,
        )?;

        let mut memories = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        let mut topics = self.all_topics()?;
        for memory in &mut memories {
            memory.topics = topics.remove(&memory.id).unwrap_or_default();
        }
        Ok(memories)
    }

    /// Record an access on each memory in one transaction and refresh the copies
    pub fn record_access<'a>(&self, memories: impl IntoIterator<Item = &'a mut Memory>) -> Result<()> {
        let mut memories = memories.into_iter().peekable();
        if memories.peek().is_none() {
            return Ok(());
        }

        let stamp = now();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        for memory in memories {
            if let Some(count) = bump_access(&tx, &memory.id, &stamp)? {
                memory.access_count = count;
                memory.last_accessed_at = stamp;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Memories whose embedding is missing or was produced by another model
    pub fn embedding_backlog(&self, model: &str, include_current: bool) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content FROM memories
             WHERE ?2 OR embedding IS NULL OR embedding_model IS NOT ?1
             ORDER BY id",
        )?;

        let rows = stmt.query_map(params![model, include_current], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Aggregate statistics, read from a single snapshot
    pub fn stats(&self) -> Result<MemoryStats> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)?;

        let total: i64 = tx.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        let projects: i64 = tx.query_row(
            "SELECT COUNT(DISTINCT project) FROM memories WHERE project IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let embedded: i64 = tx.query_row(
            "SELECT COUNT(*) FROM memories WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let by_type = group_counts(&tx, "memory_type")?;
        let by_scope = group_counts(&tx, "scope")?;
        tx.commit()?;

        Ok(MemoryStats {
            total_memories: total as usize,
            project_count: projects as usize,
            by_type,
            by_scope,
            embedded: embedded as usize,
        })
    }

    fn all_topics(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT memory_id, topic FROM topics ORDER BY memory_id, position")?;
        let mut rows = stmt.query([])?;

        let mut topics: HashMap<String, Vec<String>> = HashMap::new();
        while let Some(row) = rows.next()? {
            topics.entry(row.get(0)?).or_default().push(row.get(1)?);
        }
        Ok(topics)
    }
}

fn validate(memory: &NewMemory) -> Result<()> {
    if memory.content.trim().is_empty() {
        return Err(MemoryError::Validation("content must not be empty".to_string()));
    }
    for (name, value) in [("confidence", memory.confidence), ("importance", memory.importance)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(MemoryError::Validation(format!(
                "{} must be within [0, 1], got {}",
                name, value
            )));
        }
    }
    Ok(())
}

/// Bump the access statistics of one memory, returning the new count
fn bump_access(conn: &Connection, id: &str, stamp: &DateTime<Utc>) -> Result<Option<u64>> {
    let count = conn
        .query_row(
            "UPDATE memories SET last_accessed_at = ?1, access_count = access_count + 1
             WHERE id = ?2 RETURNING access_count",
            params![to_db_time(stamp), id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(count.map(|c| c as u64))
}

fn load_one(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS);
    let memory = conn
        .query_row(&sql, params![id], memory_from_row)
        .optional()?;

    let Some(mut memory) = memory else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare_cached("SELECT topic FROM topics WHERE memory_id = ?1 ORDER BY position")?;
    let topics = stmt.query_map(params![id], |row| row.get(0))?;
    memory.topics = topics.collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(Some(memory))
}

fn group_counts(conn: &Connection, column: &str) -> Result<BTreeMap<String, usize>> {
    let sql = format!("SELECT {0}, COUNT(*) FROM memories GROUP BY {0}", column);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as usize)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let embedding_bytes: Option<Vec<u8>> = row.get(11)?;
    let embedding_model: Option<String> = row.get(12)?;
    let embedding = match (embedding_bytes, embedding_model) {
        (Some(bytes), Some(model)) => Some(Embedding {
            model,
            vector: MemoryStore::deserialize_embedding(&bytes),
        }),
        _ => None,
    };

    Ok(Memory {
        id: row.get(0)?,
        memory_type: parse_column(row, 1)?,
        content: row.get(2)?,
        summary: row.get(3)?,
        scope: parse_column(row, 4)?,
        project: row.get(5)?,
        source: Source {
            source_type: parse_column(row, 6)?,
            reference: row.get(7)?,
            timestamp: parse_column(row, 8)?,
        },
        confidence: row.get(9)?,
        importance: row.get(10)?,
        topics: Vec::new(),
        embedding,
        created_at: parse_column(row, 13)?,
        last_accessed_at: parse_column(row, 14)?,
        access_count: row.get::<_, i64>(15)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryType, Scope};

    fn decision(content: &str) -> NewMemory {
        NewMemory::new(MemoryType::Decision, content)
    }

    #[test]
    fn test_create_and_get_round_trip() {
        let store = MemoryStore::in_memory().unwrap();

        let mut new = decision("Use Redis for caching").with_topics(["redis", "infra"]);
        new.project = Some("shop".to_string());
        new.importance = 0.8;
        let id = store.create(&new).unwrap();

        let memory = store.get_by_id(&id).unwrap();
        assert_eq!(memory.id, id);
        assert_eq!(memory.memory_type, MemoryType::Decision);
        assert_eq!(memory.content, "Use Redis for caching");
        assert_eq!(memory.summary, "Use Redis for caching");
        assert_eq!(memory.scope, Scope::Personal);
        assert_eq!(memory.project.as_deref(), Some("shop"));
        assert_eq!(memory.source, new.source);
        assert_eq!(memory.confidence, 1.0);
        assert_eq!(memory.importance, 0.8);
        assert_eq!(memory.topics, vec!["redis", "infra"]);
        assert!(memory.embedding.is_none());
        assert_eq!(memory.access_count, 1);
        assert!(memory.last_accessed_at >= memory.created_at);

        // The returned record is exactly what is now persisted
        assert_eq!(store.peek(&id).unwrap(), memory);
    }

    #[test]
    fn test_create_rejects_empty_content() {
        let store = MemoryStore::in_memory().unwrap();
        let err = store.create(&decision("   ")).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
        assert_eq!(store.stats().unwrap().total_memories, 0);
    }

    #[test]
    fn test_create_rejects_out_of_range_weights() {
        let store = MemoryStore::in_memory().unwrap();
        let err = store.create(&decision("ok").with_importance(1.5)).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let mut new = decision("ok");
        new.confidence = f64::NAN;
        assert!(matches!(store.create(&new), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let store = MemoryStore::in_memory().unwrap();
        let ids: Vec<String> = (0..20)
            .map(|i| store.create(&decision(&format!("memory {}", i))).unwrap())
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_get_unknown_id() {
        let store = MemoryStore::in_memory().unwrap();
        assert!(matches!(store.get_by_id("nope"), Err(MemoryError::NotFound(_))));
        assert!(matches!(store.peek("nope"), Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_update_embedding_only_touches_embedding() {
        let store = MemoryStore::in_memory().unwrap();
        let id = store.create(&decision("Prefer small PRs")).unwrap();
        let before = store.peek(&id).unwrap();

        let embedding = Embedding {
            model: "test".to_string(),
            vector: vec![0.5, -1.0, 2.0],
        };
        store.update_embedding(&id, &embedding).unwrap();
        store.update_embedding(&id, &embedding).unwrap();

        let after = store.peek(&id).unwrap();
        assert_eq!(after.embedding.as_ref(), Some(&embedding));
        assert_eq!(Memory { embedding: None, ..after }, before);
    }

    #[test]
    fn test_update_embedding_unknown_id() {
        let store = MemoryStore::in_memory().unwrap();
        let embedding = Embedding {
            model: "test".to_string(),
            vector: vec![1.0],
        };
        assert!(matches!(
            store.update_embedding("missing", &embedding),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_candidates_filters() {
        let store = MemoryStore::in_memory().unwrap();
        store.create(&decision("Use Postgres").with_topics(["db"])).unwrap();
        store
            .create(&NewMemory::new(MemoryType::Mistake, "Forgot the index").with_topics(["DB", "perf"]))
            .unwrap();
        let mut project = NewMemory::new(MemoryType::Fact, "CI runs on push");
        project.scope = Scope::Project;
        project.project = Some("api".to_string());
        store.create(&project).unwrap();

        let all = store.candidates(&RecallFilters::default()).unwrap();
        assert_eq!(all.len(), 3);

        let by_topic = store
            .candidates(&RecallFilters {
                topic: Some("db".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_topic.len(), 2);

        let by_type = store
            .candidates(&RecallFilters {
                memory_type: Some(MemoryType::Mistake),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].topics, vec!["DB", "perf"]);

        let by_scope = store
            .candidates(&RecallFilters {
                scope: Some(Scope::Project),
                project: Some("api".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_scope.len(), 1);
        assert_eq!(by_scope[0].content, "CI runs on push");
    }

    #[test]
    fn test_record_access_bumps_each_memory() {
        let store = MemoryStore::in_memory().unwrap();
        let a = store.create(&decision("one")).unwrap();
        store.create(&decision("two")).unwrap();

        let mut memories = store.candidates(&RecallFilters::default()).unwrap();
        store.record_access(memories.iter_mut()).unwrap();
        store.record_access(memories.iter_mut()).unwrap();

        assert!(memories.iter().all(|m| m.access_count == 2));
        assert_eq!(store.peek(&a).unwrap().access_count, 2);
    }

    #[test]
    fn test_stats() {
        let store = MemoryStore::in_memory().unwrap();
        let mut a = decision("a");
        a.project = Some("api".to_string());
        let mut b = NewMemory::new(MemoryType::Fact, "b");
        b.project = Some("web".to_string());
        b.scope = Scope::Project;
        let mut c = NewMemory::new(MemoryType::Fact, "c");
        c.project = Some("api".to_string());
        store.create(&a).unwrap();
        store.create(&b).unwrap();
        let id = store.create(&c).unwrap();
        store
            .update_embedding(&id, &Embedding { model: "m".into(), vector: vec![1.0] })
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_memories, 3);
        assert_eq!(stats.project_count, 2);
        assert_eq!(stats.by_type.get("fact"), Some(&2));
        assert_eq!(stats.by_type.get("decision"), Some(&1));
        assert_eq!(stats.by_scope.get("personal"), Some(&2));
        assert_eq!(stats.embedded, 1);
    }

    #[test]
    fn test_embedding_backlog() {
        let store = MemoryStore::in_memory().unwrap();
        let fresh = store.create(&decision("fresh")).unwrap();
        let stale = store.create(&decision("stale")).unwrap();
        let current = store.create(&decision("current")).unwrap();
        store
            .update_embedding(&stale, &Embedding { model: "old".into(), vector: vec![1.0] })
            .unwrap();
        store
            .update_embedding(&current, &Embedding { model: "new".into(), vector: vec![1.0] })
            .unwrap();

        let backlog: Vec<String> = store
            .embedding_backlog("new", false)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(backlog, vec![fresh, stale]);
        assert_eq!(store.embedding_backlog("new", true).unwrap().len(), 3);
    }

    #[test]
    fn test_writes_visible_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");

        let writer = MemoryStore::open(&path).unwrap();
        let reader = MemoryStore::open(&path).unwrap();

        let id = writer.create(&decision("shared across processes")).unwrap();
        let seen = reader.peek(&id).unwrap();
        assert_eq!(seen.content, "shared across processes");

        reader
            .update_embedding(&id, &Embedding { model: "m".into(), vector: vec![0.1, 0.2] })
            .unwrap();
        assert!(writer.peek(&id).unwrap().embedding.is_some());
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        MemoryStore::open(&path).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = MemoryStore::open(&path).unwrap();
                    for i in 0..10 {
                        let id = store
                            .create(&decision(&format!("worker {} memory {}", worker, i)))
                            .unwrap();
                        store
                            .update_embedding(&id, &Embedding { model: "m".into(), vector: vec![i as f32 + 1.0] })
                            .unwrap();
                        store.get_by_id(&id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = MemoryStore::open(&path).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_memories, 40);
        assert_eq!(stats.embedded, 40);
        let all = store.candidates(&RecallFilters::default()).unwrap();
        assert!(all.iter().all(|m| m.access_count == 1));
    }
}
