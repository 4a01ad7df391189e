//! SQLite-backed cache for text embeddings.

use fs2::FileExt;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::embedding::{EmbedError, Embedder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingCacheKey {
    pub model: String,
    pub text_hash: String,
    pub key_hash: String,
}

impl EmbeddingCacheKey {
    pub fn new(model: &str, text: &str) -> Self {
        let text_hash = hash_text(text);
        let key_hash = hash_fields(&[model, &text_hash]);
        Self {
            model: model.to_string(),
            text_hash,
            key_hash,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("cached vector for {key_hash} has {len} bytes, not a whole number of f32s")]
    CorruptVector { key_hash: String, len: usize },
}

pub trait EmbeddingCache: Send + Sync {
    fn get(&self, key: &EmbeddingCacheKey) -> Result<Option<Vec<f32>>, CacheError>;
    fn put(&self, key: &EmbeddingCacheKey, vector: &[f32]) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct SqliteEmbeddingCache {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEmbeddingCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             CREATE TABLE IF NOT EXISTS embedding_cache ( \
               key_hash TEXT PRIMARY KEY, \
               model TEXT NOT NULL, \
               text_hash TEXT NOT NULL, \
               dimension INTEGER NOT NULL, \
               vector BLOB NOT NULL, \
               created_at INTEGER NOT NULL, \
               updated_at INTEGER NOT NULL, \
               hit_count INTEGER NOT NULL DEFAULT 0 \
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("HWAM_CACHE_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".hwam_embedding_cache.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_exclusive(&self) -> Result<CacheLock, CacheError> {
        CacheLock::new(&self.path)
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError>,
    {
        let guard = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&guard)
    }
}

impl EmbeddingCache for SqliteEmbeddingCache {
    fn get(&self, key: &EmbeddingCacheKey) -> Result<Option<Vec<f32>>, CacheError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT vector FROM embedding_cache WHERE key_hash = ?1")?;
            let mut rows = stmt.query(params![key.key_hash])?;
            if let Some(row) = rows.next()? {
                let blob: Vec<u8> = row.get(0)?;
                let vector = decode_vector(&key.key_hash, &blob)?;
                conn.execute(
                    "UPDATE embedding_cache \
                     SET hit_count = hit_count + 1, updated_at = ?1 \
                     WHERE key_hash = ?2",
                    params![now_epoch(), key.key_hash],
                )?;
                Ok(Some(vector))
            } else {
                Ok(None)
            }
        })
    }

    fn put(&self, key: &EmbeddingCacheKey, vector: &[f32]) -> Result<(), CacheError> {
        self.with_conn(|conn| {
            let now = now_epoch();
            conn.execute(
                "INSERT INTO embedding_cache ( \
                    key_hash, model, text_hash, dimension, vector, created_at, updated_at \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(key_hash) DO UPDATE SET \
                    dimension = excluded.dimension, \
                    vector = excluded.vector, \
                    updated_at = excluded.updated_at",
                params![
                    key.key_hash,
                    key.model,
                    key.text_hash,
                    vector.len() as i64,
                    encode_vector(vector),
                    now,
                    now,
                ],
            )?;
            Ok(())
        })
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(key_hash: &str, blob: &[u8]) -> Result<Vec<f32>, CacheError> {
    if blob.len() % 4 != 0 {
        return Err(CacheError::CorruptVector {
            key_hash: key_hash.to_string(),
            len: blob.len(),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[derive(Debug)]
pub struct CacheLock {
    _file: std::fs::File,
}

impl CacheLock {
    fn new(db_path: &Path) -> Result<Self, CacheError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub key_hash: String,
    pub model: String,
    pub text_hash: String,
    pub dimension: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

impl SqliteEmbeddingCache {
    /// One JSON object per entry, newest first. Vectors are not exported.
    pub fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref().to_path_buf();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key_hash, model, text_hash, dimension, created_at, updated_at, hit_count \
                 FROM embedding_cache ORDER BY updated_at DESC, key_hash",
            )?;
            let mut rows = stmt.query([])?;
            let mut file = std::fs::File::create(path)?;
            let mut written = 0usize;
            while let Some(row) = rows.next()? {
                let record = CacheExportRow {
                    key_hash: row.get(0)?,
                    model: row.get(1)?,
                    text_hash: row.get(2)?,
                    dimension: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                    hit_count: row.get(6)?,
                };
                let line =
                    serde_json::to_string(&record).map_err(|e| CacheError::Serde(e.to_string()))?;
                use std::io::Write;
                writeln!(file, "{line}")?;
                written += 1;
            }
            Ok(written)
        })
    }

    pub fn prune(
        &self,
        max_age_days: Option<u64>,
        max_rows: Option<usize>,
    ) -> Result<CachePruneStats, CacheError> {
        self.with_conn(|conn| {
            let mut deleted: usize = 0;
            if let Some(days) = max_age_days {
                let cutoff = now_epoch().saturating_sub((days as i64).saturating_mul(86_400));
                let removed = conn.execute(
                    "DELETE FROM embedding_cache WHERE updated_at < ?1",
                    params![cutoff],
                )?;
                deleted = deleted.saturating_add(removed);
            }

            if let Some(max_rows) = max_rows {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
                let keep = max_rows as i64;
                if count > keep {
                    let removed = conn.execute(
                        "DELETE FROM embedding_cache WHERE key_hash IN ( \
                            SELECT key_hash FROM embedding_cache \
                            ORDER BY updated_at DESC, hit_count DESC LIMIT -1 OFFSET ?1 \
                         )",
                        params![keep],
                    )?;
                    deleted = deleted.saturating_add(removed);
                }
            }

            let remaining: i64 =
                conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
            Ok(CachePruneStats {
                deleted,
                remaining: remaining.max(0) as usize,
            })
        })
    }
}

// ---------------------------------------------------------------------
//  Caching embedder
// ---------------------------------------------------------------------

/// Serves vectors from `cache` and forwards only unseen texts to `inner`,
/// deduplicated, in a single batch call.
pub struct CachedEmbedder<E, C = SqliteEmbeddingCache> {
    inner: E,
    cache: C,
}

impl<E, C> CachedEmbedder<E, C>
where
    E: Embedder,
    C: EmbeddingCache,
{
    pub fn new(inner: E, cache: C) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

impl<E, C> Embedder for CachedEmbedder<E, C>
where
    E: Embedder,
    C: EmbeddingCache,
{
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let model = self.inner.model_id();
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<String> = Vec::new();
        let mut missing_slot: HashMap<&str, usize> = HashMap::new();

        for text in texts {
            let key = EmbeddingCacheKey::new(model, text);
            let hit = self.cache.get(&key)?;
            if hit.is_none() && !missing_slot.contains_key(text.as_str()) {
                missing_slot.insert(text.as_str(), missing.len());
                missing.push(text.clone());
            }
            out.push(hit);
        }

        debug!(
            model,
            requested = texts.len(),
            misses = missing.len(),
            "embedding cache lookup"
        );

        if missing.is_empty() {
            return Ok(out.into_iter().flatten().collect());
        }

        let fresh = self.inner.embed(&missing)?;
        if fresh.len() != missing.len() {
            return Err(EmbedError::Provider(format!(
                "embedder returned {} vectors for {} texts",
                fresh.len(),
                missing.len()
            )));
        }
        for (text, vector) in missing.iter().zip(fresh.iter()) {
            self.cache
                .put(&EmbeddingCacheKey::new(model, text), vector)?;
        }

        Ok(texts
            .iter()
            .zip(out)
            .map(|(text, hit)| match hit {
                Some(v) => v,
                None => fresh[missing_slot[text.as_str()]].clone(),
            })
            .collect())
    }
}

fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
