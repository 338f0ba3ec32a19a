//! Durable cache store
//!
//! One directory per cache generation under the store root. A generation is
//! written completely into a staging directory and then renamed into place, so
//! a failed install never leaves a half-filled generation behind.

use crate::error::WorkerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A stored (or freshly fetched) HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Storage of named cache generations
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of every generation currently stored
    async fn keys(&self) -> Result<Vec<String>, WorkerError>;

    /// Store a complete generation, replacing any previous content under that name
    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), WorkerError>;

    async fn lookup(&self, generation: &str, key: &str)
        -> Result<Option<CachedResponse>, WorkerError>;

    /// Returns false when the generation did not exist
    async fn delete(&self, generation: &str) -> Result<bool, WorkerError>;
}

/// Normalize an asset path or request path-and-query into a cache key.
/// `./` and `/` map to `/`, `./index.html` and `/index.html` to `/index.html`.
pub fn normalize_key(path: &str) -> String {
    let trimmed = path.trim_start_matches('.').trim_start_matches('/');
    format!("/{}", trimmed)
}

fn validate_generation(name: &str) -> Result<(), WorkerError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains("..");
    if bad {
        Err(WorkerError::InvalidGeneration(name.to_string()))
    } else {
        Ok(())
    }
}

/// In-memory store, for tests and hosts without a writable data directory
#[derive(Default)]
pub struct MemoryCacheStorage {
    generations: Mutex<BTreeMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, WorkerError> {
        Ok(self.generations.lock().keys().cloned().collect())
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), WorkerError> {
        validate_generation(generation)?;
        let map = entries
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), v))
            .collect();
        self.generations.lock().insert(generation.to_string(), map);
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, WorkerError> {
        Ok(self
            .generations
            .lock()
            .get(generation)
            .and_then(|g| g.get(&normalize_key(key)))
            .cloned())
    }

    async fn delete(&self, generation: &str) -> Result<bool, WorkerError> {
        Ok(self.generations.lock().remove(generation).is_some())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    status: u16,
    content_type: Option<String>,
}

type GenerationIndex = BTreeMap<String, IndexEntry>;

const INDEX_FILE: &str = "index.json";

/// On-disk store: `<root>/<generation>/index.json` plus one body file per entry
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub async fn open<P: Into<PathBuf>>(root: P) -> Result<Self, WorkerError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        // staging directories of a put_all that never finished
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') && entry.file_type().await?.is_dir() {
                debug!("removing stale staging directory {}", name);
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
        }

        debug!("cache store opened at {}", root.display());
        Ok(Self { root })
    }

    fn generation_dir(&self, generation: &str) -> PathBuf {
        self.root.join(generation)
    }

    async fn read_index(dir: &Path) -> Result<Option<GenerationIndex>, WorkerError> {
        let path = dir.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, WorkerError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // staging directories
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), WorkerError> {
        validate_generation(generation)?;

        let staging = self
            .root
            .join(format!(".{}-{}", generation, uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        let mut index = GenerationIndex::new();
        for (n, (key, response)) in entries.into_iter().enumerate() {
            let file = format!("{}.bin", n);
            tokio::fs::write(staging.join(&file), &response.body).await?;
            index.insert(
                normalize_key(&key),
                IndexEntry {
                    file,
                    status: response.status,
                    content_type: response.content_type,
                },
            );
        }
        tokio::fs::write(staging.join(INDEX_FILE), serde_json::to_vec_pretty(&index)?).await?;

        let target = self.generation_dir(generation);
        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::rename(&staging, &target).await?;
        debug!("stored cache generation {} ({} entries)", generation, index.len());
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, WorkerError> {
        validate_generation(generation)?;
        let dir = self.generation_dir(generation);
        let Some(index) = Self::read_index(&dir).await? else {
            return Ok(None);
        };
        let Some(entry) = index.get(&normalize_key(key)) else {
            return Ok(None);
        };
        let body = tokio::fs::read(dir.join(&entry.file)).await?;
        Ok(Some(CachedResponse {
            status: entry.status,
            content_type: entry.content_type.clone(),
            body,
        }))
    }

    async fn delete(&self, generation: &str) -> Result<bool, WorkerError> {
        validate_generation(generation)?;
        let dir = self.generation_dir(generation);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
