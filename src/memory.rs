use crate::config::{database_path, Config};
use crate::embeddings::EmbeddingGateway;
use crate::error::Result;
use crate::index::MemoryStore;
use crate::search::{query_terms, SearchEngine};
use crate::types::{summarize, Memory, MemoryStats, MemoryType, NewMemory, RecallRequest, SearchResult};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Which ranking produced a recall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Hybrid,
    Keyword,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Hybrid => write!(f, "hybrid"),
            SearchMode::Keyword => write!(f, "keyword"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recall {
    pub results: Vec<SearchResult>,
    pub mode: SearchMode,
}

/// Outcome of storing a memory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Remembered {
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub summary: String,
    pub embedded: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReembedReport {
    pub embedded: usize,
    pub remaining: usize,
    /// Why the backfill stopped early, if it did
    pub unavailable: Option<String>,
}

/// The main memory interface
pub struct Memories {
    store: MemoryStore,
    gateway: EmbeddingGateway,
}

impl Memories {
    /// The store ranks with `engine` on both the hybrid and the keyword path
    pub fn new(store: MemoryStore, gateway: EmbeddingGateway, engine: SearchEngine) -> Self {
        Self {
            store: store.with_search_engine(engine),
            gateway,
        }
    }

    /// Open the store of a data directory with its configured gateway
    pub fn open(data_dir: &Path, config: &Config) -> Result<Self> {
        let engine = config.search.engine()?;
        let store = MemoryStore::open(&database_path(data_dir))?;
        let gateway = EmbeddingGateway::from_config(&config.embedding);
        Ok(Self::new(store, gateway, engine))
    }

    #[cfg(test)]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Store a memory, then embed it if the gateway is available.
    ///
    /// The memory is durable once `create` returns; an embedding failure only
    /// leaves it without a vector.
    pub fn remember(&self, memory: NewMemory) -> Result<Remembered> {
        let id = self.store.create(&memory)?;

        let embedded = match self.gateway.embed(&memory.content) {
            Ok(embedding) => match self.store.update_embedding(&id, &embedding) {
                Ok(()) => true,
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to store embedding");
                    false
                }
            },
            Err(e) => {
                debug!(id = %id, error = %e, "embedding unavailable, stored without vector");
                false
            }
        };

        info!(id = %id, memory_type = %memory.memory_type, embedded, "remembered");
        Ok(Remembered {
            id,
            memory_type: memory.memory_type,
            summary: summarize(&memory.content),
            embedded,
        })
    }

    /// Hybrid search when the query can be embedded, keyword recall otherwise
    pub fn recall(&self, request: &RecallRequest) -> Result<Recall> {
        query_terms(&request.query)?;

        let request = RecallRequest {
            limit: self.store.search_engine().effective_limit(request.limit),
            ..request.clone()
        };

        match self.gateway.embed(&request.query) {
            Ok(vector) => {
                let results = self.store.search_engine().search(&self.store, &request, Some(&vector))?;
                Ok(Recall {
                    results,
                    mode: SearchMode::Hybrid,
                })
            }
            Err(e) => {
                debug!(error = %e, "query embedding unavailable, falling back to keyword search");
                let results = self.store.recall(&request)?;
                Ok(Recall {
                    results,
                    mode: SearchMode::Keyword,
                })
            }
        }
    }

    /// Get a specific memory, counting it as an access
    pub fn get(&self, id: &str) -> Result<Memory> {
        self.store.get_by_id(id)
    }

    pub fn peek(&self, id: &str) -> Result<Memory> {
        self.store.peek(id)
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        self.store.stats()
    }

    /// Embed memories lacking a vector from the gateway's current model.
    /// With `all`, every memory is re-embedded.
    pub fn reembed(&self, all: bool) -> Result<ReembedReport> {
        let backlog = self.store.embedding_backlog(self.gateway.model(), all)?;
        let mut report = ReembedReport {
            remaining: backlog.len(),
            ..Default::default()
        };

        for (id, content) in backlog {
            match self.gateway.embed(&content) {
                Ok(embedding) => {
                    self.store.update_embedding(&id, &embedding)?;
                    report.embedded += 1;
                    report.remaining -= 1;
                }
                Err(e) => {
                    warn!(error = %e, remaining = report.remaining, "embedding unavailable, stopping backfill");
                    report.unavailable = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(report)
    }
}
