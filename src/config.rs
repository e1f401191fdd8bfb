use crate::error::{MemoryError, Result};
use crate::search::{SearchEngine, MAX_LIMIT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "MEMORYPILOT_HOME";

/// Model the embedding server is expected to serve by default
pub const DEFAULT_SERVER_MODEL: &str = "BAAI/bge-base-en-v1.5";

const DEFAULT_SOCKET_PATH: &str = "/tmp/memorypilot-embedder.sock";
const CONFIG_FILE: &str = "config.yaml";
const DATABASE_FILE: &str = "memory.db";

/// Keys accepted by `Config::get` and `Config::set`
pub const KEYS: &[&str] = &[
    "embedding.backend",
    "embedding.model",
    "embedding.socket_path",
    "embedding.timeout_ms",
    "search.keyword_weight",
    "search.semantic_weight",
    "search.min_similarity",
    "search.default_limit",
];

/// Where embeddings come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// In-process n-gram hashing
    #[default]
    Lite,
    /// External embedding server on a Unix socket
    Server,
    /// Keyword search only
    Disabled,
}

impl EmbeddingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingBackend::Lite => "lite",
            EmbeddingBackend::Server => "server",
            EmbeddingBackend::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lite" => Ok(EmbeddingBackend::Lite),
            "server" => Ok(EmbeddingBackend::Server),
            "disabled" => Ok(EmbeddingBackend::Disabled),
            other => Err(MemoryError::Config(format!(
                "unknown embedding backend '{}' (expected lite, server or disabled)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Model name of the embedding server; ignored by the lite backend
    pub model: String,
    pub socket_path: PathBuf,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model: DEFAULT_SERVER_MODEL.to_string(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub keyword_weight: f64,
    pub semantic_weight: f64,
    pub min_similarity: f64,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let engine = SearchEngine::default();
        Self {
            keyword_weight: engine.keyword_weight,
            semantic_weight: engine.semantic_weight,
            min_similarity: engine.min_similarity,
            default_limit: engine.default_limit,
        }
    }
}

impl SearchConfig {
    /// Validated search engine for these settings
    pub fn engine(&self) -> Result<SearchEngine> {
        let weights = [self.keyword_weight, self.semantic_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(MemoryError::Config("search weights must be non-negative numbers".to_string()));
        }
        if weights.iter().all(|w| *w == 0.0) {
            return Err(MemoryError::Config("at least one search weight must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(MemoryError::Config("search.min_similarity must be within [0, 1]".to_string()));
        }
        if self.default_limit == 0 || self.default_limit > MAX_LIMIT {
            return Err(MemoryError::Config(format!(
                "search.default_limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }

        Ok(SearchEngine {
            keyword_weight: self.keyword_weight,
            semantic_weight: self.semantic_weight,
            min_similarity: self.min_similarity,
            default_limit: self.default_limit,
        })
    }
}

/// Settings stored in `config.yaml` under the data directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Load the config of a data directory; a missing file means defaults
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| MemoryError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)?;
        let content = serde_yaml::to_string(self)
            .map_err(|e| MemoryError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(data_dir.join(CONFIG_FILE), content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "embedding.backend" => self.embedding.backend.as_str().to_string(),
            "embedding.model" => self.embedding.model.clone(),
            "embedding.socket_path" => self.embedding.socket_path.display().to_string(),
            "embedding.timeout_ms" => self.embedding.timeout_ms.to_string(),
            "search.keyword_weight" => self.search.keyword_weight.to_string(),
            "search.semantic_weight" => self.search.semantic_weight.to_string(),
            "search.min_similarity" => self.search.min_similarity.to_string(),
            "search.default_limit" => self.search.default_limit.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Set one dotted key; the resulting search settings must stay valid
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match key {
            "embedding.backend" => next.embedding.backend = value.parse()?,
            "embedding.model" => next.embedding.model = value.to_string(),
            "embedding.socket_path" => next.embedding.socket_path = PathBuf::from(value),
            "embedding.timeout_ms" => next.embedding.timeout_ms = parse_value(key, value)?,
            "search.keyword_weight" => next.search.keyword_weight = parse_value(key, value)?,
            "search.semantic_weight" => next.search.semantic_weight = parse_value(key, value)?,
            "search.min_similarity" => next.search.min_similarity = parse_value(key, value)?,
            "search.default_limit" => next.search.default_limit = parse_value(key, value)?,
            _ => {
                return Err(MemoryError::Config(format!(
                    "unknown key '{}' (known: {})",
                    key,
                    KEYS.join(", ")
                )))
            }
        }
        next.search.engine()?;
        *self = next;
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MemoryError::Config(format!("invalid value for {}: {}", key, value)))
}

/// Resolve the data directory: explicit flag, then `MEMORYPILOT_HOME`, then `~/.memorypilot`
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }

    if let Ok(dir) = std::env::var(HOME_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    dirs::home_dir()
        .map(|home| home.join(".memorypilot"))
        .ok_or_else(|| {
            MemoryError::Config(format!("no home directory found; set {}", HOME_ENV))
        })
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.search.engine().unwrap(), SearchEngine::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "embedding:\n  backend: server\n  timeout_ms: 1500\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.embedding.backend, EmbeddingBackend::Server);
        assert_eq!(config.embedding.timeout_ms, 1500);
        assert_eq!(config.embedding.model, DEFAULT_SERVER_MODEL);
        assert_eq!(config.search, SearchConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "embedding: [unclosed").unwrap();
        assert!(matches!(Config::load(dir.path()), Err(MemoryError::Config(_))));
    }

    #[test]
    fn test_set_get_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.set("embedding.backend", "disabled").unwrap();
        config.set("search.keyword_weight", "0.7").unwrap();
        config.save(dir.path()).unwrap();

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("embedding.backend").as_deref(), Some("disabled"));
        assert_eq!(reloaded.get("search.keyword_weight").as_deref(), Some("0.7"));
        assert_eq!(reloaded.get("nope"), None);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("embedding.backend", "cloud").is_err());
        assert!(config.set("search.default_limit", "many").is_err());
        assert!(config.set("search.min_similarity", "2").is_err());
        assert!(config.set("unknown.key", "1").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(Path::new("/tmp/explicit"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/explicit"));
        assert_eq!(database_path(&dir), PathBuf::from("/tmp/explicit/memory.db"));
    }
}
