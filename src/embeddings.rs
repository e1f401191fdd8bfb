use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::types::Embedding;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Embedding dimension for lite embedder
const LITE_DIM: usize = 384;

/// Model name recorded for lite vectors
pub const LITE_MODEL: &str = "lite-384";

/// Cap on an embedding server reply
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Why no vector could be produced. Every variant means "unavailable":
/// callers fall back instead of failing.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding is disabled")]
    Disabled,

    #[error("embedding server not running at {0}")]
    NotRunning(PathBuf),

    #[error("embedding server timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding server I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("embedding server error: {0}")]
    Server(String),

    #[error("malformed embedding: {0}")]
    Malformed(String),
}

/// Trait for embedding implementations
pub trait Embedder {
    /// Name of the model whose vector space this embedder produces
    fn model(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

// =============================================================================
// LiteEmbedder - N-gram hashing
// =============================================================================

/// Lightweight embedder using character n-gram hashing
pub struct LiteEmbedder {
    dim: usize,
}

impl Default for LiteEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteEmbedder {
    pub fn new() -> Self {
        Self { dim: LITE_DIM }
    }
}

impl Embedder for LiteEmbedder {
    fn model(&self) -> &str {
        LITE_MODEL
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let text = text.to_lowercase();
        let text = text.trim();
        let mut vector = vec![0.0f32; self.dim];

        // Character trigrams
        let chars: Vec<char> = text.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[bucket(&trigram, self.dim)] += 1.0;
        }

        // Word unigrams weigh more than trigrams
        for word in text.split_whitespace() {
            vector[bucket(word, self.dim)] += 2.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(EmbedError::Malformed("text has no embeddable content".to_string()));
        }
        for v in &mut vector {
            *v /= norm;
        }

        Ok(vector)
    }
}

/// Hash a feature into one of `dim` buckets
fn bucket(feature: &str, dim: usize) -> usize {
    let mut hasher = Md5::new();
    hasher.update(feature.as_bytes());
    let digest = u128::from_be_bytes(hasher.finalize().into());
    (digest % dim as u128) as usize
}

// =============================================================================
// ServerEmbedder - Unix socket client for an external embedding server
// =============================================================================

#[derive(Serialize)]
struct EmbedRequest<'a> {
    cmd: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    ok: bool,
    embedding: Option<Vec<f32>>,
    error: Option<String>,
}

/// Embedder backed by an embedding server listening on a Unix socket
pub struct ServerEmbedder {
    socket_path: PathBuf,
    model: String,
    timeout: Duration,
}

impl ServerEmbedder {
    pub fn new(socket_path: impl Into<PathBuf>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            model: model.into(),
            timeout,
        }
    }

    /// Send one request and parse the reply, all within the timeout
    fn send_request<R, T>(&self, request: &R) -> Result<T, EmbedError>
    where
        R: Serialize,
        T: for<'de> Deserialize<'de>,
    {
        if !self.socket_path.exists() {
            return Err(EmbedError::NotRunning(self.socket_path.clone()));
        }

        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let json = serde_json::to_vec(request)
            .map_err(|e| EmbedError::Malformed(format!("failed to serialize request: {}", e)))?;
        stream.write_all(&json).map_err(|e| self.io_error(e))?;

        // Shut down the write side to signal end of request
        stream.shutdown(std::net::Shutdown::Write)?;

        let mut buffer = Vec::new();
        stream
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut buffer)
            .map_err(|e| self.io_error(e))?;

        serde_json::from_slice(&buffer)
            .map_err(|e| EmbedError::Malformed(format!("failed to parse response: {}", e)))
    }

    fn io_error(&self, err: io::Error) -> EmbedError {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => EmbedError::Timeout(self.timeout),
            _ => EmbedError::Io(err),
        }
    }
}

impl Embedder for ServerEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = EmbedRequest { cmd: "embed", text };
        let response: EmbedResponse = self.send_request(&request)?;

        if response.ok {
            response
                .embedding
                .ok_or_else(|| EmbedError::Malformed("no embedding in response".to_string()))
        } else {
            Err(EmbedError::Server(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Embedder that is never available; search stays keyword-only
pub struct DisabledEmbedder;

impl Embedder for DisabledEmbedder {
    fn model(&self) -> &str {
        "disabled"
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Best-effort access to an embedder. Vectors come back tagged with the
/// model that produced them; anything unusable is reported as unavailable.
pub struct EmbeddingGateway {
    embedder: Box<dyn Embedder>,
}

impl EmbeddingGateway {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Build the gateway selected by configuration
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let embedder: Box<dyn Embedder> = match config.backend {
            EmbeddingBackend::Lite => Box::new(LiteEmbedder::new()),
            EmbeddingBackend::Server => Box::new(ServerEmbedder::new(
                &config.socket_path,
                &config.model,
                Duration::from_millis(config.timeout_ms),
            )),
            EmbeddingBackend::Disabled => Box::new(DisabledEmbedder),
        };
        debug!(backend = ?config.backend, model = embedder.model(), "embedding gateway ready");
        Self::new(embedder)
    }

    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    pub fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        let vector = self.embedder.embed(text)?;
        if vector.is_empty() {
            return Err(EmbedError::Malformed("empty vector".to_string()));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(EmbedError::Malformed("vector has non-finite values".to_string()));
        }
        Ok(Embedding {
            model: self.embedder.model().to_string(),
            vector,
        })
    }
}

// =============================================================================
// Cosine similarity
// =============================================================================

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(vec_a: &[f32], vec_b: &[f32]) -> f64 {
    if vec_a.len() != vec_b.len() {
        return 0.0;
    }

    let dot: f64 = vec_a.iter().zip(vec_b).map(|(a, b)| *a as f64 * *b as f64).sum();
    let norm_a: f64 = vec_a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = vec_b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
