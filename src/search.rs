//! Hybrid ranking of stored memories.
//!
//! The fused score of a candidate is
//!
//! ```text
//! score = keyword_weight * keyword + semantic_weight * semantic
//! ```
//!
//! where `keyword` is the candidate's lexical score divided by the best lexical
//! score in the candidate set, and `semantic` is the cosine similarity between
//! the query vector and the candidate's embedding, clamped to `[0, 1]` and
//! zeroed below `min_similarity`. The semantic term only depends on the
//! candidate itself. Without a query vector the score is the keyword term
//! alone.

use crate::embeddings::cosine_similarity;
use crate::error::{MemoryError, Result};
use crate::index::MemoryStore;
use crate::types::{Embedding, Memory, RecallRequest, SearchResult};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 100;

/// Query words shorter than this are ignored
const MIN_TERM_CHARS: usize = 2;

const SUMMARY_HIT: f64 = 0.5;
const TOPIC_EXACT_HIT: f64 = 1.5;
const TOPIC_PARTIAL_HIT: f64 = 0.75;

/// Fusion weights and limits for ranking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchEngine {
    pub keyword_weight: f64,
    pub semantic_weight: f64,
    pub min_similarity: f64,
    pub default_limit: usize,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self {
            keyword_weight: 0.4,
            semantic_weight: 0.6,
            min_similarity: 0.25,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl SearchEngine {
    /// Rank the store's memories against a request.
    ///
    /// Without `query_vector` this is plain keyword recall. Every returned
    /// memory has its access recorded.
    pub fn search(
        &self,
        store: &MemoryStore,
        request: &RecallRequest,
        query_vector: Option<&Embedding>,
    ) -> Result<Vec<SearchResult>> {
        let terms = query_terms(&request.query)?;
        let limit = self.effective_limit(request.limit);

        let candidates = store.candidates(&request.filters)?;
        let candidate_count = candidates.len();

        let mut results = self.rank(candidates, &terms, query_vector);
        results.truncate(limit);
        store.record_access(results.iter_mut().map(|r| &mut r.memory))?;

        debug!(
            terms = terms.len(),
            candidates = candidate_count,
            returned = results.len(),
            semantic = query_vector.is_some(),
            "search complete"
        );
        Ok(results)
    }

    /// Score, filter and order candidates. Pure: no store access.
    pub fn rank(
        &self,
        candidates: Vec<Memory>,
        terms: &[String],
        query_vector: Option<&Embedding>,
    ) -> Vec<SearchResult> {
        let raw: Vec<f64> = candidates.iter().map(|m| keyword_score(m, terms)).collect();
        let best = raw.iter().copied().fold(0.0, f64::max);

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .zip(raw)
            .filter_map(|(memory, raw)| {
                let keyword = if best > 0.0 { raw / best } else { 0.0 };
                let (score, semantic) = match query_vector {
                    Some(query) => {
                        let semantic = self.semantic_score(&memory, query);
                        (
                            self.keyword_weight * keyword + self.semantic_weight * semantic,
                            Some(semantic),
                        )
                    }
                    None => (keyword, None),
                };

                (score > 0.0).then_some(SearchResult {
                    memory,
                    score,
                    keyword_score: keyword,
                    semantic_score: semantic,
                })
            })
            .collect();

        results.sort_by(compare_results);
        results
    }

    fn semantic_score(&self, memory: &Memory, query: &Embedding) -> f64 {
        match &memory.embedding {
            // Vectors from another model live in a different space
            Some(stored) if stored.model == query.model && stored.vector.len() == query.vector.len() => {
                let similarity = cosine_similarity(&query.vector, &stored.vector).clamp(0.0, 1.0);
                if similarity.is_finite() && similarity >= self.min_similarity {
                    similarity
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn effective_limit(&self, limit: usize) -> usize {
        match limit {
            0 => self.default_limit.clamp(1, MAX_LIMIT),
            n => n.min(MAX_LIMIT),
        }
    }
}

/// Score desc, importance desc, newest first, then id
fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.memory.importance.total_cmp(&a.memory.importance))
        .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

fn word_pattern() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").expect("static pattern compiles"))
}

/// Split a query into distinct lowercase search terms
pub fn query_terms(query: &str) -> Result<Vec<String>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(MemoryError::InvalidQuery("query must not be empty".to_string()));
    }

    let lowered = query.to_lowercase();
    let mut seen = HashSet::new();
    let terms: Vec<String> = word_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|word| word.chars().count() >= MIN_TERM_CHARS)
        .filter(|word| seen.insert(*word))
        .map(str::to_string)
        .collect();

    if terms.is_empty() {
        Ok(vec![lowered])
    } else {
        Ok(terms)
    }
}

/// Lexical relevance of a memory: per-term hits in content, summary and
/// topics, scaled by the share of query terms that matched at all
pub fn keyword_score(memory: &Memory, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let content = memory.content.to_lowercase();
    let summary = memory.summary.to_lowercase();
    let topics: Vec<String> = memory.topics.iter().map(|t| t.to_lowercase()).collect();

    let mut total = 0.0;
    let mut matched = 0usize;
    for term in terms {
        let term = term.as_str();
        let mut score = 0.0;

        let hits = content.matches(term).count();
        if hits > 0 {
            score += 1.0 + (hits as f64).ln();
        }
        if summary.contains(term) {
            score += SUMMARY_HIT;
        }
        if topics.iter().any(|t| t == term) {
            score += TOPIC_EXACT_HIT;
        } else if topics.iter().any(|t| t.contains(term)) {
            score += TOPIC_PARTIAL_HIT;
        }

        if score > 0.0 {
            matched += 1;
            total += score;
        }
    }

    total * matched as f64 / terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{summarize, MemoryType, NewMemory, Scope, Source, SourceType};
    use chrono::{Duration, TimeZone, Utc};

    fn memory(id: &str, content: &str) -> Memory {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Memory {
            id: id.to_string(),
            memory_type: MemoryType::Fact,
            content: content.to_string(),
            summary: summarize(content),
            scope: Scope::Personal,
            project: None,
            source: Source {
                source_type: SourceType::Manual,
                reference: "test".to_string(),
                timestamp: at,
            },
            confidence: 1.0,
            importance: 0.5,
            topics: Vec::new(),
            embedding: None,
            created_at: at,
            last_accessed_at: at,
            access_count: 0,
        }
    }

    fn embedded(mut memory: Memory, vector: Vec<f32>) -> Memory {
        memory.embedding = Some(Embedding {
            model: "test".to_string(),
            vector,
        });
        memory
    }

    fn query(vector: Vec<f32>) -> Embedding {
        Embedding {
            model: "test".to_string(),
            vector,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.memory.id.as_str()).collect()
    }

    #[test]
    fn test_query_terms() {
        assert_eq!(query_terms("Redis  caching, redis!").unwrap(), vec!["redis", "caching"]);
        assert_eq!(query_terms("a ?").unwrap(), vec!["a ?"]);
        assert!(matches!(query_terms("   "), Err(MemoryError::InvalidQuery(_))));
    }

    #[test]
    fn test_keyword_score_signals() {
        let terms = query_terms("redis").unwrap();
        let plain = memory("a", "Use Redis for caching");
        let mut tagged = memory("b", "Use Redis for caching");
        tagged.topics = vec!["Redis".to_string()];
        let repeated = memory("c", "Redis here, redis there");
        let miss = memory("d", "Use Postgres");

        assert!(keyword_score(&tagged, &terms) > keyword_score(&plain, &terms));
        assert!(keyword_score(&repeated, &terms) > keyword_score(&plain, &terms));
        assert_eq!(keyword_score(&miss, &terms), 0.0);
    }

    #[test]
    fn test_partial_term_coverage_ranks_lower() {
        let terms = query_terms("redis caching").unwrap();
        let both = memory("a", "redis caching layer");
        let one = memory("b", "redis queue");
        assert!(keyword_score(&both, &terms) > keyword_score(&one, &terms));
    }

    #[test]
    fn test_keyword_only_excludes_misses() {
        let engine = SearchEngine::default();
        let candidates = vec![
            memory("a", "Use Redis for caching"),
            memory("b", "Deploy on Fridays is a mistake"),
        ];
        let results = engine.rank(candidates, &query_terms("caching").unwrap(), None);
        assert_eq!(ids(&results), vec!["a"]);
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[0].semantic_score, None);
    }

    #[test]
    fn test_tie_break_order() {
        let engine = SearchEngine::default();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut important = memory("d", "caching");
        important.importance = 0.9;
        let mut newer = memory("c", "caching");
        newer.created_at = base + Duration::days(1);
        let older_a = memory("a", "caching");
        let older_b = memory("b", "caching");

        let results = engine.rank(
            vec![older_b, newer, older_a, important],
            &query_terms("caching").unwrap(),
            None,
        );
        assert_eq!(ids(&results), vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn test_semantic_match_without_keyword_overlap_qualifies() {
        let engine = SearchEngine::default();
        let candidates = vec![
            embedded(memory("a", "Use Redis for caching"), vec![1.0, 0.0]),
            embedded(memory("b", "Memoize expensive lookups"), vec![0.9, 0.1]),
            embedded(memory("c", "Tabs over spaces"), vec![0.0, 1.0]),
        ];
        let results = engine.rank(candidates, &query_terms("caching").unwrap(), Some(&query(vec![1.0, 0.0])));

        assert_eq!(ids(&results), vec!["a", "b"]);
        assert_eq!(results[1].keyword_score, 0.0);
        assert!(results[1].semantic_score.unwrap() > 0.9);
    }

    #[test]
    fn test_missing_or_foreign_embeddings_are_neutral() {
        let engine = SearchEngine::default();
        let mut foreign = memory("b", "caching with a foreign model");
        foreign.embedding = Some(Embedding {
            model: "other".to_string(),
            vector: vec![1.0, 0.0],
        });
        let wrong_dim = embedded(memory("c", "caching in three dims"), vec![1.0, 0.0, 0.0]);
        let candidates = vec![memory("a", "caching without embedding"), foreign, wrong_dim];

        let results = engine.rank(candidates, &query_terms("caching").unwrap(), Some(&query(vec![1.0, 0.0])));
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.semantic_score == Some(0.0)));
    }

    #[test]
    fn test_fusion_is_monotonic_in_similarity() {
        let engine = SearchEngine::default();
        let terms = query_terms("cache").unwrap();
        let q = query(vec![1.0, 0.0]);

        let others = vec![
            embedded(memory("a", "cache cache cache"), vec![0.2, 0.98]),
            embedded(memory("b", "cache"), vec![0.7, 0.71]),
            embedded(memory("c", "unrelated"), vec![0.95, 0.31]),
            embedded(memory("d", "cache invalidation"), vec![0.5, 0.86]),
        ];

        let mut previous_rank = usize::MAX;
        for step in 0..=10 {
            let angle = std::f32::consts::FRAC_PI_2 * (10 - step) as f32 / 10.0;
            let mut candidates = others.clone();
            candidates.push(embedded(memory("x", "cache"), vec![angle.cos(), angle.sin()]));

            let results = engine.rank(candidates, &terms, Some(&q));
            let rank = results
                .iter()
                .position(|r| r.memory.id == "x")
                .expect("x always matches the keyword");
            assert!(rank <= previous_rank, "rank worsened at step {}", step);
            previous_rank = rank;

            // Unchanged candidates keep their relative order
            let rest: Vec<&str> = ids(&results).into_iter().filter(|id| *id != "x").collect();
            let baseline = engine.rank(others.clone(), &terms, Some(&q));
            assert_eq!(rest, ids(&baseline));
        }
        assert_eq!(previous_rank, 0);
    }

    #[test]
    fn test_effective_limit() {
        let engine = SearchEngine::default();
        assert_eq!(engine.effective_limit(0), DEFAULT_LIMIT);
        assert_eq!(engine.effective_limit(3), 3);
        assert_eq!(engine.effective_limit(10_000), MAX_LIMIT);
    }

    #[test]
    fn test_store_search_scenario() {
        let store = MemoryStore::in_memory().unwrap();
        let redis = store
            .create(&NewMemory::new(MemoryType::Decision, "Use Redis for caching"))
            .unwrap();
        store
            .create(&NewMemory::new(MemoryType::Fact, "The API is written in Go"))
            .unwrap();

        let results = store.recall(&RecallRequest::new("caching", 5)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, redis);
        assert_eq!(results[0].memory.access_count, 1);
        assert_eq!(store.peek(&redis).unwrap().access_count, 1);
    }

    #[test]
    fn test_store_search_defaults_limit_and_is_deterministic() {
        let store = MemoryStore::in_memory().unwrap();
        for i in 0..8 {
            store
                .create(&NewMemory::new(MemoryType::Pattern, format!("retry pattern {}", i)))
                .unwrap();
        }

        let request = RecallRequest::new("retry", 0);
        let first = store.recall(&request).unwrap();
        let second = store.recall(&request).unwrap();
        assert_eq!(first.len(), DEFAULT_LIMIT);
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_store_search_rejects_empty_query() {
        let store = MemoryStore::in_memory().unwrap();
        let err = store.recall(&RecallRequest::new("  ", 5)).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidQuery(_)));
    }
}
