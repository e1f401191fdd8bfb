use crate::error::{MemoryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum summary length, in characters
pub const SUMMARY_MAX_CHARS: usize = 100;

const ELLIPSIS: &str = "...";

/// Semantic category of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Decision,
    Pattern,
    Fact,
    Preference,
    Mistake,
    Learning,
}

impl MemoryType {
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Decision,
        MemoryType::Pattern,
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Mistake,
        MemoryType::Learning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Pattern => "pattern",
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Mistake => "mistake",
            MemoryType::Learning => "learning",
        }
    }
}

impl FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        MemoryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MemoryError::Validation(format!("unknown memory type: {}", s)))
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility class of a memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Personal,
    Project,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Personal => "personal",
            Scope::Project => "project",
        }
    }
}

impl FromStr for Scope {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "personal" => Ok(Scope::Personal),
            "project" => Ok(Scope::Project),
            other => Err(MemoryError::Validation(format!("unknown scope: {}", other))),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a memory came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    Observed,
    GitCommit,
    FileChange,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Manual => "manual",
            SourceType::Observed => "observed",
            SourceType::GitCommit => "git_commit",
            SourceType::FileChange => "file_change",
        }
    }
}

impl FromStr for SourceType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(SourceType::Manual),
            "observed" => Ok(SourceType::Observed),
            "git_commit" => Ok(SourceType::GitCommit),
            "file_change" => Ok(SourceType::FileChange),
            other => Err(MemoryError::Validation(format!("unknown source type: {}", other))),
        }
    }
}

/// Provenance of a memory, fixed at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub reference: String,
    pub timestamp: DateTime<Utc>,
}

impl Source {
    pub fn manual(reference: &str) -> Self {
        Self {
            source_type: SourceType::Manual,
            reference: reference.to_string(),
            timestamp: crate::index::now(),
        }
    }
}

/// A vector tagged with the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub model: String,
    pub vector: Vec<f32>,
}

/// A memory entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Memory {
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    pub summary: String,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub source: Source,
    pub confidence: f64,
    pub importance: f64,
    pub topics: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<Embedding>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

/// Input for creating a memory
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub scope: Scope,
    pub project: Option<String>,
    pub source: Source,
    pub confidence: f64,
    pub importance: f64,
    pub topics: Vec<String>,
}

impl NewMemory {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            memory_type,
            content: content.into(),
            scope: Scope::Personal,
            project: None,
            source: Source::manual("cli"),
            confidence: 1.0,
            importance: 0.5,
            topics: Vec::new(),
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }
}

/// Optional constraints applied before ranking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecallFilters {
    pub memory_type: Option<MemoryType>,
    pub topic: Option<String>,
    pub scope: Option<Scope>,
    pub project: Option<String>,
}

/// A search over stored memories. A limit of 0 means the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecallRequest {
    pub query: String,
    pub limit: usize,
    pub filters: RecallFilters,
}

impl RecallRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            filters: RecallFilters::default(),
        }
    }
}

/// Search result with its ranking scores
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub memory: Memory,
    pub score: f64,
    pub keyword_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
}

/// Statistics about the memory store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub project_count: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_scope: BTreeMap<String, usize>,
    pub embedded: usize,
}

/// Derive the display summary of a memory's content
pub fn summarize(content: &str) -> String {
    if content.chars().count() <= SUMMARY_MAX_CHARS {
        return content.to_string();
    }
    let keep = SUMMARY_MAX_CHARS - ELLIPSIS.len();
    let mut summary: String = content.chars().take(keep).collect();
    summary.push_str(ELLIPSIS);
    summary
}

/// Trim, drop empties and de-duplicate (case-insensitively) keeping first occurrence
pub fn normalize_topics(topics: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    topics
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_short_content_is_verbatim() {
        let content = "a".repeat(SUMMARY_MAX_CHARS);
        assert_eq!(summarize(&content), content);
        assert_eq!(summarize("Use Redis for caching"), "Use Redis for caching");
    }

    #[test]
    fn test_summary_truncates_to_bound() {
        let content = "x".repeat(250);
        let summary = summarize(&content);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(summary.ends_with("..."));
        assert!(summary.starts_with("xxx"));
    }

    #[test]
    fn test_summary_counts_characters_not_bytes() {
        let content = "é".repeat(120);
        let summary = summarize(&content);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_memory_type_parsing() {
        assert_eq!("decision".parse::<MemoryType>().unwrap(), MemoryType::Decision);
        assert_eq!("learning".parse::<MemoryType>().unwrap(), MemoryType::Learning);
        let err = "opinion".parse::<MemoryType>().unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[test]
    fn test_scope_and_source_parsing() {
        assert_eq!("project".parse::<Scope>().unwrap(), Scope::Project);
        assert!("global".parse::<Scope>().is_err());
        assert_eq!("git_commit".parse::<SourceType>().unwrap(), SourceType::GitCommit);
        assert!("rumor".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_normalize_topics_keeps_order() {
        let topics = vec![
            " redis ".to_string(),
            "cache".to_string(),
            "".to_string(),
            "Redis".to_string(),
            "infra".to_string(),
        ];
        assert_eq!(normalize_topics(&topics), vec!["redis", "cache", "infra"]);
    }
}
