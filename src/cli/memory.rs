use crate::config::Config;
use crate::error::Result;
use crate::memory::Memories;
use crate::types::{Memory, NewMemory, RecallFilters, RecallRequest};
use std::path::Path;

const PREVIEW_CHARS: usize = 200;

fn open(data_dir: &Path) -> Result<Memories> {
    let config = Config::load(data_dir)?;
    Memories::open(data_dir, &config)
}

fn split_topics(topics: &str) -> Vec<String> {
    topics
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Run the remember command
pub fn run_remember(
    data_dir: &Path,
    content: &str,
    memory_type: &str,
    topics: &str,
    importance: f64,
    scope: &str,
    project: Option<&str>,
) -> Result<()> {
    let mem = open(data_dir)?;

    let mut memory = NewMemory::new(memory_type.parse()?, content)
        .with_topics(split_topics(topics))
        .with_importance(importance);
    memory.scope = scope.parse()?;
    memory.project = project.map(str::to_string);

    let remembered = mem.remember(memory)?;

    println!("Remembered [{}] ({})", remembered.id, remembered.memory_type);
    println!("  {}", remembered.summary);
    if !remembered.embedded {
        println!("  (no embedding; run 'memorypilot reembed' once the embedder is available)");
    }

    Ok(())
}

/// Run the recall command
pub fn run_recall(
    data_dir: &Path,
    query: &str,
    limit: usize,
    memory_type: Option<&str>,
    topic: Option<String>,
    scope: Option<&str>,
    project: Option<String>,
) -> Result<()> {
    let mem = open(data_dir)?;

    let request = RecallRequest {
        query: query.to_string(),
        limit,
        filters: RecallFilters {
            memory_type: memory_type.map(str::parse).transpose()?,
            topic,
            scope: scope.map(str::parse).transpose()?,
            project,
        },
    };
    let recall = mem.recall(&request)?;

    if recall.results.is_empty() {
        println!("No matching memories.");
        return Ok(());
    }

    println!("{} matches ({} search):\n", recall.results.len(), recall.mode);
    for r in recall.results {
        println!("[{}] score: {:.3}", r.memory.id, r.score);
        print_memory(&r.memory);
    }

    Ok(())
}

/// Run the show command
pub fn run_show(data_dir: &Path, id: &str, peek: bool) -> Result<()> {
    let mem = open(data_dir)?;
    let m = if peek { mem.peek(id)? } else { mem.get(id)? };

    println!("[{}] {} / {}", m.id, m.memory_type, m.scope);
    if let Some(project) = &m.project {
        println!("  project:    {}", project);
    }
    if !m.topics.is_empty() {
        println!("  topics:     {}", m.topics.join(", "));
    }
    println!("  source:     {} ({})", m.source.source_type.as_str(), m.source.reference);
    println!("  confidence: {:.2}  importance: {:.2}", m.confidence, m.importance);
    println!("  created:    {}", m.created_at.to_rfc3339());
    println!("  accessed:   {} ({} times)", m.last_accessed_at.to_rfc3339(), m.access_count);
    match &m.embedding {
        Some(e) => println!("  embedding:  {} ({} dims)", e.model, e.vector.len()),
        None => println!("  embedding:  none"),
    }
    println!("\n{}", m.content);

    Ok(())
}

/// Run the stats command
pub fn run_stats(data_dir: &Path) -> Result<()> {
    let mem = open(data_dir)?;
    let stats = mem.stats()?;

    println!("Memory Statistics");
    println!("=================\n");

    println!("Total memories: {}", stats.total_memories);
    println!("Projects:       {}", stats.project_count);
    println!("Embedded:       {}", stats.embedded);

    if !stats.by_type.is_empty() {
        println!("\nBy type:");
        for (memory_type, count) in &stats.by_type {
            println!("  {:12} {}", memory_type, count);
        }
    }

    if !stats.by_scope.is_empty() {
        println!("\nBy scope:");
        for (scope, count) in &stats.by_scope {
            println!("  {:12} {}", scope, count);
        }
    }

    Ok(())
}

/// Run the reembed command
pub fn run_reembed(data_dir: &Path, all: bool) -> Result<()> {
    let mem = open(data_dir)?;
    let report = mem.reembed(all)?;

    println!("Embedded {} memories.", report.embedded);
    if let Some(reason) = report.unavailable {
        println!("Stopped early, {} remaining: {}", report.remaining, reason);
    }

    Ok(())
}

fn print_memory(m: &Memory) {
    println!("    {} [{}]", m.memory_type, m.scope);
    if !m.topics.is_empty() {
        println!("    topics: {}", m.topics.join(", "));
    }

    let preview: String = m.content.chars().take(PREVIEW_CHARS).collect();
    let preview = if m.content.chars().count() > PREVIEW_CHARS {
        format!("{}...", preview)
    } else {
        preview
    };
    println!("    {}\n", preview.replace('\n', " "));
}
