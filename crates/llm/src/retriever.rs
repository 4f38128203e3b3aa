use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::contract::{BoxFuture, ProjectId, Source};
use super::error::{AnswerError, AnswerResult, ParseSourceIndexSnafu, ReadSourceIndexSnafu};

pub const DEFAULT_RETRIEVAL_LIMIT: usize = 10;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.1;

const MIN_TERM_LEN: usize = 3;
const STOP_WORDS: &[&str] = &[
    "about", "and", "are", "can", "does", "for", "from", "has", "have", "how", "into", "is",
    "not", "that", "the", "their", "this", "was", "what", "when", "where", "which", "who", "why",
    "with", "you", "your",
];

/// Finds the code excerpts that justify an answer.
pub trait SourceRetriever: Send + Sync {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        project_id: &'a ProjectId,
    ) -> BoxFuture<'a, AnswerResult<Vec<Source>>>;
}

/// One summarized file as stored in the index file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFile {
    pub file_name: String,
    pub summary: String,
    pub source_code: String,
}

struct IndexedEntry {
    file: IndexedFile,
    terms: TermVector,
}

/// In-memory per-project index scored by term-frequency cosine similarity.
pub struct SourceIndex {
    projects: HashMap<ProjectId, Vec<IndexedEntry>>,
    limit: usize,
    min_similarity: f64,
}

impl SourceIndex {
    pub fn new(limit: usize, min_similarity: f64) -> Self {
        Self {
            projects: HashMap::new(),
            limit,
            min_similarity,
        }
    }

    pub fn empty() -> Self {
        Self::new(DEFAULT_RETRIEVAL_LIMIT, DEFAULT_MIN_SIMILARITY)
    }

    /// Loads a JSON object mapping project ids to their summarized files.
    pub fn load_file(path: &Path, limit: usize, min_similarity: f64) -> AnswerResult<Self> {
        let content = std::fs::read_to_string(path).context(ReadSourceIndexSnafu {
            stage: "read-source-index",
            path: path.to_path_buf(),
        })?;
        let projects: HashMap<ProjectId, Vec<IndexedFile>> = serde_json::from_str(&content)
            .context(ParseSourceIndexSnafu {
                stage: "parse-source-index",
                path: path.to_path_buf(),
            })?;

        let mut index = Self::new(limit, min_similarity);
        for (project_id, files) in projects {
            index.insert_project(project_id, files);
        }

        tracing::info!(
            path = ?path,
            project_count = index.projects.len(),
            "loaded source index"
        );
        Ok(index)
    }

    pub fn insert_project(&mut self, project_id: ProjectId, files: Vec<IndexedFile>) {
        let entries = files
            .into_iter()
            .map(|file| {
                let terms = TermVector::from_text(&format!("{} {}", file.file_name, file.summary));
                IndexedEntry { file, terms }
            })
            .collect();
        self.projects.insert(project_id, entries);
    }

    /// Ranks the project's files against `query`, most similar first.
    pub fn search(&self, query: &str, project_id: &ProjectId) -> Vec<Source> {
        let Some(entries) = self.projects.get(project_id) else {
            tracing::debug!(project_id = %project_id, "project is not indexed");
            return Vec::new();
        };

        let query_terms = TermVector::from_text(query);
        let mut scored = entries
            .iter()
            .map(|entry| (entry, query_terms.cosine(&entry.terms)))
            .filter(|(_, similarity)| *similarity > self.min_similarity)
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(self.limit);

        scored
            .into_iter()
            .map(|(entry, similarity)| {
                Source::new(
                    entry.file.file_name.clone(),
                    entry.file.summary.clone(),
                    entry.file.source_code.clone(),
                    similarity,
                )
            })
            .collect()
    }
}

impl SourceRetriever for SourceIndex {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        project_id: &'a ProjectId,
    ) -> BoxFuture<'a, AnswerResult<Vec<Source>>> {
        Box::pin(async move { Ok::<_, AnswerError>(self.search(query, project_id)) })
    }
}

struct TermVector {
    counts: HashMap<String, f64>,
    norm: f64,
}

impl TermVector {
    fn from_text(text: &str) -> Self {
        let mut counts = HashMap::new();
        for term in tokenize(text) {
            *counts.entry(term).or_insert(0.0) += 1.0;
        }
        let norm = counts.values().map(|count| count * count).sum::<f64>().sqrt();
        Self { counts, norm }
    }

    fn cosine(&self, other: &Self) -> f64 {
        if self.norm == 0.0 || other.norm == 0.0 {
            return 0.0;
        }

        let dot = self
            .counts
            .iter()
            .filter_map(|(term, count)| other.counts.get(term).map(|other| count * other))
            .sum::<f64>();
        dot / (self.norm * other.norm)
    }
}

/// Splits on non-alphanumerics and camelCase boundaries, then lowercases.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .flat_map(split_camel_case)
        .map(|word| word.to_lowercase())
        .filter(|word| word.len() >= MIN_TERM_LEN && !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

fn split_camel_case(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in word.chars() {
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.push(ch);
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
