use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::error::{AnswerError, AnswerResult};
use super::fragments::FragmentStream;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type AnswerWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type Citations = BoxFuture<'static, AnswerResult<Vec<Source>>>;

/// One cited code excerpt returned by the answer service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub file_name: String,
    pub summary: String,
    pub source_code: String,
    #[serde(default)]
    pub similarity: f64,
}

impl Source {
    pub fn new(
        file_name: impl Into<String>,
        summary: impl Into<String>,
        source_code: impl Into<String>,
        similarity: f64,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            summary: summary.into(),
            source_code: source_code.into(),
            similarity,
        }
    }
}

/// Project the questions are asked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ProjectId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<ProjectId> for String {
    fn from(project_id: ProjectId) -> Self {
        project_id.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// A completed prior question and its answer, without citations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub query: String,
    pub answer: String,
}

impl Exchange {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
        }
    }
}

/// Recent exchanges sent along with a query, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextWindow {
    exchanges: Vec<Exchange>,
}

impl ContextWindow {
    pub fn new(exchanges: Vec<Exchange>) -> Self {
        Self { exchanges }
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRequest {
    pub query: String,
    pub project_id: ProjectId,
    pub history: ContextWindow,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>, project_id: ProjectId, history: ContextWindow) -> Self {
        Self {
            query: query.into(),
            project_id,
            history,
        }
    }
}

/// The two independent result channels of one answer.
///
/// `worker` drives the fragment producer and must be polled (usually spawned on the
/// runtime) for `fragments` to make progress.
pub struct AnswerHandle {
    pub citations: Citations,
    pub fragments: FragmentStream,
    pub worker: AnswerWorker,
}

impl AnswerHandle {
    pub fn new(citations: Citations, fragments: FragmentStream, worker: AnswerWorker) -> Self {
        Self {
            citations,
            fragments,
            worker,
        }
    }

    /// Builds a handle whose citation list is already known.
    pub fn with_resolved_citations(
        citations: Vec<Source>,
        fragments: FragmentStream,
        worker: AnswerWorker,
    ) -> Self {
        Self::new(
            Box::pin(async move { Ok::<_, AnswerError>(citations) }),
            fragments,
            worker,
        )
    }
}

pub trait AnswerService: Send + Sync {
    fn name(&self) -> &str;

    /// Starts answering `request`.
    ///
    /// An `Err` here means no handles were produced; errors after that point travel
    /// through the fragment stream instead.
    fn ask<'a>(&'a self, request: AnswerRequest) -> BoxFuture<'a, AnswerResult<AnswerHandle>>;
}
