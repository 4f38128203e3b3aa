pub use repochat_llm::Source;

/// Lifecycle status for one message.
///
/// `Pending` and `Streaming` mark the single open message; every other status is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Streaming,
    Done,
    Interrupted(String),
    Failed(String),
}

impl MessageStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }
}

/// One conversational turn: a question and its incrementally built answer.
///
/// Fields are only writable through the conversation store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    query: String,
    answer: String,
    sources: Vec<Source>,
    sources_set: bool,
    status: MessageStatus,
}

impl ChatMessage {
    pub(crate) fn pending(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: String::new(),
            sources: Vec::new(),
            sources_set: false,
            status: MessageStatus::Pending,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Whether the citation list has been assigned, even if it was empty.
    pub fn has_sources(&self) -> bool {
        self.sources_set
    }

    pub fn status(&self) -> &MessageStatus {
        &self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Returns `false` when sources were already assigned.
    pub(crate) fn assign_sources(&mut self, sources: Vec<Source>) {
        self.sources = sources;
        self.sources_set = true;
    }

    pub(crate) fn push_fragment(&mut self, fragment: &str) {
        self.answer.push_str(fragment);
        if self.status == MessageStatus::Pending {
            self.status = MessageStatus::Streaming;
        }
    }

    pub(crate) fn finalize(&mut self, status: MessageStatus) {
        self.status = status;
    }
}
