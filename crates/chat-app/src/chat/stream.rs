use futures::{Stream, StreamExt};
use repochat_llm::AnswerResult;

use crate::chat::message::MessageStatus;
use crate::chat::store::{ConversationStore, StoreResult};

/// How a fragment sequence terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Interrupted(String),
}

impl StreamOutcome {
    pub fn into_status(self) -> MessageStatus {
        match self {
            Self::Completed => MessageStatus::Done,
            Self::Interrupted(reason) => MessageStatus::Interrupted(reason),
        }
    }
}

/// Folds answer fragments into one open message, in arrival order.
#[derive(Debug)]
pub struct StreamConsumer {
    index: usize,
    applied: usize,
    outcome: Option<StreamOutcome>,
}

impl StreamConsumer {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            applied: 0,
            outcome: None,
        }
    }

    pub fn fragments_applied(&self) -> usize {
        self.applied
    }

    /// Applies one item pulled from the fragment sequence.
    ///
    /// `None` (end of sequence) and `Some(Err(_))` both terminate the fold and return the
    /// outcome; text applied so far is kept either way. Items after termination are ignored.
    pub fn apply(
        &mut self,
        store: &mut ConversationStore,
        item: Option<AnswerResult<String>>,
    ) -> StoreResult<Option<StreamOutcome>> {
        if self.outcome.is_some() {
            return Ok(self.outcome.clone());
        }

        let outcome = match item {
            Some(Ok(fragment)) => {
                store.append_answer_fragment(self.index, &fragment)?;
                self.applied += 1;
                return Ok(None);
            }
            Some(Err(error)) => {
                tracing::warn!(
                    message_index = self.index,
                    fragment_count = self.applied,
                    error = %error,
                    "answer stream failed; keeping partial answer"
                );
                StreamOutcome::Interrupted(error.to_string())
            }
            None => {
                tracing::debug!(
                    message_index = self.index,
                    fragment_count = self.applied,
                    "answer stream completed"
                );
                StreamOutcome::Completed
            }
        };

        self.outcome = Some(outcome.clone());
        Ok(Some(outcome))
    }

    /// Drains `fragments` into the store until the sequence terminates.
    pub async fn run<S>(
        mut self,
        store: &mut ConversationStore,
        mut fragments: S,
    ) -> StoreResult<StreamOutcome>
    where
        S: Stream<Item = AnswerResult<String>> + Unpin,
    {
        loop {
            let item = fragments.next().await;
            if let Some(outcome) = self.apply(store, item)? {
                return Ok(outcome);
            }
        }
    }
}
