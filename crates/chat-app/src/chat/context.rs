use repochat_llm::{ContextWindow, Exchange};

use crate::chat::message::ChatMessage;

/// Maximum number of prior exchanges sent with a query.
pub const CONTEXT_WINDOW_LEN: usize = 3;

pub struct ContextWindowBuilder;

impl ContextWindowBuilder {
    /// Projects the trailing messages of `messages` to `(query, answer)` pairs, oldest first.
    ///
    /// Call this before appending the message for the new query so the window never
    /// contains the question being asked.
    pub fn build(messages: &[ChatMessage]) -> ContextWindow {
        let start = messages.len().saturating_sub(CONTEXT_WINDOW_LEN);
        ContextWindow::new(
            messages[start..]
                .iter()
                .map(|message| Exchange::new(message.query(), message.answer()))
                .collect(),
        )
    }
}
