use snafu::{Snafu, ensure};
use tokio::sync::mpsc;

use crate::chat::events::StoreEvent;
use crate::chat::message::{ChatMessage, MessageStatus, Source};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("message {open_index} is still open on `{stage}`"))]
    MessageStillOpen {
        stage: &'static str,
        open_index: usize,
    },
    #[snafu(display("message {index} is not the open message on `{stage}`"))]
    MessageNotOpen { stage: &'static str, index: usize },
    #[snafu(display("cannot close message {index} with open status {status:?}"))]
    OpenCloseStatus {
        stage: &'static str,
        index: usize,
        status: MessageStatus,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ordered chat log.
///
/// Append-only, except that the single open message (always the last one) receives its
/// citations and answer fragments in place. Every mutation is published to subscribers
/// before the mutating call returns.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<ChatMessage>,
    open: Option<usize>,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&ChatMessage> {
        self.messages.get(index)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn open_index(&self) -> Option<usize> {
        self.open
    }

    /// Receives every subsequent mutation. Closed receivers are pruned on the next publish.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.subscribers.push(events_tx);
        events_rx
    }

    /// Opens a new message for `query` at the end of the log.
    pub fn append(&mut self, query: impl Into<String>) -> StoreResult<usize> {
        if let Some(open_index) = self.open {
            return MessageStillOpenSnafu {
                stage: "append",
                open_index,
            }
            .fail();
        }

        let query = query.into();
        let index = self.messages.len();
        self.messages.push(ChatMessage::pending(query.clone()));
        self.open = Some(index);
        self.publish(StoreEvent::Appended { index, query });
        Ok(index)
    }

    /// Assigns citations to the open message.
    ///
    /// Only the first call per message takes effect; later calls return `Ok(false)`.
    pub fn set_sources(&mut self, index: usize, sources: Vec<Source>) -> StoreResult<bool> {
        let message = self.open_message_mut(index, "set-sources")?;
        if message.has_sources() {
            tracing::debug!(
                message_index = index,
                "sources already assigned; ignoring later citations"
            );
            return Ok(false);
        }
        message.assign_sources(sources.clone());

        self.publish(StoreEvent::SourcesSet { index, sources });
        Ok(true)
    }

    pub fn append_answer_fragment(&mut self, index: usize, fragment: &str) -> StoreResult<()> {
        self.open_message_mut(index, "append-answer-fragment")?.push_fragment(fragment);
        self.publish(StoreEvent::FragmentAppended {
            index,
            fragment: fragment.to_string(),
        });
        Ok(())
    }

    /// Finalizes the open message; it accepts no further writes.
    pub fn close(&mut self, index: usize, status: MessageStatus) -> StoreResult<()> {
        ensure!(
            !status.is_open(),
            OpenCloseStatusSnafu {
                stage: "close",
                index,
                status,
            }
        );

        self.open_message_mut(index, "close")?.finalize(status.clone());
        self.open = None;
        self.publish(StoreEvent::Closed { index, status });
        Ok(())
    }

    fn open_message_mut(
        &mut self,
        index: usize,
        stage: &'static str,
    ) -> StoreResult<&mut ChatMessage> {
        match (self.open, self.messages.get_mut(index)) {
            (Some(open_index), Some(message)) if open_index == index => Ok(message),
            _ => MessageNotOpenSnafu { stage, index }.fail(),
        }
    }

    fn publish(&mut self, event: StoreEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
