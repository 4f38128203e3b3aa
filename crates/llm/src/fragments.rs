use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::Stream;
use tokio::sync::mpsc;

use super::error::{AnswerResult, StreamClosedSnafu, StreamFailedSnafu};

/// Producer-side signal for one answer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentEvent {
    Delta(String),
    Done,
    Failed(String),
}

/// Writing half of a fragment stream.
#[derive(Debug, Clone)]
pub struct FragmentSender {
    events: mpsc::UnboundedSender<FragmentEvent>,
}

impl FragmentSender {
    /// Sends one fragment. Returns `false` once the consumer is gone.
    pub fn delta(&self, text: impl Into<String>) -> bool {
        self.events.send(FragmentEvent::Delta(text.into())).is_ok()
    }

    pub fn done(self) {
        let _ = self.events.send(FragmentEvent::Done);
    }

    pub fn fail(self, message: impl Into<String>) {
        let _ = self.events.send(FragmentEvent::Failed(message.into()));
    }
}

/// Lazy, ordered sequence of answer fragments.
///
/// Yields `Ok(fragment)` in production order and ends after `Done`. A `Failed` signal, or
/// a producer that disappears without any terminal signal, yields exactly one `Err` and
/// then ends.
#[derive(Debug)]
pub struct FragmentStream {
    events: mpsc::UnboundedReceiver<FragmentEvent>,
    finished: bool,
}

pub fn fragment_channel() -> (FragmentSender, FragmentStream) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    (
        FragmentSender { events: events_tx },
        FragmentStream {
            events: events_rx,
            finished: false,
        },
    )
}

impl FragmentStream {
    /// Builds an already-completed stream holding `fragments`.
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, stream) = fragment_channel();
        for fragment in fragments {
            sender.delta(fragment);
        }
        sender.done();
        stream
    }

    pub async fn recv(&mut self) -> Option<AnswerResult<String>> {
        futures::StreamExt::next(self).await
    }

    fn finish(&mut self) {
        self.finished = true;
        self.events.close();
    }
}

impl Stream for FragmentStream {
    type Item = AnswerResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let item = match ready!(self.events.poll_recv(cx)) {
            Some(FragmentEvent::Delta(text)) => Some(Ok(text)),
            Some(FragmentEvent::Done) => {
                self.finish();
                None
            }
            Some(FragmentEvent::Failed(message)) => {
                self.finish();
                Some(
                    StreamFailedSnafu {
                        stage: "fragment-stream",
                        message,
                    }
                    .fail(),
                )
            }
            None => {
                self.finish();
                Some(
                    StreamClosedSnafu {
                        stage: "fragment-stream",
                    }
                    .fail(),
                )
            }
        };

        Poll::Ready(item)
    }
}
