use std::sync::Arc;

use futures::StreamExt;
use repochat_llm::{
    AnswerError, AnswerHandle, AnswerRequest, AnswerResult, AnswerService, ProjectId,
};
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;

use crate::chat::context::ContextWindowBuilder;
use crate::chat::events::StoreEvent;
use crate::chat::input::{QueryInput, ValidationError};
use crate::chat::message::{MessageStatus, Source};
use crate::chat::notice::{Notice, Notices};
use crate::chat::selection::{SelectionResult, SelectionState};
use crate::chat::store::{ConversationStore, StoreError};
use crate::chat::stream::StreamConsumer;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DispatchError {
    #[snafu(display("message {open_index} is still being answered"))]
    Busy {
        stage: &'static str,
        open_index: usize,
    },
    #[snafu(display("invalid query on `{stage}`: {source}"))]
    InvalidInput {
        stage: &'static str,
        source: ValidationError,
    },
    #[snafu(display("conversation store rejected `{stage}`: {source}"))]
    Store {
        stage: &'static str,
        source: StoreError,
    },
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Where a submitted query ended up in the log and how its message was finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub index: usize,
    pub status: MessageStatus,
}

/// Runs queries against the answer service and owns the conversation state they mutate.
///
/// `submit` holds `&mut self` until the message is closed, so at most one query is in
/// flight per dispatcher.
pub struct QueryDispatcher {
    service: Arc<dyn AnswerService>,
    store: ConversationStore,
    selection: SelectionState,
    input: QueryInput,
    notices: Notices,
}

impl QueryDispatcher {
    pub fn new(service: Arc<dyn AnswerService>) -> Self {
        Self {
            service,
            store: ConversationStore::new(),
            selection: SelectionState::new(),
            input: QueryInput::new(),
            notices: Notices::default(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn input(&self) -> &QueryInput {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut QueryInput {
        &mut self.input
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    pub fn toggle_source(
        &mut self,
        message_index: usize,
        source_index: usize,
    ) -> SelectionResult<Option<usize>> {
        self.selection.toggle(message_index, source_index)
    }

    /// Submits the text currently held by the input.
    pub async fn submit_input(&mut self, project_id: &ProjectId) -> DispatchResult<Submission> {
        let query = self.input.take_submission().context(InvalidInputSnafu {
            stage: "take-input",
        })?;

        if let Some(open_index) = self.store.open_index() {
            self.input.restore(query);
            return BusySnafu {
                stage: "submit-input",
                open_index,
            }
            .fail();
        }

        self.submit(query, project_id).await
    }

    /// Appends a message for `query` and fills it from the answer service.
    ///
    /// Service failures are not returned as errors: they finalize the message, raise a
    /// notice and put `query` back into the input. Errors are reserved for broken
    /// conversation invariants.
    pub async fn submit(
        &mut self,
        query: String,
        project_id: &ProjectId,
    ) -> DispatchResult<Submission> {
        if let Some(open_index) = self.store.open_index() {
            return BusySnafu {
                stage: "submit",
                open_index,
            }
            .fail();
        }

        let history = ContextWindowBuilder::build(self.store.messages());
        let index = self.store.append(query.clone()).context(StoreSnafu {
            stage: "append-placeholder",
        })?;
        self.selection.reconcile(self.store.messages());
        self.input.lock();

        tracing::info!(
            message_index = index,
            project_id = %project_id,
            history_len = history.len(),
            service = self.service.name(),
            "submitting query"
        );

        let request = AnswerRequest::new(query.clone(), project_id.clone(), history);
        let service = Arc::clone(&self.service);
        let answered = service.ask(request).await;
        let status = match answered {
            Ok(handle) => self.consume(index, handle).await?,
            Err(error) => self.fail_submission(index, query, error),
        };

        self.store
            .close(index, status.clone())
            .context(StoreSnafu { stage: "close" })?;
        self.input.unlock();

        tracing::info!(message_index = index, status = ?status, "query finished");
        Ok(Submission { index, status })
    }

    async fn consume(
        &mut self,
        index: usize,
        handle: AnswerHandle,
    ) -> DispatchResult<MessageStatus> {
        let AnswerHandle {
            mut citations,
            mut fragments,
            worker,
        } = handle;
        tokio::spawn(worker);

        let mut consumer = StreamConsumer::new(index);
        let mut citations_pending = true;

        let outcome = loop {
            tokio::select! {
                resolved = &mut citations, if citations_pending => {
                    citations_pending = false;
                    self.apply_citations(index, resolved)?;
                }
                item = fragments.next() => {
                    let applied = consumer
                        .apply(&mut self.store, item)
                        .context(StoreSnafu { stage: "apply-fragment" })?;
                    if let Some(outcome) = applied {
                        tracing::debug!(
                            message_index = index,
                            fragment_count = consumer.fragments_applied(),
                            "answer stream ended"
                        );
                        break outcome;
                    }
                }
            }
        };

        // Sources must be assigned before the message is closed.
        if citations_pending {
            let resolved = citations.await;
            self.apply_citations(index, resolved)?;
        }

        Ok(outcome.into_status())
    }

    fn apply_citations(
        &mut self,
        index: usize,
        resolved: AnswerResult<Vec<Source>>,
    ) -> DispatchResult<()> {
        let sources = resolved.unwrap_or_else(|error| {
            tracing::warn!(
                message_index = index,
                error = %error,
                "citations failed to resolve; showing none"
            );
            Vec::new()
        });

        tracing::debug!(
            message_index = index,
            source_count = sources.len(),
            "citations resolved"
        );
        self.store
            .set_sources(index, sources)
            .context(StoreSnafu {
                stage: "set-sources",
            })?;
        Ok(())
    }

    fn fail_submission(
        &mut self,
        index: usize,
        query: String,
        error: AnswerError,
    ) -> MessageStatus {
        tracing::error!(
            message_index = index,
            stage = error.stage(),
            error = %error,
            "answer service failed before streaming"
        );

        self.notices.push(Notice::error(format!(
            "Could not get an answer ({error}). Your question was restored so you can send it again."
        )));
        self.input.restore(query);
        MessageStatus::Failed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use repochat_llm::{
        AnswerWorker, BoxFuture, ContextWindow, Exchange, FragmentStream, fragment_channel,
    };
    use tokio::sync::oneshot;

    use super::*;
    use crate::chat::notice::NoticeLevel;

    /// What the scripted service does for one call to `ask`.
    enum Script {
        Answer {
            citations: Vec<Source>,
            fragments: Vec<&'static str>,
        },
        LateCitations {
            citations: Vec<Source>,
            fragments: Vec<&'static str>,
        },
        FailMidStream {
            fragments: Vec<&'static str>,
            message: &'static str,
        },
        DropCitations {
            fragments: Vec<&'static str>,
        },
        Reject,
    }

    struct ScriptedService {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<AnswerRequest>>,
    }

    impl ScriptedService {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<AnswerRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    fn idle_worker() -> AnswerWorker {
        Box::pin(async {})
    }

    impl AnswerService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        fn ask<'a>(&'a self, request: AnswerRequest) -> BoxFuture<'a, AnswerResult<AnswerHandle>> {
            Box::pin(async move {
                self.requests.lock().expect("requests lock").push(request);
                let script = self
                    .scripts
                    .lock()
                    .expect("scripts lock")
                    .pop_front()
                    .expect("a script per request");

                match script {
                    Script::Answer {
                        citations,
                        fragments,
                    } => Ok(AnswerHandle::with_resolved_citations(
                        citations,
                        FragmentStream::from_fragments(fragments),
                        idle_worker(),
                    )),
                    Script::LateCitations {
                        citations,
                        fragments,
                    } => {
                        let (citations_tx, citations_rx) = oneshot::channel();
                        let (sender, stream) = fragment_channel();
                        let worker: AnswerWorker = Box::pin(async move {
                            for fragment in fragments {
                                sender.delta(fragment);
                            }
                            sender.done();
                            tokio::task::yield_now().await;
                            let _ = citations_tx.send(citations);
                        });
                        let citations = Box::pin(async move {
                            citations_rx.await.map_err(|_| AnswerError::CitationsDropped {
                                stage: "scripted-citations",
                            })
                        });
                        Ok(AnswerHandle::new(citations, stream, worker))
                    }
                    Script::FailMidStream { fragments, message } => {
                        let (sender, stream) = fragment_channel();
                        let worker: AnswerWorker = Box::pin(async move {
                            for fragment in fragments {
                                sender.delta(fragment);
                            }
                            sender.fail(message);
                        });
                        Ok(AnswerHandle::with_resolved_citations(
                            vec![auth_source()],
                            stream,
                            worker,
                        ))
                    }
                    Script::DropCitations { fragments } => {
                        let citations = Box::pin(async {
                            Err::<Vec<Source>, _>(AnswerError::CitationsDropped {
                                stage: "scripted-citations",
                            })
                        });
                        Ok(AnswerHandle::new(
                            citations,
                            FragmentStream::from_fragments(fragments),
                            idle_worker(),
                        ))
                    }
                    Script::Reject => Err(AnswerError::StreamFailed {
                        stage: "scripted-ask",
                        message: "service unavailable".to_string(),
                    }),
                }
            })
        }
    }

    fn auth_source() -> Source {
        Source::new(
            "auth.ts",
            "Validates login credentials",
            "export async function login() {}",
            0.92,
        )
    }

    fn answer(fragments: Vec<&'static str>) -> Script {
        Script::Answer {
            citations: vec![auth_source()],
            fragments,
        }
    }

    fn project() -> ProjectId {
        ProjectId::new("project-1")
    }

    #[tokio::test]
    async fn login_question_streams_into_a_single_message() {
        let service = ScriptedService::new(vec![answer(vec![
            "The ",
            "login ",
            "handler ",
            "validates credentials.",
        ])]);
        let mut dispatcher = QueryDispatcher::new(service.clone());

        let submission = dispatcher
            .submit("What does the login handler do?".to_string(), &project())
            .await
            .expect("submit");

        assert_eq!(submission, Submission {
            index: 0,
            status: MessageStatus::Done,
        });
        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].history.is_empty());
        assert_eq!(requests[0].project_id, project());

        let message = dispatcher.store().get(0).expect("message");
        assert_eq!(message.query(), "What does the login handler do?");
        assert_eq!(message.answer(), "The login handler validates credentials.");
        assert_eq!(message.sources().len(), 1);
        assert_eq!(message.sources()[0].file_name, "auth.ts");
        assert!(dispatcher.store().open_index().is_none());
        assert!(!dispatcher.input().is_locked());
    }

    #[tokio::test]
    async fn fifth_query_sees_only_the_three_latest_exchanges() {
        let scripts = (1..=5).map(|_| answer(vec!["answer"])).collect();
        let service = ScriptedService::new(scripts);
        let mut dispatcher = QueryDispatcher::new(service.clone());

        for turn in 1..=5 {
            dispatcher
                .submit(format!("question {turn}"), &project())
                .await
                .expect("submit");
        }

        let requests = service.requests();
        let window_sizes = requests
            .iter()
            .map(|request| request.history.len())
            .collect::<Vec<_>>();
        assert_eq!(window_sizes, vec![0, 1, 2, 3, 3]);
        assert_eq!(
            requests[4].history,
            ContextWindow::new(vec![
                Exchange::new("question 2", "answer"),
                Exchange::new("question 3", "answer"),
                Exchange::new("question 4", "answer"),
            ])
        );
    }

    #[tokio::test]
    async fn successful_queries_keep_submission_order_and_set_sources_once() {
        let scripts = (0..4).map(|_| answer(vec!["a", "b"])).collect();
        let mut dispatcher = QueryDispatcher::new(ScriptedService::new(scripts));

        for turn in 0..4 {
            let submission = dispatcher
                .submit(format!("q{turn}"), &project())
                .await
                .expect("submit");
            assert_eq!(submission.index, turn);
        }

        let messages = dispatcher.store().messages();
        assert_eq!(messages.len(), 4);
        for (turn, message) in messages.iter().enumerate() {
            assert_eq!(message.query(), format!("q{turn}"));
            assert_eq!(message.answer(), "ab");
            assert!(message.has_sources());
            assert_eq!(message.sources().len(), 1);
        }
        assert_eq!(dispatcher.selection().len(), 4);
    }

    #[tokio::test]
    async fn submission_failure_keeps_placeholder_and_restores_input() {
        let service = ScriptedService::new(vec![Script::Reject, answer(vec!["ok"])]);
        let mut dispatcher = QueryDispatcher::new(service);
        dispatcher.input_mut().set_text("Where is the router?");

        let submission = dispatcher
            .submit_input(&project())
            .await
            .expect("failure is handled");

        assert!(matches!(submission.status, MessageStatus::Failed(_)));
        assert_eq!(dispatcher.store().len(), 1);
        let placeholder = dispatcher.store().get(0).expect("placeholder");
        assert_eq!(placeholder.query(), "Where is the router?");
        assert!(placeholder.answer().is_empty());
        assert_eq!(dispatcher.input().text(), "Where is the router?");
        assert!(!dispatcher.input().is_locked());

        let notices = dispatcher.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);

        let retry = dispatcher.submit_input(&project()).await.expect("retry");
        assert_eq!(retry.index, 1);
        assert_eq!(retry.status, MessageStatus::Done);
    }

    #[tokio::test]
    async fn mid_stream_failure_retains_partial_answer_without_notice() {
        let service = ScriptedService::new(vec![Script::FailMidStream {
            fragments: vec!["The router ", "maps"],
            message: "connection reset",
        }]);
        let mut dispatcher = QueryDispatcher::new(service);

        let submission = dispatcher
            .submit("Where is the router?".to_string(), &project())
            .await
            .expect("submit");

        assert!(matches!(submission.status, MessageStatus::Interrupted(_)));
        let message = dispatcher.store().get(0).expect("message");
        assert_eq!(message.answer(), "The router maps");
        assert_eq!(message.sources().len(), 1);
        assert!(dispatcher.drain_notices().is_empty());
        assert!(dispatcher.input().text().is_empty());
    }

    #[tokio::test]
    async fn citations_arriving_after_the_stream_are_still_applied() {
        let service = ScriptedService::new(vec![Script::LateCitations {
            citations: vec![auth_source(), auth_source()],
            fragments: vec!["streamed ", "first"],
        }]);
        let mut dispatcher = QueryDispatcher::new(service);
        let mut events = dispatcher.subscribe();

        dispatcher
            .submit("q".to_string(), &project())
            .await
            .expect("submit");

        let message = dispatcher.store().get(0).expect("message");
        assert_eq!(message.answer(), "streamed first");
        assert_eq!(message.sources().len(), 2);

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert!(matches!(received.first(), Some(StoreEvent::Appended { .. })));
        assert!(matches!(received.last(), Some(StoreEvent::Closed { .. })));
        let sources_set = received
            .iter()
            .filter(|event| matches!(event, StoreEvent::SourcesSet { .. }))
            .count();
        assert_eq!(sources_set, 1);
    }

    #[tokio::test]
    async fn failed_citations_leave_an_empty_source_list() {
        let service = ScriptedService::new(vec![Script::DropCitations {
            fragments: vec!["answer"],
        }]);
        let mut dispatcher = QueryDispatcher::new(service);

        let submission = dispatcher
            .submit("q".to_string(), &project())
            .await
            .expect("submit");

        assert_eq!(submission.status, MessageStatus::Done);
        let message = dispatcher.store().get(0).expect("message");
        assert!(message.has_sources());
        assert!(message.sources().is_empty());
        assert_eq!(message.answer(), "answer");
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_touching_the_log() {
        let service = ScriptedService::new(Vec::new());
        let mut dispatcher = QueryDispatcher::new(service.clone());
        dispatcher.input_mut().set_text("   ");

        let result = dispatcher.submit_input(&project()).await;

        assert!(matches!(result, Err(DispatchError::InvalidInput { .. })));
        assert!(dispatcher.store().is_empty());
        assert!(service.requests().is_empty());
        assert_eq!(dispatcher.input().text(), "   ");
    }

    #[tokio::test]
    async fn submit_is_rejected_while_a_message_is_open() {
        let service = ScriptedService::new(Vec::new());
        let mut dispatcher = QueryDispatcher::new(service.clone());
        dispatcher.store.append("stuck").expect("append");
        dispatcher.input_mut().set_text("next question");

        let result = dispatcher.submit_input(&project()).await;

        assert!(matches!(
            result,
            Err(DispatchError::Busy { open_index: 0, .. })
        ));
        assert_eq!(dispatcher.store().len(), 1);
        assert_eq!(dispatcher.input().text(), "next question");
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn selection_tracks_new_messages() {
        let service = ScriptedService::new(vec![answer(vec!["x"]), answer(vec!["y"])]);
        let mut dispatcher = QueryDispatcher::new(service);

        dispatcher
            .submit("first".to_string(), &project())
            .await
            .expect("submit");
        assert_eq!(dispatcher.toggle_source(0, 0).expect("toggle"), Some(0));

        dispatcher
            .submit("second".to_string(), &project())
            .await
            .expect("submit");

        assert_eq!(dispatcher.selection().selected(0), Some(0));
        assert_eq!(dispatcher.selection().selected(1), None);
        assert_eq!(dispatcher.toggle_source(0, 0).expect("toggle"), None);
    }
}
