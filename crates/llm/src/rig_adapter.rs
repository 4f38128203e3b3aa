use std::sync::Arc;

use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};

use super::contract::{
    AnswerHandle, AnswerRequest, AnswerService, AnswerWorker, BoxFuture, ContextWindow, Source,
};
use super::error::{AnswerResult, CompletionsFailedSnafu, HttpClientSnafu, MissingApiKeySnafu};
use super::fragments::{FragmentSender, fragment_channel};
use super::model::RagModelConfig;
use super::retriever::SourceRetriever;

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

const ASSISTANT_PREAMBLE: &str = "You are a code assistant answering questions about a \
software project for a developer who may be new to it. Answer using the code excerpts in \
the context block. Quote the relevant code and explain it step by step. If the context \
does not contain the answer, say that you do not know instead of guessing. Format the \
answer as markdown.";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// Answers questions by retrieving cited excerpts and streaming a rig completion over them.
pub struct RigAnswerService {
    config: RagModelConfig,
    retriever: Arc<dyn SourceRetriever>,
}

impl RigAnswerService {
    pub fn new(config: RagModelConfig, retriever: Arc<dyn SourceRetriever>) -> AnswerResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-answer-service-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config, retriever })
    }

    fn build_client(config: &RagModelConfig) -> AnswerResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn context_preamble(sources: &[Source]) -> String {
        let mut preamble = String::from(ASSISTANT_PREAMBLE);
        preamble.push_str("\n\nSTART CONTEXT BLOCK\n");
        for source in sources {
            preamble.push_str(&format!(
                "source: {}\nsummary of file: {}\ncode content:\n{}\n\n",
                source.file_name, source.summary, source.source_code
            ));
        }
        preamble.push_str("END OF CONTEXT BLOCK");
        preamble
    }

    fn history_messages(history: &ContextWindow) -> Vec<RigMessage> {
        history
            .iter()
            .flat_map(|exchange| {
                [
                    RigMessage::user(exchange.query.clone()),
                    RigMessage::assistant(exchange.answer.clone()),
                ]
            })
            .collect()
    }

    async fn open_stream(
        config: &RagModelConfig,
        request: &AnswerRequest,
        sources: &[Source],
    ) -> AnswerResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(config.model_id.clone());

        let mut builder = model
            .completion_request(RigMessage::user(request.query.clone()))
            .messages(Self::history_messages(&request.history))
            .preamble(Self::context_preamble(sources));

        if let Some(temperature) = config.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(text.text),
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn answer(&self, request: AnswerRequest) -> AnswerResult<AnswerHandle> {
        let sources = self
            .retriever
            .retrieve(&request.query, &request.project_id)
            .await?;

        tracing::debug!(
            project_id = %request.project_id,
            source_count = sources.len(),
            history_len = request.history.len(),
            model_id = %self.config.model_id,
            "opening completion stream"
        );

        let stream = match Self::open_stream(&self.config, &request, &sources).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    provider_id = %self.config.provider_id,
                    model_id = %self.config.model_id,
                    error = %error,
                    "failed to open completion stream"
                );
                return Err(error);
            }
        };

        let (sender, fragments) = fragment_channel();
        let worker: AnswerWorker = Box::pin(Self::run_stream_worker(stream, sender));

        Ok(AnswerHandle::with_resolved_citations(
            sources, fragments, worker,
        ))
    }

    async fn run_stream_worker(mut stream: RigStreamingResponse, sender: FragmentSender) {
        let mut fragment_count = 0usize;

        while let Some(next_item) = stream.next().await {
            match next_item {
                Ok(item) => {
                    let Some(text) = Self::map_stream_item(item) else {
                        continue;
                    };
                    fragment_count += 1;
                    if !sender.delta(text) {
                        tracing::debug!(fragment_count, "answer consumer went away");
                        return;
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        fragment_count,
                        error = %error,
                        "completion stream emitted an error chunk"
                    );
                    sender.fail(error.to_string());
                    return;
                }
            }
        }

        tracing::debug!(fragment_count, "completion stream finished");
        sender.done();
    }
}

impl AnswerService for RigAnswerService {
    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn ask<'a>(&'a self, request: AnswerRequest) -> BoxFuture<'a, AnswerResult<AnswerHandle>> {
        Box::pin(self.answer(request))
    }
}
