//! Answer-service contract for repository question answering, plus a rig-backed adapter.
use std::sync::Arc;

mod contract;
mod error;
mod fragments;
mod model;
mod retriever;
mod rig_adapter;

pub use contract::{
    AnswerHandle, AnswerRequest, AnswerService, AnswerWorker, BoxFuture, Citations,
    ContextWindow, Exchange, ProjectId, Source,
};
pub use error::{AnswerError, AnswerResult};
pub use fragments::{FragmentEvent, FragmentSender, FragmentStream, fragment_channel};
pub use model::{DEFAULT_ENDPOINT, DEFAULT_OPENAI_MODEL, DEFAULT_PROVIDER_ID, RagModelConfig};
pub use retriever::{
    DEFAULT_MIN_SIMILARITY, DEFAULT_RETRIEVAL_LIMIT, IndexedFile, SourceIndex, SourceRetriever,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigAnswerService};

pub fn create_answer_service(
    mut config: RagModelConfig,
    retriever: Arc<dyn SourceRetriever>,
) -> AnswerResult<Arc<dyn AnswerService>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigAnswerService::new(config, retriever)?))
        }
        _ => Err(AnswerError::UnsupportedProvider {
            stage: "create-answer-service",
            provider_id: config.provider_id,
        }),
    }
}
