use std::path::PathBuf;

use snafu::Snafu;

pub type AnswerResult<T> = Result<T, AnswerError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AnswerError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("failed to read source index at {path:?} on `{stage}`: {source}"))]
    ReadSourceIndex {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse source index at {path:?} on `{stage}`: {source}"))]
    ParseSourceIndex {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("answer stream failed: {message}"))]
    StreamFailed {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("answer stream ended before a terminal event"))]
    StreamClosed { stage: &'static str },
    #[snafu(display("citation list was dropped before it resolved"))]
    CitationsDropped { stage: &'static str },
}

impl AnswerError {
    /// Pipeline stage that produced the error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingApiKey { stage, .. }
            | Self::UnsupportedProvider { stage, .. }
            | Self::HttpClient { stage, .. }
            | Self::CompletionsFailed { stage, .. }
            | Self::ReadSourceIndex { stage, .. }
            | Self::ParseSourceIndex { stage, .. }
            | Self::StreamFailed { stage, .. }
            | Self::StreamClosed { stage }
            | Self::CitationsDropped { stage } => stage,
        }
    }
}
